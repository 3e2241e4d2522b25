//! Helper DSL for common graph shapes.

use super::{Dag, DagEdge, NodeOptions, PipelineBuilder};
use crate::errors::BuildError;
use crate::steps::{branch_handle, merge_handle, BranchStep, FanInStep, FanOutStep, MergeStrategy, StepExecutor};
use std::sync::Arc;

/// A fluent builder that tracks the last added node.
#[derive(Debug)]
pub struct FluentPipelineBuilder {
    inner: PipelineBuilder,
    last_node: Option<String>,
    node_count: usize,
}

impl FluentPipelineBuilder {
    /// Creates a new fluent builder.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            inner: PipelineBuilder::new(name),
            last_node: None,
            node_count: 0,
        }
    }

    /// Adds a node fed by the given dependencies.
    #[must_use]
    pub fn node(
        mut self,
        id: impl Into<String>,
        step: Arc<dyn StepExecutor>,
        options: NodeOptions,
        depends_on: &[&str],
    ) -> Self {
        let id = id.into();
        self.inner = self.inner.add_node(&id, step, options);
        for dep in depends_on {
            self.inner = self.inner.add_edge(*dep, &id);
        }
        self.node_count += 1;
        self.last_node = Some(id);
        self
    }

    /// Adds `{prefix}1 .. {prefix}n`, each fed by the previous one.
    ///
    /// The first node is fed by `first_depends_on` when given. An empty
    /// step list leaves the builder unchanged.
    #[must_use]
    pub fn with_linear_chain<I>(mut self, prefix: &str, steps: I, first_depends_on: Option<&str>) -> Self
    where
        I: IntoIterator<Item = Arc<dyn StepExecutor>>,
    {
        let mut previous = first_depends_on.map(str::to_string);
        for (i, step) in steps.into_iter().enumerate() {
            let id = format!("{prefix}{}", i + 1);
            let deps: Vec<&str> = previous.iter().map(String::as_str).collect();
            self = self.node(&id, step, NodeOptions::default(), &deps);
            previous = Some(id);
        }
        self
    }

    /// Adds `{prefix}1 .. {prefix}n`, all fed by the same dependencies.
    #[must_use]
    pub fn with_parallel_stages<I>(mut self, prefix: &str, steps: I, depends_on: &[&str]) -> Self
    where
        I: IntoIterator<Item = Arc<dyn StepExecutor>>,
    {
        for (i, step) in steps.into_iter().enumerate() {
            self = self.node(format!("{prefix}{}", i + 1), step, NodeOptions::default(), depends_on);
        }
        self
    }

    /// Adds a fan-out node, one worker per branch and a fan-in node.
    ///
    /// Branch `i` of the fan-out feeds worker `{worker_prefix}{i}` on its
    /// `input` handle, and the worker feeds handle `in-{i}` of the fan-in.
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn with_fan_out_fan_in(
        mut self,
        fan_out_id: &str,
        fan_out: FanOutStep,
        worker_prefix: &str,
        workers: Vec<Arc<dyn StepExecutor>>,
        fan_in_id: &str,
        merge: MergeStrategy,
        depends_on: &[&str],
    ) -> Self {
        let count = workers.len();
        self = self.node(fan_out_id, Arc::new(fan_out), NodeOptions::default(), depends_on);

        let mut worker_ids = Vec::with_capacity(count);
        for (i, step) in workers.into_iter().enumerate() {
            let id = format!("{worker_prefix}{}", i + 1);
            self.inner = self.inner.add_node(&id, step, NodeOptions::default()).add_edge_with(
                DagEdge::new(fan_out_id, &id).with_source_handle(branch_handle(i)),
            );
            self.node_count += 1;
            worker_ids.push(id);
        }

        self.inner = self.inner.add_node(
            fan_in_id,
            Arc::new(FanInStep::with_branches(count, merge)),
            NodeOptions::default(),
        );
        for (i, worker) in worker_ids.iter().enumerate() {
            self.inner = self
                .inner
                .add_edge_with(DagEdge::new(worker, fan_in_id).with_target_handle(merge_handle(i)));
        }
        self.node_count += 1;
        self.last_node = Some(fan_in_id.to_string());
        self
    }

    /// Adds a router, one gated node per branch and a merge node.
    ///
    /// Each branch runs only when the router's output equals the branch id.
    /// The merge node receives every branch on a handle named after it,
    /// `null` for the branches that were skipped.
    #[must_use]
    pub fn with_conditional_branch(
        mut self,
        router_id: &str,
        router: Arc<dyn StepExecutor>,
        branches: Vec<(&str, Arc<dyn StepExecutor>)>,
        merge_id: &str,
        depends_on: &[&str],
    ) -> Self {
        self = self.node(router_id, router, NodeOptions::default(), depends_on);

        let handles: Vec<String> = branches.iter().map(|(id, _)| (*id).to_string()).collect();
        for (id, step) in branches {
            let options = NodeOptions::default()
                .with_shared_condition(BranchStep::route_is(router_id, id));
            self = self.node(id, step, options, &[router_id]);
        }

        self.inner = self.inner.add_node(
            merge_id,
            Arc::new(FanInStep::new(handles.clone(), MergeStrategy::Object)),
            NodeOptions::default(),
        );
        for handle in &handles {
            self.inner = self
                .inner
                .add_edge_with(DagEdge::new(handle, merge_id).with_target_handle(handle));
        }
        self.node_count += 1;
        self.last_node = Some(merge_id.to_string());
        self
    }

    /// The last added node.
    #[must_use]
    pub fn last_node(&self) -> Option<&str> {
        self.last_node.as_deref()
    }

    /// Number of nodes added so far.
    #[must_use]
    pub const fn node_count(&self) -> usize {
        self.node_count
    }

    /// Returns the underlying builder.
    #[must_use]
    pub fn into_inner(self) -> PipelineBuilder {
        self.inner
    }

    /// Builds the graph.
    ///
    /// # Errors
    ///
    /// See [`PipelineBuilder::build`].
    pub fn build(self) -> Result<Dag, BuildError> {
        self.inner.build()
    }
}
