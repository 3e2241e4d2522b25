//! Nodes, edges and per-node options.

use super::{FailureStrategy, RetryPolicy};
use crate::context::{PipelineContext, DEFAULT_INPUT_HANDLE};
use crate::steps::StepExecutor;
use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;

/// Default source handle: the node's whole output.
pub const DEFAULT_OUTPUT_HANDLE: &str = "output";

/// Predicate deciding, once a node is ready, whether it runs.
pub type Condition = Arc<dyn Fn(&PipelineContext) -> bool + Send + Sync>;

/// Scheduling policy for one node.
#[derive(Clone, Default)]
pub struct NodeOptions {
    /// Skip the node when this returns false. A panicking condition counts
    /// as false.
    pub condition: Option<Condition>,
    /// What a final failure does to the rest of the graph.
    pub failure_strategy: FailureStrategy,
    /// Retry policy; the engine default applies when unset.
    pub retry: Option<RetryPolicy>,
    /// Per-attempt timeout; the engine default applies when unset.
    pub timeout: Option<Duration>,
    /// Bound on all attempts together, backoff included.
    pub deadline: Option<Duration>,
    /// Human-readable label.
    pub label: Option<String>,
}

impl NodeOptions {
    /// Creates default options.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the run condition.
    #[must_use]
    pub fn with_condition<F>(mut self, condition: F) -> Self
    where
        F: Fn(&PipelineContext) -> bool + Send + Sync + 'static,
    {
        self.condition = Some(Arc::new(condition));
        self
    }

    /// Sets a shared condition.
    #[must_use]
    pub fn with_shared_condition(mut self, condition: Condition) -> Self {
        self.condition = Some(condition);
        self
    }

    /// Sets the failure strategy.
    #[must_use]
    pub const fn with_failure_strategy(mut self, strategy: FailureStrategy) -> Self {
        self.failure_strategy = strategy;
        self
    }

    /// Sets the retry policy.
    #[must_use]
    pub fn with_retry(mut self, policy: RetryPolicy) -> Self {
        self.retry = Some(policy);
        self
    }

    /// Sets the per-attempt timeout.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Sets the whole-node deadline.
    #[must_use]
    pub const fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Sets the label.
    #[must_use]
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }
}

impl Debug for NodeOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeOptions")
            .field("conditional", &self.condition.is_some())
            .field("failure_strategy", &self.failure_strategy)
            .field("retry", &self.retry)
            .field("timeout", &self.timeout)
            .field("deadline", &self.deadline)
            .field("label", &self.label)
            .finish()
    }
}

/// A node: an id bound to exactly one step executor.
#[derive(Debug, Clone)]
pub struct DagNode {
    /// Unique id within the graph.
    pub id: String,
    /// The work performed.
    pub step: Arc<dyn StepExecutor>,
    /// Scheduling policy.
    pub options: NodeOptions,
}

impl DagNode {
    /// Creates a node with default options.
    #[must_use]
    pub fn new(id: impl Into<String>, step: Arc<dyn StepExecutor>) -> Self {
        Self {
            id: id.into(),
            step,
            options: NodeOptions::default(),
        }
    }

    /// Replaces the options.
    #[must_use]
    pub fn with_options(mut self, options: NodeOptions) -> Self {
        self.options = options;
        self
    }

    /// The label, or the id when unset.
    #[must_use]
    pub fn display_name(&self) -> &str {
        self.options.label.as_deref().unwrap_or(&self.id)
    }
}

/// A dependency and data-flow link between two nodes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DagEdge {
    /// Upstream node.
    pub source: String,
    /// Downstream node.
    pub target: String,
    /// Which part of the source output travels along the edge.
    pub source_handle: String,
    /// Under which input handle the target receives it.
    pub target_handle: String,
    /// Optional label.
    pub label: Option<String>,
}

impl DagEdge {
    /// Creates an edge with default handles.
    #[must_use]
    pub fn new(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            source_handle: DEFAULT_OUTPUT_HANDLE.to_string(),
            target_handle: DEFAULT_INPUT_HANDLE.to_string(),
            label: None,
        }
    }

    /// Sets the source handle.
    #[must_use]
    pub fn with_source_handle(mut self, handle: impl Into<String>) -> Self {
        self.source_handle = handle.into();
        self
    }

    /// Sets the target handle.
    #[must_use]
    pub fn with_target_handle(mut self, handle: impl Into<String>) -> Self {
        self.target_handle = handle.into();
        self
    }

    /// Sets the label.
    #[must_use]
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Whether the edge carries the whole source output.
    #[must_use]
    pub fn carries_whole_output(&self) -> bool {
        self.source_handle == DEFAULT_OUTPUT_HANDLE
    }
}
