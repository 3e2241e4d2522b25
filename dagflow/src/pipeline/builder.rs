//! Pipeline builder with validation.

use super::{Dag, DagEdge, DagNode, NodeOptions};
use crate::errors::BuildError;
use crate::steps::StepExecutor;
use std::sync::Arc;

/// Fluent builder for [`Dag`]s.
///
/// Nodes and edges are collected as declared; all checks run in
/// [`build`](Self::build), which reports the first problem found.
#[derive(Debug, Clone)]
pub struct PipelineBuilder {
    name: String,
    nodes: Vec<DagNode>,
    edges: Vec<DagEdge>,
}

impl PipelineBuilder {
    /// Creates a new builder.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            nodes: Vec::new(),
            edges: Vec::new(),
        }
    }

    /// The pipeline name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Adds a node with explicit options.
    #[must_use]
    pub fn add_node(
        mut self,
        id: impl Into<String>,
        step: Arc<dyn StepExecutor>,
        options: NodeOptions,
    ) -> Self {
        self.nodes.push(DagNode::new(id, step).with_options(options));
        self
    }

    /// Adds a node with default options.
    #[must_use]
    pub fn add_step(self, id: impl Into<String>, step: impl StepExecutor + 'static) -> Self {
        self.add_node(id, Arc::new(step), NodeOptions::default())
    }

    /// Adds a whole-output edge.
    #[must_use]
    pub fn add_edge(self, source: impl Into<String>, target: impl Into<String>) -> Self {
        self.add_edge_with(DagEdge::new(source, target))
    }

    /// Adds a fully specified edge.
    #[must_use]
    pub fn add_edge_with(mut self, edge: DagEdge) -> Self {
        self.edges.push(edge);
        self
    }

    /// Links each id to the next one.
    #[must_use]
    pub fn chain(mut self, ids: &[&str]) -> Self {
        for pair in ids.windows(2) {
            self.edges.push(DagEdge::new(pair[0], pair[1]));
        }
        self
    }

    /// Whether a node with this id was declared.
    #[must_use]
    pub fn has_node(&self, id: &str) -> bool {
        self.nodes.iter().any(|n| n.id == id)
    }

    /// Merges another builder's nodes and edges into this one.
    ///
    /// Nodes present in both keep this builder's definition when they share
    /// the same step instance; otherwise `build` reports a duplicate.
    #[must_use]
    pub fn compose(mut self, other: Self) -> Self {
        self.name = format!("{}+{}", self.name, other.name);
        for node in other.nodes {
            let same = self
                .nodes
                .iter()
                .any(|n| n.id == node.id && Arc::ptr_eq(&n.step, &node.step));
            if !same {
                self.nodes.push(node);
            }
        }
        for edge in other.edges {
            if !self.edges.contains(&edge) {
                self.edges.push(edge);
            }
        }
        self
    }

    /// Builds and validates the graph.
    ///
    /// # Errors
    ///
    /// Returns the first duplicate node, unknown edge endpoint, cycle or
    /// unfed input handle.
    pub fn build(self) -> Result<Dag, BuildError> {
        let mut dag = Dag::new(self.name);
        for node in self.nodes {
            dag.add_node(node)?;
        }
        for edge in self.edges {
            dag.add_edge(edge)?;
        }
        dag.validate()?;
        Ok(dag)
    }
}
