//! The aggregated result of one pipeline run.

use super::FailureSummary;
use crate::core::{NodeOutcome, NodeResult, NodeStatus, PipelineStatus, TraceEntry};
use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use std::collections::HashMap;
use uuid::Uuid;

/// What a run produced: per-node outcomes, the final output and a trace.
#[derive(Debug, Clone)]
pub struct PipelineResult {
    /// Name of the executed graph.
    pub pipeline_name: String,
    /// Unique id of this run.
    pub run_id: Uuid,
    /// Correlation id shared by every event of this run.
    pub correlation_id: String,
    /// Overall success.
    pub success: bool,
    /// Terminal pipeline status.
    pub status: PipelineStatus,
    /// Every node's result, keyed by id.
    pub nodes: HashMap<String, NodeResult>,
    /// Output of the terminal node(s).
    ///
    /// A single terminal node yields its value; several yield an object
    /// keyed by node id holding the ones that completed.
    pub final_output: Option<Value>,
    /// Nodes in the order they settled.
    pub execution_trace: Vec<TraceEntry>,
    /// When the run started.
    pub started_at: DateTime<Utc>,
    /// When the run finished.
    pub finished_at: DateTime<Utc>,
    /// Wall-clock duration.
    pub duration_ms: f64,
    /// The node whose failure aborted the run, if any.
    pub aborted_by: Option<String>,
}

impl PipelineResult {
    /// The outcome of a node.
    #[must_use]
    pub fn outcome(&self, node_id: &str) -> Option<&NodeOutcome> {
        self.nodes.get(node_id).map(|r| &r.outcome)
    }

    /// The output of a completed node.
    #[must_use]
    pub fn output(&self, node_id: &str) -> Option<&Value> {
        self.outcome(node_id).and_then(NodeOutcome::output)
    }

    /// The status of a node.
    #[must_use]
    pub fn node_status(&self, node_id: &str) -> Option<NodeStatus> {
        self.nodes.get(node_id).map(NodeResult::status)
    }

    fn ids_with(&self, status: NodeStatus) -> Vec<String> {
        let mut ids: Vec<String> = self
            .nodes
            .values()
            .filter(|r| r.status() == status)
            .map(|r| r.node_id.clone())
            .collect();
        ids.sort();
        ids
    }

    /// Ids of completed nodes, sorted.
    #[must_use]
    pub fn completed_nodes(&self) -> Vec<String> {
        self.ids_with(NodeStatus::Completed)
    }

    /// Ids of failed nodes, sorted.
    #[must_use]
    pub fn failed_nodes(&self) -> Vec<String> {
        self.ids_with(NodeStatus::Failed)
    }

    /// Ids of skipped nodes, sorted.
    #[must_use]
    pub fn skipped_nodes(&self) -> Vec<String> {
        self.ids_with(NodeStatus::Skipped)
    }

    /// Counts and failure records.
    #[must_use]
    pub fn failure_summary(&self) -> FailureSummary {
        let mut results: Vec<&NodeResult> = self.nodes.values().collect();
        results.sort_by(|a, b| a.finished_at.cmp(&b.finished_at));
        FailureSummary::from_results(results)
    }

    /// Converts to a JSON object.
    #[must_use]
    pub fn to_json(&self) -> Value {
        let mut ids: Vec<&String> = self.nodes.keys().collect();
        ids.sort();
        let nodes: serde_json::Map<String, Value> = ids
            .into_iter()
            .filter_map(|id| self.nodes.get(id).map(|r| (id.clone(), r.to_json())))
            .collect();

        json!({
            "pipeline": self.pipeline_name,
            "run_id": self.run_id.to_string(),
            "correlation_id": self.correlation_id,
            "success": self.success,
            "status": self.status.to_string(),
            "final_output": self.final_output,
            "nodes": nodes,
            "execution_trace": self.execution_trace,
            "started_at": self.started_at.to_rfc3339(),
            "finished_at": self.finished_at.to_rfc3339(),
            "duration_ms": self.duration_ms,
            "aborted_by": self.aborted_by,
        })
    }
}
