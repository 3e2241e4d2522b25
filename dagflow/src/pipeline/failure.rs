//! Failure strategies and failure summaries.

use crate::core::{NodeOutcome, NodeResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// How a node's final failure affects the rest of the graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureStrategy {
    /// Successors still run; reading the failed node's result raises.
    Propagate,
    /// Successors reachable only through the failed node are skipped.
    #[default]
    SkipDownstream,
    /// The whole run is aborted.
    FailPipeline,
}

/// Record of one failed node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureRecord {
    /// Node id.
    pub node_id: String,
    /// Error message.
    pub error: String,
    /// Error type name.
    pub error_type: String,
    /// Attempts made.
    pub attempts: u32,
    /// When the node failed.
    pub timestamp: DateTime<Utc>,
}

impl FailureRecord {
    /// Builds a record from a failed node result.
    #[must_use]
    pub fn from_result(result: &NodeResult) -> Option<Self> {
        match &result.outcome {
            NodeOutcome::Failed(err) => Some(Self {
                node_id: result.node_id.clone(),
                error: err.to_string(),
                error_type: err.error_type().to_string(),
                attempts: result.attempts,
                timestamp: result.finished_at,
            }),
            _ => None,
        }
    }
}

/// Counts and failures of a finished run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureSummary {
    /// Total number of nodes.
    pub total_nodes: usize,
    /// Nodes that completed.
    pub completed_nodes: usize,
    /// Nodes that failed.
    pub failed_nodes: usize,
    /// Nodes that were skipped.
    pub skipped_nodes: usize,
    /// One record per failed node, ordered by failure time.
    pub failures: Vec<FailureRecord>,
}

impl FailureSummary {
    /// Summarises a set of node results.
    #[must_use]
    pub fn from_results<'a>(results: impl IntoIterator<Item = &'a NodeResult>) -> Self {
        let mut summary = Self {
            total_nodes: 0,
            completed_nodes: 0,
            failed_nodes: 0,
            skipped_nodes: 0,
            failures: Vec::new(),
        };
        for result in results {
            summary.total_nodes += 1;
            match result.outcome {
                NodeOutcome::Completed(_) => summary.completed_nodes += 1,
                NodeOutcome::Skipped(_) => summary.skipped_nodes += 1,
                NodeOutcome::Failed(_) => summary.failed_nodes += 1,
            }
            summary.failures.extend(FailureRecord::from_result(result));
        }
        summary
            .failures
            .sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then_with(|| a.node_id.cmp(&b.node_id)));
        summary
    }

    /// Fraction of nodes that completed.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn success_rate(&self) -> f64 {
        if self.total_nodes == 0 {
            return 0.0;
        }
        self.completed_nodes as f64 / self.total_nodes as f64
    }

    /// Returns true if any node failed.
    #[must_use]
    pub fn has_failures(&self) -> bool {
        !self.failures.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::SkipReason;
    use crate::errors::{NodeExecutionError, StepError};
    use serde_json::json;

    fn completed(id: &str) -> NodeResult {
        NodeResult {
            node_id: id.to_string(),
            outcome: NodeOutcome::Completed(json!(1)),
            attempts: 1,
            latency_ms: 1.0,
            started_at: Some(Utc::now()),
            finished_at: Utc::now(),
        }
    }

    #[test]
    fn test_default_strategy_is_skip_downstream() {
        assert_eq!(FailureStrategy::default(), FailureStrategy::SkipDownstream);
        let parsed: FailureStrategy = serde_json::from_str(r#""fail_pipeline""#).unwrap();
        assert_eq!(parsed, FailureStrategy::FailPipeline);
    }

    #[test]
    fn test_summary_counts() {
        let mut failed = completed("b");
        failed.outcome = NodeOutcome::Failed(
            NodeExecutionError::new("b", 2, StepError::message("boom")).into(),
        );
        failed.attempts = 2;
        let results = vec![
            completed("a"),
            failed,
            NodeResult::skipped("c", SkipReason::UpstreamFailure { node: "b".into() }),
        ];

        let summary = FailureSummary::from_results(&results);
        assert_eq!(summary.total_nodes, 3);
        assert_eq!(summary.completed_nodes, 1);
        assert_eq!(summary.failed_nodes, 1);
        assert_eq!(summary.skipped_nodes, 1);
        assert_eq!(summary.failures[0].node_id, "b");
        assert_eq!(summary.failures[0].attempts, 2);
        assert!(summary.has_failures());
        assert!((summary.success_rate() - 1.0 / 3.0).abs() < f64::EPSILON);
    }
}
