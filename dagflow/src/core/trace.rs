//! Execution trace entries.

use super::NodeStatus;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One line of the execution trace, appended when a node settles.
///
/// The trace is ordered by settle time, so it reflects the order the
/// scheduler actually observed rather than a topological order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceEntry {
    /// The node id.
    pub node_id: String,
    /// Terminal status.
    pub status: NodeStatus,
    /// When the executor first ran.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    /// When the node settled.
    pub finished_at: DateTime<Utc>,
    /// Milliseconds from first attempt to outcome.
    pub latency_ms: f64,
    /// Executor attempts.
    pub attempts: u32,
    /// Error or skip detail.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl TraceEntry {
    /// Builds a trace entry from a node result.
    #[must_use]
    pub fn from_result(result: &super::NodeResult) -> Self {
        let detail = match &result.outcome {
            super::NodeOutcome::Completed(_) => None,
            super::NodeOutcome::Failed(err) => Some(err.to_string()),
            super::NodeOutcome::Skipped(reason) => Some(reason.to_string()),
        };
        Self {
            node_id: result.node_id.clone(),
            status: result.status(),
            started_at: result.started_at,
            finished_at: result.finished_at,
            latency_ms: result.latency_ms,
            attempts: result.attempts,
            detail,
        }
    }
}
