//! Per-node outcomes recorded by the engine.

use super::NodeStatus;
use crate::errors::NodeError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Why a node never executed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum SkipReason {
    /// The node's condition evaluated to false.
    ConditionNotMet,
    /// Every path to this node runs through a failed node using
    /// skip-downstream.
    UpstreamFailure {
        /// The failed node that caused the skip.
        node: String,
    },
    /// The run was aborted before this node started.
    PipelineAborted {
        /// The node whose failure aborted the run.
        node: String,
    },
}

impl SkipReason {
    /// Whether the skip counts against pipeline success.
    #[must_use]
    pub const fn is_failure_induced(&self) -> bool {
        !matches!(self, Self::ConditionNotMet)
    }
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConditionNotMet => write!(f, "condition not met"),
            Self::UpstreamFailure { node } => write!(f, "upstream node '{node}' failed"),
            Self::PipelineAborted { node } => write!(f, "pipeline aborted by '{node}'"),
        }
    }
}

/// The terminal outcome of a node.
#[derive(Debug, Clone)]
pub enum NodeOutcome {
    /// The executor returned a value.
    Completed(Value),
    /// The node failed.
    Failed(NodeError),
    /// The node never ran.
    Skipped(SkipReason),
}

impl NodeOutcome {
    /// The status matching this outcome.
    #[must_use]
    pub const fn status(&self) -> NodeStatus {
        match self {
            Self::Completed(_) => NodeStatus::Completed,
            Self::Failed(_) => NodeStatus::Failed,
            Self::Skipped(_) => NodeStatus::Skipped,
        }
    }

    /// The output, if the node completed.
    #[must_use]
    pub const fn output(&self) -> Option<&Value> {
        match self {
            Self::Completed(value) => Some(value),
            _ => None,
        }
    }

    /// The error, if the node failed.
    #[must_use]
    pub const fn error(&self) -> Option<&NodeError> {
        match self {
            Self::Failed(err) => Some(err),
            _ => None,
        }
    }

    /// The skip reason, if the node was skipped.
    #[must_use]
    pub const fn skip_reason(&self) -> Option<&SkipReason> {
        match self {
            Self::Skipped(reason) => Some(reason),
            _ => None,
        }
    }
}

/// Everything the engine knows about one node after a run.
#[derive(Debug, Clone)]
pub struct NodeResult {
    /// The node id.
    pub node_id: String,
    /// Terminal outcome.
    pub outcome: NodeOutcome,
    /// Executor attempts made (0 for skipped nodes).
    pub attempts: u32,
    /// Wall-clock time between the first attempt and the outcome.
    pub latency_ms: f64,
    /// When the executor first ran.
    pub started_at: Option<DateTime<Utc>>,
    /// When the outcome was recorded.
    pub finished_at: DateTime<Utc>,
}

impl NodeResult {
    /// Creates a result for a node that never ran.
    #[must_use]
    pub fn skipped(node_id: impl Into<String>, reason: SkipReason) -> Self {
        Self {
            node_id: node_id.into(),
            outcome: NodeOutcome::Skipped(reason),
            attempts: 0,
            latency_ms: 0.0,
            started_at: None,
            finished_at: Utc::now(),
        }
    }

    /// Shorthand for `self.outcome.status()`.
    #[must_use]
    pub const fn status(&self) -> NodeStatus {
        self.outcome.status()
    }

    /// Converts to a JSON object.
    #[must_use]
    pub fn to_json(&self) -> Value {
        let mut map = serde_json::Map::new();
        map.insert("node_id".to_string(), self.node_id.clone().into());
        map.insert("status".to_string(), self.status().to_string().into());
        map.insert("attempts".to_string(), self.attempts.into());
        map.insert("latency_ms".to_string(), serde_json::json!(self.latency_ms));
        match &self.outcome {
            NodeOutcome::Completed(value) => {
                map.insert("output".to_string(), value.clone());
            }
            NodeOutcome::Failed(err) => {
                map.insert("error".to_string(), err.to_string().into());
                map.insert("error_type".to_string(), err.error_type().into());
            }
            NodeOutcome::Skipped(reason) => {
                map.insert(
                    "skip_reason".to_string(),
                    serde_json::to_value(reason).unwrap_or(Value::Null),
                );
            }
        }
        Value::Object(map)
    }
}
