//! Node and pipeline status enums.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The lifecycle state of a node within one run.
///
/// Nodes move `Pending -> Ready -> Running` and end in exactly one of
/// `Completed`, `Failed` or `Skipped`. A node skipped by its condition or by
/// an upstream failure goes straight from `Ready`/`Pending` to `Skipped`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    /// Waiting on predecessors.
    #[default]
    Pending,
    /// All predecessors settled.
    Ready,
    /// Executor is running (or waiting for a concurrency permit).
    Running,
    /// Executor returned a value.
    Completed,
    /// Executor failed after all attempts, timed out, or was cancelled.
    Failed,
    /// Never executed.
    Skipped,
}

impl fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Ready => write!(f, "ready"),
            Self::Running => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::Skipped => write!(f, "skipped"),
        }
    }
}

impl NodeStatus {
    /// Returns true if the status represents a terminal state.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Skipped)
    }

    /// Returns true if the node produced an output.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Completed)
    }
}

/// The overall state of a pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStatus {
    /// Nodes are still executing.
    #[default]
    Running,
    /// Every terminal node completed or was skipped by its condition.
    Completed,
    /// The run was aborted or a terminal node failed.
    Failed,
}

impl fmt::Display for PipelineStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Running => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}
