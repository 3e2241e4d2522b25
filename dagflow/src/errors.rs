//! Error types for dagflow.
//!
//! Build-time errors are raised while assembling a [`Dag`](crate::pipeline::Dag),
//! step errors come back from executors, and node errors are what the engine
//! records once a node has exhausted its retries.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// The crate-level error type.
#[derive(Debug, Error)]
pub enum DagflowError {
    /// The graph could not be built.
    #[error("{0}")]
    Build(#[from] BuildError),

    /// A node failed during execution.
    #[error("{0}")]
    Node(#[from] NodeError),

    /// A node result was written twice.
    #[error("{0}")]
    ResultConflict(#[from] ResultConflictError),

    /// Invalid configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Metadata about a graph contract violation for better diagnostics.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct ContractErrorInfo {
    /// Error code (e.g., "DAG-003-CYCLE").
    pub code: String,
    /// Short summary of the error.
    pub summary: String,
    /// Hint for fixing the error.
    pub fix_hint: Option<String>,
    /// Additional context key-value pairs.
    #[serde(default)]
    pub context: HashMap<String, String>,
}

impl ContractErrorInfo {
    /// Creates a new contract error info.
    #[must_use]
    pub fn new(code: impl Into<String>, summary: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            summary: summary.into(),
            fix_hint: None,
            context: HashMap::new(),
        }
    }

    /// Sets the fix hint.
    #[must_use]
    pub fn with_fix_hint(mut self, hint: impl Into<String>) -> Self {
        self.fix_hint = Some(hint.into());
        self
    }

    /// Adds a single context entry.
    #[must_use]
    pub fn with_context_entry(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    /// Converts to a JSON object.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        let mut map = serde_json::Map::new();
        map.insert("code".to_string(), self.code.clone().into());
        map.insert("summary".to_string(), self.summary.clone().into());
        if let Some(ref hint) = self.fix_hint {
            map.insert("fix_hint".to_string(), hint.clone().into());
        }
        if !self.context.is_empty() {
            let context: serde_json::Map<String, serde_json::Value> = self
                .context
                .iter()
                .map(|(k, v)| (k.clone(), serde_json::Value::String(v.clone())))
                .collect();
            map.insert("context".to_string(), serde_json::Value::Object(context));
        }
        serde_json::Value::Object(map)
    }
}

/// A node id was added twice.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Duplicate node: '{node_id}' is already part of the graph")]
pub struct DuplicateNodeError {
    /// The repeated id.
    pub node_id: String,
}

impl DuplicateNodeError {
    /// Creates a new duplicate node error.
    #[must_use]
    pub fn new(node_id: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
        }
    }
}

/// An edge referenced a node that does not exist.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Unknown node: edge {source_id} -> {target_id} references missing node '{missing}'")]
pub struct UnknownNodeError {
    /// The missing node id.
    pub missing: String,
    /// Edge source.
    pub source_id: String,
    /// Edge target.
    pub target_id: String,
}

impl UnknownNodeError {
    /// Creates a new unknown node error.
    #[must_use]
    pub fn new(
        missing: impl Into<String>,
        source_id: impl Into<String>,
        target_id: impl Into<String>,
    ) -> Self {
        Self {
            missing: missing.into(),
            source_id: source_id.into(),
            target_id: target_id.into(),
        }
    }
}

/// The graph contains a cycle.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Cycle detected in pipeline: {}", cycle_path.join(" -> "))]
pub struct CyclicGraphError {
    /// The nodes forming the cycle, first node repeated at the end.
    pub cycle_path: Vec<String>,
}

impl CyclicGraphError {
    /// Creates a new cyclic graph error.
    #[must_use]
    pub const fn new(cycle_path: Vec<String>) -> Self {
        Self { cycle_path }
    }
}

/// A declared input handle has no incoming edge.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Disconnected handle: node '{node_id}' declares input '{handle}' but no edge feeds it")]
pub struct DisconnectedHandleError {
    /// The node declaring the handle.
    pub node_id: String,
    /// The unconnected handle.
    pub handle: String,
}

impl DisconnectedHandleError {
    /// Creates a new disconnected handle error.
    #[must_use]
    pub fn new(node_id: impl Into<String>, handle: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            handle: handle.into(),
        }
    }
}

/// Errors raised while assembling or validating a graph.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BuildError {
    /// See [`DuplicateNodeError`].
    #[error("{0}")]
    DuplicateNode(#[from] DuplicateNodeError),
    /// See [`UnknownNodeError`].
    #[error("{0}")]
    UnknownNode(#[from] UnknownNodeError),
    /// See [`CyclicGraphError`].
    #[error("{0}")]
    CyclicGraph(#[from] CyclicGraphError),
    /// See [`DisconnectedHandleError`].
    #[error("{0}")]
    DisconnectedHandle(#[from] DisconnectedHandleError),
}

impl BuildError {
    /// Returns the diagnostic code and hint for this error.
    #[must_use]
    pub fn error_info(&self) -> ContractErrorInfo {
        let (code, entries): (&str, Vec<(&str, String)>) = match self {
            Self::DuplicateNode(e) => ("DAG-001-DUPLICATE", vec![("node", e.node_id.clone())]),
            Self::UnknownNode(e) => (
                "DAG-002-UNKNOWN_NODE",
                vec![
                    ("missing", e.missing.clone()),
                    ("edge", format!("{} -> {}", e.source_id, e.target_id)),
                ],
            ),
            Self::CyclicGraph(e) => ("DAG-003-CYCLE", vec![("cycle", e.cycle_path.join(" -> "))]),
            Self::DisconnectedHandle(e) => (
                "DAG-004-DISCONNECTED_HANDLE",
                vec![("node", e.node_id.clone()), ("handle", e.handle.clone())],
            ),
        };

        let mut info = ContractErrorInfo::new(code, self.to_string());
        if let Some(hint) = ContractSuggestions::get(code) {
            info = info.with_fix_hint(hint);
        }
        for (key, value) in entries {
            info = info.with_context_entry(key, value);
        }
        info
    }
}

/// Provides default suggestions for graph contract error codes.
pub struct ContractSuggestions;

impl ContractSuggestions {
    /// Gets a suggestion for a given error code.
    #[must_use]
    pub fn get(code: &str) -> Option<&'static str> {
        match code {
            "DAG-001-DUPLICATE" => Some("Give every node a unique id."),
            "DAG-002-UNKNOWN_NODE" => Some(
                "Add both endpoints as nodes before connecting them. \
                 Check for typos in node ids.",
            ),
            "DAG-003-CYCLE" => Some(
                "Remove one of the edges in the cycle. \
                 Use a linear chain or fan-out pattern instead.",
            ),
            "DAG-004-DISCONNECTED_HANDLE" => Some(
                "Connect an edge with the matching target handle, \
                 or drop the handle from the fan-in declaration.",
            ),
            _ => None,
        }
    }
}

/// Failure of a batch step whose success ratio fell below the threshold.
#[derive(Debug, Clone, Error, PartialEq)]
#[error("Batch failed: {} of {total} items failed (indices {failed_indices:?}), required success ratio {min_success_ratio}", failed_indices.len())]
pub struct BatchError {
    /// Total number of items in the batch.
    pub total: usize,
    /// Indices of the items that failed.
    pub failed_indices: Vec<usize>,
    /// Per-index error messages.
    pub errors: Vec<(usize, String)>,
    /// The configured threshold.
    pub min_success_ratio: f64,
}

/// Errors returned by a step executor for a single attempt.
#[derive(Debug, Error)]
pub enum StepError {
    /// An upstream node failed and its output was read.
    #[error("Upstream node '{node_id}' failed: {message}")]
    UpstreamFailed {
        /// The failed upstream node.
        node_id: String,
        /// The upstream failure message.
        message: String,
    },

    /// A required input handle had no value.
    #[error("Missing input '{0}'")]
    MissingInput(String),

    /// Input was present but unusable.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// The attempt exceeded its timeout.
    #[error("Attempt timed out after {0:?}")]
    Timeout(Duration),

    /// A batch step fell below its success ratio.
    #[error("{0}")]
    Batch(#[from] BatchError),

    /// The run was cancelled while the step was executing.
    #[error("Step cancelled")]
    Cancelled,

    /// A task running the step panicked.
    #[error("Step panicked: {0}")]
    Panicked(String),

    /// Failure reported by an external collaborator.
    #[error(transparent)]
    Collaborator(#[from] anyhow::Error),
}

impl StepError {
    /// Creates an invalid input error.
    #[must_use]
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput(message.into())
    }

    /// Creates a collaborator error from a plain message.
    #[must_use]
    pub fn message(message: impl Into<String>) -> Self {
        Self::Collaborator(anyhow::anyhow!(message.into()))
    }

    /// Whether another attempt could change the outcome.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        !matches!(
            self,
            Self::UpstreamFailed { .. } | Self::Cancelled | Self::Panicked(_)
        )
    }
}

/// A node failed after exhausting its attempts.
#[derive(Debug, Clone, Error)]
#[error("Node '{node_id}' failed after {attempts} attempt(s): {source}")]
pub struct NodeExecutionError {
    /// The failing node.
    pub node_id: String,
    /// Attempts made, including the first.
    pub attempts: u32,
    /// The last attempt's error.
    #[source]
    pub source: Arc<StepError>,
}

impl NodeExecutionError {
    /// Creates a new node execution error.
    #[must_use]
    pub fn new(node_id: impl Into<String>, attempts: u32, source: StepError) -> Self {
        Self {
            node_id: node_id.into(),
            attempts,
            source: Arc::new(source),
        }
    }

    /// Whether the last attempt hit its timeout or the node deadline.
    #[must_use]
    pub fn timed_out(&self) -> bool {
        matches!(*self.source, StepError::Timeout(_))
    }
}

/// A fan-in node did not receive all of its inputs in time.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Fan-in '{node_id}' timed out after {timeout:?} waiting for {pending:?}")]
pub struct FanInTimeoutError {
    /// The fan-in node.
    pub node_id: String,
    /// The configured merge timeout.
    pub timeout: Duration,
    /// Predecessors that had not settled.
    pub pending: Vec<String>,
}

/// A node was interrupted because the pipeline was aborted.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Node '{node_id}' cancelled: pipeline aborted by '{aborted_by}'")]
pub struct PipelineCancelledError {
    /// The interrupted node.
    pub node_id: String,
    /// The node whose failure aborted the run.
    pub aborted_by: String,
}

/// The terminal error recorded for a failed node.
#[derive(Debug, Clone, Error)]
pub enum NodeError {
    /// See [`NodeExecutionError`].
    #[error("{0}")]
    Execution(#[from] NodeExecutionError),
    /// See [`FanInTimeoutError`].
    #[error("{0}")]
    FanInTimeout(#[from] FanInTimeoutError),
    /// See [`PipelineCancelledError`].
    #[error("{0}")]
    Cancelled(#[from] PipelineCancelledError),
}

impl NodeError {
    /// Short machine-readable error type.
    #[must_use]
    pub const fn error_type(&self) -> &'static str {
        match self {
            Self::Execution(_) => "NodeExecutionError",
            Self::FanInTimeout(_) => "FanInTimeoutError",
            Self::Cancelled(_) => "PipelineCancelledError",
        }
    }

    /// Attempts made before the node failed.
    #[must_use]
    pub const fn attempts(&self) -> u32 {
        match self {
            Self::Execution(e) => e.attempts,
            Self::FanInTimeout(_) | Self::Cancelled(_) => 0,
        }
    }
}

/// A node result was written a second time.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Result conflict: node '{node_id}' already has a recorded result")]
pub struct ResultConflictError {
    /// The node whose slot was already filled.
    pub node_id: String,
}

impl ResultConflictError {
    /// Creates a new result conflict error.
    #[must_use]
    pub fn new(node_id: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
        }
    }
}

/// A key was written twice in a context bag.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Data conflict: key '{key}' already exists")]
pub struct DataConflictError {
    /// The conflicting key.
    pub key: String,
}

impl DataConflictError {
    /// Creates a new data conflict error.
    #[must_use]
    pub fn new(key: impl Into<String>) -> Self {
        Self { key: key.into() }
    }
}
