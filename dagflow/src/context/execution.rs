//! The shared per-run execution context.

use super::{ContextBag, ResultBag, ResultSlot, RunIdentity};
use crate::cancellation::CancellationToken;
use crate::errors::{ResultConflictError, StepError};
use crate::events::{EventSink, NoOpEventSink};
use crate::pipeline::Dag;
use serde_json::Value;
use std::sync::Arc;
use uuid::Uuid;

/// State shared by every node of one pipeline run.
///
/// Cloning is cheap: clones share the same results, metadata and
/// cancellation token. A context is created by the engine for each run and
/// never outlives it in the engine's own bookkeeping.
#[derive(Clone)]
pub struct PipelineContext {
    inner: Arc<ContextInner>,
}

struct ContextInner {
    identity: RunIdentity,
    dag: Arc<Dag>,
    input: Value,
    results: ResultBag,
    metadata: ContextBag,
    cancellation: CancellationToken,
    event_sink: Arc<dyn EventSink>,
}

impl PipelineContext {
    /// Creates a context with a fresh identity and no event sink.
    #[must_use]
    pub fn new(dag: Arc<Dag>, input: Value) -> Self {
        Self::from_parts(dag, input, RunIdentity::new(), Arc::new(NoOpEventSink))
    }

    /// Creates a context from explicit parts.
    #[must_use]
    pub fn from_parts(
        dag: Arc<Dag>,
        input: Value,
        identity: RunIdentity,
        event_sink: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            inner: Arc::new(ContextInner {
                identity,
                dag,
                input,
                results: ResultBag::new(),
                metadata: ContextBag::new(),
                cancellation: CancellationToken::new(),
                event_sink,
            }),
        }
    }

    /// Creates a context over an empty graph, for driving a step by hand.
    #[must_use]
    pub fn detached(input: Value) -> Self {
        Self::new(Arc::new(Dag::new("detached")), input)
    }

    /// The pipeline's initial input.
    #[must_use]
    pub fn input(&self) -> &Value {
        &self.inner.input
    }

    /// Reads a node's result.
    ///
    /// A completed node yields its output. A node with no recorded result
    /// (skipped, not yet run, or unknown) yields the pipeline input.
    ///
    /// # Errors
    ///
    /// Returns `StepError::UpstreamFailed` if the node failed.
    pub fn get_node_result(&self, node_id: &str) -> Result<Value, StepError> {
        match self.inner.results.get(node_id) {
            Some(ResultSlot::Completed(value)) => Ok(value),
            Some(ResultSlot::Failed { message }) => Err(StepError::UpstreamFailed {
                node_id: node_id.to_string(),
                message,
            }),
            None => Ok(self.inner.input.clone()),
        }
    }

    /// A node's output, only if it completed.
    #[must_use]
    pub fn completed_result(&self, node_id: &str) -> Option<Value> {
        match self.inner.results.get(node_id) {
            Some(ResultSlot::Completed(value)) => Some(value),
            _ => None,
        }
    }

    /// The raw slot for a node.
    #[must_use]
    pub fn result_slot(&self, node_id: &str) -> Option<ResultSlot> {
        self.inner.results.get(node_id)
    }

    /// Records a node's output.
    ///
    /// # Errors
    ///
    /// Returns `ResultConflictError` if the node already has a result.
    pub fn set_node_result(&self, node_id: &str, value: Value) -> Result<(), ResultConflictError> {
        self.inner.results.insert(node_id, ResultSlot::Completed(value))
    }

    /// Records a failure marker for a node.
    ///
    /// # Errors
    ///
    /// Returns `ResultConflictError` if the node already has a result.
    pub fn set_node_failure(
        &self,
        node_id: &str,
        message: impl Into<String>,
    ) -> Result<(), ResultConflictError> {
        self.inner.results.insert(
            node_id,
            ResultSlot::Failed {
                message: message.into(),
            },
        )
    }

    /// Whether a node has a recorded result.
    #[must_use]
    pub fn has_result(&self, node_id: &str) -> bool {
        self.inner.results.contains(node_id)
    }

    /// Ids of nodes that completed so far, sorted.
    #[must_use]
    pub fn completed_nodes(&self) -> Vec<String> {
        self.inner.results.completed_ids()
    }

    /// Auxiliary key/value data shared between steps.
    #[must_use]
    pub fn metadata(&self) -> &ContextBag {
        &self.inner.metadata
    }

    /// The graph being executed.
    #[must_use]
    pub fn dag(&self) -> &Dag {
        &self.inner.dag
    }

    /// The pipeline name.
    #[must_use]
    pub fn pipeline_name(&self) -> &str {
        self.inner.dag.name()
    }

    /// Direct successors of a node.
    #[must_use]
    pub fn successors(&self, node_id: &str) -> &[String] {
        self.inner.dag.successors(node_id)
    }

    /// Direct predecessors of a node.
    #[must_use]
    pub fn predecessors(&self, node_id: &str) -> &[String] {
        self.inner.dag.predecessors(node_id)
    }

    /// The run identity.
    #[must_use]
    pub fn identity(&self) -> &RunIdentity {
        &self.inner.identity
    }

    /// The correlation id of this run.
    #[must_use]
    pub fn correlation_id(&self) -> &str {
        &self.inner.identity.correlation_id
    }

    /// The run id.
    #[must_use]
    pub fn run_id(&self) -> Uuid {
        self.inner.identity.run_id
    }

    /// The run's cancellation token.
    #[must_use]
    pub fn cancellation(&self) -> &CancellationToken {
        &self.inner.cancellation
    }

    /// Whether the run was cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancellation.is_cancelled()
    }

    /// Returns the event sink.
    #[must_use]
    pub fn event_sink(&self) -> &Arc<dyn EventSink> {
        &self.inner.event_sink
    }

    /// Emits an event tagged with the run's identity, without blocking.
    pub fn try_emit_event(&self, event_type: &str, data: Option<Value>) {
        let mut enriched = data.unwrap_or_else(|| serde_json::json!({}));

        if let Value::Object(ref mut map) = enriched {
            map.insert(
                "correlation_id".to_string(),
                Value::String(self.inner.identity.correlation_id.clone()),
            );
            map.insert(
                "run_id".to_string(),
                Value::String(self.inner.identity.run_id.to_string()),
            );
            map.insert(
                "pipeline".to_string(),
                Value::String(self.inner.dag.name().to_string()),
            );
            if let Some(ref request_id) = self.inner.identity.request_id {
                map.insert("request_id".to_string(), Value::String(request_id.clone()));
            }
        }

        self.inner.event_sink.try_emit(event_type, Some(enriched));
    }
}

impl std::fmt::Debug for PipelineContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineContext")
            .field("pipeline", &self.inner.dag.name())
            .field("correlation_id", &self.inner.identity.correlation_id)
            .field("results", &self.inner.results.len())
            .field("cancelled", &self.is_cancelled())
            .finish_non_exhaustive()
    }
}
