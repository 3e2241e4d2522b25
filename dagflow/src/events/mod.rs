//! Event sinks for observing pipeline runs.
//!
//! The engine reports lifecycle transitions through an [`EventSink`] handed
//! to it explicitly; there is no process-wide sink.

mod sink;

pub use sink::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};

/// Event type names emitted by the engine.
pub mod event_types {
    /// A run began.
    pub const PIPELINE_STARTED: &str = "pipeline.started";
    /// A run finished.
    pub const PIPELINE_COMPLETED: &str = "pipeline.completed";
    /// A node's executor is about to run.
    pub const NODE_STARTED: &str = "node.started";
    /// An attempt failed and another will follow.
    pub const NODE_RETRYING: &str = "node.retrying";
    /// A node produced an output.
    pub const NODE_COMPLETED: &str = "node.completed";
    /// A node failed.
    pub const NODE_FAILED: &str = "node.failed";
    /// A node was skipped.
    pub const NODE_SKIPPED: &str = "node.skipped";
}
