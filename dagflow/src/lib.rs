//! # Dagflow
//!
//! A concurrent DAG pipeline execution engine.
//!
//! A pipeline is a directed acyclic graph of nodes, each bound to a step
//! executor (a function, an agent call, a reasoning pattern, a batch of
//! prompts, a fan-out or a fan-in). The engine runs every node as soon as its
//! predecessors have settled, with:
//!
//! - **Handle-keyed data flow**: edges carry a whole output or one field of it
//! - **Retries and timeouts**: per attempt, with an optional node deadline
//! - **Failure strategies**: propagate, skip downstream, or fail the pipeline
//! - **Concurrency limits**: global, and per fan-out over its branches
//! - **Event-driven observability**: lifecycle events tagged with the run identity
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use dagflow::prelude::*;
//! use serde_json::json;
//!
//! let dag = PipelineBuilder::new("my-pipeline")
//!     .add_step("fetch", FetchStep::new())
//!     .add_step("process", ProcessStep::new())
//!     .add_step("store", StoreStep::new())
//!     .chain(&["fetch", "process", "store"])
//!     .build()?;
//!
//! let result = PipelineEngine::new().run(&dag, json!({"url": "..."})).await;
//! assert!(result.success);
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod cancellation;
pub mod config;
pub mod context;
pub mod core;
pub mod errors;
pub mod events;
pub mod observability;
pub mod pipeline;
pub mod steps;
pub mod testing;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::cancellation::CancellationToken;
    pub use crate::config::{DagflowConfig, EngineConfig, LogFormat, LoggingConfig};
    pub use crate::context::{
        ContextBag, Delivered, NodeInputs, PipelineContext, RunIdentity,
    };
    pub use crate::core::{NodeOutcome, NodeResult, NodeStatus, PipelineStatus, SkipReason};
    pub use crate::errors::{
        BuildError, CyclicGraphError, DagflowError, DisconnectedHandleError, DuplicateNodeError,
        FanInTimeoutError, NodeError, NodeExecutionError, PipelineCancelledError, StepError,
        UnknownNodeError,
    };
    pub use crate::events::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};
    pub use crate::observability::init_logging;
    pub use crate::pipeline::{
        Dag, DagEdge, DagNode, FailureStrategy, FluentPipelineBuilder, NodeOptions,
        PipelineBuilder, PipelineEngine, PipelineResult, RetryPolicy,
    };
    pub use crate::steps::{
        Agent, AgentStep, BatchLlmStep, BranchStep, CallableStep, FanInStep, FanOutStep, FnStep,
        MergeStrategy, ReasoningPattern, ReasoningStep, StepExecutor,
    };
}
