//! Core domain model types for dagflow.
//!
//! This module contains the fundamental types used throughout the crate:
//! - Node and pipeline status enums
//! - Node outcomes and results
//! - Execution trace entries

mod outcome;
mod status;
mod trace;

pub use outcome::{NodeOutcome, NodeResult, SkipReason};
pub use status::{NodeStatus, PipelineStatus};
pub use trace::TraceEntry;
