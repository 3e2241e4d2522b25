//! Context management for pipeline execution.
//!
//! This module provides:
//! - The per-run [`PipelineContext`] shared by every node
//! - Write-once result storage and an auxiliary metadata bag
//! - [`NodeInputs`], the handle-keyed values delivered along incoming edges

mod bags;
mod execution;
mod identity;
mod inputs;

pub use bags::{ContextBag, ResultBag, ResultSlot};
pub use execution::PipelineContext;
pub use identity::RunIdentity;
pub use inputs::{Delivered, NodeInputs, DEFAULT_INPUT_HANDLE};
