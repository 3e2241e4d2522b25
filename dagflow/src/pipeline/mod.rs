//! Pipeline building and execution.
//!
//! This module provides:
//! - The graph model ([`Dag`], [`DagNode`], [`DagEdge`])
//! - A builder with validation and a helper DSL for common shapes
//! - The concurrent [`PipelineEngine`]
//! - Retry policies and failure strategies

mod builder;
mod builder_helpers;
mod dag;
mod engine;
mod failure;
mod node;
mod reachability;
mod result;
mod retry;

#[cfg(test)]
mod integration_tests;

pub use builder::PipelineBuilder;
pub use builder_helpers::FluentPipelineBuilder;
pub use dag::Dag;
pub use engine::PipelineEngine;
pub use failure::{FailureRecord, FailureStrategy, FailureSummary};
pub use node::{Condition, DagEdge, DagNode, NodeOptions, DEFAULT_OUTPUT_HANDLE};
pub use reachability::SuccessorClosure;
pub use result::PipelineResult;
pub use retry::{with_retry, BackoffStrategy, JitterStrategy, RetryPolicy, RetryState};
