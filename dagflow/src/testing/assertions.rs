//! Assertions over pipeline results.

use super::Interval;
use crate::core::{NodeOutcome, SkipReason};
use crate::errors::NodeError;
use crate::pipeline::PipelineResult;
use serde_json::Value;

/// Asserts that a node completed and returns its output.
///
/// # Panics
///
/// Panics if the node is missing or did not complete.
#[track_caller]
pub fn assert_completed<'a>(result: &'a PipelineResult, node_id: &str) -> &'a Value {
    match result.outcome(node_id) {
        Some(NodeOutcome::Completed(value)) => value,
        other => panic!("Expected '{node_id}' to complete, got {other:?}"),
    }
}

/// Asserts that a node failed and returns its error.
///
/// # Panics
///
/// Panics if the node is missing or did not fail.
#[track_caller]
pub fn assert_failed<'a>(result: &'a PipelineResult, node_id: &str) -> &'a NodeError {
    match result.outcome(node_id) {
        Some(NodeOutcome::Failed(err)) => err,
        other => panic!("Expected '{node_id}' to fail, got {other:?}"),
    }
}

/// Asserts that a node was skipped and returns the reason.
///
/// # Panics
///
/// Panics if the node is missing or was not skipped.
#[track_caller]
pub fn assert_skipped<'a>(result: &'a PipelineResult, node_id: &str) -> &'a SkipReason {
    match result.outcome(node_id) {
        Some(NodeOutcome::Skipped(reason)) => reason,
        other => panic!("Expected '{node_id}' to be skipped, got {other:?}"),
    }
}

/// Whether two execution windows overlap in wall-clock time.
#[must_use]
pub fn intervals_overlap(a: &Interval, b: &Interval) -> bool {
    a.start < b.end && b.start < a.end
}
