//! Testing utilities for dagflow pipelines.
//!
//! This module provides:
//! - Mock steps with call counting and interval capture
//! - Assertions over node outcomes

mod assertions;
mod mocks;

pub use assertions::{assert_completed, assert_failed, assert_skipped, intervals_overlap};
pub use mocks::{
    EchoStep, FailingStep, FlakyStep, Interval, IntervalRecorder, RecordingStep, SlowStep,
};
