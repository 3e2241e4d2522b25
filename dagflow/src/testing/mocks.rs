//! Mock steps for testing.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::context::{NodeInputs, PipelineContext};
use crate::errors::StepError;
use crate::steps::StepExecutor;

/// Returns its primary input, or the pipeline input when it has none.
#[derive(Debug, Default)]
pub struct EchoStep {
    fixed: Option<Value>,
    calls: AtomicU32,
}

impl EchoStep {
    /// Creates an echo step.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a step that always returns `value`.
    #[must_use]
    pub fn returning(value: Value) -> Self {
        Self {
            fixed: Some(value),
            calls: AtomicU32::new(0),
        }
    }

    /// Number of executions so far.
    #[must_use]
    pub fn call_count(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StepExecutor for EchoStep {
    fn kind(&self) -> &'static str {
        "echo"
    }

    async fn execute(&self, ctx: &PipelineContext, inputs: &NodeInputs) -> Result<Value, StepError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(ref value) = self.fixed {
            return Ok(value.clone());
        }
        Ok(inputs.primary()?.cloned().unwrap_or_else(|| ctx.input().clone()))
    }
}

/// A step that always fails.
#[derive(Debug)]
pub struct FailingStep {
    error: String,
    calls: AtomicU32,
}

impl FailingStep {
    /// Creates a failing step with the given message.
    #[must_use]
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            calls: AtomicU32::new(0),
        }
    }

    /// Number of executions so far.
    #[must_use]
    pub fn call_count(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StepExecutor for FailingStep {
    fn kind(&self) -> &'static str {
        "failing"
    }

    async fn execute(&self, _ctx: &PipelineContext, _inputs: &NodeInputs) -> Result<Value, StepError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(StepError::message(self.error.clone()))
    }
}

/// Fails a fixed number of times, then succeeds.
#[derive(Debug)]
pub struct FlakyStep {
    failures: u32,
    value: Value,
    calls: AtomicU32,
}

impl FlakyStep {
    /// Fails `failures` times before returning `value`.
    #[must_use]
    pub fn new(failures: u32, value: Value) -> Self {
        Self {
            failures,
            value,
            calls: AtomicU32::new(0),
        }
    }

    /// Number of executions so far.
    #[must_use]
    pub fn call_count(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StepExecutor for FlakyStep {
    fn kind(&self) -> &'static str {
        "flaky"
    }

    async fn execute(&self, _ctx: &PipelineContext, _inputs: &NodeInputs) -> Result<Value, StepError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if call <= self.failures {
            Err(StepError::message(format!("transient failure {call}")))
        } else {
            Ok(self.value.clone())
        }
    }
}

/// A step that takes time to execute.
#[derive(Debug)]
pub struct SlowStep {
    delay: Duration,
    value: Value,
}

impl SlowStep {
    /// Creates a slow step returning `null`.
    #[must_use]
    pub const fn new(delay: Duration) -> Self {
        Self {
            delay,
            value: Value::Null,
        }
    }

    /// Creates a slow step with delay in milliseconds.
    #[must_use]
    pub const fn with_delay_ms(ms: u64) -> Self {
        Self::new(Duration::from_millis(ms))
    }

    /// Sets the returned value.
    #[must_use]
    pub fn returning(mut self, value: Value) -> Self {
        self.value = value;
        self
    }
}

#[async_trait]
impl StepExecutor for SlowStep {
    fn kind(&self) -> &'static str {
        "slow"
    }

    async fn execute(&self, _ctx: &PipelineContext, _inputs: &NodeInputs) -> Result<Value, StepError> {
        tokio::time::sleep(self.delay).await;
        Ok(self.value.clone())
    }
}

/// A recorded execution window.
#[derive(Debug, Clone)]
pub struct Interval {
    /// Label of the recording step.
    pub label: String,
    /// When execution started.
    pub start: Instant,
    /// When execution finished.
    pub end: Instant,
}

/// Shared store of execution windows.
#[derive(Debug, Clone, Default)]
pub struct IntervalRecorder {
    intervals: Arc<Mutex<Vec<Interval>>>,
}

impl IntervalRecorder {
    /// Creates an empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// All recorded windows, in completion order.
    #[must_use]
    pub fn intervals(&self) -> Vec<Interval> {
        self.intervals.lock().clone()
    }

    /// The window recorded for `label`.
    #[must_use]
    pub fn interval(&self, label: &str) -> Option<Interval> {
        self.intervals.lock().iter().find(|i| i.label == label).cloned()
    }

    /// Number of recorded windows.
    #[must_use]
    pub fn len(&self) -> usize {
        self.intervals.lock().len()
    }

    /// Returns true if nothing was recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.intervals.lock().is_empty()
    }

    fn record(&self, interval: Interval) {
        self.intervals.lock().push(interval);
    }
}

/// Sleeps, records its execution window and echoes its input.
#[derive(Debug)]
pub struct RecordingStep {
    label: String,
    delay: Duration,
    recorder: IntervalRecorder,
}

impl RecordingStep {
    /// Creates a recording step.
    #[must_use]
    pub fn new(label: impl Into<String>, delay: Duration, recorder: IntervalRecorder) -> Self {
        Self {
            label: label.into(),
            delay,
            recorder,
        }
    }
}

#[async_trait]
impl StepExecutor for RecordingStep {
    fn kind(&self) -> &'static str {
        "recording"
    }

    async fn execute(&self, ctx: &PipelineContext, inputs: &NodeInputs) -> Result<Value, StepError> {
        let start = Instant::now();
        tokio::time::sleep(self.delay).await;
        self.recorder.record(Interval {
            label: self.label.clone(),
            start,
            end: Instant::now(),
        });
        Ok(inputs.primary()?.cloned().unwrap_or_else(|| ctx.input().clone()))
    }
}
