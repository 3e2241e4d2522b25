//! Concurrent agent calls over a list of prompts.

use super::{Agent, StepExecutor};
use crate::context::{NodeInputs, PipelineContext};
use crate::errors::{BatchError, StepError};
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use serde_json::{json, Value};
use std::fmt::Debug;
use std::sync::Arc;
use tracing::{debug, warn};

const DEFAULT_PROMPTS_KEY: &str = "prompts";
const DEFAULT_MAX_CONCURRENCY: usize = 5;

/// Summary handed to the completion callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchReport {
    /// Number of prompts.
    pub total: usize,
    /// Number of successful items.
    pub succeeded: usize,
    /// Indices of failed items.
    pub failed_indices: Vec<usize>,
}

/// Callback invoked after every item has finished.
pub type BatchCallback = Arc<dyn Fn(&BatchReport) + Send + Sync>;

/// Runs an agent over many prompts at once.
///
/// Prompts come from, in order of preference: the completed output of the
/// node named by `prompts_key`, the `prompts_key` input handle, the primary
/// input, and finally the pipeline input. A non-array value is a batch of
/// one and `null` is an empty batch.
///
/// The output is an array in prompt order. A failed item becomes
/// `{"index": i, "error": "..."}` in its slot; the step itself fails when
/// the share of successful items is below `min_success_ratio`.
#[derive(Clone)]
pub struct BatchLlmStep {
    agent: Arc<dyn Agent>,
    prompts_key: String,
    max_concurrency: usize,
    min_success_ratio: f64,
    on_complete: Option<BatchCallback>,
}

impl BatchLlmStep {
    /// Creates a batch step that requires every item to succeed.
    #[must_use]
    pub fn new(agent: Arc<dyn Agent>) -> Self {
        Self {
            agent,
            prompts_key: DEFAULT_PROMPTS_KEY.to_string(),
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            min_success_ratio: 1.0,
            on_complete: None,
        }
    }

    /// Sets where prompts are looked up.
    #[must_use]
    pub fn with_prompts_key(mut self, key: impl Into<String>) -> Self {
        self.prompts_key = key.into();
        self
    }

    /// Sets how many agent calls may be in flight (at least one).
    #[must_use]
    pub fn with_max_concurrency(mut self, limit: usize) -> Self {
        self.max_concurrency = limit.max(1);
        self
    }

    /// Sets the fraction of items that must succeed, clamped to `0.0..=1.0`.
    #[must_use]
    pub fn with_min_success_ratio(mut self, ratio: f64) -> Self {
        self.min_success_ratio = ratio.clamp(0.0, 1.0);
        self
    }

    /// Sets a callback run once the whole batch has finished.
    #[must_use]
    pub fn on_complete<F>(mut self, callback: F) -> Self
    where
        F: Fn(&BatchReport) + Send + Sync + 'static,
    {
        self.on_complete = Some(Arc::new(callback));
        self
    }

    fn resolve_prompts(&self, ctx: &PipelineContext, inputs: &NodeInputs) -> Result<Vec<Value>, StepError> {
        let source = if let Some(value) = ctx.completed_result(&self.prompts_key) {
            value
        } else if let Some(value) = inputs.get(&self.prompts_key)? {
            value.clone()
        } else if let Some(value) = inputs.primary()? {
            value.clone()
        } else {
            ctx.input().clone()
        };

        Ok(match source {
            Value::Array(items) => items,
            Value::Null => Vec::new(),
            other => vec![other],
        })
    }

    #[allow(clippy::cast_precision_loss)]
    fn meets_threshold(&self, succeeded: usize, total: usize) -> bool {
        total == 0 || succeeded as f64 / total as f64 >= self.min_success_ratio
    }
}

impl Debug for BatchLlmStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchLlmStep")
            .field("prompts_key", &self.prompts_key)
            .field("max_concurrency", &self.max_concurrency)
            .field("min_success_ratio", &self.min_success_ratio)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl StepExecutor for BatchLlmStep {
    fn kind(&self) -> &'static str {
        "batch_llm"
    }

    async fn execute(&self, ctx: &PipelineContext, inputs: &NodeInputs) -> Result<Value, StepError> {
        let prompts = self.resolve_prompts(ctx, inputs)?;
        let total = prompts.len();
        if total == 0 {
            return Ok(Value::Array(Vec::new()));
        }

        let results: Vec<Result<Value, String>> = stream::iter(prompts)
            .map(|prompt| {
                let agent = self.agent.clone();
                async move { agent.run(prompt).await.map_err(|e| format!("{e:#}")) }
            })
            .buffered(self.max_concurrency)
            .collect()
            .await;

        let mut outputs = Vec::with_capacity(total);
        let mut errors = Vec::new();
        for (index, result) in results.into_iter().enumerate() {
            match result {
                Ok(value) => outputs.push(value),
                Err(message) => {
                    warn!(index, error = %message, "Batch item failed");
                    outputs.push(json!({"index": index, "error": message}));
                    errors.push((index, message));
                }
            }
        }

        let report = BatchReport {
            total,
            succeeded: total - errors.len(),
            failed_indices: errors.iter().map(|(i, _)| *i).collect(),
        };
        debug!(total, succeeded = report.succeeded, "Batch finished");
        if let Some(ref callback) = self.on_complete {
            callback(&report);
        }

        if self.meets_threshold(report.succeeded, total) {
            Ok(Value::Array(outputs))
        } else {
            Err(BatchError {
                total,
                failed_indices: report.failed_indices,
                errors,
                min_success_ratio: self.min_success_ratio,
            }
            .into())
        }
    }
}
