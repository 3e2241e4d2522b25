//! Fan-out and fan-in steps.

use super::StepExecutor;
use crate::context::{NodeInputs, PipelineContext, DEFAULT_INPUT_HANDLE};
use crate::errors::StepError;
use async_trait::async_trait;
use regex::Regex;
use serde_json::Value;
use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;

/// Output handle of the `index`-th (zero-based) fan-out branch: `out-1`, `out-2`, ...
#[must_use]
pub fn branch_handle(index: usize) -> String {
    format!("out-{}", index + 1)
}

/// Input handle of the `index`-th (zero-based) fan-in branch: `in-1`, `in-2`, ...
#[must_use]
pub fn merge_handle(index: usize) -> String {
    format!("in-{}", index + 1)
}

/// Custom split function.
pub type SplitFn = Arc<dyn Fn(&Value) -> Result<Vec<Value>, StepError> + Send + Sync>;

/// Custom merge function over `(handle, value)` pairs; `None` marks a
/// skipped branch.
pub type MergeFn = Arc<dyn Fn(Vec<(String, Option<Value>)>) -> Result<Value, StepError> + Send + Sync>;

/// How a fan-out step divides its input.
#[derive(Clone)]
pub enum SplitStrategy {
    /// Array elements become branches; any other value is a single branch.
    Items,
    /// A string input is split on a regex; empty pieces are dropped.
    Pattern(Regex),
    /// A caller-supplied function.
    Custom(SplitFn),
}

impl Debug for SplitStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Items => write!(f, "Items"),
            Self::Pattern(re) => f.debug_tuple("Pattern").field(&re.as_str()).finish(),
            Self::Custom(_) => write!(f, "Custom(..)"),
        }
    }
}

impl SplitStrategy {
    fn split(&self, value: &Value) -> Result<Vec<Value>, StepError> {
        match self {
            Self::Items => Ok(match value {
                Value::Array(items) => items.clone(),
                other => vec![other.clone()],
            }),
            Self::Pattern(re) => {
                let text = value
                    .as_str()
                    .ok_or_else(|| StepError::invalid_input("pattern split needs a string input"))?;
                Ok(re
                    .split(text)
                    .map(str::trim)
                    .filter(|piece| !piece.is_empty())
                    .map(|piece| Value::String(piece.to_string()))
                    .collect())
            }
            Self::Custom(func) => func(value),
        }
    }
}

/// Splits one input into branch values `{"out-1": .., "out-2": ..}`.
///
/// Successors pick their branch with an edge whose source handle is the
/// branch handle. `max_concurrent` caps how many direct successors the
/// engine runs at the same time.
#[derive(Debug, Clone)]
pub struct FanOutStep {
    split: SplitStrategy,
    input_key: String,
    max_concurrent: Option<usize>,
}

impl FanOutStep {
    /// Creates a fan-out with the given split strategy.
    #[must_use]
    pub fn new(split: SplitStrategy) -> Self {
        Self {
            split,
            input_key: DEFAULT_INPUT_HANDLE.to_string(),
            max_concurrent: None,
        }
    }

    /// Fans out over array elements.
    #[must_use]
    pub fn items() -> Self {
        Self::new(SplitStrategy::Items)
    }

    /// Fans out over the pieces of a string split by `pattern`.
    ///
    /// # Errors
    ///
    /// Returns the regex compile error for an invalid pattern.
    pub fn pattern(pattern: &str) -> Result<Self, regex::Error> {
        Ok(Self::new(SplitStrategy::Pattern(Regex::new(pattern)?)))
    }

    /// Fans out with a custom function.
    #[must_use]
    pub fn custom<F>(func: F) -> Self
    where
        F: Fn(&Value) -> Result<Vec<Value>, StepError> + Send + Sync + 'static,
    {
        Self::new(SplitStrategy::Custom(Arc::new(func)))
    }

    /// Reads the value to split from another handle.
    #[must_use]
    pub fn with_input_key(mut self, handle: impl Into<String>) -> Self {
        self.input_key = handle.into();
        self
    }

    /// Caps concurrently running successors (at least one).
    #[must_use]
    pub fn with_max_concurrent(mut self, limit: usize) -> Self {
        self.max_concurrent = Some(limit.max(1));
        self
    }
}

#[async_trait]
impl StepExecutor for FanOutStep {
    fn kind(&self) -> &'static str {
        "fan_out"
    }

    async fn execute(&self, ctx: &PipelineContext, inputs: &NodeInputs) -> Result<Value, StepError> {
        let value = inputs
            .get(&self.input_key)?
            .cloned()
            .unwrap_or_else(|| ctx.input().clone());

        let branches = self
            .split
            .split(&value)?
            .into_iter()
            .enumerate()
            .map(|(i, v)| (branch_handle(i), v))
            .collect();
        Ok(Value::Object(branches))
    }

    fn branch_concurrency(&self) -> Option<usize> {
        self.max_concurrent
    }
}

/// How a fan-in step combines its branches.
#[derive(Clone)]
pub enum MergeStrategy {
    /// Array of the values that arrived, in handle order.
    Collect,
    /// Object keyed by handle, `null` for skipped branches.
    Object,
    /// Arrived values rendered as text and joined by the separator.
    Concat(String),
    /// A caller-supplied function.
    Custom(MergeFn),
}

impl Debug for MergeStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Collect => write!(f, "Collect"),
            Self::Object => write!(f, "Object"),
            Self::Concat(sep) => f.debug_tuple("Concat").field(sep).finish(),
            Self::Custom(_) => write!(f, "Custom(..)"),
        }
    }
}

impl MergeStrategy {
    fn merge(&self, branches: Vec<(String, Option<Value>)>) -> Result<Value, StepError> {
        match self {
            Self::Collect => Ok(Value::Array(
                branches.into_iter().filter_map(|(_, v)| v).collect(),
            )),
            Self::Object => Ok(Value::Object(
                branches
                    .into_iter()
                    .map(|(h, v)| (h, v.unwrap_or(Value::Null)))
                    .collect(),
            )),
            Self::Concat(separator) => Ok(Value::String(
                branches
                    .into_iter()
                    .filter_map(|(_, v)| v)
                    .map(|v| match v {
                        Value::String(s) => s,
                        other => other.to_string(),
                    })
                    .collect::<Vec<_>>()
                    .join(separator),
            )),
            Self::Custom(func) => func(branches),
        }
    }
}

/// Merges the outputs of several predecessors.
///
/// With declared handles, each must be fed by an edge (checked when the
/// graph is built) and branches are merged in declaration order. Without
/// declared handles every delivered input is merged in edge order.
#[derive(Debug, Clone)]
pub struct FanInStep {
    handles: Vec<String>,
    merge: MergeStrategy,
    merge_timeout: Option<Duration>,
}

impl FanInStep {
    /// Creates a fan-in over explicit handles.
    #[must_use]
    pub fn new<I, S>(handles: I, merge: MergeStrategy) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            handles: handles.into_iter().map(Into::into).collect(),
            merge,
            merge_timeout: None,
        }
    }

    /// Creates a fan-in over `in-1` .. `in-{count}`.
    #[must_use]
    pub fn with_branches(count: usize, merge: MergeStrategy) -> Self {
        Self::new((0..count).map(merge_handle), merge)
    }

    /// Creates a fan-in merging whatever arrives.
    #[must_use]
    pub fn collect_all(merge: MergeStrategy) -> Self {
        Self::new(Vec::<String>::new(), merge)
    }

    /// Bounds the wait for the remaining inputs.
    #[must_use]
    pub const fn with_merge_timeout(mut self, timeout: Duration) -> Self {
        self.merge_timeout = Some(timeout);
        self
    }
}

#[async_trait]
impl StepExecutor for FanInStep {
    fn kind(&self) -> &'static str {
        "fan_in"
    }

    async fn execute(&self, _ctx: &PipelineContext, inputs: &NodeInputs) -> Result<Value, StepError> {
        let handles: Vec<&str> = if self.handles.is_empty() {
            inputs.handles()
        } else {
            self.handles.iter().map(String::as_str).collect()
        };

        let mut branches = Vec::with_capacity(handles.len());
        for handle in handles {
            branches.push((handle.to_string(), inputs.get(handle)?.cloned()));
        }
        self.merge.merge(branches)
    }

    fn required_input_handles(&self) -> &[String] {
        &self.handles
    }

    fn merge_timeout(&self) -> Option<Duration> {
        self.merge_timeout
    }
}
