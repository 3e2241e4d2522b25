//! Engine and logging configuration.

use crate::errors::DagflowError;
use crate::pipeline::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

const fn default_grace_ms() -> u64 {
    1000
}

const fn default_emit_events() -> bool {
    true
}

fn default_level() -> String {
    "info".to_string()
}

/// Scheduler settings shared by every run of an engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Upper bound on nodes executing at once; unbounded when unset.
    #[serde(default)]
    pub max_concurrency: Option<usize>,
    /// Per-attempt timeout for nodes that set none.
    #[serde(default)]
    pub default_timeout_ms: Option<u64>,
    /// Retry policy for nodes that set none.
    #[serde(default)]
    pub default_retry: RetryPolicy,
    /// How long in-flight nodes may keep running after an abort before
    /// their tasks are aborted.
    #[serde(default = "default_grace_ms")]
    pub cancellation_grace_ms: u64,
    /// Whether lifecycle events are sent to the event sink.
    #[serde(default = "default_emit_events")]
    pub emit_events: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_concurrency: None,
            default_timeout_ms: None,
            default_retry: RetryPolicy::default(),
            cancellation_grace_ms: default_grace_ms(),
            emit_events: default_emit_events(),
        }
    }
}

impl EngineConfig {
    /// Creates the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Limits concurrently executing nodes.
    #[must_use]
    pub fn with_max_concurrency(mut self, limit: usize) -> Self {
        self.max_concurrency = Some(limit.max(1));
        self
    }

    /// Sets the default per-attempt timeout.
    #[must_use]
    pub const fn with_default_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.default_timeout_ms = Some(timeout_ms);
        self
    }

    /// Sets the default retry policy.
    #[must_use]
    pub fn with_default_retry(mut self, policy: RetryPolicy) -> Self {
        self.default_retry = policy;
        self
    }

    /// Sets the abort grace period.
    #[must_use]
    pub const fn with_cancellation_grace_ms(mut self, grace_ms: u64) -> Self {
        self.cancellation_grace_ms = grace_ms;
        self
    }

    /// Enables or disables lifecycle events.
    #[must_use]
    pub const fn with_emit_events(mut self, emit: bool) -> Self {
        self.emit_events = emit;
        self
    }

    /// The default timeout as a duration.
    #[must_use]
    pub fn default_timeout(&self) -> Option<Duration> {
        self.default_timeout_ms.map(Duration::from_millis)
    }

    /// The abort grace period as a duration.
    #[must_use]
    pub const fn cancellation_grace(&self) -> Duration {
        Duration::from_millis(self.cancellation_grace_ms)
    }
}

/// Output format of the log subscriber.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    /// Human-readable multi-line output.
    #[default]
    Pretty,
    /// One JSON object per line.
    Json,
}

/// Log subscriber settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive; `RUST_LOG` takes precedence.
    #[serde(default = "default_level")]
    pub level: String,
    /// Output format.
    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            format: LogFormat::default(),
        }
    }
}

impl LoggingConfig {
    /// Sets the filter directive.
    #[must_use]
    pub fn with_level(mut self, level: impl Into<String>) -> Self {
        self.level = level.into();
        self
    }

    /// Sets the output format.
    #[must_use]
    pub const fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }
}

/// Top-level configuration document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DagflowConfig {
    /// Scheduler settings.
    #[serde(default)]
    pub engine: EngineConfig,
    /// Log subscriber settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl DagflowConfig {
    /// Parses a JSON document. Missing fields take their defaults.
    ///
    /// # Errors
    ///
    /// Returns `DagflowError::Serialization` on malformed input and
    /// `DagflowError::Config` on out-of-range values.
    pub fn from_json_str(raw: &str) -> Result<Self, DagflowError> {
        let config: Self = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads and parses a JSON file.
    ///
    /// # Errors
    ///
    /// Returns `DagflowError::Io` if the file cannot be read, otherwise as
    /// [`from_json_str`](Self::from_json_str).
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, DagflowError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }

    fn validate(&self) -> Result<(), DagflowError> {
        if self.engine.max_concurrency == Some(0) {
            return Err(DagflowError::Config(
                "engine.max_concurrency must be at least 1".to_string(),
            ));
        }
        if self.engine.default_retry.max_attempts == 0 {
            return Err(DagflowError::Config(
                "engine.default_retry.max_attempts must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
