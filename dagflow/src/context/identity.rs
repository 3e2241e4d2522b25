//! Run identity for correlating a pipeline run across logs and events.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifies one pipeline run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunIdentity {
    /// Unique id for this run (time-ordered).
    pub run_id: Uuid,
    /// Correlation id carried through every event and log line.
    pub correlation_id: String,
    /// Optional caller-supplied request id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

impl Default for RunIdentity {
    fn default() -> Self {
        Self::new()
    }
}

impl RunIdentity {
    /// Creates a fresh identity with generated ids.
    #[must_use]
    pub fn new() -> Self {
        Self {
            run_id: Uuid::now_v7(),
            correlation_id: Uuid::new_v4().simple().to_string(),
            request_id: None,
        }
    }

    /// Uses an externally supplied correlation id.
    #[must_use]
    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = correlation_id.into();
        self
    }

    /// Sets the request id.
    #[must_use]
    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    /// Converts to a JSON object.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "run_id": self.run_id.to_string(),
            "correlation_id": self.correlation_id,
            "request_id": self.request_id,
        })
    }
}
