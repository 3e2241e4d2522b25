//! Values delivered to a node along its incoming edges.

use crate::errors::StepError;
use serde_json::Value;

/// Handle a root node receives the pipeline input on, and the default
/// target handle of an edge.
pub const DEFAULT_INPUT_HANDLE: &str = "input";

/// What one incoming edge delivered.
#[derive(Debug, Clone, PartialEq)]
pub enum Delivered {
    /// The upstream value (or the selected field of it).
    Value(Value),
    /// The upstream node failed under the propagate strategy.
    Failed {
        /// The failed upstream node.
        node_id: String,
        /// Its failure message.
        message: String,
    },
    /// Nothing arrived: the upstream node was skipped, or the selected
    /// output handle was not present in its output.
    Absent {
        /// The upstream node.
        node_id: String,
    },
}

/// Handle-keyed view of everything delivered to a node.
///
/// Entries keep incoming-edge declaration order. When several edges target
/// the same handle, lookups by handle see the last one.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NodeInputs {
    entries: Vec<(String, Delivered)>,
}

impl NodeInputs {
    /// Creates an empty set of inputs.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates inputs from handle/value pairs.
    #[must_use]
    pub fn from_values<I, K>(values: I) -> Self
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        Self {
            entries: values
                .into_iter()
                .map(|(handle, value)| (handle.into(), Delivered::Value(value)))
                .collect(),
        }
    }

    /// Appends a delivery.
    pub fn push(&mut self, handle: impl Into<String>, delivered: Delivered) {
        self.entries.push((handle.into(), delivered));
    }

    /// The raw delivery on a handle.
    #[must_use]
    pub fn delivered(&self, handle: &str) -> Option<&Delivered> {
        self.entries
            .iter()
            .rev()
            .find(|(h, _)| h == handle)
            .map(|(_, d)| d)
    }

    /// The value on a handle.
    ///
    /// Returns `Ok(None)` when the handle is unknown or nothing arrived.
    ///
    /// # Errors
    ///
    /// Returns `StepError::UpstreamFailed` if the upstream node failed.
    pub fn get(&self, handle: &str) -> Result<Option<&Value>, StepError> {
        match self.delivered(handle) {
            None | Some(Delivered::Absent { .. }) => Ok(None),
            Some(Delivered::Value(value)) => Ok(Some(value)),
            Some(Delivered::Failed { node_id, message }) => Err(StepError::UpstreamFailed {
                node_id: node_id.clone(),
                message: message.clone(),
            }),
        }
    }

    /// The value on a handle, which must be present.
    ///
    /// # Errors
    ///
    /// Returns `StepError::MissingInput` if nothing arrived, or
    /// `StepError::UpstreamFailed` if the upstream node failed.
    pub fn require(&self, handle: &str) -> Result<&Value, StepError> {
        self.get(handle)?
            .ok_or_else(|| StepError::MissingInput(handle.to_string()))
    }

    /// The value on the default `input` handle.
    ///
    /// # Errors
    ///
    /// Returns `StepError::UpstreamFailed` if the upstream node failed.
    pub fn primary(&self) -> Result<Option<&Value>, StepError> {
        self.get(DEFAULT_INPUT_HANDLE)
    }

    /// Iterates over every delivery in edge order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Delivered)> {
        self.entries.iter().map(|(h, d)| (h.as_str(), d))
    }

    /// Distinct handles, in first-seen order.
    #[must_use]
    pub fn handles(&self) -> Vec<&str> {
        let mut seen: Vec<&str> = Vec::new();
        for (handle, _) in &self.entries {
            if !seen.contains(&handle.as_str()) {
                seen.push(handle);
            }
        }
        seen
    }

    /// Collapses the inputs into a JSON object keyed by handle, with
    /// absent deliveries as `null`.
    ///
    /// # Errors
    ///
    /// Returns `StepError::UpstreamFailed` if any upstream node failed.
    pub fn to_object(&self) -> Result<Value, StepError> {
        let mut map = serde_json::Map::new();
        for handle in self.handles() {
            let value = self.get(handle)?.cloned().unwrap_or(Value::Null);
            map.insert(handle.to_string(), value);
        }
        Ok(Value::Object(map))
    }

    /// Returns the number of deliveries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if nothing was delivered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
