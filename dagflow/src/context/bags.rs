//! Thread-safe storage for node results and run metadata.

use crate::errors::{DataConflictError, ResultConflictError};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;

/// What a node left behind in the context.
#[derive(Debug, Clone, PartialEq)]
pub enum ResultSlot {
    /// The node's output value.
    Completed(Value),
    /// Marker for a node that failed; readers get an error instead of data.
    Failed {
        /// The failure message.
        message: String,
    },
}

/// Write-once map from node id to result slot.
///
/// Each node's slot is written at most once per run. Skipped nodes never
/// get a slot.
#[derive(Debug, Default)]
pub struct ResultBag {
    slots: DashMap<String, ResultSlot>,
}

impl ResultBag {
    /// Creates an empty bag.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a node's slot.
    ///
    /// # Errors
    ///
    /// Returns `ResultConflictError` if the node already has a slot.
    pub fn insert(&self, node_id: &str, slot: ResultSlot) -> Result<(), ResultConflictError> {
        match self.slots.entry(node_id.to_string()) {
            Entry::Occupied(_) => Err(ResultConflictError::new(node_id)),
            Entry::Vacant(vacant) => {
                vacant.insert(slot);
                Ok(())
            }
        }
    }

    /// Returns a copy of a node's slot.
    #[must_use]
    pub fn get(&self, node_id: &str) -> Option<ResultSlot> {
        self.slots.get(node_id).map(|slot| slot.value().clone())
    }

    /// Checks if a node has a slot.
    #[must_use]
    pub fn contains(&self, node_id: &str) -> bool {
        self.slots.contains_key(node_id)
    }

    /// Ids of nodes with a completed output.
    #[must_use]
    pub fn completed_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .slots
            .iter()
            .filter(|entry| matches!(entry.value(), ResultSlot::Completed(_)))
            .map(|entry| entry.key().clone())
            .collect();
        ids.sort();
        ids
    }

    /// Returns the number of slots.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Returns true if no node has a slot yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

/// A thread-safe bag for auxiliary run metadata shared between steps.
///
/// `set` refuses to overwrite, `set_force` does not.
#[derive(Debug, Default)]
pub struct ContextBag {
    data: RwLock<HashMap<String, Value>>,
}

impl ContextBag {
    /// Creates a new empty bag.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a bag pre-filled with `data`.
    #[must_use]
    pub fn from_data(data: HashMap<String, Value>) -> Self {
        Self {
            data: RwLock::new(data),
        }
    }

    /// Gets a value from the bag.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<Value> {
        self.data.read().get(key).cloned()
    }

    /// Stores a value under a fresh key.
    ///
    /// # Errors
    ///
    /// Returns `DataConflictError` if the key already exists.
    pub fn set(&self, key: impl Into<String>, value: Value) -> Result<(), DataConflictError> {
        let key = key.into();
        let mut data = self.data.write();
        if data.contains_key(&key) {
            return Err(DataConflictError::new(key));
        }
        data.insert(key, value);
        Ok(())
    }

    /// Stores a value, replacing any previous one.
    pub fn set_force(&self, key: impl Into<String>, value: Value) {
        self.data.write().insert(key.into(), value);
    }

    /// Returns a JSON object with every entry.
    #[must_use]
    pub fn to_json(&self) -> Value {
        Value::Object(self.data.read().clone().into_iter().collect())
    }

    /// Returns the number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.read().len()
    }

    /// Returns true if the bag is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.read().is_empty()
    }
}
