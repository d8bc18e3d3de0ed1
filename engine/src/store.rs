//! The narrow seam to the host application's relational store.
//!
//! The sync core treats the store as an idempotent projection target:
//! re-applying the same resolved value is observably a no-op. Every write
//! that is subject to sync must flow through [`crate::SyncEngine::mutate`],
//! never directly into the store; that boundary contract is the host's to
//! uphold.

use crate::Value;
use std::collections::HashMap;

/// Materialized-state adapter implemented by the host storage layer.
pub trait StoreAdapter: Send {
    /// Apply a resolved field value. Must be idempotent.
    fn apply_field(&mut self, record_id: &str, field_name: &str, value: &Value);

    /// Read the currently materialized value, if the field exists.
    fn current_value(&self, record_id: &str, field_name: &str) -> Option<Value>;
}

/// Simple in-memory store for tests and ephemeral hosts.
#[derive(Debug, Default)]
pub struct MemoryStore {
    fields: HashMap<(String, String), Value>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of materialized fields.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl StoreAdapter for MemoryStore {
    fn apply_field(&mut self, record_id: &str, field_name: &str, value: &Value) {
        self.fields
            .insert((record_id.to_string(), field_name.to_string()), value.clone());
    }

    fn current_value(&self, record_id: &str, field_name: &str) -> Option<Value> {
        self.fields
            .get(&(record_id.to_string(), field_name.to_string()))
            .cloned()
    }
}
