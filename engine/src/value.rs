//! Field values carried by change entries.
//!
//! Values are a closed scalar union so that merge comparability is identical
//! on every replica. Record deletion is expressed as a regular value on the
//! reserved [`TOMBSTONE_FIELD`], merged by the same last-writer-wins rule as
//! any other field.

use serde::{Deserialize, Serialize};

/// Reserved field name carrying a record's deletion state.
pub const TOMBSTONE_FIELD: &str = "tombstone";

/// A scalar field value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Number(f64),
    Text(String),
}

impl Value {
    /// The tombstone marker written by a record deletion.
    pub fn tombstone() -> Self {
        Value::Bool(true)
    }

    /// Whether this value, read from [`TOMBSTONE_FIELD`], marks deletion.
    pub fn is_tombstone(&self) -> bool {
        matches!(self, Value::Bool(true))
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Number(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Number(v as f64)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}
