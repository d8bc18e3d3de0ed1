//! Change entries: one atomic field mutation each.
//!
//! Entries are immutable once created and uniquely identified by
//! `(record_id, field_name, timestamp)`. Merge never discards them; the
//! change log is the source of truth and history.

use crate::{DatasetId, FieldName, RecordId, ReplicaId, Timestamp, Value};
use serde::{Deserialize, Serialize};

/// A single field mutation, tagged with its issuing timestamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeEntry {
    /// Hybrid logical timestamp, carries the issuing replica id
    pub timestamp: Timestamp,
    /// Dataset this entry belongs to
    pub dataset_id: DatasetId,
    /// Record being mutated
    pub record_id: RecordId,
    /// Field being mutated
    pub field_name: FieldName,
    /// New value for the field
    pub value: Value,
}

impl ChangeEntry {
    pub fn new(
        timestamp: Timestamp,
        dataset_id: DatasetId,
        record_id: impl Into<RecordId>,
        field_name: impl Into<FieldName>,
        value: Value,
    ) -> Self {
        Self {
            timestamp,
            dataset_id,
            record_id: record_id.into(),
            field_name: field_name.into(),
            value,
        }
    }

    /// The replica that authored this entry.
    pub fn replica_id(&self) -> ReplicaId {
        self.timestamp.replica_id
    }

    /// The field this entry touches.
    pub fn field_key(&self) -> FieldKey {
        FieldKey {
            record_id: self.record_id.clone(),
            field_name: self.field_name.clone(),
        }
    }
}

/// Entries order by timestamp; the timestamp triple is already a total
/// order, so record/field only matter for map keys, never for ranking.
impl Ord for ChangeEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.timestamp
            .cmp(&other.timestamp)
            .then_with(|| self.record_id.cmp(&other.record_id))
            .then_with(|| self.field_name.cmp(&other.field_name))
    }
}

impl PartialOrd for ChangeEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Eq for ChangeEntry {}

/// A `(record, field)` pair, the unit of merge resolution.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldKey {
    pub record_id: RecordId,
    pub field_name: FieldName,
}

impl FieldKey {
    pub fn new(record_id: impl Into<RecordId>, field_name: impl Into<FieldName>) -> Self {
        Self {
            record_id: record_id.into(),
            field_name: field_name.into(),
        }
    }
}
