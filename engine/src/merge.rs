//! Last-writer-wins merge resolution.
//!
//! Resolution is a pure function of the change log's contents: for each
//! `(record, field)` the entry with the greatest timestamp wins, using the
//! total order from [`crate::Timestamp`]. Because the winner depends only
//! on the set of observed entries, resolution commutes over ingestion
//! order and is idempotent, which is what makes replicas converge.

use crate::{ChangeLog, FieldKey, FieldName, Value, TOMBSTONE_FIELD};
use std::collections::BTreeMap;

/// The winning value for a field, if any entry has touched it.
pub fn resolve(log: &ChangeLog, key: &FieldKey) -> Option<Value> {
    let head = log.head(key)?;
    log.entry(&head).map(|e| e.value.clone())
}

/// Materialize every known field of a record.
pub fn resolve_record(log: &ChangeLog, record_id: &str) -> BTreeMap<FieldName, Value> {
    log.fields_of(record_id)
        .into_iter()
        .filter_map(|key| resolve(log, &key).map(|v| (key.field_name, v)))
        .collect()
}

/// Whether the record's tombstone field currently resolves to deleted.
/// Deletion is an ordinary LWW field, so a later edit of the tombstone
/// (resurrection) wins by the same rule.
pub fn is_deleted(log: &ChangeLog, record_id: &str) -> bool {
    resolve(log, &FieldKey::new(record_id, TOMBSTONE_FIELD))
        .map(|v| v.is_tombstone())
        .unwrap_or(false)
}
