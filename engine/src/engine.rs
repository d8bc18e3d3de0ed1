//! The sync engine context: one per dataset, no ambient globals.
//!
//! `SyncEngine` owns the clock (inside the change log), the log itself, the
//! sync cursor, the dataset key handle, and the store adapter. Business
//! logic mutates through [`SyncEngine::mutate`] and observes merges through
//! [`SyncEngine::subscribe_to_changes`]; the transport drives
//! push/pull/merge through the `outgoing`/`ingest_and_merge` pair.
//!
//! A single mutex serializes every read-resolve-apply against concurrent
//! local appends. The lock is held only for in-memory work plus the journal
//! write; network I/O always happens outside it.

use crate::{
    error::Result, merge, ChangeEntry, ChangeLog, DatasetId, FieldKey, FieldName, Journal, Key,
    RecordId, ReplicaId, StoreAdapter, SyncCursor, Timestamp, Value, TOMBSTONE_FIELD,
};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, MutexGuard};

/// Callback fired after each completed merge phase with the affected fields.
pub type ChangeCallback = Box<dyn Fn(&BTreeSet<FieldKey>) + Send + Sync>;

struct Inner<S: StoreAdapter> {
    log: ChangeLog,
    cursor: SyncCursor,
    store: S,
}

/// Per-dataset sync context.
pub struct SyncEngine<S: StoreAdapter> {
    dataset_id: DatasetId,
    key: Key,
    inner: Mutex<Inner<S>>,
    subscribers: Mutex<Vec<ChangeCallback>>,
}

impl<S: StoreAdapter> SyncEngine<S> {
    /// Open an engine, replaying persisted log/cursor/clock state from the
    /// journal.
    pub fn open(
        dataset_id: DatasetId,
        replica_id: ReplicaId,
        key: Key,
        store: S,
        journal: Box<dyn Journal>,
    ) -> Result<Self> {
        let (log, cursor) = ChangeLog::open(dataset_id, replica_id, journal)?;
        Ok(Self {
            dataset_id,
            key,
            inner: Mutex::new(Inner { log, cursor, store }),
            subscribers: Mutex::new(Vec::new()),
        })
    }

    pub fn dataset_id(&self) -> DatasetId {
        self.dataset_id
    }

    pub fn replica_id(&self) -> ReplicaId {
        self.lock().log.replica_id()
    }

    /// The dataset's symmetric key handle.
    pub fn key(&self) -> &Key {
        &self.key
    }

    /// Record a local field mutation: durable change-log append first, then
    /// the optimistic local materialization. If the append fails the
    /// mutation is rejected whole and the store is untouched.
    pub fn mutate(
        &self,
        record_id: impl Into<RecordId>,
        field_name: impl Into<FieldName>,
        value: Value,
    ) -> Result<ChangeEntry> {
        let record_id = record_id.into();
        let field_name = field_name.into();
        let mut inner = self.lock();
        let entry = inner.log.append(record_id, field_name, value)?;
        inner
            .store
            .apply_field(&entry.record_id, &entry.field_name, &entry.value);
        Ok(entry)
    }

    /// Delete a record: a tombstone entry on the reserved field, merged by
    /// the same last-writer-wins rule as any edit.
    pub fn delete(&self, record_id: impl Into<RecordId>) -> Result<ChangeEntry> {
        self.mutate(record_id, TOMBSTONE_FIELD, Value::tombstone())
    }

    /// The materialized value as the host store currently sees it.
    pub fn current_value(&self, record_id: &str, field_name: &str) -> Option<Value> {
        self.lock().store.current_value(record_id, field_name)
    }

    /// Re-derive the winning value for a field from the change log.
    pub fn resolve(&self, record_id: &str, field_name: &str) -> Option<Value> {
        let inner = self.lock();
        merge::resolve(&inner.log, &FieldKey::new(record_id, field_name))
    }

    /// Materialize every known field of a record from the change log.
    pub fn resolve_record(&self, record_id: &str) -> BTreeMap<FieldName, Value> {
        merge::resolve_record(&self.lock().log, record_id)
    }

    /// Whether the record currently resolves as deleted.
    pub fn is_deleted(&self, record_id: &str) -> bool {
        merge::is_deleted(&self.lock().log, record_id)
    }

    /// Register a callback fired after each completed merge phase, so
    /// dependent calculations (budget totals) can recompute.
    pub fn subscribe_to_changes<F>(&self, callback: F)
    where
        F: Fn(&BTreeSet<FieldKey>) + Send + Sync + 'static,
    {
        self.subscribers
            .lock()
            .expect("subscriber lock poisoned")
            .push(Box::new(callback));
    }

    /// Entries not yet acknowledged by the relay, ascending.
    pub fn outgoing(&self) -> Vec<ChangeEntry> {
        let inner = self.lock();
        inner.log.entries_since(inner.cursor.last_pushed.as_ref())
    }

    /// Highest local timestamp the relay has acknowledged.
    pub fn pushed_cursor(&self) -> Option<Timestamp> {
        self.lock().cursor.last_pushed
    }

    /// Highest remote timestamp fully merged locally.
    pub fn applied_cursor(&self) -> Option<Timestamp> {
        self.lock().cursor.last_applied
    }

    /// Advance and persist the outgoing mark after a durable relay ack.
    pub fn mark_pushed(&self, ack: Timestamp) -> Result<()> {
        let mut inner = self.lock();
        inner.cursor.advance_pushed(ack);
        let cursor = inner.cursor.clone();
        inner.log.checkpoint_cursor(&cursor)
    }

    /// Advance and persist the incoming mark once a pulled batch has been
    /// fully merged (or deliberately skipped as corrupt).
    pub fn mark_applied(&self, applied: Timestamp) -> Result<()> {
        let mut inner = self.lock();
        inner.cursor.advance_applied(applied);
        let cursor = inner.cursor.clone();
        inner.log.checkpoint_cursor(&cursor)
    }

    /// Ingest remote entries and re-resolve every affected field.
    ///
    /// The whole read-resolve-apply runs under the engine lock, serialized
    /// against local mutations; subscribers are notified after the lock is
    /// released. Re-ingesting already-seen entries is a no-op.
    pub fn ingest_and_merge(&self, entries: Vec<ChangeEntry>) -> Result<BTreeSet<FieldKey>> {
        let affected = {
            let mut inner = self.lock();
            let affected = inner.log.ingest(entries)?;
            for key in &affected {
                if let Some(value) = merge::resolve(&inner.log, key) {
                    inner
                        .store
                        .apply_field(&key.record_id, &key.field_name, &value);
                }
            }
            affected
        };

        if !affected.is_empty() {
            for callback in self
                .subscribers
                .lock()
                .expect("subscriber lock poisoned")
                .iter()
            {
                callback(&affected);
            }
        }
        Ok(affected)
    }

    /// Number of entries in the change log (full history).
    pub fn log_len(&self) -> usize {
        self.lock().log.len()
    }

    fn lock(&self) -> MutexGuard<'_, Inner<S>> {
        self.inner.lock().expect("engine lock poisoned")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{MemoryJournal, MemoryStore};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn replica(n: u8) -> ReplicaId {
        ReplicaId::from_bytes([n; 16])
    }

    fn dataset() -> DatasetId {
        DatasetId::from_bytes([9; 16])
    }

    fn open_engine(n: u8) -> SyncEngine<MemoryStore> {
        SyncEngine::open(
            dataset(),
            replica(n),
            Key::generate(),
            MemoryStore::new(),
            Box::new(MemoryJournal::new()),
        )
        .expect("open")
    }

    #[test]
    fn mutate_materializes_optimistically() {
        let engine = open_engine(1);
        engine.mutate("t1", "amount", Value::Number(50.0)).unwrap();

        assert_eq!(
            engine.current_value("t1", "amount"),
            Some(Value::Number(50.0))
        );
        assert_eq!(engine.resolve("t1", "amount"), Some(Value::Number(50.0)));
        assert_eq!(engine.outgoing().len(), 1);
    }

    #[test]
    fn delete_writes_tombstone() {
        let engine = open_engine(1);
        engine.mutate("t2", "payee", Value::Text("grocer".into())).unwrap();
        engine.delete("t2").unwrap();

        assert!(engine.is_deleted("t2"));
        assert_eq!(
            engine.current_value("t2", TOMBSTONE_FIELD),
            Some(Value::tombstone())
        );
    }

    #[test]
    fn ingest_and_merge_applies_winner_and_notifies() {
        let engine = open_engine(1);
        engine.mutate("t1", "amount", Value::Number(50.0)).unwrap();

        let notified = Arc::new(AtomicUsize::new(0));
        let seen = notified.clone();
        engine.subscribe_to_changes(move |affected| {
            seen.fetch_add(affected.len(), Ordering::SeqCst);
        });

        // A remote edit with a far-future timestamp beats the local one
        let remote = ChangeEntry::new(
            Timestamp::new(u64::MAX / 2, 0, replica(2)),
            dataset(),
            "t1",
            "amount",
            Value::Number(75.0),
        );
        let affected = engine.ingest_and_merge(vec![remote]).unwrap();

        assert_eq!(affected.len(), 1);
        assert_eq!(notified.load(Ordering::SeqCst), 1);
        assert_eq!(
            engine.current_value("t1", "amount"),
            Some(Value::Number(75.0))
        );
        // Both entries survive in history
        assert_eq!(engine.log_len(), 2);
    }

    #[test]
    fn losing_remote_entry_does_not_override_store() {
        let engine = open_engine(5);
        engine.mutate("t1", "amount", Value::Number(50.0)).unwrap();

        let stale = ChangeEntry::new(
            Timestamp::new(1, 0, replica(2)),
            dataset(),
            "t1",
            "amount",
            Value::Number(99.0),
        );
        engine.ingest_and_merge(vec![stale]).unwrap();

        // Local entry has a later timestamp, so it still wins
        assert_eq!(
            engine.current_value("t1", "amount"),
            Some(Value::Number(50.0))
        );
        assert_eq!(engine.log_len(), 2);
    }

    #[test]
    fn cursor_marks_persist_through_reopen() {
        let mut journal = MemoryJournal::new();
        let ack = Timestamp::new(777, 0, replica(2));
        {
            use crate::Journal;
            let mut cursor = SyncCursor::default();
            cursor.advance_pushed(ack);
            journal.save_cursor(&cursor).unwrap();
        }

        let engine = SyncEngine::open(
            dataset(),
            replica(1),
            Key::generate(),
            MemoryStore::new(),
            Box::new(journal),
        )
        .unwrap();
        assert_eq!(engine.pushed_cursor(), Some(ack));
    }

    #[test]
    fn outgoing_shrinks_after_mark_pushed() {
        let engine = open_engine(1);
        let a = engine.mutate("t1", "amount", Value::Number(1.0)).unwrap();
        let b = engine.mutate("t1", "amount", Value::Number(2.0)).unwrap();

        engine.mark_pushed(a.timestamp).unwrap();
        let remaining = engine.outgoing();
        assert_eq!(remaining, vec![b]);
    }
}
