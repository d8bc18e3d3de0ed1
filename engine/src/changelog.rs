//! The append-only change log: every mutation ever made or received.
//!
//! The log is the source of truth. Materialized record state is always
//! re-derivable from it, and sync batches are re-derivable from it after
//! any interruption. Durability goes through the [`Journal`] seam so the
//! host application decides where bytes land (a relational table, a file);
//! the engine itself performs no I/O here.

use crate::{
    error::Result, ChangeEntry, DatasetId, Error, FieldKey, HybridClock, ReplicaId, SyncCursor,
    Timestamp,
};
use std::collections::{BTreeMap, BTreeSet};
use std::ops::Bound;

/// Failure from the durable journal. Surfaced to callers as
/// [`Error::AppendFailed`]: the triggering mutation is rejected whole.
#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct JournalError(pub String);

/// Everything the engine persists locally between runs.
#[derive(Debug, Clone, Default)]
pub struct JournalState {
    /// All change entries, local and ingested
    pub entries: Vec<ChangeEntry>,
    /// Push/apply high-water marks
    pub cursor: SyncCursor,
    /// Last timestamp issued or observed by the clock
    pub clock: Option<Timestamp>,
}

/// Durable storage for the change log, cursor, and clock checkpoint.
///
/// `append` must not return `Ok` until the entry would survive a crash;
/// the log makes nothing visible until it has.
pub trait Journal: Send {
    fn append(&mut self, entry: &ChangeEntry) -> std::result::Result<(), JournalError>;
    fn save_cursor(&mut self, cursor: &SyncCursor) -> std::result::Result<(), JournalError>;
    fn save_clock(&mut self, last: &Timestamp) -> std::result::Result<(), JournalError>;
    fn load(&mut self) -> std::result::Result<JournalState, JournalError>;
}

/// In-memory journal for tests and ephemeral hosts.
#[derive(Debug, Default)]
pub struct MemoryJournal {
    state: JournalState,
}

impl MemoryJournal {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Journal for MemoryJournal {
    fn append(&mut self, entry: &ChangeEntry) -> std::result::Result<(), JournalError> {
        self.state.entries.push(entry.clone());
        Ok(())
    }

    fn save_cursor(&mut self, cursor: &SyncCursor) -> std::result::Result<(), JournalError> {
        self.state.cursor = cursor.clone();
        Ok(())
    }

    fn save_clock(&mut self, last: &Timestamp) -> std::result::Result<(), JournalError> {
        self.state.clock = Some(*last);
        Ok(())
    }

    fn load(&mut self) -> std::result::Result<JournalState, JournalError> {
        Ok(self.state.clone())
    }
}

/// The append-only ledger of field mutations for one dataset.
pub struct ChangeLog {
    dataset_id: DatasetId,
    clock: HybridClock,
    journal: Box<dyn Journal>,
    /// Full history, ordered by timestamp. The timestamp triple is globally
    /// unique, so it doubles as the entry identity.
    entries: BTreeMap<Timestamp, ChangeEntry>,
    /// Winning (max) timestamp per field, maintained incrementally
    heads: BTreeMap<FieldKey, Timestamp>,
    /// Fields journaled by an ingest that failed partway; the caller never
    /// got them back for re-resolution, so the next ingest re-reports them
    unmerged: BTreeSet<FieldKey>,
}

impl ChangeLog {
    /// Open the log, replaying persisted state from the journal. Returns the
    /// log and the persisted sync cursor.
    pub fn open(
        dataset_id: DatasetId,
        replica_id: ReplicaId,
        mut journal: Box<dyn Journal>,
    ) -> Result<(Self, SyncCursor)> {
        let state = journal
            .load()
            .map_err(|e| Error::AppendFailed(e.to_string()))?;

        let mut clock = HybridClock::resume(replica_id, state.clock);
        let mut log = Self {
            dataset_id,
            clock: HybridClock::new(replica_id), // placeholder, set below
            journal,
            entries: BTreeMap::new(),
            heads: BTreeMap::new(),
            unmerged: BTreeSet::new(),
        };
        for entry in state.entries {
            clock.observe(&entry.timestamp);
            log.insert(entry);
        }
        log.clock = clock;
        Ok((log, state.cursor))
    }

    pub fn dataset_id(&self) -> DatasetId {
        self.dataset_id
    }

    pub fn replica_id(&self) -> ReplicaId {
        self.clock.replica_id()
    }

    /// Last timestamp issued or observed; persisted so restart cannot regress.
    pub fn clock_position(&self) -> Timestamp {
        self.clock.last()
    }

    /// Number of entries in the log (full history, never pruned by merge).
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Append a local mutation. The entry is durably journaled before it
    /// becomes visible; on journal failure the mutation is rejected whole
    /// and no state changes.
    pub fn append(
        &mut self,
        record_id: impl Into<crate::RecordId>,
        field_name: impl Into<crate::FieldName>,
        value: crate::Value,
    ) -> Result<ChangeEntry> {
        let timestamp = self.clock.next();

        // Checkpoint the clock before the entry write: an issued timestamp
        // must never come out of the clock again after a restart, even when
        // the append right below is the thing that crashes. The reverse
        // order would also leave a journaled entry behind a rejection if
        // the checkpoint failed.
        self.journal
            .save_clock(&timestamp)
            .map_err(|e| Error::AppendFailed(e.to_string()))?;

        let entry = ChangeEntry::new(timestamp, self.dataset_id, record_id, field_name, value);
        self.journal
            .append(&entry)
            .map_err(|e| Error::AppendFailed(e.to_string()))?;

        self.insert(entry.clone());
        Ok(entry)
    }

    /// Entries with timestamp strictly greater than `cursor`, ascending.
    /// Cursor-based and restartable: safe to call again after interruption.
    pub fn entries_since(&self, cursor: Option<&Timestamp>) -> Vec<ChangeEntry> {
        let lower = match cursor {
            Some(ts) => Bound::Excluded(*ts),
            None => Bound::Unbounded,
        };
        self.entries
            .range((lower, Bound::Unbounded))
            .map(|(_, e)| e.clone())
            .collect()
    }

    /// Ingest entries received from other replicas.
    ///
    /// Deduplicates by entry identity, journals and indexes the new ones,
    /// advances the clock past their timestamps, and returns the set of
    /// fields that need re-merging. Idempotent: re-ingesting a seen entry
    /// changes nothing and journals nothing.
    ///
    /// If the journal fails partway, the entries already journaled stay in
    /// the log and their fields are handed back by the next call, so a
    /// retried batch still re-resolves everything it touched.
    pub fn ingest(&mut self, remote: Vec<ChangeEntry>) -> Result<BTreeSet<FieldKey>> {
        // Fields stranded by an earlier partial failure dedup below but
        // still owe the caller a merge pass.
        let mut affected = std::mem::take(&mut self.unmerged);
        for entry in remote {
            if entry.dataset_id != self.dataset_id {
                tracing::warn!(
                    dataset = %entry.dataset_id,
                    "dropping entry for foreign dataset"
                );
                continue;
            }
            if self.entries.contains_key(&entry.timestamp) {
                continue;
            }
            if let Err(e) = self.journal.append(&entry) {
                self.unmerged = affected;
                return Err(Error::AppendFailed(e.to_string()));
            }
            self.clock.observe(&entry.timestamp);
            affected.insert(entry.field_key());
            self.insert(entry);
        }
        if !affected.is_empty() {
            let last = self.clock.last();
            if let Err(e) = self.journal.save_clock(&last) {
                self.unmerged = affected;
                return Err(Error::AppendFailed(e.to_string()));
            }
        }
        Ok(affected)
    }

    /// Persist the sync cursor alongside the log.
    pub fn checkpoint_cursor(&mut self, cursor: &SyncCursor) -> Result<()> {
        self.journal
            .save_cursor(cursor)
            .map_err(|e| Error::AppendFailed(e.to_string()))
    }

    /// Winning timestamp for a field, if any entry has touched it.
    pub fn head(&self, key: &FieldKey) -> Option<Timestamp> {
        self.heads.get(key).copied()
    }

    /// Look up an entry by its timestamp identity.
    pub fn entry(&self, timestamp: &Timestamp) -> Option<&ChangeEntry> {
        self.entries.get(timestamp)
    }

    /// All field keys the log knows about for a record.
    pub fn fields_of(&self, record_id: &str) -> Vec<FieldKey> {
        self.heads
            .keys()
            .filter(|k| k.record_id == record_id)
            .cloned()
            .collect()
    }

    /// Iterate the full history in timestamp order.
    pub fn iter(&self) -> impl Iterator<Item = &ChangeEntry> {
        self.entries.values()
    }

    fn insert(&mut self, entry: ChangeEntry) {
        let key = entry.field_key();
        let ts = entry.timestamp;
        match self.heads.get(&key) {
            Some(head) if *head >= ts => {}
            _ => {
                self.heads.insert(key, ts);
            }
        }
        self.entries.insert(ts, entry);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Value;

    fn replica(n: u8) -> ReplicaId {
        ReplicaId::from_bytes([n; 16])
    }

    fn dataset() -> DatasetId {
        DatasetId::from_bytes([9; 16])
    }

    fn open_log(n: u8) -> ChangeLog {
        let (log, _) = ChangeLog::open(dataset(), replica(n), Box::new(MemoryJournal::new()))
            .expect("open");
        log
    }

    fn remote_entry(millis: u64, n: u8, record: &str, field: &str, value: Value) -> ChangeEntry {
        ChangeEntry::new(
            Timestamp::new(millis, 0, replica(n)),
            dataset(),
            record,
            field,
            value,
        )
    }

    #[test]
    fn append_assigns_increasing_timestamps() {
        let mut log = open_log(1);
        let a = log.append("t1", "amount", Value::Number(50.0)).unwrap();
        let b = log.append("t1", "amount", Value::Number(60.0)).unwrap();
        assert!(b.timestamp > a.timestamp);
        assert_eq!(log.len(), 2);
    }

    #[test]
    fn entries_since_is_exclusive_and_ordered() {
        let mut log = open_log(1);
        let a = log.append("t1", "amount", Value::Number(1.0)).unwrap();
        let b = log.append("t1", "payee", Value::Text("a".into())).unwrap();
        let c = log.append("t2", "amount", Value::Number(2.0)).unwrap();

        let all = log.entries_since(None);
        assert_eq!(all, vec![a.clone(), b.clone(), c.clone()]);

        let after_a = log.entries_since(Some(&a.timestamp));
        assert_eq!(after_a, vec![b, c.clone()]);

        let after_c = log.entries_since(Some(&c.timestamp));
        assert!(after_c.is_empty());
    }

    #[test]
    fn ingest_returns_affected_fields_and_advances_clock() {
        let mut log = open_log(1);
        let remote = remote_entry(999_999, 2, "t1", "amount", Value::Number(75.0));
        let affected = log.ingest(vec![remote.clone()]).unwrap();

        assert_eq!(affected.len(), 1);
        assert!(affected.contains(&FieldKey::new("t1", "amount")));
        // Clock moved past the remote high-water mark: its position carries
        // the local replica id, so compare the (millis, counter) pair
        let pos = log.clock_position();
        assert!(
            (pos.physical_millis, pos.counter)
                >= (remote.timestamp.physical_millis, remote.timestamp.counter)
        );
        let next = log.append("t1", "amount", Value::Number(80.0)).unwrap();
        assert!(next.timestamp > remote.timestamp);
    }

    #[test]
    fn ingest_deduplicates() {
        let mut log = open_log(1);
        let remote = remote_entry(100, 2, "t1", "amount", Value::Number(75.0));

        let first = log.ingest(vec![remote.clone()]).unwrap();
        assert_eq!(first.len(), 1);
        let second = log.ingest(vec![remote]).unwrap();
        assert!(second.is_empty());
        assert_eq!(log.len(), 1);
    }

    #[test]
    fn ingest_drops_foreign_dataset_entries() {
        let mut log = open_log(1);
        let mut foreign = remote_entry(100, 2, "t1", "amount", Value::Number(1.0));
        foreign.dataset_id = DatasetId::from_bytes([0xAA; 16]);
        let affected = log.ingest(vec![foreign]).unwrap();
        assert!(affected.is_empty());
        assert!(log.is_empty());
    }

    #[test]
    fn head_tracks_max_timestamp_per_field() {
        let mut log = open_log(1);
        let newer = remote_entry(500, 2, "t1", "amount", Value::Number(75.0));
        let older = remote_entry(100, 3, "t1", "amount", Value::Number(50.0));
        // Ingest newest first; the older entry must not displace the head
        log.ingest(vec![newer.clone(), older]).unwrap();
        assert_eq!(log.head(&FieldKey::new("t1", "amount")), Some(newer.timestamp));
        assert_eq!(log.len(), 2); // history retained
    }

    #[test]
    fn failed_journal_append_rejects_mutation_atomically() {
        struct BrokenJournal;
        impl Journal for BrokenJournal {
            fn append(&mut self, _: &ChangeEntry) -> std::result::Result<(), JournalError> {
                Err(JournalError("disk full".into()))
            }
            fn save_cursor(&mut self, _: &SyncCursor) -> std::result::Result<(), JournalError> {
                Ok(())
            }
            fn save_clock(&mut self, _: &Timestamp) -> std::result::Result<(), JournalError> {
                Ok(())
            }
            fn load(&mut self) -> std::result::Result<JournalState, JournalError> {
                Ok(JournalState::default())
            }
        }

        let (mut log, _) =
            ChangeLog::open(dataset(), replica(1), Box::new(BrokenJournal)).unwrap();
        let err = log.append("t1", "amount", Value::Number(1.0)).unwrap_err();
        assert!(matches!(err, Error::AppendFailed(_)));
        // Nothing became visible
        assert!(log.is_empty());
        assert!(log.entries_since(None).is_empty());
    }

    #[test]
    fn failed_append_still_checkpoints_the_issued_timestamp() {
        use std::sync::{Arc, Mutex};

        #[derive(Clone, Default)]
        struct SharedClock(Arc<Mutex<Option<Timestamp>>>);

        struct FlakyJournal {
            clock: SharedClock,
            fail_appends: bool,
        }
        impl Journal for FlakyJournal {
            fn append(&mut self, _: &ChangeEntry) -> std::result::Result<(), JournalError> {
                if self.fail_appends {
                    Err(JournalError("crash before durable write".into()))
                } else {
                    Ok(())
                }
            }
            fn save_cursor(&mut self, _: &SyncCursor) -> std::result::Result<(), JournalError> {
                Ok(())
            }
            fn save_clock(&mut self, last: &Timestamp) -> std::result::Result<(), JournalError> {
                *self.clock.0.lock().unwrap() = Some(*last);
                Ok(())
            }
            fn load(&mut self) -> std::result::Result<JournalState, JournalError> {
                Ok(JournalState {
                    entries: Vec::new(),
                    cursor: SyncCursor::default(),
                    clock: *self.clock.0.lock().unwrap(),
                })
            }
        }

        let cell = SharedClock::default();
        let (mut log, _) = ChangeLog::open(
            dataset(),
            replica(1),
            Box::new(FlakyJournal {
                clock: cell.clone(),
                fail_appends: true,
            }),
        )
        .unwrap();
        log.append("t1", "amount", Value::Number(1.0)).unwrap_err();
        let issued = cell.0.lock().unwrap().expect("clock checkpointed on issue");

        // Restart from the persisted clock alone: the lost mutation's
        // timestamp must never come out of the clock a second time.
        let (mut restarted, _) = ChangeLog::open(
            dataset(),
            replica(1),
            Box::new(FlakyJournal {
                clock: cell.clone(),
                fail_appends: false,
            }),
        )
        .unwrap();
        let next = restarted.append("t1", "amount", Value::Number(2.0)).unwrap();
        assert!(next.timestamp > issued);
    }

    #[test]
    fn retry_after_partial_ingest_reports_stranded_fields() {
        struct FailSecondAppend {
            appends: usize,
        }
        impl Journal for FailSecondAppend {
            fn append(&mut self, _: &ChangeEntry) -> std::result::Result<(), JournalError> {
                self.appends += 1;
                if self.appends == 2 {
                    Err(JournalError("disk full".into()))
                } else {
                    Ok(())
                }
            }
            fn save_cursor(&mut self, _: &SyncCursor) -> std::result::Result<(), JournalError> {
                Ok(())
            }
            fn save_clock(&mut self, _: &Timestamp) -> std::result::Result<(), JournalError> {
                Ok(())
            }
            fn load(&mut self) -> std::result::Result<JournalState, JournalError> {
                Ok(JournalState::default())
            }
        }

        let (mut log, _) =
            ChangeLog::open(dataset(), replica(1), Box::new(FailSecondAppend { appends: 0 }))
                .unwrap();
        let batch = vec![
            remote_entry(100, 2, "t1", "amount", Value::Number(1.0)),
            remote_entry(200, 2, "t2", "amount", Value::Number(2.0)),
        ];

        let err = log.ingest(batch.clone()).unwrap_err();
        assert!(matches!(err, Error::AppendFailed(_)));
        // The first entry landed before the failure
        assert_eq!(log.len(), 1);

        // The retry dedups the journaled entry but must still hand its
        // field back for re-resolution, alongside the one that failed.
        let affected = log.ingest(batch).unwrap();
        assert!(affected.contains(&FieldKey::new("t1", "amount")));
        assert!(affected.contains(&FieldKey::new("t2", "amount")));
        assert_eq!(log.len(), 2);
    }

    #[test]
    fn reopen_resumes_clock_and_history() {
        let mut journal = MemoryJournal::new();
        let issued;
        {
            // Build up state through a first log instance
            let state = journal.load().unwrap();
            let mut clock = HybridClock::resume(replica(1), state.clock);
            let ts = clock.next_at(4000);
            let entry = ChangeEntry::new(ts, dataset(), "t1", "amount", Value::Number(5.0));
            journal.append(&entry).unwrap();
            journal.save_clock(&ts).unwrap();
            issued = ts;
        }

        let (mut log, _) = ChangeLog::open(dataset(), replica(1), Box::new(journal)).unwrap();
        assert_eq!(log.len(), 1);
        let next = log.append("t1", "amount", Value::Number(6.0)).unwrap();
        assert!(next.timestamp > issued);
    }
}
