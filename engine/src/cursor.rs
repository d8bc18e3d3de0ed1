//! Per-dataset sync bookkeeping.

use crate::Timestamp;
use serde::{Deserialize, Serialize};

/// High-water marks for incremental, idempotent re-sync.
///
/// `last_pushed` is the highest local timestamp the relay has acknowledged;
/// `last_applied` is the highest remote timestamp fully merged locally.
/// Mutated only by the sync transport, persisted alongside the change log.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncCursor {
    pub last_pushed: Option<Timestamp>,
    pub last_applied: Option<Timestamp>,
}

impl SyncCursor {
    /// Advance the outgoing mark; never moves backward.
    pub fn advance_pushed(&mut self, ack: Timestamp) {
        if self.last_pushed.map_or(true, |cur| ack > cur) {
            self.last_pushed = Some(ack);
        }
    }

    /// Advance the incoming mark; never moves backward.
    pub fn advance_applied(&mut self, applied: Timestamp) {
        if self.last_applied.map_or(true, |cur| applied > cur) {
            self.last_applied = Some(applied);
        }
    }
}
