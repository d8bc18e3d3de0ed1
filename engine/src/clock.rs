//! Hybrid logical clock for causal ordering of change entries.
//!
//! The clock provides a total ordering across all replicas, which is
//! essential for deterministic last-writer-wins resolution.

use crate::{error::Result, Error, ReplicaId};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

/// A hybrid logical timestamp.
///
/// Ordering rules:
/// 1. Higher physical milliseconds wins
/// 2. If equal, higher counter wins
/// 3. If still equal, lexicographically higher replica id wins
///
/// This ensures a total order across all entries from all replicas, even
/// under wall-clock collisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Timestamp {
    /// Wall-clock milliseconds since the Unix epoch, as observed by the issuer
    pub physical_millis: u64,
    /// Logical counter for events within the same millisecond
    pub counter: u32,
    /// Replica that issued this timestamp
    pub replica_id: ReplicaId,
}

impl Timestamp {
    /// Create a timestamp with explicit components.
    pub fn new(physical_millis: u64, counter: u32, replica_id: ReplicaId) -> Self {
        Self {
            physical_millis,
            counter,
            replica_id,
        }
    }
}

impl Ord for Timestamp {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.physical_millis, self.counter, self.replica_id.as_bytes()).cmp(&(
            other.physical_millis,
            other.counter,
            other.replica_id.as_bytes(),
        ))
    }
}

impl PartialOrd for Timestamp {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Wire/cursor encoding: `{millis:013}-{counter:04X}-{replicaUuid}`.
impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:013}-{:04X}-{}",
            self.physical_millis, self.counter, self.replica_id
        )
    }
}

impl FromStr for Timestamp {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let mut parts = s.splitn(3, '-');
        let millis = parts
            .next()
            .and_then(|p| p.parse::<u64>().ok())
            .ok_or_else(|| Error::InvalidCursor(s.to_string()))?;
        let counter = parts
            .next()
            .and_then(|p| u32::from_str_radix(p, 16).ok())
            .ok_or_else(|| Error::InvalidCursor(s.to_string()))?;
        let replica_id = parts
            .next()
            .and_then(|p| ReplicaId::parse_str(p).ok())
            .ok_or_else(|| Error::InvalidCursor(s.to_string()))?;
        Ok(Timestamp::new(millis, counter, replica_id))
    }
}

/// The clock that issues [`Timestamp`]s for one replica.
///
/// Guarantees:
/// - never returns a timestamp ≤ any timestamp it previously returned
/// - never returns a timestamp ≤ the highest remote timestamp it has
///   observed via [`HybridClock::observe`]
/// - absorbs wall-clock regression by incrementing the counter instead of
///   moving `physical_millis` backward
#[derive(Debug, Clone)]
pub struct HybridClock {
    replica_id: ReplicaId,
    last_millis: u64,
    last_counter: u32,
}

impl HybridClock {
    /// Create a fresh clock for a replica.
    pub fn new(replica_id: ReplicaId) -> Self {
        Self {
            replica_id,
            last_millis: 0,
            last_counter: 0,
        }
    }

    /// Restore a clock from its persisted last-issued timestamp, so restart
    /// never reissues or regresses.
    pub fn resume(replica_id: ReplicaId, last: Option<Timestamp>) -> Self {
        let mut clock = Self::new(replica_id);
        if let Some(ts) = last {
            clock.last_millis = ts.physical_millis;
            clock.last_counter = ts.counter;
        }
        clock
    }

    /// The replica this clock issues for.
    pub fn replica_id(&self) -> ReplicaId {
        self.replica_id
    }

    /// The last timestamp issued or observed, for persistence.
    pub fn last(&self) -> Timestamp {
        Timestamp::new(self.last_millis, self.last_counter, self.replica_id)
    }

    /// Issue the next timestamp using the system wall clock.
    pub fn next(&mut self) -> Timestamp {
        self.next_at(wall_millis())
    }

    /// Issue the next timestamp for a given wall-clock reading.
    pub fn next_at(&mut self, now_millis: u64) -> Timestamp {
        if now_millis > self.last_millis {
            self.last_millis = now_millis;
            self.last_counter = 0;
        } else {
            // Wall clock stalled or moved backward: advance the counter,
            // spilling into the next millisecond on overflow.
            match self.last_counter.checked_add(1) {
                Some(c) => self.last_counter = c,
                None => {
                    self.last_millis += 1;
                    self.last_counter = 0;
                }
            }
        }
        self.last()
    }

    /// Advance past a remote timestamp so subsequently issued timestamps
    /// order after everything this replica has seen.
    pub fn observe(&mut self, remote: &Timestamp) {
        if (remote.physical_millis, remote.counter) > (self.last_millis, self.last_counter) {
            self.last_millis = remote.physical_millis;
            self.last_counter = remote.counter;
        }
    }
}

/// Current wall-clock time in milliseconds since the Unix epoch.
pub(crate) fn wall_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
