//! # Tally Engine
//!
//! The synchronization core of Tally, a local-first personal-finance
//! ledger. It keeps many independent, possibly long-offline replicas of the
//! same dataset eventually consistent without a central arbiter of truth.
//!
//! ## Design Principles
//!
//! - **The change log is the source of truth**: every mutation is an
//!   immutable, timestamped [`ChangeEntry`]; materialized record state is
//!   always re-derivable from the log.
//! - **Field-level last-writer-wins**: each `(record, field)` resolves
//!   independently to the entry with the greatest [`Timestamp`]. The
//!   timestamp total order (millis, counter, replica id) makes resolution
//!   deterministic and order-independent, so replicas that have observed
//!   the same entries converge byte-for-byte.
//! - **Traits at the seams**: durability ([`Journal`]), materialized
//!   storage ([`StoreAdapter`]), and the relay ([`transport::RelayClient`])
//!   are traits, so the engine's core logic stays pure and testable.
//! - **End-to-end encryption**: entries are sealed with AES-256-GCM before
//!   they leave the device; the relay stores opaque ciphertext only.
//!
//! ## Core Flow
//!
//! Local mutation → [`SyncEngine::mutate`] appends to the [`ChangeLog`]
//! (durable first) and materializes optimistically. The
//! [`transport::SyncTransport`] periodically pushes unacknowledged entries
//! to the relay, pulls entries authored elsewhere, re-resolves every
//! affected field via [`merge`], and applies the winners through the
//! [`StoreAdapter`]. Subscribers registered with
//! [`SyncEngine::subscribe_to_changes`] are notified after each completed
//! merge phase.
//!
//! ## Quick Start
//!
//! ```rust
//! use tally_engine::{
//!     DatasetId, Key, MemoryJournal, MemoryStore, ReplicaId, SyncEngine, Value,
//! };
//!
//! let engine = SyncEngine::open(
//!     DatasetId::new_v4(),
//!     ReplicaId::new_v4(),
//!     Key::generate(),
//!     MemoryStore::new(),
//!     Box::new(MemoryJournal::new()),
//! )
//! .unwrap();
//!
//! engine.mutate("txn-1", "amount", Value::Number(50.0)).unwrap();
//! engine.mutate("txn-1", "payee", Value::from("Corner Grocer")).unwrap();
//!
//! assert_eq!(
//!     engine.current_value("txn-1", "amount"),
//!     Some(Value::Number(50.0))
//! );
//! ```

pub mod changelog;
pub mod clock;
pub mod crypto;
pub mod cursor;
pub mod engine;
pub mod entry;
pub mod error;
pub mod merge;
pub mod protocol;
pub mod store;
pub mod transport;
pub mod value;

// Re-export main types at crate root
pub use changelog::{ChangeLog, Journal, JournalError, JournalState, MemoryJournal};
pub use clock::{HybridClock, Timestamp};
pub use crypto::{Key, Sealed, KEY_LEN, NONCE_LEN};
pub use cursor::SyncCursor;
pub use engine::{ChangeCallback, SyncEngine};
pub use entry::{ChangeEntry, FieldKey};
pub use error::{Error, Result};
pub use protocol::{EncryptedEntry, PullResponse, PushRequest, PushResponse};
pub use store::{MemoryStore, StoreAdapter};
pub use transport::{BackoffPolicy, HttpRelay, RelayClient, SyncOutcome, SyncStatus, SyncTransport};
pub use value::{Value, TOMBSTONE_FIELD};

/// Type aliases for clarity
pub type RecordId = String;
pub type FieldName = String;
pub type ReplicaId = uuid::Uuid;
pub type DatasetId = uuid::Uuid;
