//! Database operations for the per-dataset message log.
//!
//! A message is one sealed change entry. Its identity is the timestamp
//! triple (millis, counter, replica), which is unique across all replicas
//! of a dataset, so re-pushing the same entry is a no-op.

use sqlx::{PgPool, Row};
use tally_engine::{EncryptedEntry, Timestamp};
use uuid::Uuid;

/// A stored message row from the database.
#[derive(Debug)]
pub struct StoredMessage {
    #[allow(dead_code)]
    pub id: i64,
    #[allow(dead_code)]
    pub dataset_id: Uuid,
    pub ts_millis: i64,
    pub ts_counter: i64,
    pub ts_replica: Uuid,
    pub replica_id: Uuid,
    pub ciphertext: Vec<u8>,
    pub nonce: Vec<u8>,
    #[allow(dead_code)]
    pub received_at: chrono::DateTime<chrono::Utc>,
}

impl<'r> sqlx::FromRow<'r, sqlx::postgres::PgRow> for StoredMessage {
    fn from_row(row: &'r sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        Ok(StoredMessage {
            id: row.try_get("id")?,
            dataset_id: row.try_get("dataset_id")?,
            ts_millis: row.try_get("ts_millis")?,
            ts_counter: row.try_get("ts_counter")?,
            ts_replica: row.try_get("ts_replica")?,
            replica_id: row.try_get("replica_id")?,
            ciphertext: row.try_get("ciphertext")?,
            nonce: row.try_get("nonce")?,
            received_at: row.try_get("received_at")?,
        })
    }
}

impl StoredMessage {
    /// The entry's ordering key.
    pub fn timestamp(&self) -> Timestamp {
        Timestamp::new(
            self.ts_millis as u64,
            self.ts_counter as u32,
            self.ts_replica,
        )
    }

    /// Convert a database row back to a wire entry.
    pub fn to_entry(&self) -> EncryptedEntry {
        EncryptedEntry {
            replica_id: self.replica_id,
            timestamp: self.timestamp(),
            ciphertext: self.ciphertext.clone(),
            nonce: self.nonce.clone(),
        }
    }
}

/// Insert a batch of sealed entries atomically.
///
/// Entries already present (same timestamp triple) are skipped, which makes
/// a retried push idempotent. The whole batch commits before the caller
/// acks, so an acked entry is always durable.
pub async fn insert_entries(
    pool: &PgPool,
    dataset_id: Uuid,
    entries: &[EncryptedEntry],
) -> Result<(), sqlx::Error> {
    let mut tx = pool.begin().await?;

    for entry in entries {
        sqlx::query(
            r#"
            INSERT INTO messages (
                dataset_id, ts_millis, ts_counter, ts_replica,
                replica_id, ciphertext, nonce
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (dataset_id, ts_millis, ts_counter, ts_replica) DO NOTHING
            "#,
        )
        .bind(dataset_id)
        .bind(entry.timestamp.physical_millis as i64)
        .bind(entry.timestamp.counter as i64)
        .bind(entry.timestamp.replica_id)
        .bind(entry.replica_id)
        .bind(&entry.ciphertext)
        .bind(&entry.nonce)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await
}

/// Get a dataset's entries strictly after `since`, oldest first.
///
/// Row comparison on the timestamp triple matches the client's ordering:
/// PostgreSQL compares uuids byte-wise, same as the replica tie-break.
pub async fn get_entries_since(
    pool: &PgPool,
    dataset_id: Uuid,
    since: Option<Timestamp>,
    limit: i64,
) -> Result<Vec<StoredMessage>, sqlx::Error> {
    match since {
        Some(cursor) => {
            sqlx::query_as::<_, StoredMessage>(
                r#"
                SELECT id, dataset_id, ts_millis, ts_counter, ts_replica,
                       replica_id, ciphertext, nonce, received_at
                FROM messages
                WHERE dataset_id = $1
                  AND (ts_millis, ts_counter, ts_replica) > ($2, $3, $4)
                ORDER BY ts_millis ASC, ts_counter ASC, ts_replica ASC
                LIMIT $5
                "#,
            )
            .bind(dataset_id)
            .bind(cursor.physical_millis as i64)
            .bind(cursor.counter as i64)
            .bind(cursor.replica_id)
            .bind(limit)
            .fetch_all(pool)
            .await
        }
        None => {
            sqlx::query_as::<_, StoredMessage>(
                r#"
                SELECT id, dataset_id, ts_millis, ts_counter, ts_replica,
                       replica_id, ciphertext, nonce, received_at
                FROM messages
                WHERE dataset_id = $1
                ORDER BY ts_millis ASC, ts_counter ASC, ts_replica ASC
                LIMIT $2
                "#,
            )
            .bind(dataset_id)
            .bind(limit)
            .fetch_all(pool)
            .await
        }
    }
}
