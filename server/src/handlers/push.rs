//! Push handler - stores sealed entries from clients.
//!
//! The relay never inspects ciphertext. It checks only the cleartext
//! envelope metadata, stores the batch durably, and acks the highest
//! timestamp of the batch it was handed. The ack is scoped to the request:
//! acking the dataset-wide maximum would let a client's push cursor jump
//! past entries it has not authored yet.

use crate::db;
use crate::error::{AppError, Result};
use tally_engine::{PushRequest, PushResponse};
use uuid::Uuid;

/// Process a push request from a client.
pub async fn handle_push(
    pool: &sqlx::PgPool,
    dataset_id: Uuid,
    request: PushRequest,
) -> Result<PushResponse> {
    if request.entries.is_empty() {
        return Ok(PushResponse { ack: None });
    }

    // The envelope carries the authoring replica twice; a mismatch means a
    // malformed client, and storing it would corrupt fan-out filtering.
    for entry in &request.entries {
        if entry.replica_id != entry.timestamp.replica_id {
            return Err(AppError::BadRequest(format!(
                "entry replica {} does not match timestamp replica {}",
                entry.replica_id, entry.timestamp.replica_id
            )));
        }
    }

    let ack = request.entries.iter().map(|e| e.timestamp).max();

    // Commit before acking: an acked entry must survive a relay crash.
    db::insert_entries(pool, dataset_id, &request.entries).await?;

    tracing::debug!(
        dataset = %dataset_id,
        entries = request.entries.len(),
        "stored push batch"
    );

    Ok(PushResponse { ack })
}
