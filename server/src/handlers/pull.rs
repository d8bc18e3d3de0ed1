//! Pull handler - serves sealed entries back to clients.

use crate::db;
use crate::error::{AppError, Result};
use serde::Deserialize;
use tally_engine::{PullResponse, Timestamp};
use uuid::Uuid;

/// Query parameters for pull sync.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PullQuery {
    /// Cursor from the previous pull (absent for the initial sync)
    pub since: Option<String>,
    /// Maximum number of entries to return
    pub limit: Option<i64>,
}

/// Default page size for pull requests.
const DEFAULT_LIMIT: i64 = 100;

/// Process a pull request from a client.
pub async fn handle_pull(
    pool: &sqlx::PgPool,
    dataset_id: Uuid,
    query: PullQuery,
    max_page_size: i64,
) -> Result<PullResponse> {
    let since = match query.since.as_deref() {
        Some(raw) if !raw.is_empty() => Some(
            raw.parse::<Timestamp>()
                .map_err(|e| AppError::BadRequest(format!("invalid since cursor: {e}")))?,
        ),
        _ => None,
    };

    let limit = query
        .limit
        .map(|l| l.clamp(1, max_page_size))
        .unwrap_or(DEFAULT_LIMIT);

    // Fetch one extra row to learn whether another page exists
    let stored = db::get_entries_since(pool, dataset_id, since, limit + 1).await?;

    let has_more = stored.len() as i64 > limit;
    let page: Vec<_> = stored.into_iter().take(limit as usize).collect();

    // Resume from the last entry served; an empty page echoes `since` back
    let next_cursor = page.last().map(|m| m.timestamp()).or(since);
    let entries = page.iter().map(|m| m.to_entry()).collect();

    Ok(PullResponse {
        entries,
        next_cursor,
        has_more,
    })
}
