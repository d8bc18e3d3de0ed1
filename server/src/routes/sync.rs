//! Sync endpoint routes.

use axum::{
    extract::{Path, Query, State},
    routing::{get, post},
    Json, Router,
};
use tally_engine::{PullResponse, PushRequest, PushResponse};
use uuid::Uuid;

use crate::auth::AuthUser;
use crate::error::Result;
use crate::handlers::{handle_pull, handle_push, PullQuery};
use crate::AppState;

/// Create sync routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/sync/{dataset_id}/push", post(push_handler))
        .route("/sync/{dataset_id}/pull", get(pull_handler))
}

/// POST /sync/{datasetId}/push - Store sealed entries.
async fn push_handler(
    State(state): State<AppState>,
    Path(dataset_id): Path<Uuid>,
    _auth: AuthUser,
    Json(request): Json<PushRequest>,
) -> Result<Json<PushResponse>> {
    let response = handle_push(&state.pool, dataset_id, request).await?;
    Ok(Json(response))
}

/// GET /sync/{datasetId}/pull - Serve sealed entries after a cursor.
async fn pull_handler(
    State(state): State<AppState>,
    Path(dataset_id): Path<Uuid>,
    _auth: AuthUser,
    Query(query): Query<PullQuery>,
) -> Result<Json<PullResponse>> {
    let response =
        handle_pull(&state.pool, dataset_id, query, state.config.max_page_size).await?;
    Ok(Json(response))
}
