//! Snapshot and stream statistics endpoints

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};

use super::{error_response, ApiResponse};
use crate::api::state::AppState;

/// GET /api/entities/:entity_type/:entity_id/snapshot - Latest snapshot
///
/// Responds with `{"data": null}` when the entity was never snapshotted.
pub async fn latest_snapshot(
    State(state): State<Arc<AppState>>,
    Path((entity_type, entity_id)): Path<(String, String)>,
) -> impl IntoResponse {
    match state.adapter.latest_snapshot(&entity_type, &entity_id).await {
        Ok(snapshot) => (StatusCode::OK, Json(ApiResponse::new(snapshot))).into_response(),
        Err(e) => error_response(&e),
    }
}

/// GET /api/entities/:entity_type/:entity_id/stats - Stream statistics
pub async fn stream_stats(
    State(state): State<Arc<AppState>>,
    Path((entity_type, entity_id)): Path<(String, String)>,
) -> impl IntoResponse {
    match state.adapter.stream_stats(&entity_type, &entity_id).await {
        Ok(stats) => (StatusCode::OK, Json(ApiResponse::new(stats))).into_response(),
        Err(e) => error_response(&e),
    }
}
