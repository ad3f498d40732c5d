//! Event endpoints

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;

use super::{error_response, ApiResponse};
use crate::api::state::AppState;
use crate::event_store::EventStoreError;
use crate::types::EventEnvelope;

/// Query parameters for entity replay
#[derive(Debug, Deserialize)]
pub struct SinceParams {
    /// Ignore snapshots created before this instant (RFC 3339)
    pub since: Option<DateTime<Utc>>,
}

/// POST /api/events - Append a batch of envelopes in order
pub async fn store_events(
    State(state): State<Arc<AppState>>,
    Json(envelopes): Json<Vec<EventEnvelope>>,
) -> impl IntoResponse {
    match state.adapter.store(&envelopes).await {
        Ok(()) => {
            state.record_stored(envelopes.len());
            StatusCode::NO_CONTENT.into_response()
        }
        Err(e) => {
            if let EventStoreError::StoreAborted { committed, .. } = &e {
                state.record_stored(*committed);
            }
            error_response(&e)
        }
    }
}

/// GET /api/entities/:entity_type/:entity_id/events - Envelopes to rebuild an entity
///
/// Starts with the latest usable snapshot, if any, followed by the events
/// after it.
pub async fn events_since(
    State(state): State<Arc<AppState>>,
    Path((entity_type, entity_id)): Path<(String, String)>,
    Query(params): Query<SinceParams>,
) -> impl IntoResponse {
    match state
        .adapter
        .events_since(&entity_type, &entity_id, params.since)
        .await
    {
        Ok(envelopes) => {
            let total = envelopes.len();
            (StatusCode::OK, Json(ApiResponse::with_total(envelopes, total))).into_response()
        }
        Err(e) => error_response(&e),
    }
}
