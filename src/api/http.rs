//! HTTP server setup with Axum

use std::sync::Arc;

use axum::{
    extract::State,
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use super::rest::{events, search, snapshots};
use super::state::AppState;

/// Create the Axum router with all endpoints
pub fn create_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_check))
        .route("/api/events", post(events::store_events))
        .route(
            "/api/entities/:entity_type/:entity_id/events",
            get(events::events_since),
        )
        .route(
            "/api/entities/:entity_type/:entity_id/snapshot",
            get(snapshots::latest_snapshot),
        )
        .route(
            "/api/entities/:entity_type/:entity_id/stats",
            get(snapshots::stream_stats),
        )
        .route("/api/search", post(search::search_events))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Health check endpoint
async fn health_check(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "backend": state.adapter.registry().name(),
        "stored": state.stored_count(),
    }))
}
