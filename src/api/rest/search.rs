//! Search endpoint

use std::sync::Arc;

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};

use super::{error_response, ApiError, ApiResponse};
use crate::api::state::AppState;
use crate::types::EventFilter;

/// POST /api/search - Search stored events
///
/// Backends without filter support answer 501.
pub async fn search_events(
    State(state): State<Arc<AppState>>,
    Json(filter): Json<EventFilter>,
) -> impl IntoResponse {
    if filter.entity_type_name.trim().is_empty() {
        let error = ApiError::bad_request("Field 'entityTypeName' is required");
        return (StatusCode::BAD_REQUEST, Json(error)).into_response();
    }

    match state.adapter.search(&filter).await {
        Ok(results) => {
            let total = results.len();
            (StatusCode::OK, Json(ApiResponse::with_total(results, total))).into_response()
        }
        Err(e) => error_response(&e),
    }
}
