//! REST API module for HTTP endpoints
//!
//! - `POST /api/events` - Append envelopes in order
//! - `GET /api/entities/:entity_type/:entity_id/events` - Envelopes to rebuild an entity
//! - `GET /api/entities/:entity_type/:entity_id/snapshot` - Latest snapshot
//! - `GET /api/entities/:entity_type/:entity_id/stats` - Stream statistics
//! - `POST /api/search` - Filtered event search

pub mod events;
pub mod search;
pub mod snapshots;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use crate::event_store::EventStoreError;

/// Standard API response wrapper
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    /// Response data
    pub data: T,
    /// Total count (for list responses)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total: Option<usize>,
}

impl<T> ApiResponse<T> {
    pub fn new(data: T) -> Self {
        Self { data, total: None }
    }

    pub fn with_total(data: T, total: usize) -> Self {
        Self {
            data,
            total: Some(total),
        }
    }
}

/// API error response
#[derive(Debug, Serialize)]
pub struct ApiError {
    pub error: String,
    pub code: String,
    /// Index of the envelope a batch append stopped at
    #[serde(skip_serializing_if = "Option::is_none")]
    pub index: Option<usize>,
}

impl ApiError {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            error: message.into(),
            code: code.to_string(),
            index: None,
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new("BAD_REQUEST", message)
    }
}

/// Map a store error to its HTTP status and error body
pub(crate) fn error_response(err: &EventStoreError) -> Response {
    let index = match err {
        EventStoreError::StoreAborted { index, .. } => Some(*index),
        _ => None,
    };

    let (status, code) = match err.root() {
        EventStoreError::Conflict { .. } => (StatusCode::CONFLICT, "CONFLICT"),
        EventStoreError::InvalidEnvelope { .. } => (StatusCode::BAD_REQUEST, "INVALID_ENVELOPE"),
        EventStoreError::NotImplemented { .. } => (StatusCode::NOT_IMPLEMENTED, "NOT_IMPLEMENTED"),
        EventStoreError::Io { .. } if err.is_timeout() => {
            (StatusCode::SERVICE_UNAVAILABLE, "TIMEOUT")
        }
        EventStoreError::Io { .. } => (StatusCode::SERVICE_UNAVAILABLE, "IO_ERROR"),
        EventStoreError::Cancelled { .. } => (StatusCode::SERVICE_UNAVAILABLE, "CANCELLED"),
        EventStoreError::Fold { .. } | EventStoreError::StoreAborted { .. } => {
            (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR")
        }
    };

    let body = ApiError {
        index,
        ..ApiError::new(code, err.to_string())
    };
    (status, Json(body)).into_response()
}
