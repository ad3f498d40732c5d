//! Integration tests for the Event Store HTTP API

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use entity_event_store::api::{create_router, AppState};
use entity_event_store::event_store::{EventStoreAdapter, FileRegistry, MemoryRegistry};
use entity_event_store::EventEnvelope;
use serde_json::{json, Value};
use tempfile::TempDir;
use tower::util::ServiceExt;

fn memory_app() -> Router {
    let adapter = EventStoreAdapter::new(Arc::new(MemoryRegistry::new()));
    create_router(Arc::new(AppState::new(adapter)))
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = if body.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&body).unwrap()
    };
    (status, json)
}

fn post_json(uri: &str, body: &Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn envelopes(items: &[EventEnvelope]) -> Value {
    serde_json::to_value(items).unwrap()
}

#[tokio::test]
async fn test_store_and_replay_over_http() {
    let app = memory_app();

    let batch = envelopes(&[
        EventEnvelope::event("Cart", "c-1", "CartCreated", 0, json!({"owner": "ann"})),
        EventEnvelope::event("Cart", "c-1", "ItemAdded", 1, json!({"items": 1})),
        EventEnvelope::snapshot("Cart", "c-1", "CartSnapshot", 1, json!({"owner": "ann", "items": 1})),
        EventEnvelope::event("Cart", "c-1", "ItemAdded", 2, json!({"items": 2})),
    ]);
    let (status, _) = send(&app, post_json("/api/events", &batch)).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, body) = send(&app, get("/api/entities/Cart/c-1/events")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], 2);
    assert_eq!(body["data"][0]["kind"], "SNAPSHOT");
    assert_eq!(body["data"][0]["version"], 1);
    assert_eq!(body["data"][1]["kind"], "EVENT");
    assert_eq!(body["data"][1]["entityID"], "c-1");

    let (status, body) = send(&app, get("/api/entities/Cart/c-1/snapshot")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["typeName"], "CartSnapshot");

    let (status, body) = send(&app, get("/api/entities/Cart/c-1/stats")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["eventCount"], 3);
    assert_eq!(body["data"]["eventsSinceSnapshot"], 1);

    let (_, health) = send(&app, get("/health")).await;
    assert_eq!(health["stored"], 4);
}

#[tokio::test]
async fn test_since_older_than_snapshot_replays_everything() {
    let app = memory_app();
    let batch = envelopes(&[
        EventEnvelope::event("Cart", "c-1", "CartCreated", 0, json!({})),
        EventEnvelope::snapshot("Cart", "c-1", "CartSnapshot", 0, json!({}))
            .with_created_at("2020-01-01T00:00:00Z".parse().unwrap()),
    ]);
    send(&app, post_json("/api/events", &batch)).await;

    let (status, body) = send(
        &app,
        get("/api/entities/Cart/c-1/events?since=2021-01-01T00:00:00Z"),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], 1);
    assert_eq!(body["data"][0]["kind"], "EVENT");
}

#[tokio::test]
async fn test_missing_snapshot_is_null() {
    let app = memory_app();
    let (status, body) = send(&app, get("/api/entities/Cart/nobody/snapshot")).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["data"].is_null());

    let (status, body) = send(&app, get("/api/entities/Cart/nobody/events")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"], json!([]));
}

#[tokio::test]
async fn test_version_conflict_is_409() {
    let app = memory_app();
    let first = envelopes(&[EventEnvelope::event("Cart", "c-1", "CartCreated", 0, json!({}))]);
    send(&app, post_json("/api/events", &first)).await;

    let (status, body) = send(&app, post_json("/api/events", &first)).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "CONFLICT");
    assert_eq!(body["index"], 0);
}

#[tokio::test]
async fn test_version_gap_is_400() {
    let app = memory_app();
    let batch = envelopes(&[
        EventEnvelope::event("Cart", "c-1", "CartCreated", 0, json!({})),
        EventEnvelope::event("Cart", "c-1", "ItemAdded", 5, json!({})),
    ]);

    let (status, body) = send(&app, post_json("/api/events", &batch)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "INVALID_ENVELOPE");
    assert_eq!(body["index"], 1);
}

#[tokio::test]
async fn test_search_over_file_registry() {
    let dir = TempDir::new().unwrap();
    let adapter = EventStoreAdapter::new(Arc::new(FileRegistry::new(dir.path())));
    let app = create_router(Arc::new(AppState::new(adapter)));

    let batch = envelopes(&[
        EventEnvelope::event("Cart", "c-1", "CartCreated", 0, json!({})).with_request_id("req-1"),
        EventEnvelope::event("Cart", "c-2", "CartCreated", 0, json!({})),
        EventEnvelope::event("Cart", "c-2", "ItemAdded", 1, json!({})),
    ]);
    let (status, _) = send(&app, post_json("/api/events", &batch)).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let filter = json!({"entityTypeName": "Cart", "typeName": "CartCreated", "includeVersion": true});
    let (status, body) = send(&app, post_json("/api/search", &filter)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], 2);
    assert_eq!(body["data"][0]["type"], "CartCreated");
    assert_eq!(body["data"][0]["entity"], "Cart");
    assert_eq!(body["data"][0]["version"], 0);
}

#[tokio::test]
async fn test_search_requires_entity_type() {
    let app = memory_app();
    let (status, body) = send(&app, post_json("/api/search", &json!({"entityTypeName": " "}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "BAD_REQUEST");
}
