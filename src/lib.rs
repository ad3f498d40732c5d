//! Entity Event Store
//!
//! Event-sourcing persistence for domain entities: append-only per-entity
//! event streams with optimistic versioning, snapshot-anchored replay and
//! filtered search over a pluggable storage backend.
//!
//! # Modules
//!
//! - `types`: Envelope, filter and search-result value types
//! - `event_store`: Registry backends, the adapter and the snapshot materializer
//! - `config`: Environment-driven configuration
//! - `api`: HTTP surface over the adapter
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use entity_event_store::{EventEnvelope, EventStoreAdapter, MemoryRegistry};
//! use serde_json::json;
//!
//! # async fn run() -> Result<(), entity_event_store::EventStoreError> {
//! let store = EventStoreAdapter::new(Arc::new(MemoryRegistry::new()));
//! store
//!     .store(&[EventEnvelope::event("Cart", "c-1", "CartCreated", 0, json!({"owner": "ann"}))])
//!     .await?;
//! let envelopes = store.events_since("Cart", "c-1", None).await?;
//! assert_eq!(envelopes.len(), 1);
//! # Ok(())
//! # }
//! ```

pub mod api;
pub mod config;
pub mod event_store;
pub mod types;

// Re-export commonly used items at crate root
pub use config::{ConfigError, EventStoreConfig};
pub use event_store::{
    EventStoreAdapter, EventStoreError, EventStoreResult, FileRegistry, MaterializeOutcome,
    Materializer, MemoryRegistry, Registry, SnapshotPolicy, SnapshotReducer, StreamKey,
};
pub use types::{EnvelopeKind, EventEnvelope, EventFilter, SearchResult};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
