//! Shared application state

use std::sync::atomic::{AtomicU64, Ordering};

use crate::event_store::EventStoreAdapter;

/// State shared by all HTTP handlers
pub struct AppState {
    /// The event store
    pub adapter: EventStoreAdapter,

    /// Envelopes accepted through `POST /api/events` since startup
    stored: AtomicU64,
}

impl AppState {
    pub fn new(adapter: EventStoreAdapter) -> Self {
        Self {
            adapter,
            stored: AtomicU64::new(0),
        }
    }

    pub(crate) fn record_stored(&self, count: usize) {
        self.stored.fetch_add(count as u64, Ordering::Relaxed);
    }

    /// Envelopes accepted since startup
    pub fn stored_count(&self) -> u64 {
        self.stored.load(Ordering::Relaxed)
    }
}
