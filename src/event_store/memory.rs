//! In-memory registry
//!
//! Reference backend holding every stream behind a single `RwLock`. Appends
//! take the write lock for validation and insertion, so each append is atomic
//! and readers always see a consistent stream.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::types::{EnvelopeKind, EventEnvelope, EventFilter};

use super::error::{EventStoreResult, Operation};
use super::registry::{Registry, StreamHead};
use super::stream_key::StreamKey;

#[derive(Debug, Default)]
struct StreamLog {
    head: StreamHead,
    /// Ascending by version
    events: Vec<EventEnvelope>,
    /// Ascending by version
    snapshots: Vec<EventEnvelope>,
}

/// Registry kept entirely in process memory
#[derive(Debug, Default)]
pub struct MemoryRegistry {
    streams: RwLock<HashMap<StreamKey, StreamLog>>,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Registry for MemoryRegistry {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn append(&self, envelope: &EventEnvelope) -> EventStoreResult<()> {
        let key = envelope.stream_key();
        let mut streams = self.streams.write();
        let head = streams.get(&key).map(|log| log.head).unwrap_or_default();
        head.check_append(&key, envelope)?;

        let log = streams.entry(key.clone()).or_default();
        log.head.record(envelope);
        match envelope.kind {
            EnvelopeKind::Event => log.events.push(envelope.clone()),
            EnvelopeKind::Snapshot => log.snapshots.push(envelope.clone()),
        }

        tracing::debug!(
            stream = %key,
            operation = %Operation::Append,
            kind = %envelope.kind,
            version = envelope.version,
            outcome = "ok",
            "memory registry append"
        );
        Ok(())
    }

    async fn query_range(
        &self,
        key: &StreamKey,
        after: Option<u64>,
    ) -> EventStoreResult<Vec<EventEnvelope>> {
        let streams = self.streams.read();
        let events = match streams.get(key) {
            Some(log) => {
                let start = match after {
                    Some(after) => log.events.partition_point(|e| e.version <= after),
                    None => 0,
                };
                log.events[start..].to_vec()
            }
            None => Vec::new(),
        };
        Ok(events)
    }

    async fn query_latest_snapshot(
        &self,
        key: &StreamKey,
    ) -> EventStoreResult<Option<EventEnvelope>> {
        let streams = self.streams.read();
        Ok(streams.get(key).and_then(|log| log.snapshots.last().cloned()))
    }

    async fn query_by_filter(&self, filter: &EventFilter) -> EventStoreResult<Vec<EventEnvelope>> {
        let matches = {
            let streams = self.streams.read();
            streams
                .iter()
                .filter(|(key, _)| key.entity_type_name == filter.entity_type_name)
                .flat_map(|(_, log)| log.events.iter())
                .filter(|e| filter.matches(e))
                .cloned()
                .collect::<Vec<_>>()
        };
        Ok(filter.finish(matches))
    }
}
