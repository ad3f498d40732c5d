//! Stream statistics
//!
//! Summarizes one stream: how many events it holds, where its latest
//! snapshot sits, and how many events would be replayed on top of it.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::types::EventEnvelope;

use super::stream_key::StreamKey;

/// Statistics about one entity stream
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamStats {
    pub stream: String,
    /// Number of EVENT records
    pub event_count: usize,
    pub first_version: Option<u64>,
    pub last_version: Option<u64>,
    pub latest_snapshot_version: Option<u64>,
    /// Events a snapshot-anchored replay still has to fold
    pub events_since_snapshot: usize,
    pub last_event_at: Option<DateTime<Utc>>,
    pub latest_snapshot_at: Option<DateTime<Utc>>,
}

impl StreamStats {
    /// Build statistics from a full event range and the latest snapshot
    pub fn collect(
        key: &StreamKey,
        events: &[EventEnvelope],
        snapshot: Option<&EventEnvelope>,
    ) -> Self {
        let snapshot_version = snapshot.map(|s| s.version);
        let events_since_snapshot = match snapshot_version {
            Some(v) => events.iter().filter(|e| e.version > v).count(),
            None => events.len(),
        };

        Self {
            stream: key.to_string(),
            event_count: events.len(),
            first_version: events.first().map(|e| e.version),
            last_version: events.last().map(|e| e.version),
            latest_snapshot_version: snapshot_version,
            events_since_snapshot,
            last_event_at: events.last().map(|e| e.created_at),
            latest_snapshot_at: snapshot.map(|s| s.created_at),
        }
    }
}
