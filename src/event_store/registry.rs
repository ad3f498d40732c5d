//! Storage backend contract
//!
//! A [`Registry`] durably stores raw envelopes keyed by stream and answers
//! the three primitive queries the adapter builds on. Backends enforce the
//! stream invariants at append time through [`StreamHead::check_append`], so
//! every conforming backend rejects the same envelopes the same way.

use async_trait::async_trait;

use crate::types::{EnvelopeKind, EventEnvelope, EventFilter};

use super::error::{EventStoreError, EventStoreResult};
use super::stream_key::StreamKey;

/// Durable keyed storage for envelopes
///
/// Implementations must make each `append` atomic (the record is fully
/// visible or not at all) and must let reads run concurrently with appends.
/// Reads may lag behind the latest append but never observe a version gap
/// or a duplicate version.
#[async_trait]
pub trait Registry: Send + Sync {
    /// Short backend name used in errors and traces
    fn name(&self) -> &'static str;

    /// Persist one envelope under its stream key.
    ///
    /// Fails with [`EventStoreError::Conflict`] if the version is taken and
    /// with [`EventStoreError::Io`] if the backend is unavailable.
    async fn append(&self, envelope: &EventEnvelope) -> EventStoreResult<()>;

    /// EVENT records with version greater than `after`, ascending by
    /// version. `None` reads from the start of the stream.
    async fn query_range(
        &self,
        key: &StreamKey,
        after: Option<u64>,
    ) -> EventStoreResult<Vec<EventEnvelope>>;

    /// The SNAPSHOT with the greatest version, if any
    async fn query_latest_snapshot(&self, key: &StreamKey)
        -> EventStoreResult<Option<EventEnvelope>>;

    /// EVENT records matching the filter, ascending by `createdAt`.
    ///
    /// Backends that cannot search report [`EventStoreError::NotImplemented`]
    /// so callers can feature-detect instead of retrying.
    async fn query_by_filter(&self, _filter: &EventFilter) -> EventStoreResult<Vec<EventEnvelope>> {
        Err(EventStoreError::NotImplemented {
            backend: self.name(),
            capability: "query_by_filter",
        })
    }
}

/// Version bookkeeping for one stream, as seen by a backend under its
/// write lock
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamHead {
    /// Version of the first EVENT in the stream
    pub first_event: Option<u64>,
    /// Version of the last EVENT in the stream
    pub last_event: Option<u64>,
    /// Version of the latest SNAPSHOT
    pub latest_snapshot: Option<u64>,
}

impl StreamHead {
    /// Whether an EVENT with this version is present. Event versions are
    /// contiguous, so membership is a range check.
    pub fn has_event(&self, version: u64) -> bool {
        match (self.first_event, self.last_event) {
            (Some(first), Some(last)) => (first..=last).contains(&version),
            _ => false,
        }
    }

    /// Validate an envelope against the stream invariants.
    ///
    /// - EVENT: the first event may carry any version, later ones must be
    ///   exactly `last + 1`. A version at or below `last` is a conflict; a
    ///   gap is invalid.
    /// - SNAPSHOT: must sit on an existing event and be strictly newer than
    ///   the latest snapshot (otherwise a conflict).
    pub fn check_append(&self, key: &StreamKey, envelope: &EventEnvelope) -> EventStoreResult<()> {
        let version = envelope.version;
        match envelope.kind {
            EnvelopeKind::Event => match self.last_event {
                None => Ok(()),
                Some(last) if version <= last => Err(EventStoreError::Conflict {
                    stream: key.to_string(),
                    version,
                }),
                Some(last) if version == last + 1 => Ok(()),
                Some(last) => Err(EventStoreError::invalid(
                    key,
                    format!("version {version} leaves a gap after {last}"),
                )),
            },
            EnvelopeKind::Snapshot => {
                if let Some(latest) = self.latest_snapshot {
                    if version <= latest {
                        return Err(EventStoreError::Conflict {
                            stream: key.to_string(),
                            version,
                        });
                    }
                }
                if !self.has_event(version) {
                    return Err(EventStoreError::invalid(
                        key,
                        format!("snapshot version {version} has no matching event"),
                    ));
                }
                Ok(())
            }
        }
    }

    /// Advance the head past an accepted envelope
    pub fn record(&mut self, envelope: &EventEnvelope) {
        match envelope.kind {
            EnvelopeKind::Event => {
                self.first_event.get_or_insert(envelope.version);
                self.last_event = Some(envelope.version);
            }
            EnvelopeKind::Snapshot => self.latest_snapshot = Some(envelope.version),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn key() -> StreamKey {
        StreamKey::new("Cart", "c-1")
    }

    fn event(version: u64) -> EventEnvelope {
        EventEnvelope::event("Cart", "c-1", "ItemAdded", version, json!({}))
    }

    fn snapshot(version: u64) -> EventEnvelope {
        EventEnvelope::snapshot("Cart", "c-1", "CartSnapshot", version, json!({}))
    }

    #[test]
    fn test_first_event_accepts_any_version() {
        let head = StreamHead::default();
        assert!(head.check_append(&key(), &event(0)).is_ok());
        assert!(head.check_append(&key(), &event(1)).is_ok());
    }

    #[test]
    fn test_event_conflict_and_gap() {
        let mut head = StreamHead::default();
        head.record(&event(0));
        head.record(&event(1));

        let err = head.check_append(&key(), &event(1)).unwrap_err();
        assert!(err.is_conflict());
        let err = head.check_append(&key(), &event(0)).unwrap_err();
        assert!(err.is_conflict());

        let err = head.check_append(&key(), &event(3)).unwrap_err();
        assert!(matches!(err, EventStoreError::InvalidEnvelope { .. }));

        assert!(head.check_append(&key(), &event(2)).is_ok());
    }

    #[test]
    fn test_snapshot_must_sit_on_event() {
        let mut head = StreamHead::default();
        assert!(matches!(
            head.check_append(&key(), &snapshot(0)).unwrap_err(),
            EventStoreError::InvalidEnvelope { .. }
        ));

        head.record(&event(0));
        head.record(&event(1));
        assert!(head.check_append(&key(), &snapshot(1)).is_ok());
        assert!(matches!(
            head.check_append(&key(), &snapshot(2)).unwrap_err(),
            EventStoreError::InvalidEnvelope { .. }
        ));
    }

    #[test]
    fn test_snapshot_at_or_below_latest_conflicts() {
        let mut head = StreamHead::default();
        for v in 0..=5 {
            head.record(&event(v));
        }
        head.record(&snapshot(4));

        assert!(head.check_append(&key(), &snapshot(4)).unwrap_err().is_conflict());
        assert!(head.check_append(&key(), &snapshot(2)).unwrap_err().is_conflict());
        assert!(head.check_append(&key(), &snapshot(5)).is_ok());
    }
}
