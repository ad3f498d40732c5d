//! Envelope types for Event Sourcing
//!
//! An [`EventEnvelope`] is the immutable unit persisted by the store. It wraps
//! either a domain event or a snapshot of an entity, together with the
//! identity and ordering metadata the store needs to partition and order it.
//! The payload (`value`) is owned by the caller and never inspected here.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::event_store::StreamKey;

/// Kind of record stored in a stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EnvelopeKind {
    /// A domain event appended by a producer
    Event,
    /// A materialized fold of the stream up to some event version
    Snapshot,
}

impl EnvelopeKind {
    /// Lowercase name used in partition keys
    pub fn as_str(&self) -> &'static str {
        match self {
            EnvelopeKind::Event => "event",
            EnvelopeKind::Snapshot => "snapshot",
        }
    }
}

impl std::fmt::Display for EnvelopeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EnvelopeKind::Event => write!(f, "EVENT"),
            EnvelopeKind::Snapshot => write!(f, "SNAPSHOT"),
        }
    }
}

/// An immutable event or snapshot record
///
/// Serializes to the durable record shape:
/// `{entityTypeName, entityID, kind, typeName, version, createdAt, value}`.
/// Every backend reads and writes this shape identically.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    /// Aggregate kind this record belongs to
    #[serde(rename = "entityTypeName")]
    pub entity_type_name: String,

    /// Identifier of the aggregate instance
    #[serde(rename = "entityID")]
    pub entity_id: String,

    /// Event or snapshot
    pub kind: EnvelopeKind,

    /// Concrete event/snapshot type name, used for payload dispatch
    #[serde(rename = "typeName")]
    pub type_name: String,

    /// Position in the stream. For a snapshot, the version of the last
    /// event folded into it.
    pub version: u64,

    /// Creation time (RFC 3339 on the wire)
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,

    /// Opaque payload
    pub value: serde_json::Value,

    /// Correlates envelopes produced by the same command
    #[serde(rename = "requestID", default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,

    /// For snapshots: `createdAt` of the last event folded in
    #[serde(
        rename = "snapshottedEventCreatedAt",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub snapshotted_event_created_at: Option<DateTime<Utc>>,
}

impl EventEnvelope {
    /// Create a new EVENT envelope stamped with the current time
    pub fn event(
        entity_type_name: impl Into<String>,
        entity_id: impl Into<String>,
        type_name: impl Into<String>,
        version: u64,
        value: serde_json::Value,
    ) -> Self {
        Self {
            entity_type_name: entity_type_name.into(),
            entity_id: entity_id.into(),
            kind: EnvelopeKind::Event,
            type_name: type_name.into(),
            version,
            created_at: Utc::now(),
            value,
            request_id: None,
            snapshotted_event_created_at: None,
        }
    }

    /// Create a new SNAPSHOT envelope stamped with the current time
    pub fn snapshot(
        entity_type_name: impl Into<String>,
        entity_id: impl Into<String>,
        type_name: impl Into<String>,
        version: u64,
        value: serde_json::Value,
    ) -> Self {
        Self {
            kind: EnvelopeKind::Snapshot,
            ..Self::event(entity_type_name, entity_id, type_name, version, value)
        }
    }

    /// Set an explicit creation time
    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self
    }

    /// Set the request that produced this envelope
    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    /// Record the creation time of the last event folded into a snapshot
    pub fn with_snapshotted_event_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.snapshotted_event_created_at = Some(created_at);
        self
    }

    pub fn is_event(&self) -> bool {
        self.kind == EnvelopeKind::Event
    }

    pub fn is_snapshot(&self) -> bool {
        self.kind == EnvelopeKind::Snapshot
    }

    /// Stream this envelope belongs to
    pub fn stream_key(&self) -> StreamKey {
        StreamKey::new(&self.entity_type_name, &self.entity_id)
    }

    /// Parse the payload as a specific type
    pub fn parse_value<T: serde::de::DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(self.value.clone())
    }

    /// Serialize envelope to JSON string (for JSONL)
    pub fn to_json_line(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize envelope from JSON string
    pub fn from_json_line(line: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(line)
    }
}
