//! Search filter and read-facing search result

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::envelope::EventEnvelope;

/// Filter for searching stored events
///
/// The minimal shape every backend supports is an entity type name with an
/// optional `[from, to]` time range and an optional limit. `entity_id` and
/// `type_name` narrow the search further.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventFilter {
    pub entity_type_name: String,

    #[serde(rename = "entityID", default, skip_serializing_if = "Option::is_none")]
    pub entity_id: Option<String>,

    /// Only envelopes with this event type name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub type_name: Option<String>,

    /// Inclusive lower bound on `createdAt`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<DateTime<Utc>>,

    /// Inclusive upper bound on `createdAt`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,

    /// Expose stream versions in the results
    #[serde(default)]
    pub include_version: bool,
}

impl EventFilter {
    /// Filter on an entity type
    pub fn for_entity_type(entity_type_name: impl Into<String>) -> Self {
        Self {
            entity_type_name: entity_type_name.into(),
            ..Default::default()
        }
    }

    pub fn with_entity_id(mut self, entity_id: impl Into<String>) -> Self {
        self.entity_id = Some(entity_id.into());
        self
    }

    pub fn with_type_name(mut self, type_name: impl Into<String>) -> Self {
        self.type_name = Some(type_name.into());
        self
    }

    pub fn with_range(mut self, from: Option<DateTime<Utc>>, to: Option<DateTime<Utc>>) -> Self {
        self.from = from;
        self.to = to;
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_versions(mut self) -> Self {
        self.include_version = true;
        self
    }

    /// Check whether an EVENT envelope satisfies the filter (ignores `limit`)
    pub fn matches(&self, envelope: &EventEnvelope) -> bool {
        envelope.is_event()
            && envelope.entity_type_name == self.entity_type_name
            && self
                .entity_id
                .as_ref()
                .map_or(true, |id| &envelope.entity_id == id)
            && self
                .type_name
                .as_ref()
                .map_or(true, |t| &envelope.type_name == t)
            && self.from.map_or(true, |from| envelope.created_at >= from)
            && self.to.map_or(true, |to| envelope.created_at <= to)
    }

    /// Sort matches by `createdAt` (then stream and version for ties) and
    /// apply the limit
    pub fn finish(&self, mut matches: Vec<EventEnvelope>) -> Vec<EventEnvelope> {
        matches.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.entity_id.cmp(&b.entity_id))
                .then_with(|| a.version.cmp(&b.version))
        });
        if let Some(limit) = self.limit {
            matches.truncate(limit);
        }
        matches
    }
}

/// Read-facing projection of a stored event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    #[serde(rename = "type")]
    pub type_name: String,

    #[serde(rename = "entity")]
    pub entity_type_name: String,

    #[serde(rename = "entityID")]
    pub entity_id: String,

    #[serde(rename = "requestID", skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,

    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,

    pub value: serde_json::Value,

    /// Present only when the filter asked for versions
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<u64>,
}

impl SearchResult {
    /// Project an envelope, exposing its version only when requested
    pub fn from_envelope(envelope: EventEnvelope, include_version: bool) -> Self {
        Self {
            type_name: envelope.type_name,
            entity_type_name: envelope.entity_type_name,
            entity_id: envelope.entity_id,
            request_id: envelope.request_id,
            created_at: envelope.created_at,
            value: envelope.value,
            version: include_version.then_some(envelope.version),
        }
    }
}
