//! Stream key scheme
//!
//! Maps `(entityTypeName, entityID)` to the storage partition of a stream.
//! Keys are derived on every access and never persisted on their own.

use std::fmt;

use crate::types::EnvelopeKind;

/// Identity of one entity stream
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StreamKey {
    pub entity_type_name: String,
    pub entity_id: String,
}

impl StreamKey {
    pub fn new(entity_type_name: impl Into<String>, entity_id: impl Into<String>) -> Self {
        Self {
            entity_type_name: entity_type_name.into(),
            entity_id: entity_id.into(),
        }
    }

    /// Partition holding records of one kind, e.g. `ee_Cart_42_snapshot`
    pub fn partition(&self, kind: EnvelopeKind) -> String {
        format!("{}_{}", self, kind.as_str())
    }
}

impl fmt::Display for StreamKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ee_{}_{}", self.entity_type_name, self.entity_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_is_deterministic() {
        let a = StreamKey::new("Cart", "42");
        let b = StreamKey::new("Cart".to_string(), "42".to_string());
        assert_eq!(a, b);
        assert_eq!(a.to_string(), "ee_Cart_42");
    }

    #[test]
    fn test_partitions_per_kind() {
        let key = StreamKey::new("Cart", "42");
        assert_eq!(key.partition(EnvelopeKind::Event), "ee_Cart_42_event");
        assert_eq!(key.partition(EnvelopeKind::Snapshot), "ee_Cart_42_snapshot");
    }
}
