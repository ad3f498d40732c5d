//! Error types for event store operations.
//!
//! Absence is never an error here: a missing stream or snapshot is returned
//! as an empty `Vec` or `None`. Errors carry the stream key and operation so
//! callers can decide whether to retry.

use std::fmt;
use std::io;

/// Store and query operations, used to give errors and traces context
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Append,
    QueryRange,
    QueryLatestSnapshot,
    QueryByFilter,
    Store,
    EventsSince,
    LatestSnapshot,
    Search,
    Materialize,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Append => "append",
            Operation::QueryRange => "query_range",
            Operation::QueryLatestSnapshot => "query_latest_snapshot",
            Operation::QueryByFilter => "query_by_filter",
            Operation::Store => "store",
            Operation::EventsSince => "events_since",
            Operation::LatestSnapshot => "latest_snapshot",
            Operation::Search => "search",
            Operation::Materialize => "materialize",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result type for event store operations
pub type EventStoreResult<T> = Result<T, EventStoreError>;

/// Errors that can occur in event store operations
#[derive(Debug, thiserror::Error)]
pub enum EventStoreError {
    /// An EVENT with this version (or a snapshot at or above it) already
    /// exists in the stream. Re-read the stream and retry with the next
    /// version.
    #[error("version conflict in {stream}: version {version} is already taken")]
    Conflict { stream: String, version: u64 },

    /// Backend unavailable, timed out, or returned malformed data.
    #[error("I/O error during {operation} on {stream}: {source}")]
    Io {
        operation: Operation,
        stream: String,
        #[source]
        source: io::Error,
    },

    /// The backend does not support this capability.
    #[error("{capability} is not implemented by the {backend} registry")]
    NotImplemented {
        backend: &'static str,
        capability: &'static str,
    },

    /// The envelope would break a stream invariant.
    #[error("invalid envelope for {stream}: {reason}")]
    InvalidEnvelope { stream: String, reason: String },

    /// The caller cancelled the operation.
    #[error("{operation} on {stream} was cancelled")]
    Cancelled { operation: Operation, stream: String },

    /// `store` stopped at envelope `index`. The `committed` envelopes
    /// before it remain persisted.
    #[error("store aborted at envelope {index} ({committed} committed): {source}")]
    StoreAborted {
        index: usize,
        committed: usize,
        #[source]
        source: Box<EventStoreError>,
    },

    /// The caller-supplied reducer failed while materializing a snapshot.
    #[error("fold failed for {stream}: {source}")]
    Fold {
        stream: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

impl EventStoreError {
    /// Wrap an I/O error with operation and stream context
    pub fn io(operation: Operation, stream: impl fmt::Display, source: io::Error) -> Self {
        EventStoreError::Io {
            operation,
            stream: stream.to_string(),
            source,
        }
    }

    /// A backend call that exceeded its deadline
    pub fn timed_out(operation: Operation, stream: impl fmt::Display) -> Self {
        Self::io(
            operation,
            stream,
            io::Error::new(io::ErrorKind::TimedOut, "backend call timed out"),
        )
    }

    /// A stored record that could not be decoded
    pub fn malformed(
        operation: Operation,
        stream: impl fmt::Display,
        source: serde_json::Error,
    ) -> Self {
        Self::io(
            operation,
            stream,
            io::Error::new(io::ErrorKind::InvalidData, source),
        )
    }

    pub fn invalid(stream: impl fmt::Display, reason: impl Into<String>) -> Self {
        EventStoreError::InvalidEnvelope {
            stream: stream.to_string(),
            reason: reason.into(),
        }
    }

    /// The underlying error, looking through `StoreAborted`
    pub fn root(&self) -> &EventStoreError {
        match self {
            EventStoreError::StoreAborted { source, .. } => source.root(),
            other => other,
        }
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self.root(), EventStoreError::Conflict { .. })
    }

    pub fn is_not_implemented(&self) -> bool {
        matches!(self.root(), EventStoreError::NotImplemented { .. })
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self.root(), EventStoreError::Io { source, .. } if source.kind() == io::ErrorKind::TimedOut)
    }

    /// Whether re-issuing the call (after re-reading, for conflicts) can
    /// succeed. Invalid envelopes, missing capabilities and fold failures
    /// will fail the same way again.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.root(),
            EventStoreError::Conflict { .. }
                | EventStoreError::Io { .. }
                | EventStoreError::Cancelled { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_includes_context() {
        let err = EventStoreError::timed_out(Operation::QueryRange, "ee_Cart_c-1_event");
        let msg = err.to_string();
        assert!(msg.contains("query_range"));
        assert!(msg.contains("ee_Cart_c-1_event"));
        assert!(err.is_timeout());
        assert!(err.is_retryable());
    }

    #[test]
    fn test_store_aborted_exposes_root() {
        let err = EventStoreError::StoreAborted {
            index: 2,
            committed: 2,
            source: Box::new(EventStoreError::Conflict {
                stream: "ee_Cart_c-1".to_string(),
                version: 7,
            }),
        };

        assert!(err.is_conflict());
        assert!(err.is_retryable());
        assert!(err.to_string().contains("envelope 2"));
    }

    #[test]
    fn test_not_implemented_is_not_retryable() {
        let err = EventStoreError::NotImplemented {
            backend: "stub",
            capability: "query_by_filter",
        };
        assert!(err.is_not_implemented());
        assert!(!err.is_retryable());
    }
}
