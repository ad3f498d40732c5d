//! Data types for the entity event store
//!
//! This module contains the record and query shapes shared by every backend.

mod envelope;
mod filter;

pub use envelope::{EnvelopeKind, EventEnvelope};
pub use filter::{EventFilter, SearchResult};
