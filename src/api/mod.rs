//! HTTP surface over the event store adapter
//!
//! Lets producers append envelopes and readers rebuild entities, fetch
//! snapshots and search events without linking the library.

pub mod http;
pub mod rest;
pub mod state;

pub use http::create_router;
pub use state::AppState;
