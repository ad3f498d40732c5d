//! Entity event store
//!
//! Append-only, per-entity event streams with snapshot-anchored replay:
//! - `Registry`: storage backend primitives (append, range, snapshot, filter)
//! - `MemoryRegistry` / `FileRegistry`: reference backends
//! - `EventStoreAdapter`: public store / events_since / latest_snapshot / search
//! - `Materializer`: folds pending events into snapshots
//!
//! # Architecture
//!
//! ```text
//! Write Path:
//! ┌─────────┐    ┌─────────────┐    ┌──────────────────┐    ┌──────────────┐
//! │ Caller  │───►│ store()     │───►│ Registry::append │───►│ notify(key)  │
//! │         │    │ in order    │    │ version checked  │    │ materializer │
//! └─────────┘    └─────────────┘    └──────────────────┘    └──────────────┘
//!
//! Read Path:
//! ┌──────────────────┐    ┌──────────────────────┐
//! │ latest snapshot  │───►│ events after version │───► [snapshot, e1, e2, ...]
//! │ (if usable)      │    │ (or full replay)     │
//! └──────────────────┘    └──────────────────────┘
//! ```

mod adapter;
mod error;
mod file;
mod materializer;
mod memory;
mod registry;
mod stats;
mod stream_key;

pub use adapter::{EventStoreAdapter, DEFAULT_OPERATION_TIMEOUT};
pub use error::{EventStoreError, EventStoreResult, Operation};
pub use file::FileRegistry;
pub use materializer::{
    replay, FoldResult, MaterializeOutcome, Materializer, MaterializerHandle, MergeReducer,
    SnapshotPolicy, SnapshotReducer,
};
pub use memory::MemoryRegistry;
pub use registry::{Registry, StreamHead};
pub use stats::StreamStats;
pub use stream_key::StreamKey;
