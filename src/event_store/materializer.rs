//! Snapshot Materializer
//!
//! Folds the events after a stream's latest snapshot into a new SNAPSHOT
//! envelope so that replay cost stays bounded. The fold itself is supplied
//! by the caller's domain layer through [`SnapshotReducer`].
//!
//! Snapshots are idempotent checkpoints: when another writer already stored
//! a snapshot at the same or a higher version, the append conflict is
//! reported as [`MaterializeOutcome::AlreadyCovered`] rather than an error.
//!
//! # Background worker
//!
//! ```text
//! store() ──notify(key)──► mpsc ──► worker: dedupe batch ──► maybe_materialize(key)
//!                                      ▲                                │
//!                                      └── sweep timer (max_age) ◄──────┘ below threshold
//! ```

use std::collections::HashSet;
use std::error::Error;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::EventStoreConfig;
use crate::types::EventEnvelope;

use super::adapter::EventStoreAdapter;
use super::error::{EventStoreError, EventStoreResult, Operation};
use super::registry::Registry;
use super::stream_key::StreamKey;

/// Result type for caller-supplied folds
pub type FoldResult<T> = Result<T, Box<dyn Error + Send + Sync>>;

/// Domain fold used to build snapshots
pub trait SnapshotReducer: Send + Sync {
    /// Type name stamped on snapshots of this entity type
    fn snapshot_type_name(&self, entity_type_name: &str) -> String {
        format!("{entity_type_name}Snapshot")
    }

    /// Apply one event to the current state (`None` before the first event)
    fn reduce(&self, state: Option<Value>, event: &EventEnvelope) -> FoldResult<Value>;
}

/// Shallow JSON merge: object payloads overlay the current state key by key,
/// any other payload replaces it. Used when no domain fold is registered.
#[derive(Debug, Clone, Copy, Default)]
pub struct MergeReducer;

impl SnapshotReducer for MergeReducer {
    fn reduce(&self, state: Option<Value>, event: &EventEnvelope) -> FoldResult<Value> {
        match (state, &event.value) {
            (Some(Value::Object(mut current)), Value::Object(patch)) => {
                for (k, v) in patch {
                    current.insert(k.clone(), v.clone());
                }
                Ok(Value::Object(current))
            }
            (_, value) => Ok(value.clone()),
        }
    }
}

/// Fold a sequence returned by `events_since` into entity state.
///
/// A SNAPSHOT envelope replaces the running state with its payload; EVENT
/// envelopes go through the reducer. Returns `None` for an empty sequence.
pub fn replay(reducer: &dyn SnapshotReducer, envelopes: &[EventEnvelope]) -> FoldResult<Option<Value>> {
    let mut state = None;
    for envelope in envelopes {
        state = Some(if envelope.is_snapshot() {
            envelope.value.clone()
        } else {
            reducer.reduce(state, envelope)?
        });
    }
    Ok(state)
}

/// When a stream is due for a new snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SnapshotPolicy {
    /// Pending events that trigger a snapshot
    pub every_events: usize,
    /// Age of the base (latest snapshot, or first pending event) that
    /// triggers a snapshot
    pub max_age: Option<Duration>,
}

impl Default for SnapshotPolicy {
    fn default() -> Self {
        Self {
            every_events: 100,
            max_age: None,
        }
    }
}

impl SnapshotPolicy {
    pub fn every(events: usize) -> Self {
        Self {
            every_events: events.max(1),
            max_age: None,
        }
    }

    pub fn from_config(config: &EventStoreConfig) -> Self {
        Self {
            every_events: config.snapshot_every.max(1),
            max_age: config.snapshot_max_age,
        }
    }

    pub fn with_max_age(mut self, max_age: Duration) -> Self {
        self.max_age = Some(max_age);
        self
    }

    /// How often the background worker re-checks streams left below
    /// threshold. `None` when only the event count can make a stream due.
    pub fn sweep_interval(&self) -> Option<Duration> {
        self.max_age
            .map(|max_age| (max_age / 4).max(Duration::from_millis(10)))
    }

    /// Check if `pending` events on top of a base created at `base_at` are
    /// due for folding
    pub fn is_due(&self, pending: usize, base_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
        if pending == 0 {
            return false;
        }
        if pending >= self.every_events {
            return true;
        }
        match (self.max_age, base_at) {
            (Some(max_age), Some(base_at)) => now
                .signed_duration_since(base_at)
                .to_std()
                .map_or(false, |age| age >= max_age),
            _ => false,
        }
    }
}

/// Outcome of a materialization attempt
#[derive(Debug, Clone, PartialEq)]
pub enum MaterializeOutcome {
    /// A new snapshot was stored
    Created(EventEnvelope),
    /// No events after the latest snapshot
    NothingToFold,
    /// Pending events exist but the policy threshold is not reached
    BelowThreshold { pending: usize },
    /// Another writer already stored a snapshot at this version or later
    AlreadyCovered { version: u64 },
}

/// Builds snapshots for entity streams
pub struct Materializer {
    reader: EventStoreAdapter,
    reducer: Arc<dyn SnapshotReducer>,
    policy: SnapshotPolicy,
}

impl Materializer {
    pub fn new(
        registry: Arc<dyn Registry>,
        reducer: Arc<dyn SnapshotReducer>,
        policy: SnapshotPolicy,
    ) -> Self {
        Self {
            reader: EventStoreAdapter::new(registry),
            reducer,
            policy,
        }
    }

    pub fn from_config(
        registry: Arc<dyn Registry>,
        reducer: Arc<dyn SnapshotReducer>,
        config: &EventStoreConfig,
    ) -> Self {
        Self {
            reader: EventStoreAdapter::with_config(registry, config),
            reducer,
            policy: SnapshotPolicy::from_config(config),
        }
    }

    pub fn policy(&self) -> SnapshotPolicy {
        self.policy
    }

    /// Fold all pending events into a new snapshot, regardless of policy
    pub async fn materialize(
        &self,
        entity_type_name: &str,
        entity_id: &str,
        cancel: Option<&CancellationToken>,
    ) -> EventStoreResult<MaterializeOutcome> {
        let key = StreamKey::new(entity_type_name, entity_id);
        self.run(&key, cancel, true).await
    }

    /// Fold pending events only when the policy says the stream is due
    pub async fn maybe_materialize(
        &self,
        entity_type_name: &str,
        entity_id: &str,
        cancel: Option<&CancellationToken>,
    ) -> EventStoreResult<MaterializeOutcome> {
        let key = StreamKey::new(entity_type_name, entity_id);
        self.run(&key, cancel, false).await
    }

    async fn run(
        &self,
        key: &StreamKey,
        cancel: Option<&CancellationToken>,
        force: bool,
    ) -> EventStoreResult<MaterializeOutcome> {
        let registry = self.reader.registry();

        let base = self
            .reader
            .call(
                Operation::QueryLatestSnapshot,
                key,
                cancel,
                registry.query_latest_snapshot(key),
            )
            .await?;
        let pending = self
            .reader
            .call(
                Operation::QueryRange,
                key,
                cancel,
                registry.query_range(key, base.as_ref().map(|s| s.version)),
            )
            .await?;

        let Some(last) = pending.last() else {
            return Ok(MaterializeOutcome::NothingToFold);
        };

        let base_at = base
            .as_ref()
            .map(|s| s.created_at)
            .or_else(|| pending.first().map(|e| e.created_at));
        if !force && !self.policy.is_due(pending.len(), base_at, Utc::now()) {
            return Ok(MaterializeOutcome::BelowThreshold {
                pending: pending.len(),
            });
        }

        let mut state = base.map(|s| s.value);
        for event in &pending {
            let next = self
                .reducer
                .reduce(state, event)
                .map_err(|source| EventStoreError::Fold {
                    stream: key.to_string(),
                    source,
                })?;
            state = Some(next);
        }

        let snapshot = EventEnvelope::snapshot(
            key.entity_type_name.clone(),
            key.entity_id.clone(),
            self.reducer.snapshot_type_name(&key.entity_type_name),
            last.version,
            state.unwrap_or(Value::Null),
        )
        .with_snapshotted_event_created_at(last.created_at);

        let appended = self
            .reader
            .call(Operation::Append, key, cancel, registry.append(&snapshot))
            .await;

        match appended {
            Ok(()) => {
                tracing::info!(
                    stream = %key,
                    operation = %Operation::Materialize,
                    version = snapshot.version,
                    folded = pending.len(),
                    "created snapshot"
                );
                Ok(MaterializeOutcome::Created(snapshot))
            }
            Err(e) if e.is_conflict() => {
                tracing::debug!(
                    stream = %key,
                    operation = %Operation::Materialize,
                    version = snapshot.version,
                    outcome = "already_covered",
                    "snapshot already exists"
                );
                Ok(MaterializeOutcome::AlreadyCovered {
                    version: snapshot.version,
                })
            }
            Err(e) => Err(e),
        }
    }

    /// Run the materializer as a background task
    ///
    /// Streams queued through the returned handle are batched, de-duplicated
    /// and passed to [`Materializer::maybe_materialize`]. The task exits when
    /// `cancel` fires or every handle has been dropped.
    pub fn spawn(
        self: Arc<Self>,
        capacity: usize,
        cancel: CancellationToken,
    ) -> (MaterializerHandle, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let task = tokio::spawn(self.run_worker(rx, cancel));
        (MaterializerHandle { tx }, task)
    }

    async fn run_worker(self: Arc<Self>, mut rx: mpsc::Receiver<StreamKey>, cancel: CancellationToken) {
        let sweep_every = self.policy.sweep_interval();
        let mut sweep = tokio::time::interval(sweep_every.unwrap_or(Duration::from_secs(3600)));
        sweep.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // Streams whose last pass ended below threshold
        let mut waiting: HashSet<StreamKey> = HashSet::new();

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,

                key = rx.recv() => {
                    let Some(key) = key else {
                        // All handles dropped
                        break;
                    };

                    let mut batch = vec![key];
                    let mut seen: HashSet<StreamKey> = batch.iter().cloned().collect();
                    while let Ok(key) = rx.try_recv() {
                        if seen.insert(key.clone()) {
                            batch.push(key);
                        }
                    }

                    if !self.pass(batch, &mut waiting, &cancel).await {
                        return;
                    }
                }

                _ = sweep.tick(), if sweep_every.is_some() && !waiting.is_empty() => {
                    let batch: Vec<StreamKey> = waiting.drain().collect();
                    if !self.pass(batch, &mut waiting, &cancel).await {
                        return;
                    }
                }
            }
        }
        tracing::debug!("materializer worker stopped");
    }

    /// Run one policy check per stream. Returns `false` once cancelled.
    async fn pass(
        &self,
        batch: Vec<StreamKey>,
        waiting: &mut HashSet<StreamKey>,
        cancel: &CancellationToken,
    ) -> bool {
        for key in batch {
            match self.run(&key, Some(cancel), false).await {
                Ok(outcome) => {
                    tracing::debug!(
                        stream = %key,
                        operation = %Operation::Materialize,
                        ?outcome,
                        "materializer pass"
                    );
                    if matches!(outcome, MaterializeOutcome::BelowThreshold { .. }) {
                        waiting.insert(key);
                    } else {
                        waiting.remove(&key);
                    }
                }
                Err(EventStoreError::Cancelled { .. }) => return false,
                Err(e) => tracing::warn!(
                    stream = %key,
                    operation = %Operation::Materialize,
                    error = %e,
                    "materializer pass failed"
                ),
            }
        }
        true
    }
}

/// Sender side of a running materializer
#[derive(Debug, Clone)]
pub struct MaterializerHandle {
    tx: mpsc::Sender<StreamKey>,
}

impl MaterializerHandle {
    /// Queue a stream for a policy check. Never blocks; returns `false`
    /// when the queue is full or the worker has stopped.
    pub fn notify(&self, key: StreamKey) -> bool {
        self.tx.try_send(key).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_store::MemoryRegistry;
    use serde_json::json;

    /// Counts events and remembers the last type name
    struct CountingReducer;

    impl SnapshotReducer for CountingReducer {
        fn reduce(&self, state: Option<Value>, event: &EventEnvelope) -> FoldResult<Value> {
            let count = state
                .as_ref()
                .and_then(|s| s["count"].as_u64())
                .unwrap_or(0);
            Ok(json!({"count": count + 1, "last": event.type_name}))
        }
    }

    struct FailingReducer;

    impl SnapshotReducer for FailingReducer {
        fn reduce(&self, _state: Option<Value>, _event: &EventEnvelope) -> FoldResult<Value> {
            Err("unknown event".into())
        }
    }

    fn event(version: u64) -> EventEnvelope {
        EventEnvelope::event("Cart", "c-1", "ItemAdded", version, json!({}))
    }

    async fn seeded(count: u64) -> Arc<MemoryRegistry> {
        let registry = Arc::new(MemoryRegistry::new());
        for v in 0..count {
            registry.append(&event(v)).await.unwrap();
        }
        registry
    }

    #[tokio::test]
    async fn test_materialize_folds_pending_events() {
        let registry = seeded(3).await;
        let materializer =
            Materializer::new(registry.clone(), Arc::new(CountingReducer), SnapshotPolicy::every(10));

        let outcome = materializer.materialize("Cart", "c-1", None).await.unwrap();
        let MaterializeOutcome::Created(snapshot) = outcome else {
            panic!("expected a snapshot, got {outcome:?}");
        };
        assert_eq!(snapshot.version, 2);
        assert_eq!(snapshot.type_name, "CartSnapshot");
        assert_eq!(snapshot.value, json!({"count": 3, "last": "ItemAdded"}));
        assert!(snapshot.snapshotted_event_created_at.is_some());

        // Folding continues from the stored snapshot
        registry.append(&event(3)).await.unwrap();
        let outcome = materializer.materialize("Cart", "c-1", None).await.unwrap();
        let MaterializeOutcome::Created(next) = outcome else {
            panic!("expected a snapshot, got {outcome:?}");
        };
        assert_eq!(next.version, 3);
        assert_eq!(next.value["count"], 4);
    }

    #[tokio::test]
    async fn test_nothing_to_fold() {
        let registry = seeded(0).await;
        let materializer =
            Materializer::new(registry, Arc::new(CountingReducer), SnapshotPolicy::default());
        assert_eq!(
            materializer.materialize("Cart", "c-1", None).await.unwrap(),
            MaterializeOutcome::NothingToFold
        );
    }

    #[tokio::test]
    async fn test_policy_threshold() {
        let registry = seeded(2).await;
        let materializer =
            Materializer::new(registry.clone(), Arc::new(CountingReducer), SnapshotPolicy::every(3));

        assert_eq!(
            materializer.maybe_materialize("Cart", "c-1", None).await.unwrap(),
            MaterializeOutcome::BelowThreshold { pending: 2 }
        );

        registry.append(&event(2)).await.unwrap();
        assert!(matches!(
            materializer.maybe_materialize("Cart", "c-1", None).await.unwrap(),
            MaterializeOutcome::Created(_)
        ));
    }

    /// Reports no snapshot, as if another writer stored one after our read
    struct StaleSnapshotRegistry(Arc<MemoryRegistry>);

    #[async_trait::async_trait]
    impl Registry for StaleSnapshotRegistry {
        fn name(&self) -> &'static str {
            "stale"
        }

        async fn append(&self, envelope: &EventEnvelope) -> EventStoreResult<()> {
            self.0.append(envelope).await
        }

        async fn query_range(
            &self,
            key: &StreamKey,
            after: Option<u64>,
        ) -> EventStoreResult<Vec<EventEnvelope>> {
            self.0.query_range(key, after).await
        }

        async fn query_latest_snapshot(
            &self,
            _key: &StreamKey,
        ) -> EventStoreResult<Option<EventEnvelope>> {
            Ok(None)
        }
    }

    #[tokio::test]
    async fn test_concurrent_snapshot_is_noop() {
        let inner = seeded(3).await;
        inner
            .append(&EventEnvelope::snapshot("Cart", "c-1", "CartSnapshot", 2, json!({})))
            .await
            .unwrap();

        let materializer = Materializer::new(
            Arc::new(StaleSnapshotRegistry(inner.clone())),
            Arc::new(CountingReducer),
            SnapshotPolicy::every(1),
        );
        assert_eq!(
            materializer.materialize("Cart", "c-1", None).await.unwrap(),
            MaterializeOutcome::AlreadyCovered { version: 2 }
        );

        let key = StreamKey::new("Cart", "c-1");
        let latest = inner.query_latest_snapshot(&key).await.unwrap().unwrap();
        assert_eq!(latest.value, json!({}));
    }

    #[tokio::test]
    async fn test_fold_error_is_reported() {
        let registry = seeded(1).await;
        let materializer =
            Materializer::new(registry, Arc::new(FailingReducer), SnapshotPolicy::every(1));

        let err = materializer.materialize("Cart", "c-1", None).await.unwrap_err();
        assert!(matches!(err, EventStoreError::Fold { .. }));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_policy_max_age() {
        let policy = SnapshotPolicy::every(100).with_max_age(Duration::from_secs(60));
        let now = Utc::now();

        assert!(!policy.is_due(0, Some(now - chrono::Duration::hours(1)), now));
        assert!(!policy.is_due(1, Some(now - chrono::Duration::seconds(10)), now));
        assert!(policy.is_due(1, Some(now - chrono::Duration::seconds(61)), now));
        assert!(policy.is_due(100, None, now));
    }

    #[test]
    fn test_merge_reducer() {
        let events = vec![
            EventEnvelope::event("Cart", "c-1", "Created", 0, json!({"owner": "ann", "items": 0})),
            EventEnvelope::event("Cart", "c-1", "ItemAdded", 1, json!({"items": 1})),
        ];
        let state = replay(&MergeReducer, &events).unwrap().unwrap();
        assert_eq!(state, json!({"owner": "ann", "items": 1}));
    }

    #[test]
    fn test_replay_starts_from_snapshot() {
        let snapshot = EventEnvelope::snapshot("Cart", "c-1", "CartSnapshot", 4, json!({"count": 5}));
        let state = replay(&CountingReducer, &[snapshot, event(5)]).unwrap().unwrap();
        assert_eq!(state["count"], 6);

        assert!(replay(&CountingReducer, &[]).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_background_worker_snapshots_notified_streams() {
        let registry = seeded(2).await;
        let materializer = Arc::new(Materializer::new(
            registry.clone(),
            Arc::new(CountingReducer),
            SnapshotPolicy::every(2),
        ));
        let cancel = CancellationToken::new();
        let (handle, task) = materializer.spawn(8, cancel.clone());

        assert!(handle.notify(StreamKey::new("Cart", "c-1")));
        assert!(handle.notify(StreamKey::new("Cart", "c-1")));
        drop(handle);
        task.await.unwrap();

        let key = StreamKey::new("Cart", "c-1");
        let snapshot = registry.query_latest_snapshot(&key).await.unwrap().unwrap();
        assert_eq!(snapshot.version, 1);
        assert_eq!(snapshot.value["count"], 2);
    }

    #[test]
    fn test_sweep_interval_follows_max_age() {
        assert!(SnapshotPolicy::every(10).sweep_interval().is_none());
        let policy = SnapshotPolicy::every(10).with_max_age(Duration::from_secs(60));
        assert_eq!(policy.sweep_interval(), Some(Duration::from_secs(15)));
    }

    #[tokio::test]
    async fn test_background_worker_snapshots_quiet_streams_by_age() {
        let registry = seeded(1).await;
        let materializer = Arc::new(Materializer::new(
            registry.clone(),
            Arc::new(CountingReducer),
            SnapshotPolicy::every(100).with_max_age(Duration::from_millis(300)),
        ));
        let cancel = CancellationToken::new();
        let (handle, task) = materializer.spawn(8, cancel.clone());
        let key = StreamKey::new("Cart", "c-1");

        // One notification, then the stream goes quiet
        assert!(handle.notify(key.clone()));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(registry.query_latest_snapshot(&key).await.unwrap().is_none());

        let snapshot = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if let Some(snapshot) = registry.query_latest_snapshot(&key).await.unwrap() {
                    break snapshot;
                }
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await
        .expect("quiet stream snapshotted by the sweep");
        assert_eq!(snapshot.version, 0);

        cancel.cancel();
        task.await.unwrap();
        drop(handle);
    }

    #[tokio::test]
    async fn test_background_worker_stops_on_cancel() {
        let registry = seeded(0).await;
        let materializer = Arc::new(Materializer::new(
            registry,
            Arc::new(CountingReducer),
            SnapshotPolicy::default(),
        ));
        let cancel = CancellationToken::new();
        let (handle, task) = materializer.spawn(8, cancel.clone());

        cancel.cancel();
        task.await.unwrap();
        assert!(!handle.notify(StreamKey::new("Cart", "c-1")));
    }
}
