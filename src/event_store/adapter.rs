//! Event Store Adapter
//!
//! Orchestrates the [`Registry`] primitives into the public read and write
//! operations: ordered `store`, snapshot-anchored `events_since`,
//! `latest_snapshot`, and filtered `search`.
//!
//! The adapter holds no mutable state of its own; every coordination point
//! (version conflicts, atomic appends) lives in the registry. Each backend
//! call is bounded by the configured timeout and can be cut short by a
//! [`CancellationToken`].

use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;

use crate::config::EventStoreConfig;
use crate::types::{EventEnvelope, EventFilter, SearchResult};

use super::error::{EventStoreError, EventStoreResult, Operation};
use super::materializer::MaterializerHandle;
use super::registry::Registry;
use super::stats::StreamStats;
use super::stream_key::StreamKey;

/// Default bound on a single backend call
pub const DEFAULT_OPERATION_TIMEOUT: Duration = Duration::from_secs(5);

/// Public entry point to an entity event store
#[derive(Clone)]
pub struct EventStoreAdapter {
    registry: Arc<dyn Registry>,
    timeout: Duration,
    materializer: Option<MaterializerHandle>,
}

impl EventStoreAdapter {
    /// Create an adapter over an injected registry
    pub fn new(registry: Arc<dyn Registry>) -> Self {
        Self {
            registry,
            timeout: DEFAULT_OPERATION_TIMEOUT,
            materializer: None,
        }
    }

    pub fn with_config(registry: Arc<dyn Registry>, config: &EventStoreConfig) -> Self {
        Self::new(registry).with_timeout(config.operation_timeout)
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Notify a background materializer after each successful `store`
    pub fn with_materializer(mut self, handle: MaterializerHandle) -> Self {
        self.materializer = Some(handle);
        self
    }

    pub fn registry(&self) -> &Arc<dyn Registry> {
        &self.registry
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Run one backend call under the timeout and optional cancellation,
    /// tracing its outcome
    pub(crate) async fn call<T, F>(
        &self,
        operation: Operation,
        stream: impl Display,
        cancel: Option<&CancellationToken>,
        call: F,
    ) -> EventStoreResult<T>
    where
        F: Future<Output = EventStoreResult<T>>,
    {
        let bounded = tokio::time::timeout(self.timeout, call);
        let result = match cancel {
            Some(token) => tokio::select! {
                biased;
                _ = token.cancelled() => Err(EventStoreError::Cancelled {
                    operation,
                    stream: stream.to_string(),
                }),
                outcome = bounded => outcome.unwrap_or_else(|_| Err(EventStoreError::timed_out(operation, &stream))),
            },
            None => bounded
                .await
                .unwrap_or_else(|_| Err(EventStoreError::timed_out(operation, &stream))),
        };

        match &result {
            Ok(_) => tracing::debug!(
                stream = %stream,
                operation = %operation,
                backend = self.registry.name(),
                outcome = "ok",
                "registry call"
            ),
            Err(e) => tracing::debug!(
                stream = %stream,
                operation = %operation,
                backend = self.registry.name(),
                outcome = "error",
                error = %e,
                "registry call"
            ),
        }
        result
    }

    /// Append envelopes in order
    ///
    /// Stops at the first failure and reports its index as
    /// [`EventStoreError::StoreAborted`]; envelopes before it stay
    /// committed. An empty slice is a successful no-op.
    pub async fn store(&self, envelopes: &[EventEnvelope]) -> EventStoreResult<()> {
        self.store_with_cancel(envelopes, None).await
    }

    pub async fn store_with_cancel(
        &self,
        envelopes: &[EventEnvelope],
        cancel: Option<&CancellationToken>,
    ) -> EventStoreResult<()> {
        let mut touched: Vec<StreamKey> = Vec::new();

        for (index, envelope) in envelopes.iter().enumerate() {
            let key = envelope.stream_key();
            tracing::debug!(
                stream = %key,
                operation = %Operation::Store,
                kind = %envelope.kind,
                version = envelope.version,
                "storing event envelope"
            );

            let appended = self
                .call(Operation::Append, &key, cancel, self.registry.append(envelope))
                .await;

            if let Err(source) = appended {
                tracing::warn!(
                    stream = %key,
                    operation = %Operation::Store,
                    index,
                    committed = index,
                    error = %source,
                    "store aborted"
                );
                self.notify_materializer(touched);
                return Err(EventStoreError::StoreAborted {
                    index,
                    committed: index,
                    source: Box::new(source),
                });
            }

            if envelope.is_event() && !touched.contains(&key) {
                touched.push(key);
            }
        }

        self.notify_materializer(touched);
        Ok(())
    }

    fn notify_materializer(&self, keys: Vec<StreamKey>) {
        if let Some(handle) = &self.materializer {
            for key in keys {
                let stream = key.to_string();
                if !handle.notify(key) {
                    tracing::debug!(
                        stream = %stream,
                        operation = %Operation::Materialize,
                        outcome = "dropped",
                        "materializer queue full or stopped"
                    );
                }
            }
        }
    }

    /// Envelopes needed to rebuild an entity, oldest first
    ///
    /// When the latest snapshot is usable (no `since`, or the snapshot was
    /// created at or after `since`) the result starts with that snapshot
    /// followed by the events after it. Otherwise it is a full replay of
    /// the event stream. An unknown entity yields an empty sequence.
    pub async fn events_since(
        &self,
        entity_type_name: &str,
        entity_id: &str,
        since: Option<DateTime<Utc>>,
    ) -> EventStoreResult<Vec<EventEnvelope>> {
        self.events_since_with_cancel(entity_type_name, entity_id, since, None)
            .await
    }

    pub async fn events_since_with_cancel(
        &self,
        entity_type_name: &str,
        entity_id: &str,
        since: Option<DateTime<Utc>>,
        cancel: Option<&CancellationToken>,
    ) -> EventStoreResult<Vec<EventEnvelope>> {
        let key = StreamKey::new(entity_type_name, entity_id);

        let snapshot = self
            .call(
                Operation::QueryLatestSnapshot,
                &key,
                cancel,
                self.registry.query_latest_snapshot(&key),
            )
            .await?
            .filter(|s| since.map_or(true, |since| s.created_at >= since));

        let after = snapshot.as_ref().map(|s| s.version);
        let events = self
            .call(
                Operation::QueryRange,
                &key,
                cancel,
                self.registry.query_range(&key, after),
            )
            .await?;

        tracing::debug!(
            stream = %key,
            operation = %Operation::EventsSince,
            snapshot_version = ?after,
            event_count = events.len(),
            outcome = "ok",
            "resolved entity stream"
        );

        let mut envelopes = Vec::with_capacity(events.len() + 1);
        envelopes.extend(snapshot);
        envelopes.extend(events);
        Ok(envelopes)
    }

    /// Most recent snapshot of an entity; `None` when it was never
    /// snapshotted
    pub async fn latest_snapshot(
        &self,
        entity_type_name: &str,
        entity_id: &str,
    ) -> EventStoreResult<Option<EventEnvelope>> {
        self.latest_snapshot_with_cancel(entity_type_name, entity_id, None)
            .await
    }

    pub async fn latest_snapshot_with_cancel(
        &self,
        entity_type_name: &str,
        entity_id: &str,
        cancel: Option<&CancellationToken>,
    ) -> EventStoreResult<Option<EventEnvelope>> {
        let key = StreamKey::new(entity_type_name, entity_id);
        let snapshot = self
            .call(
                Operation::QueryLatestSnapshot,
                &key,
                cancel,
                self.registry.query_latest_snapshot(&key),
            )
            .await?;

        match &snapshot {
            Some(s) => tracing::debug!(
                stream = %key,
                operation = %Operation::LatestSnapshot,
                version = s.version,
                "snapshot found"
            ),
            None => tracing::debug!(
                stream = %key,
                operation = %Operation::LatestSnapshot,
                "no snapshot found"
            ),
        }
        Ok(snapshot)
    }

    /// Search stored events and project them into read-facing results
    pub async fn search(&self, filter: &EventFilter) -> EventStoreResult<Vec<SearchResult>> {
        self.search_with_cancel(filter, None).await
    }

    pub async fn search_with_cancel(
        &self,
        filter: &EventFilter,
        cancel: Option<&CancellationToken>,
    ) -> EventStoreResult<Vec<SearchResult>> {
        let scope = format!("ee_{}", filter.entity_type_name);
        let envelopes = self
            .call(
                Operation::QueryByFilter,
                &scope,
                cancel,
                self.registry.query_by_filter(filter),
            )
            .await?;

        tracing::debug!(
            stream = %scope,
            operation = %Operation::Search,
            result_count = envelopes.len(),
            outcome = "ok",
            "searched event streams"
        );
        Ok(envelopes
            .into_iter()
            .map(|e| SearchResult::from_envelope(e, filter.include_version))
            .collect())
    }

    /// Event counts and snapshot position for one stream
    pub async fn stream_stats(
        &self,
        entity_type_name: &str,
        entity_id: &str,
    ) -> EventStoreResult<StreamStats> {
        let key = StreamKey::new(entity_type_name, entity_id);
        let snapshot = self
            .call(
                Operation::QueryLatestSnapshot,
                &key,
                None,
                self.registry.query_latest_snapshot(&key),
            )
            .await?;
        let events = self
            .call(
                Operation::QueryRange,
                &key,
                None,
                self.registry.query_range(&key, None),
            )
            .await?;
        Ok(StreamStats::collect(&key, &events, snapshot.as_ref()))
    }
}
