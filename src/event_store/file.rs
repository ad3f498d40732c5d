//! JSONL file registry
//!
//! Each stream partition is an append-only JSON Lines file, grouped in one
//! directory per entity type:
//!
//! ```text
//! <data_dir>/streams/
//! └── Cart/
//!     ├── ee_Cart_42_event.jsonl      one EVENT envelope per line
//!     └── ee_Cart_42_snapshot.jsonl   one SNAPSHOT envelope per line
//! ```
//!
//! Entity types never share a directory, so `Cart_x`/`1` and `Cart`/`x_1`
//! land in different files even though their display keys are equal.
//!
//! Appends for one stream are serialized by a per-stream lock, written as a
//! single line and synced to disk before returning. The write runs in its
//! own task holding the lock, so a caller that times out or is cancelled
//! cannot leave the cached head behind the file. A line without its
//! trailing newline is an append that crashed part way: readers skip it and
//! the next append cuts it off before writing. The registry assumes it is
//! the only process writing to `data_dir`.

use std::collections::HashMap;
use std::io::{self, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio::sync::OwnedMutexGuard;

use crate::config::EventStoreConfig;
use crate::types::{EnvelopeKind, EventEnvelope, EventFilter};

use super::error::{EventStoreError, EventStoreResult, Operation};
use super::registry::{Registry, StreamHead};
use super::stream_key::StreamKey;

/// Idle stream locks kept before the table is pruned
const DEFAULT_MAX_CACHED_STREAMS: usize = 1024;

/// Per-stream write lock guarding the cached head (loaded on first append)
type StreamLock = Arc<tokio::sync::Mutex<Option<StreamHead>>>;

/// Registry persisting streams as JSONL files
pub struct FileRegistry {
    streams_dir: PathBuf,
    locks: parking_lot::Mutex<HashMap<StreamKey, StreamLock>>,
    max_cached_streams: usize,
}

impl FileRegistry {
    /// Create a registry rooted at `data_dir`
    pub fn new<P: AsRef<Path>>(data_dir: P) -> Self {
        Self {
            streams_dir: data_dir.as_ref().join("streams"),
            locks: parking_lot::Mutex::new(HashMap::new()),
            max_cached_streams: DEFAULT_MAX_CACHED_STREAMS,
        }
    }

    pub fn from_config(config: &EventStoreConfig) -> Self {
        Self::new(config.data_dir())
    }

    /// Bound on idle per-stream locks (and their cached heads). Past it,
    /// locks nobody holds are dropped and their heads reloaded on demand.
    pub fn with_max_cached_streams(mut self, max: usize) -> Self {
        self.max_cached_streams = max.max(1);
        self
    }

    /// Directory holding the partition files
    pub fn streams_dir(&self) -> &Path {
        &self.streams_dir
    }

    /// Path of a partition file. `None` for keys that would escape the
    /// streams directory.
    pub fn partition_path(&self, key: &StreamKey, kind: EnvelopeKind) -> Option<PathBuf> {
        let type_dir = self.type_dir(&key.entity_type_name)?;
        if !is_plain_segment(&key.entity_id) {
            return None;
        }
        Some(type_dir.join(format!("{}.jsonl", key.partition(kind))))
    }

    fn type_dir(&self, entity_type_name: &str) -> Option<PathBuf> {
        is_plain_segment(entity_type_name).then(|| self.streams_dir.join(entity_type_name))
    }

    fn stream_lock(&self, key: &StreamKey) -> StreamLock {
        let mut locks = self.locks.lock();
        if locks.len() >= self.max_cached_streams && !locks.contains_key(key) {
            // A count of one means only the table holds the lock
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        }
        locks.entry(key.clone()).or_default().clone()
    }

    #[cfg(test)]
    fn cached_streams(&self) -> usize {
        self.locks.lock().len()
    }
}

fn is_plain_segment(s: &str) -> bool {
    !s.is_empty() && !s.contains(['/', '\\', '\0']) && s != "." && s != ".."
}

/// Load and decode every complete line of a partition file
async fn read_partition(
    path: &Path,
    operation: Operation,
    key: &StreamKey,
) -> EventStoreResult<Vec<EventEnvelope>> {
    let content = match tokio::fs::read_to_string(path).await {
        Ok(content) => content,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(EventStoreError::io(operation, key, e)),
    };
    parse_lines(&content, operation, key)
}

/// Rebuild a stream head from its partition files
async fn load_head(key: &StreamKey, partitions: &[PathBuf]) -> EventStoreResult<StreamHead> {
    let mut head = StreamHead::default();
    for path in partitions {
        for envelope in read_partition(path, Operation::Append, key).await? {
            head.record(&envelope);
        }
    }
    Ok(head)
}

/// Validate, write and record one envelope while holding the stream lock
///
/// Runs as its own task: it completes even when the caller stops waiting.
async fn append_locked(
    mut cached: OwnedMutexGuard<Option<StreamHead>>,
    key: StreamKey,
    partitions: [PathBuf; 2],
    envelope: EventEnvelope,
) -> EventStoreResult<()> {
    let mut head = match *cached {
        Some(head) => head,
        None => load_head(&key, &partitions).await?,
    };
    *cached = Some(head);

    head.check_append(&key, &envelope)?;

    let line = envelope
        .to_json_line()
        .map_err(|e| EventStoreError::malformed(Operation::Append, &key, e))?;
    let path = match envelope.kind {
        EnvelopeKind::Event => &partitions[0],
        EnvelopeKind::Snapshot => &partitions[1],
    };
    if let Err(e) = write_line(path, &line).await {
        // The file may be ahead of or behind the cache; reload next time
        *cached = None;
        return Err(EventStoreError::io(Operation::Append, &key, e));
    }

    head.record(&envelope);
    *cached = Some(head);
    Ok(())
}

/// Append one line, truncating back to the previous length if the write
/// fails part way
async fn write_line(path: &Path, line: &str) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .read(true)
        .write(true)
        .open(path)
        .await?;
    let previous_len = cut_torn_tail(&mut file, path).await?;
    file.seek(SeekFrom::Start(previous_len)).await?;

    let mut buf = String::with_capacity(line.len() + 1);
    buf.push_str(line);
    buf.push('\n');

    let written = async {
        file.write_all(buf.as_bytes()).await?;
        file.sync_all().await
    }
    .await;

    if let Err(e) = written {
        let _ = file.set_len(previous_len).await;
        return Err(e);
    }
    Ok(())
}

/// Drop an unterminated last line left by a crashed append. Returns the
/// length of the complete part of the file.
async fn cut_torn_tail(file: &mut File, path: &Path) -> io::Result<u64> {
    let len = file.metadata().await?.len();
    if len == 0 {
        return Ok(0);
    }

    let mut last = [0u8; 1];
    file.seek(SeekFrom::Start(len - 1)).await?;
    file.read_exact(&mut last).await?;
    if last[0] == b'\n' {
        return Ok(len);
    }

    let mut content = Vec::new();
    file.seek(SeekFrom::Start(0)).await?;
    file.read_to_end(&mut content).await?;
    let keep = content
        .iter()
        .rposition(|b| *b == b'\n')
        .map_or(0, |end| end as u64 + 1);
    file.set_len(keep).await?;
    file.sync_all().await?;

    tracing::warn!(
        path = %path.display(),
        dropped_bytes = len - keep,
        "cut unterminated trailing line"
    );
    Ok(keep)
}

/// Decode JSONL content, skipping blank lines and an unterminated tail
fn parse_lines(
    content: &str,
    operation: Operation,
    key: &StreamKey,
) -> EventStoreResult<Vec<EventEnvelope>> {
    let complete = match content.rfind('\n') {
        Some(end) => &content[..end],
        None => return Ok(Vec::new()),
    };

    let mut envelopes = Vec::new();
    for line in complete.lines() {
        if line.trim().is_empty() {
            continue;
        }
        let envelope = EventEnvelope::from_json_line(line)
            .map_err(|e| EventStoreError::malformed(operation, key, e))?;
        envelopes.push(envelope);
    }
    Ok(envelopes)
}

#[async_trait]
impl Registry for FileRegistry {
    fn name(&self) -> &'static str {
        "file"
    }

    async fn append(&self, envelope: &EventEnvelope) -> EventStoreResult<()> {
        let key = envelope.stream_key();
        let partitions = match (
            self.partition_path(&key, EnvelopeKind::Event),
            self.partition_path(&key, EnvelopeKind::Snapshot),
        ) {
            (Some(events), Some(snapshots)) => [events, snapshots],
            _ => {
                return Err(EventStoreError::invalid(
                    &key,
                    "entity type and id must be plain path segments",
                ))
            }
        };

        let cached = self.stream_lock(&key).lock_owned().await;
        let write = tokio::spawn(append_locked(
            cached,
            key.clone(),
            partitions,
            envelope.clone(),
        ));
        write.await.map_err(|e| {
            EventStoreError::io(Operation::Append, &key, io::Error::new(io::ErrorKind::Other, e))
        })??;

        tracing::debug!(
            stream = %key,
            operation = %Operation::Append,
            kind = %envelope.kind,
            version = envelope.version,
            outcome = "ok",
            "file registry append"
        );
        Ok(())
    }

    async fn query_range(
        &self,
        key: &StreamKey,
        after: Option<u64>,
    ) -> EventStoreResult<Vec<EventEnvelope>> {
        let Some(path) = self.partition_path(key, EnvelopeKind::Event) else {
            return Ok(Vec::new());
        };
        let mut events = read_partition(&path, Operation::QueryRange, key).await?;
        if let Some(after) = after {
            events.retain(|e| e.version > after);
        }
        events.sort_by_key(|e| e.version);
        Ok(events)
    }

    async fn query_latest_snapshot(
        &self,
        key: &StreamKey,
    ) -> EventStoreResult<Option<EventEnvelope>> {
        let Some(path) = self.partition_path(key, EnvelopeKind::Snapshot) else {
            return Ok(None);
        };
        let snapshots = read_partition(&path, Operation::QueryLatestSnapshot, key).await?;
        Ok(snapshots.into_iter().max_by_key(|s| s.version))
    }

    async fn query_by_filter(&self, filter: &EventFilter) -> EventStoreResult<Vec<EventEnvelope>> {
        let scope = StreamKey::new(
            filter.entity_type_name.clone(),
            filter.entity_id.clone().unwrap_or_else(|| "*".to_string()),
        );
        let Some(type_dir) = self.type_dir(&filter.entity_type_name) else {
            return Ok(Vec::new());
        };
        let mut dir = match tokio::fs::read_dir(&type_dir).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(EventStoreError::io(Operation::QueryByFilter, &scope, e)),
        };

        let suffix = format!("_{}.jsonl", EnvelopeKind::Event.as_str());
        let mut matches = Vec::new();

        while let Some(entry) = dir
            .next_entry()
            .await
            .map_err(|e| EventStoreError::io(Operation::QueryByFilter, &scope, e))?
        {
            let file_name = entry.file_name();
            let Some(name) = file_name.to_str() else {
                continue;
            };
            if !name.ends_with(&suffix) {
                continue;
            }

            let events = read_partition(&entry.path(), Operation::QueryByFilter, &scope).await?;
            matches.extend(events.into_iter().filter(|e| filter.matches(e)));
        }

        Ok(filter.finish(matches))
    }
}
