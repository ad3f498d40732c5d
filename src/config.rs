//! Configuration for the event store
//!
//! Defaults are usable as-is; [`EventStoreConfig::from_env`] overlays the
//! `EVENT_STORE_*` environment variables.

use std::env;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const ENV_DATA_DIR: &str = "EVENT_STORE_DATA_DIR";
pub const ENV_TIMEOUT_MS: &str = "EVENT_STORE_TIMEOUT_MS";
pub const ENV_SNAPSHOT_EVERY: &str = "EVENT_STORE_SNAPSHOT_EVERY";
pub const ENV_SNAPSHOT_MAX_AGE_SECS: &str = "EVENT_STORE_SNAPSHOT_MAX_AGE_SECS";
pub const ENV_BIND_ADDR: &str = "EVENT_STORE_BIND_ADDR";

/// Errors raised while reading configuration
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value {value:?} for {key}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

/// Configuration for the event store
#[derive(Debug, Clone)]
pub struct EventStoreConfig {
    /// Root directory of the file registry
    pub data_dir: PathBuf,
    /// Upper bound on every backend call
    pub operation_timeout: Duration,
    /// Pending events that trigger a new snapshot
    pub snapshot_every: usize,
    /// Snapshot age that triggers a new snapshot, if set
    pub snapshot_max_age: Option<Duration>,
    /// Address of the HTTP surface
    pub bind_addr: SocketAddr,
}

impl Default for EventStoreConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            operation_timeout: Duration::from_secs(5),
            snapshot_every: 100,
            snapshot_max_age: None,
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 8080)),
        }
    }
}

impl EventStoreConfig {
    /// Create config with custom data directory
    pub fn new<P: AsRef<Path>>(data_dir: P) -> Self {
        Self {
            data_dir: data_dir.as_ref().to_path_buf(),
            ..Default::default()
        }
    }

    /// Defaults overlaid with `EVENT_STORE_*` environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Defaults overlaid with values from `lookup`
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(dir) = lookup(ENV_DATA_DIR) {
            let path = PathBuf::from(&dir);
            config.data_dir = if path.is_absolute() {
                path
            } else {
                env::current_dir()
                    .unwrap_or_else(|_| PathBuf::from("."))
                    .join(path)
            };
        }
        if let Some(ms) = lookup(ENV_TIMEOUT_MS) {
            config.operation_timeout = Duration::from_millis(parse(ENV_TIMEOUT_MS, &ms)?);
        }
        if let Some(every) = lookup(ENV_SNAPSHOT_EVERY) {
            let every: usize = parse(ENV_SNAPSHOT_EVERY, &every)?;
            if every == 0 {
                return Err(ConfigError::Invalid {
                    key: ENV_SNAPSHOT_EVERY,
                    value: every.to_string(),
                    reason: "must be at least 1".to_string(),
                });
            }
            config.snapshot_every = every;
        }
        if let Some(secs) = lookup(ENV_SNAPSHOT_MAX_AGE_SECS) {
            config.snapshot_max_age =
                Some(Duration::from_secs(parse(ENV_SNAPSHOT_MAX_AGE_SECS, &secs)?));
        }
        if let Some(addr) = lookup(ENV_BIND_ADDR) {
            config.bind_addr = parse(ENV_BIND_ADDR, &addr)?;
        }

        Ok(config)
    }

    pub fn with_operation_timeout(mut self, timeout: Duration) -> Self {
        self.operation_timeout = timeout;
        self
    }

    pub fn with_snapshot_every(mut self, every: usize) -> Self {
        self.snapshot_every = every.max(1);
        self
    }

    pub fn with_snapshot_max_age(mut self, max_age: Duration) -> Self {
        self.snapshot_max_age = Some(max_age);
        self
    }

    /// Get the data directory path
    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }
}

fn parse<T>(key: &'static str, value: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
        key,
        value: value.to_string(),
        reason: e.to_string(),
    })
}
