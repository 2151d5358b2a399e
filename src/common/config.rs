//! Configuration for minireshard components
//!
//! Values are layered: built-in defaults, then an optional TOML file, then
//! `MINIRESHARD__`-prefixed environment variables (`__` separates nesting,
//! e.g. `MINIRESHARD__COORDINATOR__POLL_INTERVAL_MS=50`).

use crate::common::Result;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Global configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Node ID (unique identifier)
    pub node_id: String,

    /// Coordinator-specific config
    pub coordinator: CoordinatorConfig,

    /// Shard-specific config
    pub shard: ShardConfig,

    /// Logging level, used when RUST_LOG is unset
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            node_id: "node-1".to_string(),
            coordinator: CoordinatorConfig::default(),
            shard: ShardConfig::default(),
            log_level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// Load configuration from an optional TOML file and the environment
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(false));
        }
        builder = builder.add_source(
            config::Environment::with_prefix("MINIRESHARD")
                .separator("__")
                .try_parsing(true),
        );

        let config: Config = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.coordinator.retry.validate()?;
        if self.coordinator.poll_interval_ms == 0 {
            return Err(crate::Error::InvalidConfig(
                "coordinator.poll_interval_ms must be positive".into(),
            ));
        }
        Ok(())
    }
}

/// Coordinator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    /// Bind address for HTTP API
    pub bind_addr: SocketAddr,

    /// RocksDB path for operation records and catalog
    pub db_path: PathBuf,

    /// Start as metadata authority (single-node deployments)
    pub authority: bool,

    /// Allow test-only request fields (explicit chunk presets)
    pub test_commands_enabled: bool,

    /// Participant call retry policy
    pub retry: RetryPolicy,

    /// Delay between status poll rounds that made no phase progress
    pub poll_interval_ms: u64,

    /// Recipients below this lag finish the applying phase
    pub apply_lag_threshold_ms: u64,

    /// Shards registered at startup
    pub shards: Vec<ShardEndpoint>,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 5000)),
            db_path: PathBuf::from("./coord-data"),
            authority: true,
            test_commands_enabled: false,
            retry: RetryPolicy::default(),
            poll_interval_ms: 200,
            apply_lag_threshold_ms: 500,
            shards: Vec::new(),
        }
    }
}

impl CoordinatorConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Static shard registration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShardEndpoint {
    pub id: String,
    pub address: String,
    #[serde(default)]
    pub zones: Vec<String>,
}

/// Bounded retry with exponential backoff for participant calls
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_attempts: usize,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub call_timeout_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff_ms: 100,
            max_backoff_ms: 5_000,
            call_timeout_ms: 10_000,
        }
    }
}

impl RetryPolicy {
    pub fn initial_backoff(&self) -> Duration {
        Duration::from_millis(self.initial_backoff_ms)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms)
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(crate::Error::InvalidConfig(
                "retry.max_attempts must be at least 1".into(),
            ));
        }
        if self.initial_backoff_ms > self.max_backoff_ms {
            return Err(crate::Error::InvalidConfig(
                "retry.initial_backoff_ms exceeds retry.max_backoff_ms".into(),
            ));
        }
        Ok(())
    }
}

/// Shard (participant) configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ShardConfig {
    /// Bind address for the participant endpoints
    pub bind_addr: SocketAddr,

    /// Status polls a recipient needs to finish its snapshot
    pub clone_batches: u32,

    /// Documents copied per snapshot batch
    pub docs_per_batch: u64,

    /// Replication lag when applying starts
    pub initial_lag_ms: u64,

    /// Lag removed per status poll while applying or draining
    pub lag_step_ms: u64,
}

impl Default for ShardConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 6000)),
            clone_batches: 3,
            docs_per_batch: 1_000,
            initial_lag_ms: 2_000,
            lag_step_ms: 750,
        }
    }
}
