//! TOML configuration tree for a chainrelay node: one section per
//! subsystem (`node`, `l1`, `queue`, `store`, `transport`), deserialized
//! with `serde` the way `strata_config::Config` nests its own sections.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config as TOML: {0}")]
    Parse(#[from] toml::de::Error),
}

#[derive(Debug, Clone, Deserialize)]
pub struct NodeConfig {
    pub datadir: PathBuf,
    pub rpc_host: String,
    pub rpc_port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct L1Config {
    pub rpc_url: String,
    pub rpc_user: String,
    pub rpc_password: String,
    /// Seed for `PullLoader`'s adaptive `maxPreloadCount` (spec.md §4.3).
    pub initial_max_preload_count: u64,
    pub max_request_blocks_batch_size: u64,
    pub fetch_retry_attempts: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct QueueConfig {
    /// Cumulative byte budget for `BlockQueue`'s FIFO (its `maxQueueSize`).
    pub max_queue_bytes: u64,
    /// Height ceiling past which the queue refuses to accept more blocks.
    pub max_block_height: u64,
    pub base_block_height: i64,
    /// Byte budget handed to `BatchIterator::tick` (spec.md §4.4).
    pub iterator_budget_bytes: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    pub db_path: PathBuf,
    pub compression_threshold_bytes: usize,
    pub snapshot_min_keep: usize,
    pub snapshot_keep_window: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TransportConfig {
    /// Address of the downstream consumer the node streams the outbox to.
    pub streaming_url: String,
    pub max_message_bytes: usize,
    pub ack_timeout_ms: u64,
    pub heartbeat_interval_ms: u64,
    pub heartbeat_max_interval_ms: u64,
    pub heartbeat_timeout_ms: u64,
    /// Byte budget handed to `DeliveryLoop::tick` (spec.md §4.6).
    pub delivery_budget_bytes: u64,
}

impl TransportConfig {
    pub fn ack_timeout(&self) -> Duration {
        Duration::from_millis(self.ack_timeout_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn heartbeat_max_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_max_interval_ms)
    }

    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_millis(self.heartbeat_timeout_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub node: NodeConfig,
    pub l1: L1Config,
    pub queue: QueueConfig,
    pub store: StoreConfig,
    pub transport: TransportConfig,
}

impl Config {
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(s)?)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&raw)
    }
}
