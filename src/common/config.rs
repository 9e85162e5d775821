//! Configuration for shardkv components

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;

/// Global configuration, loaded from an optional `shardkv.toml` and the
/// `SHARDKV_*` environment, then overridden per-field by CLI arguments.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Master-specific config
    #[serde(skip_serializing_if = "Option::is_none")]
    pub master: Option<MasterConfig>,

    /// Node-specific config
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node: Option<NodeConfig>,

    /// Discovery-specific config
    #[serde(skip_serializing_if = "Option::is_none")]
    pub discovery: Option<DiscoveryConfig>,

    /// Logging level
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// Load from `shardkv.toml` (if present) and `SHARDKV_*` env vars.
    pub fn load() -> Config {
        let loaded = config::Config::builder()
            .add_source(config::File::with_name("shardkv").required(false))
            .add_source(config::Environment::with_prefix("SHARDKV").separator("__"))
            .build()
            .and_then(|c| c.try_deserialize());

        match loaded {
            Ok(cfg) => cfg,
            Err(e) => {
                tracing::debug!("No usable config file, using defaults: {}", e);
                Config::default()
            }
        }
    }
}

/// Master configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MasterConfig {
    /// Bind address for the HTTP API
    pub bind_addr: SocketAddr,

    /// Base URL of the discovery registry
    pub discovery_url: String,

    /// Deadline for each master->node call during a rebalance, seconds
    #[serde(default = "default_node_call_timeout")]
    pub node_call_timeout_secs: u64,

    /// Number of shards the cluster starts with
    #[serde(default = "default_shard_count")]
    pub initial_shard_count: u32,
}

fn default_node_call_timeout() -> u64 {
    10
}

fn default_shard_count() -> u32 {
    4
}

impl Default for MasterConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:5000".parse().unwrap(),
            discovery_url: "http://localhost:4000".to_string(),
            node_call_timeout_secs: default_node_call_timeout(),
            initial_shard_count: default_shard_count(),
        }
    }
}

/// Node configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Server id, unique across the cluster
    pub node_id: u32,

    /// Bind address for the HTTP API
    pub bind_addr: SocketAddr,

    /// Hostname other services reach this node at
    #[serde(default = "default_advertise_host")]
    pub advertise_host: String,

    /// Base URL of the discovery registry
    pub discovery_url: String,
}

fn default_advertise_host() -> String {
    "localhost".to_string()
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            node_id: 0,
            bind_addr: "0.0.0.0:6000".parse().unwrap(),
            advertise_host: default_advertise_host(),
            discovery_url: "http://localhost:4000".to_string(),
        }
    }
}

/// Discovery registry configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    /// Bind address for the HTTP API
    pub bind_addr: SocketAddr,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:4000".parse().unwrap(),
        }
    }
}

/// Retry policy for discovery lookups that may race a registration.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RetryPolicy {
    #[serde(default = "default_retries")]
    pub retries: usize,

    #[serde(default = "default_retry_delay_ms")]
    pub delay_ms: u64,
}

fn default_retries() -> usize {
    10
}

fn default_retry_delay_ms() -> u64 {
    200
}

impl RetryPolicy {
    pub fn delay(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.delay_ms)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retries: default_retries(),
            delay_ms: default_retry_delay_ms(),
        }
    }
}
