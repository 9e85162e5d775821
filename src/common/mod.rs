//! Common types and utilities shared across shardkv services

pub mod config;
pub mod error;
pub mod hash;
pub mod types;
pub mod util;

pub use config::{Config, DiscoveryConfig, MasterConfig, NodeConfig};
pub use error::{Error, Result};
pub use hash::{hash_key, partition, shard_for_hash, shard_for_key};
pub use types::{
    Action, Fragment, GetResponse, GetStatus, HeartbeatResponse, NodeState, NodeStatus,
    ServiceDescriptor, ServiceKind, SetResponse, SetStatus, StatusResponse,
};
pub use util::{retry_fixed, timestamp_now_millis};
