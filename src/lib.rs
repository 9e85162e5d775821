//! # shardkv
//!
//! A sharded in-memory key-value store with live shard migration:
//! - A master owning the authoritative topology (server -> shards,
//!   shard -> hash boundary, server -> state)
//! - Storage nodes holding the shard data
//! - A discovery registry mapping service ids to addresses
//! - HTTP + JSON for every surface
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────┐
//! │                 Master                   │
//! │  (topology owner, rebalance orchestrator)│
//! │   prepare -> process -> apply / rollback │
//! └───────────┬──────────────────────────────┘
//!             │ HTTP
//!   ┌─────────┴──────────┬──────────────┐
//!   │                    │              │
//! ┌─▼──────────┐   ┌─────▼──────┐   ┌──▼───────────┐
//! │ Node 1     │   │ Node 2     │◄──► Node 3       │
//! │ shards 0,3 │   │ shards 1,4 │   │ shards 2,5   │
//! └────────────┘   └────────────┘   └──────────────┘
//!        (nodes push shards/fragments peer to peer)
//! ```
//!
//! ## Usage
//!
//! ```bash
//! shardkv-discovery serve --bind 0.0.0.0:4000
//! shardkv-master serve --bind 0.0.0.0:5000 --discovery http://localhost:4000
//! shardkv-node serve --id 1 --bind 0.0.0.0:6001 --discovery http://localhost:4000
//!
//! shardkv add-server 1
//! shardkv shard-count 8
//! shardkv set my-key my-value
//! shardkv get my-key
//! ```

pub mod client;
pub mod common;
pub mod discovery;
pub mod master;
pub mod node;

// Re-export commonly used types
pub use common::{Config, Error, Result};
pub use discovery::DiscoveryServer;
pub use master::MasterServer;
pub use node::NodeServer;

/// Current version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
