//! Storage node: shard data, the rebalance state machine, and its HTTP
//! surfaces.

pub mod http;
pub mod management;
pub mod peer_client;
pub mod server;
pub mod shard;
pub mod state;
pub mod store;

pub use management::{NodeManager, PeerTransport};
pub use server::NodeServer;
pub use store::NodeStore;
