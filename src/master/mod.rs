//! Master: topology owner and rebalance coordinator.

pub mod http;
pub mod node_client;
pub mod orchestrator;
pub mod server;
pub mod topology;

pub use orchestrator::{NodeControl, NodePlan, Orchestrator};
pub use server::MasterServer;
pub use topology::{plan_fragments, redistribute, Topology, TopologyMaps};
