//! Node server runner

use crate::common::config::NodeConfig;
use crate::discovery::DiscoveryClient;
use crate::node::http::{create_router, NodeHttpState};
use crate::node::management::NodeManager;
use crate::node::peer_client::HttpPeerTransport;
use crate::node::store::NodeStore;
use crate::Result;
use std::sync::Arc;

pub struct NodeServer {
    config: NodeConfig,
}

impl NodeServer {
    pub fn new(config: NodeConfig) -> Self {
        Self { config }
    }

    pub async fn serve(self) -> Result<()> {
        tracing::info!("Starting storage node {}", self.config.node_id);
        tracing::info!("  HTTP API: {}", self.config.bind_addr);
        tracing::info!("  Discovery: {}", self.config.discovery_url);

        let discovery = DiscoveryClient::new(self.config.discovery_url.clone());
        let store = Arc::new(NodeStore::new(self.config.node_id));
        let manager = Arc::new(NodeManager::new(
            store,
            HttpPeerTransport::new(discovery.clone()),
        ));

        // The master learns about this node through discovery; registration
        // must precede serving or an in-flight rebalance could miss us.
        discovery
            .register_node(
                self.config.node_id,
                &self.config.advertise_host,
                self.config.bind_addr.port(),
            )
            .await?;

        let router = create_router(NodeHttpState { manager });
        let listener = tokio::net::TcpListener::bind(self.config.bind_addr).await?;
        tracing::info!("Node {} ready", self.config.node_id);
        axum::serve(listener, router).await?;
        Ok(())
    }
}
