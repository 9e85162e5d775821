//! Master server runner

use crate::common::config::MasterConfig;
use crate::common::types::{ServiceDescriptor, ServiceKind};
use crate::discovery::DiscoveryClient;
use crate::master::http::{create_router, MasterState};
use crate::master::node_client::HttpNodeControl;
use crate::master::topology::Topology;
use crate::Result;
use std::sync::Arc;
use std::time::Duration;

pub struct MasterServer {
    config: MasterConfig,
}

impl MasterServer {
    pub fn new(config: MasterConfig) -> Self {
        Self { config }
    }

    pub async fn serve(self) -> Result<()> {
        tracing::info!("Starting master");
        tracing::info!("  HTTP API: {}", self.config.bind_addr);
        tracing::info!("  Discovery: {}", self.config.discovery_url);
        tracing::info!("  Initial shards: {}", self.config.initial_shard_count);

        let discovery = DiscoveryClient::new(self.config.discovery_url.clone());
        let control = HttpNodeControl::new(
            discovery.clone(),
            Duration::from_secs(self.config.node_call_timeout_secs),
        );
        let topology = Arc::new(Topology::new(self.config.initial_shard_count, control));

        discovery
            .register(&ServiceDescriptor {
                id: 0,
                kind: ServiceKind::Master,
                host: "localhost".to_string(),
                port: self.config.bind_addr.port(),
            })
            .await?;

        let router = create_router(MasterState { topology });
        let listener = tokio::net::TcpListener::bind(self.config.bind_addr).await?;
        tracing::info!("Master ready");
        axum::serve(listener, router).await?;
        Ok(())
    }
}
