//! Discovery server runner

use crate::common::config::DiscoveryConfig;
use crate::discovery::http::{create_router, DiscoveryState};
use crate::discovery::registry::Registry;
use crate::Result;
use std::sync::Arc;

pub struct DiscoveryServer {
    config: DiscoveryConfig,
}

impl DiscoveryServer {
    pub fn new(config: DiscoveryConfig) -> Self {
        Self { config }
    }

    pub async fn serve(self) -> Result<()> {
        tracing::info!("Starting discovery registry");
        tracing::info!("  HTTP API: {}", self.config.bind_addr);

        let state = DiscoveryState {
            registry: Arc::new(Registry::new()),
        };
        let router = create_router(state);

        let listener = tokio::net::TcpListener::bind(self.config.bind_addr).await?;
        tracing::info!("Discovery registry ready");
        axum::serve(listener, router).await?;
        Ok(())
    }
}
