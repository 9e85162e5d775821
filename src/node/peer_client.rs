//! Node-to-node HTTP pushes
//!
//! The sender resolves the receiving server through discovery per payload;
//! a shard move often targets a server that registered moments ago.

use crate::common::types::{ShardPayload, StatusResponse};
use crate::discovery::DiscoveryClient;
use crate::node::management::PeerTransport;
use crate::{Error, Result};
use tracing::debug;

#[derive(Clone)]
pub struct HttpPeerTransport {
    http: reqwest::Client,
    discovery: DiscoveryClient,
}

impl HttpPeerTransport {
    pub fn new(discovery: DiscoveryClient) -> Self {
        Self {
            http: reqwest::Client::new(),
            discovery,
        }
    }

    async fn push(&self, target_server: u32, path: &str, payload: &ShardPayload) -> Result<()> {
        let node = self.discovery.get_node_with_retries(target_server).await?;
        let url = format!("{}{path}", node.base_url());
        debug!(target_server, shard_id = payload.shard_id, %url, "peer push");

        let response: StatusResponse = self
            .http
            .post(&url)
            .json(payload)
            .send()
            .await?
            .json()
            .await?;
        if response.success {
            Ok(())
        } else {
            Err(Error::Other(response.message))
        }
    }
}

impl PeerTransport for HttpPeerTransport {
    async fn send_shard(&self, target_server: u32, payload: ShardPayload) -> Result<()> {
        self.push(target_server, "/peer/shard", &payload).await
    }

    async fn send_fragment(&self, target_server: u32, payload: ShardPayload) -> Result<()> {
        self.push(target_server, "/peer/fragment", &payload).await
    }
}
