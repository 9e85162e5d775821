//! HTTP transport for the routing client

use crate::client::ClusterTransport;
use crate::common::types::{GetResponse, SetKeyRequest, SetResponse};
use crate::discovery::DiscoveryClient;
use crate::master::TopologyMaps;
use crate::Result;

#[derive(Clone)]
pub struct HttpClusterTransport {
    http: reqwest::Client,
    discovery: DiscoveryClient,
}

impl HttpClusterTransport {
    pub fn new(discovery: DiscoveryClient) -> Self {
        Self {
            http: reqwest::Client::new(),
            discovery,
        }
    }

    async fn node_url(&self, server_id: u32) -> Result<String> {
        Ok(self
            .discovery
            .get_node_with_retries(server_id)
            .await?
            .base_url())
    }
}

impl ClusterTransport for HttpClusterTransport {
    async fn fetch_topology(&self) -> Result<TopologyMaps> {
        let master = self.discovery.get_master_with_retries().await?;
        let base = master.base_url();

        let server_to_shards = self
            .http
            .get(format!("{base}/topology/servers"))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        let shard_to_hash = self
            .http
            .get(format!("{base}/topology/shards"))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        Ok(TopologyMaps {
            server_to_shards,
            shard_to_hash,
        })
    }

    async fn set(
        &self,
        server_id: u32,
        key: &str,
        value: &str,
        timestamp: u64,
    ) -> Result<SetResponse> {
        let url = format!("{}/kv/{key}", self.node_url(server_id).await?);
        let response = self
            .http
            .put(&url)
            .json(&SetKeyRequest {
                value: value.to_string(),
                timestamp,
            })
            .send()
            .await?
            .json()
            .await?;
        Ok(response)
    }

    async fn get(&self, server_id: u32, key: &str) -> Result<GetResponse> {
        let url = format!("{}/kv/{key}", self.node_url(server_id).await?);
        let response = self.http.get(&url).send().await?.json().await?;
        Ok(response)
    }
}
