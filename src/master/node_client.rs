//! HTTP implementation of `NodeControl`
//!
//! Node addresses are resolved through discovery on every call; the registry
//! is the single source of truth for where a server currently lives. Every
//! call carries a fixed deadline so one unresponsive node cannot wedge the
//! whole rebalance.

use crate::common::types::{
    Action, ActionRequest, PrepareMoveRequest, PrepareRearrangeRequest, StatusResponse,
};
use crate::discovery::DiscoveryClient;
use crate::master::orchestrator::NodeControl;
use crate::{Error, Result};
use serde::Serialize;
use std::time::Duration;
use tokio::time::timeout;
use tracing::debug;

pub struct HttpNodeControl {
    http: reqwest::Client,
    discovery: DiscoveryClient,
    call_timeout: Duration,
}

impl HttpNodeControl {
    pub fn new(discovery: DiscoveryClient, call_timeout: Duration) -> Self {
        Self {
            http: reqwest::Client::new(),
            discovery,
            call_timeout,
        }
    }

    async fn post<B: Serialize>(&self, server_id: u32, path: &str, body: &B) -> Result<()> {
        let node = self.discovery.get_node_with_retries(server_id).await?;
        let url = format!("{}{path}", node.base_url());
        debug!(server_id, %url, "management call");

        let response = timeout(self.call_timeout, async {
            self.http.post(&url).json(body).send().await?.json::<StatusResponse>().await
        })
        .await
        .map_err(|_| Error::Timeout(format!("management call to server {server_id}: {path}")))??;

        if response.success {
            Ok(())
        } else {
            Err(Error::Other(response.message))
        }
    }
}

impl NodeControl for HttpNodeControl {
    async fn prepare_move(&self, server_id: u32, req: PrepareMoveRequest) -> Result<()> {
        self.post(server_id, "/manage/prepare-move", &req).await
    }

    async fn prepare_rearrange(&self, server_id: u32, req: PrepareRearrangeRequest) -> Result<()> {
        self.post(server_id, "/manage/prepare-rearrange", &req).await
    }

    async fn process(&self, server_id: u32, action: Action) -> Result<()> {
        self.post(server_id, "/manage/process", &ActionRequest { action })
            .await
    }

    async fn apply(&self, server_id: u32, action: Action) -> Result<()> {
        self.post(server_id, "/manage/apply", &ActionRequest { action })
            .await
    }

    async fn rollback(&self, server_id: u32, action: Action) -> Result<()> {
        self.post(server_id, "/manage/rollback", &ActionRequest { action })
            .await
    }
}
