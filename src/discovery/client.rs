//! HTTP client for the discovery registry
//!
//! Lookups retry a bounded number of times with a fixed delay, because a
//! freshly started service often asks for a peer that has not finished
//! registering yet.

use crate::common::config::RetryPolicy;
use crate::common::types::{ServiceDescriptor, ServiceKind};
use crate::common::util::retry_fixed;
use crate::{Error, Result};
use std::collections::HashMap;
use tracing::debug;

#[derive(Clone)]
pub struct DiscoveryClient {
    http: reqwest::Client,
    base_url: String,
    retry: RetryPolicy,
}

impl DiscoveryClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub async fn register(&self, descriptor: &ServiceDescriptor) -> Result<()> {
        self.http
            .post(format!("{}/register", self.base_url))
            .json(descriptor)
            .send()
            .await?
            .error_for_status()?;
        debug!(id = descriptor.id, kind = ?descriptor.kind, "registered with discovery");
        Ok(())
    }

    pub async fn register_node(&self, id: u32, host: &str, port: u16) -> Result<()> {
        self.register(&ServiceDescriptor {
            id,
            kind: ServiceKind::Node,
            host: host.to_string(),
            port,
        })
        .await
    }

    async fn try_get_node(&self, id: u32) -> Result<ServiceDescriptor> {
        let response = self
            .http
            .get(format!("{}/nodes/{id}", self.base_url))
            .send()
            .await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(Error::NotRegistered(format!("node {id}")));
        }
        let descriptor: Option<ServiceDescriptor> =
            response.error_for_status()?.json().await?;
        descriptor.ok_or_else(|| Error::NotRegistered(format!("node {id}")))
    }

    /// Look a node up, waiting out a pending registration.
    pub async fn get_node_with_retries(&self, id: u32) -> Result<ServiceDescriptor> {
        retry_fixed(
            || self.try_get_node(id),
            self.retry.retries,
            self.retry.delay(),
        )
        .await
    }

    pub async fn get_node_map(&self) -> Result<HashMap<u32, ServiceDescriptor>> {
        let map = self
            .http
            .get(format!("{}/nodes", self.base_url))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(map)
    }

    async fn try_get_master(&self) -> Result<ServiceDescriptor> {
        let response = self
            .http
            .get(format!("{}/master", self.base_url))
            .send()
            .await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(Error::NotRegistered("master".into()));
        }
        let descriptor: Option<ServiceDescriptor> =
            response.error_for_status()?.json().await?;
        descriptor.ok_or_else(|| Error::NotRegistered("master".into()))
    }

    /// Look the master up, waiting out a pending registration.
    pub async fn get_master_with_retries(&self) -> Result<ServiceDescriptor> {
        retry_fixed(
            || self.try_get_master(),
            self.retry.retries,
            self.retry.delay(),
        )
        .await
    }
}
