//! Routing client
//!
//! Resolves keys to owning servers through a cached copy of the master's
//! topology and retries around the transient answers a rebalancing cluster
//! gives: `WRONG_NODE`, `TRANSFER`, and `QUEUED`. The transport is a trait
//! so tests can drive the client against an in-process cluster.

pub mod transport;

pub use transport::HttpClusterTransport;

use crate::common::types::{GetResponse, GetStatus, SetResponse, SetStatus};
use crate::common::util::timestamp_now_millis;
use crate::master::TopologyMaps;
use crate::{Error, Result};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::debug;

/// Attempts per operation before giving up.
const RETRIES: usize = 10;
/// Pause between attempts, enough for a small rebalance to finish.
const RETRY_DELAY: Duration = Duration::from_millis(200);

/// Pulls topology and talks to individual servers.
pub trait ClusterTransport: Send + Sync {
    fn fetch_topology(
        &self,
    ) -> impl std::future::Future<Output = Result<TopologyMaps>> + Send;

    fn set(
        &self,
        server_id: u32,
        key: &str,
        value: &str,
        timestamp: u64,
    ) -> impl std::future::Future<Output = Result<SetResponse>> + Send;

    fn get(
        &self,
        server_id: u32,
        key: &str,
    ) -> impl std::future::Future<Output = Result<GetResponse>> + Send;
}

struct CachedTopology {
    maps: TopologyMaps,
    fetched_at: Instant,
}

pub struct RoutingClient<T: ClusterTransport> {
    transport: T,
    cache: Mutex<Option<CachedTopology>>,
    cache_ttl: Duration,
}

impl<T: ClusterTransport> RoutingClient<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            cache: Mutex::new(None),
            cache_ttl: Duration::from_secs(30),
        }
    }

    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    async fn topology(&self, force_refresh: bool) -> Result<TopologyMaps> {
        if !force_refresh {
            let cache = self.cache.lock().unwrap();
            if let Some(cached) = cache.as_ref() {
                if cached.fetched_at.elapsed() < self.cache_ttl {
                    return Ok(cached.maps.clone());
                }
            }
        }

        let maps = self.transport.fetch_topology().await?;
        *self.cache.lock().unwrap() = Some(CachedTopology {
            maps: maps.clone(),
            fetched_at: Instant::now(),
        });
        Ok(maps)
    }

    /// Route a write to the key's owner, following redirects while the
    /// cluster rebalances underneath us.
    pub async fn set(&self, key: &str, value: &str) -> Result<()> {
        let timestamp = timestamp_now_millis();
        let mut refresh = false;
        // A TRANSFER answer names the owner directly, bypassing the cache
        // for the next attempt.
        let mut redirect: Option<u32> = None;

        for attempt in 0..RETRIES {
            if attempt > 0 {
                tokio::time::sleep(RETRY_DELAY).await;
            }

            let server = match redirect.take() {
                Some(server) => server,
                None => {
                    let maps = self.topology(refresh).await?;
                    refresh = false;
                    maps.server_for_key(key)
                        .ok_or_else(|| Error::NoServerForKey(key.to_string()))?
                }
            };

            let response = self.transport.set(server, key, value, timestamp).await?;
            match response.status {
                SetStatus::Success => return Ok(()),
                SetStatus::Queued => {
                    debug!(key, server, "write queued, retrying after rebalance");
                    refresh = true;
                }
                SetStatus::Transfer => {
                    debug!(key, server, target = ?response.target_server, "redirected");
                    redirect = response.target_server;
                    refresh = true;
                }
                SetStatus::Error => {
                    debug!(key, server, message = %response.message, "set rejected, refreshing");
                    refresh = true;
                }
            }
        }
        Err(Error::RetriesExhausted(format!("set {key}")))
    }

    /// Route a read to the key's owner, chasing the topology while shards
    /// move.
    pub async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut refresh = false;

        for attempt in 0..RETRIES {
            if attempt > 0 {
                tokio::time::sleep(RETRY_DELAY).await;
            }

            let maps = self.topology(refresh).await?;
            refresh = false;
            let server = maps
                .server_for_key(key)
                .ok_or_else(|| Error::NoServerForKey(key.to_string()))?;

            let response = self.transport.get(server, key).await?;
            match response.status {
                GetStatus::Success => return Ok(response.value),
                GetStatus::WrongNode => {
                    debug!(key, server, "wrong node, refreshing topology");
                    refresh = true;
                }
                GetStatus::Error => {
                    debug!(key, server, "get rejected, refreshing topology");
                    refresh = true;
                }
            }
        }
        Err(Error::RetriesExhausted(format!("get {key}")))
    }
}
