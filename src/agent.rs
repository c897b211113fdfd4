//! Registry of connection pools keyed by tunnel and target.
//!
//! # Responsibilities
//! - Lazily create one pool per `(tunnel, target origin)` pair
//! - Reuse the pool for every later request with the same pair
//! - Tear all pools down at once
//!
//! # Design Decisions
//! - Explicitly constructed and owned; there is no process-wide instance
//! - Creation on miss goes through the map's entry API, so concurrent first
//!   requests for one key build a single pool
//! - After `destroy()` the agent refuses requests until `reset()`

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures_util::future::join_all;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use url::Url;

use crate::config::validation::validate_pool_shape;
use crate::config::TunnelConfig;
use crate::error::{TunnelError, TunnelResult};
use crate::http::{RequestOptions, Response};
use crate::load_balancer::ConnectionPool;
use crate::net::TargetEndpoint;

/// Pool size used when none is configured.
pub const DEFAULT_POOL_SIZE: usize = 10;
/// Pipelining depth used when none is configured.
pub const DEFAULT_PIPELINING: usize = 1;

#[derive(Debug)]
pub struct Agent {
    /// Every section except the two URLs is copied into each new pool.
    template: TunnelConfig,
    pools: DashMap<String, Arc<ConnectionPool>>,
    destroyed: AtomicBool,
}

impl Default for Agent {
    fn default() -> Self {
        let mut template = TunnelConfig::default();
        template.pool.size = DEFAULT_POOL_SIZE;
        template.pool.pipelining = DEFAULT_PIPELINING;
        Self {
            template,
            pools: DashMap::new(),
            destroyed: AtomicBool::new(false),
        }
    }
}

impl Agent {
    /// Agent whose pools take their shape, timeouts, TLS and reconnect
    /// settings from `template`. The template's URLs are ignored.
    pub fn new(template: TunnelConfig) -> TunnelResult<Self> {
        let errors = validate_pool_shape(template.pool.size, template.pool.pipelining);
        if let Some(first) = errors.first() {
            return Err(TunnelError::Config(first.to_string()));
        }
        Ok(Self {
            template,
            pools: DashMap::new(),
            destroyed: AtomicBool::new(false),
        })
    }

    /// Registry key for a tunnel / target pair.
    pub fn pool_key(tunnel: &str, target: &TargetEndpoint) -> String {
        format!("{}_{}", tunnel, target.origin())
    }

    /// Send a request to the absolute https `url` through `tunnel`.
    pub async fn request(
        &self,
        url: &str,
        tunnel: &str,
        options: RequestOptions,
    ) -> TunnelResult<Response> {
        let parsed = Url::parse(url)?;
        let pool = self.pool_for(tunnel, &TargetEndpoint::from_url(&parsed)?)?;
        pool.request(parsed.as_str(), options).await
    }

    /// Get or lazily create the pool for a tunnel / target pair.
    pub fn pool_for(&self, tunnel: &str, target: &TargetEndpoint) -> TunnelResult<Arc<ConnectionPool>> {
        if self.is_destroyed() {
            return Err(TunnelError::Destroyed);
        }

        let key = Self::pool_key(tunnel, target);
        if let Some(pool) = self.pools.get(&key) {
            return Ok(Arc::clone(pool.value()));
        }

        match self.pools.entry(key) {
            Entry::Occupied(entry) => Ok(Arc::clone(entry.get())),
            Entry::Vacant(entry) => {
                // `destroy` raises the flag before snapshotting keys; re-check
                // while this shard is locked.
                if self.is_destroyed() {
                    return Err(TunnelError::Destroyed);
                }
                let mut config = self.template.clone();
                config.tunnel_url = tunnel.to_string();
                config.target_url = target.origin();

                let pool = Arc::new(ConnectionPool::new(&config)?);
                tracing::debug!(key = %entry.key(), "Registered connection pool");
                entry.insert(Arc::clone(&pool));
                Ok(pool)
            }
        }
    }

    /// Number of cached pools.
    pub fn pool_count(&self) -> usize {
        self.pools.len()
    }

    /// Destroy and forget every pool. Later requests fail until `reset()`.
    pub fn destroy(&self) {
        for pool in self.drain() {
            pool.destroy();
        }
        tracing::info!("Agent destroyed");
    }

    /// Like [`Agent::destroy`], but waits for every connection to stop.
    pub async fn shutdown(&self) {
        let pools = self.drain();
        join_all(pools.iter().map(|pool| pool.shutdown())).await;
        tracing::info!(pools = pools.len(), "Agent shut down");
    }

    fn drain(&self) -> Vec<Arc<ConnectionPool>> {
        self.destroyed.store(true, Ordering::Release);
        let keys: Vec<String> = self.pools.iter().map(|entry| entry.key().clone()).collect();
        keys.iter()
            .filter_map(|key| self.pools.remove(key).map(|(_, pool)| pool))
            .collect()
    }

    /// Start a fresh lifecycle after `destroy()`.
    pub fn reset(&self) {
        self.destroyed.store(false, Ordering::Release);
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::Acquire)
    }
}
