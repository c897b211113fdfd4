//! Connection pool management.
//!
//! # Responsibilities
//! - Own a fixed set of connections sharing one tunnel/target pair
//! - Apply the least-busy algorithm to pick a connection per request
//! - Tear every connection down on destroy

use futures_util::future::{join_all, try_join_all};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use crate::config::validation::validate_pool_shape;
use crate::config::TunnelConfig;
use crate::error::{TunnelError, TunnelResult};
use crate::http::{RequestOptions, Response};
use crate::load_balancer::{LeastBusy, LoadBalancer};
use crate::net::{ConnectionSettings, ConnectionState, TargetEndpoint, TunnelConnection};

/// A fixed-size pool of persistent connections.
#[derive(Debug)]
pub struct ConnectionPool {
    /// Emptied by `destroy()`.
    connections: RwLock<Vec<Arc<TunnelConnection>>>,
    balancer: LeastBusy,
    target: TargetEndpoint,
    size: usize,
    destroyed: AtomicBool,
}

impl ConnectionPool {
    /// Create a pool from configuration.
    ///
    /// The pool shape is checked before any connection is created, so an
    /// invalid size never touches the network.
    pub fn new(config: &TunnelConfig) -> TunnelResult<Self> {
        let errors = validate_pool_shape(config.pool.size, config.pool.pipelining);
        if !errors.is_empty() {
            let message = errors
                .iter()
                .map(|e| e.to_string())
                .collect::<Vec<_>>()
                .join(", ");
            return Err(TunnelError::Config(message));
        }

        let settings = Arc::new(ConnectionSettings::from_config(config)?);
        Ok(Self::with_settings(settings, config.pool.size))
    }

    fn with_settings(settings: Arc<ConnectionSettings>, size: usize) -> Self {
        let connections: Vec<_> = (0..size)
            .map(|_| Arc::new(TunnelConnection::with_settings(Arc::clone(&settings))))
            .collect();

        tracing::info!(
            proxy = %settings.tunnel.address(),
            endpoint = %settings.target.authority(),
            size,
            pipelining = settings.pipelining,
            "Connection pool created"
        );

        Self {
            connections: RwLock::new(connections),
            balancer: LeastBusy::new(),
            target: settings.target.clone(),
            size,
            destroyed: AtomicBool::new(false),
        }
    }

    fn snapshot(&self) -> Vec<Arc<TunnelConnection>> {
        self.connections
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Pick the least-busy connection.
    pub fn select(&self) -> TunnelResult<Arc<TunnelConnection>> {
        let connections = self
            .connections
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let index = self
            .balancer
            .next_index(connections.as_slice())
            .ok_or(TunnelError::Destroyed)?;
        Ok(Arc::clone(&connections[index]))
    }

    /// Route a request to the least-busy connection.
    pub async fn request(&self, url: &str, options: RequestOptions) -> TunnelResult<Response> {
        if self.is_destroyed() {
            return Err(TunnelError::Destroyed);
        }
        let connection = self.select()?;
        tracing::trace!(connection_id = %connection.id(), queue = connection.queue_len(), "Routing request");
        connection.request(url, options).await
    }

    /// Wait until every connection has its tunnel up.
    pub async fn ready(&self) -> TunnelResult<()> {
        let connections = self.snapshot();
        if connections.is_empty() {
            return Err(TunnelError::Destroyed);
        }
        try_join_all(connections.iter().map(|c| c.ready())).await?;
        Ok(())
    }

    /// Configured pool size.
    pub fn len(&self) -> usize {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    pub fn target(&self) -> &TargetEndpoint {
        &self.target
    }

    /// Queue length of each connection, in pool order.
    pub fn queue_lengths(&self) -> Vec<usize> {
        self.snapshot().iter().map(|c| c.queue_len()).collect()
    }

    pub fn states(&self) -> Vec<ConnectionState> {
        self.snapshot().iter().map(|c| c.state()).collect()
    }

    /// Destroy every connection and release the list. Idempotent.
    pub fn destroy(&self) {
        self.release();
    }

    /// Destroy the pool and wait for every connection driver to stop.
    pub async fn shutdown(&self) {
        let connections = self.release();
        join_all(connections.iter().map(|c| c.closed())).await;
    }

    /// Take and destroy the connections. Empty after the first call.
    fn release(&self) -> Vec<Arc<TunnelConnection>> {
        if self.destroyed.swap(true, Ordering::AcqRel) {
            return Vec::new();
        }
        let connections = std::mem::take(
            &mut *self
                .connections
                .write()
                .unwrap_or_else(|poisoned| poisoned.into_inner()),
        );
        for connection in &connections {
            connection.destroy();
        }
        tracing::info!(endpoint = %self.target.authority(), size = connections.len(), "Connection pool destroyed");
        connections
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::Acquire)
    }
}
