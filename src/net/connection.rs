//! Persistent tunneled connection handle.
//!
//! # Responsibilities
//! - Generate unique connection IDs for tracing
//! - Publish the connection state (Disconnected → Connecting → Connected, or Destroyed)
//! - Frame requests and hand them to the driver task through the admission queue
//! - Enforce each request's deadline and fail fast after `destroy()`

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot, watch};
use tokio_rustls::TlsConnector;

use crate::config::{ReconnectConfig, SocketConfig, TunnelConfig};
use crate::error::{TunnelError, TunnelResult};
use crate::http::request::encode_request;
use crate::http::{RequestOptions, Response};
use crate::lifecycle::Shutdown;
use crate::net::driver::{Command, Driver};
use crate::net::endpoint::{TargetEndpoint, TunnelEndpoint};
use crate::net::queue::RequestQueue;
use crate::net::tls::build_tls_connector;
use crate::observability::metrics;
use crate::resilience::timeouts::with_request_timeout;

/// Global atomic counter for connection IDs.
/// Using relaxed ordering is sufficient since we only need uniqueness, not synchronization.
static CONNECTION_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Generate a new unique connection ID.
    pub fn new() -> Self {
        Self(CONNECTION_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Connection state. Only the driver task writes it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No socket; either waiting to reconnect or idle after giving up.
    Disconnected,
    /// CONNECT handshake or TLS handshake in progress.
    Connecting,
    /// Tunnel established; requests are written as they arrive.
    Connected,
    /// Torn down for good.
    Destroyed,
}

/// Everything a connection needs, resolved once and shared by a pool.
#[derive(Clone)]
pub struct ConnectionSettings {
    pub tunnel: TunnelEndpoint,
    pub target: TargetEndpoint,
    pub connector: TlsConnector,
    pub socket: SocketConfig,
    pub reconnect: ReconnectConfig,
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
    pub pipelining: usize,
}

impl ConnectionSettings {
    pub fn from_config(config: &TunnelConfig) -> TunnelResult<Self> {
        Ok(Self {
            tunnel: TunnelEndpoint::parse(&config.tunnel_url)?,
            target: TargetEndpoint::parse(&config.target_url)?,
            connector: build_tls_connector(&config.tls)?,
            socket: config.socket.clone(),
            reconnect: config.reconnect.clone(),
            connect_timeout: config.timeouts.connect(),
            request_timeout: config.timeouts.request(),
            pipelining: config.pool.pipelining,
        })
    }
}

impl std::fmt::Debug for ConnectionSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionSettings")
            .field("tunnel", &self.tunnel.address())
            .field("target", &self.target.authority())
            .field("pipelining", &self.pipelining)
            .finish()
    }
}

/// One persistent TLS connection to the target, tunneled through the proxy.
///
/// Construction spawns the driver task and starts connecting right away, so
/// it must be called from within a Tokio runtime.
#[derive(Debug)]
pub struct TunnelConnection {
    id: ConnectionId,
    settings: Arc<ConnectionSettings>,
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<ConnectionState>,
    queue: RequestQueue,
    shutdown: Shutdown,
    destroyed: AtomicBool,
    next_seq: AtomicU64,
}

impl TunnelConnection {
    /// Build a single connection from a full config.
    pub fn new(config: &TunnelConfig) -> TunnelResult<Self> {
        let settings = ConnectionSettings::from_config(config)?;
        Ok(Self::with_settings(Arc::new(settings)))
    }

    pub fn with_settings(settings: Arc<ConnectionSettings>) -> Self {
        let id = ConnectionId::new();
        let (commands, rx) = mpsc::unbounded_channel();
        let (state_tx, state) = watch::channel(ConnectionState::Disconnected);
        let shutdown = Shutdown::new();

        let driver = Driver::new(id, Arc::clone(&settings), rx, state_tx, shutdown.subscribe());
        tokio::spawn(driver.run());

        tracing::debug!(
            connection_id = %id,
            proxy = %settings.tunnel.address(),
            endpoint = %settings.target.authority(),
            pipelining = settings.pipelining,
            "Connection created"
        );

        Self {
            id,
            queue: RequestQueue::new(settings.pipelining),
            settings,
            commands,
            state,
            shutdown,
            destroyed: AtomicBool::new(false),
            next_seq: AtomicU64::new(1),
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Queued + in-flight requests on this connection.
    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    pub fn target(&self) -> &TargetEndpoint {
        &self.settings.target
    }

    /// Wait until the tunnel is up. Every caller observes the same attempt.
    pub async fn ready(&self) -> TunnelResult<()> {
        let mut state = self.state.clone();
        let reached = state
            .wait_for(|s| matches!(s, ConnectionState::Connected | ConnectionState::Destroyed))
            .await
            .map(|s| *s);
        match reached {
            Ok(ConnectionState::Connected) => Ok(()),
            _ => Err(TunnelError::Destroyed),
        }
    }

    /// Send one request and wait for its response.
    ///
    /// `url` may be a path (`/get?x=1`) or an absolute URL on the target.
    /// Non-2xx statuses are returned as normal responses.
    pub async fn request(&self, url: &str, options: RequestOptions) -> TunnelResult<Response> {
        if self.is_destroyed() {
            return Err(TunnelError::Destroyed);
        }

        let url = self.settings.target.resolve(url)?;
        if url.origin().ascii_serialization() != self.settings.target.origin() {
            return Err(TunnelError::InvalidUrl(format!(
                "{} is not on target {}",
                url,
                self.settings.target.origin()
            )));
        }

        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        let limit = options.timeout.unwrap_or(self.settings.request_timeout);
        let frame = encode_request(&self.settings.target, &url, &options);
        let started = Instant::now();

        let result = async {
            let _permit = self.queue.admit().await?;
            let (completion, response) = oneshot::channel();
            self.commands
                .send(Command {
                    seq,
                    frame,
                    bodyless: options.method == "HEAD",
                    parse_json: options.parse_json,
                    evaluate_headers: options.evaluate_headers,
                    completion,
                })
                .map_err(|_| TunnelError::Destroyed)?;

            with_request_timeout(limit, async {
                match response.await {
                    Ok(result) => result,
                    Err(_) => Err(TunnelError::Destroyed),
                }
            })
            .await
        }
        .await;

        let elapsed = started.elapsed();
        metrics::record_request(result.as_ref().map(|r| r.status), elapsed);
        match &result {
            Ok(response) => tracing::debug!(
                connection_id = %self.id,
                seq,
                status = response.status,
                elapsed_ms = elapsed.as_millis() as u64,
                "Request completed"
            ),
            Err(err) => tracing::debug!(
                connection_id = %self.id,
                seq,
                error = %err,
                "Request failed"
            ),
        }
        result
    }

    /// Tear the connection down. Later requests fail fast; repeated calls are no-ops.
    pub fn destroy(&self) {
        if self.destroyed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.queue.clear_with(TunnelError::Destroyed);
        self.queue.stop();
        self.shutdown.trigger();
        tracing::info!(connection_id = %self.id, "Connection destroyed");
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::Acquire)
    }

    /// Resolve once the driver has stopped. Only meaningful after `destroy()`.
    pub async fn closed(&self) {
        let mut state = self.state.clone();
        // The sender drops with the driver, which also means it has stopped.
        let _ = state.wait_for(|s| *s == ConnectionState::Destroyed).await;
    }
}

impl Drop for TunnelConnection {
    fn drop(&mut self) {
        self.shutdown.trigger();
    }
}
