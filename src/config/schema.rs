//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the client.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Root configuration for a tunneled client.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct TunnelConfig {
    /// Proxy URL, optionally with `user:pass@`.
    pub tunnel_url: String,

    /// HTTPS target URL.
    pub target_url: String,

    /// Pool shape.
    pub pool: PoolConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Reconnect backoff policy.
    pub reconnect: ReconnectConfig,

    /// TLS settings for the tunneled connection.
    pub tls: TlsConfig,

    /// Socket options on the proxy TCP connection.
    pub socket: SocketConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

impl TunnelConfig {
    /// Config for a tunnel/target pair with every other section defaulted.
    pub fn new(tunnel_url: impl Into<String>, target_url: impl Into<String>) -> Self {
        Self {
            tunnel_url: tunnel_url.into(),
            target_url: target_url.into(),
            ..Self::default()
        }
    }
}

/// Connection pool configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Number of persistent connections.
    pub size: usize,

    /// Requests admitted concurrently per connection.
    pub pipelining: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            size: 10,
            pipelining: 1,
        }
    }
}

/// Timeout configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Default per-request timeout in milliseconds.
    pub request_ms: u64,

    /// CONNECT + TLS handshake timeout in milliseconds.
    pub connect_ms: u64,
}

impl TimeoutConfig {
    pub fn request(&self) -> Duration {
        Duration::from_millis(self.request_ms)
    }

    pub fn connect(&self) -> Duration {
        Duration::from_millis(self.connect_ms)
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            request_ms: 30_000,
            connect_ms: 10_000,
        }
    }
}

/// Reconnect configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ReconnectConfig {
    /// Base delay for exponential backoff in milliseconds.
    pub base_delay_ms: u64,

    /// Maximum delay for exponential backoff in milliseconds.
    pub max_delay_ms: u64,

    /// Consecutive failed attempts before queued requests are rejected.
    /// `None` retries forever.
    pub max_attempts: Option<u32>,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: 100,
            max_delay_ms: 5_000,
            max_attempts: Some(10),
        }
    }
}

/// TLS configuration for the tunneled connection.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct TlsConfig {
    /// Accept any server certificate. Only for proxies that terminate
    /// or re-sign TLS and are trusted out of band.
    pub insecure_skip_verify: bool,

    /// Extra PEM CA bundle added to the webpki roots.
    pub ca_file: Option<String>,
}

/// Socket options.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SocketConfig {
    pub nodelay: bool,
    pub keepalive: bool,
}

impl Default for SocketConfig {
    fn default() -> Self {
        Self {
            nodelay: true,
            keepalive: true,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}
