//! Error definitions shared by every layer of the client.

use std::time::Duration;
use thiserror::Error;

/// Failures while establishing or holding the tunneled socket.
///
/// One transport failure can reject several in-flight requests at once,
/// so this type is cheap to clone and only carries rendered messages.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConnectError {
    /// TCP connection to the proxy failed.
    #[error("proxy connection failed: {0}")]
    Proxy(String),

    /// The proxy answered the CONNECT request with a non-2xx status.
    #[error("proxy rejected CONNECT with status {status}")]
    Rejected { status: u16 },

    /// TLS handshake with the target failed.
    #[error("TLS handshake failed: {0}")]
    Tls(String),

    /// Read or write on the established socket failed.
    #[error("socket error: {0}")]
    Socket(String),

    /// The remote end closed the stream.
    #[error("connection closed by remote")]
    Closed,

    /// The server sent bytes that are not a valid HTTP/1.1 response.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// CONNECT + TLS handshake did not finish in time.
    #[error("connect timed out after {0:?}")]
    Timeout(Duration),

    /// Reconnect attempts exceeded the configured cap.
    #[error("gave up after {attempts} connect attempts: {last}")]
    Exhausted { attempts: u32, last: Box<ConnectError> },
}

/// Errors surfaced to callers of `request`.
#[derive(Debug, Clone, Error)]
pub enum TunnelError {
    /// Invalid construction parameters (pool size, URLs, TLS material).
    #[error("configuration error: {0}")]
    Config(String),

    /// Transport failure; the connection reconnects on its own.
    #[error(transparent)]
    Connect(#[from] ConnectError),

    /// The request's own deadline elapsed before the response completed.
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// Body could not be decompressed or parsed as JSON.
    #[error("failed to decode response body: {0}")]
    Decode(String),

    /// The connection, pool or agent was destroyed.
    #[error("connection destroyed")]
    Destroyed,

    /// The request was dropped from the queue before it was dispatched.
    #[error("request cancelled before dispatch")]
    Cancelled,

    #[error("invalid url: {0}")]
    InvalidUrl(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl From<url::ParseError> for TunnelError {
    fn from(err: url::ParseError) -> Self {
        TunnelError::InvalidUrl(err.to_string())
    }
}

impl From<serde_json::Error> for TunnelError {
    fn from(err: serde_json::Error) -> Self {
        TunnelError::Decode(err.to_string())
    }
}

impl TunnelError {
    /// Short label used for metrics and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            TunnelError::Config(_) => "config",
            TunnelError::Connect(_) => "connect",
            TunnelError::Timeout(_) => "timeout",
            TunnelError::Decode(_) => "decode",
            TunnelError::Destroyed => "destroyed",
            TunnelError::Cancelled => "cancelled",
            TunnelError::InvalidUrl(_) => "invalid_url",
            TunnelError::InvalidRequest(_) => "invalid_request",
        }
    }
}

/// Result type for tunnel operations.
pub type TunnelResult<T> = Result<T, TunnelError>;
