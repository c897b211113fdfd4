//! Timeout enforcement.
//!
//! # Responsibilities
//! - Bound the CONNECT + TLS handshake
//! - Race each request's response against its own deadline
//!
//! # Design Decisions
//! - Uses Tokio's timeout facilities; the losing future is dropped, so no timer outlives the call
//! - Timeout errors are distinct from transport errors
//! - A request timeout never tears down the socket

use std::future::Future;
use std::time::Duration;

use crate::error::{ConnectError, TunnelError, TunnelResult};

/// Run a request future under its deadline.
pub async fn with_request_timeout<F, T>(limit: Duration, fut: F) -> TunnelResult<T>
where
    F: Future<Output = TunnelResult<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(TunnelError::Timeout(limit)),
    }
}

/// Run a connect future under the connect deadline.
pub async fn with_connect_timeout<F, T>(limit: Duration, fut: F) -> Result<T, ConnectError>
where
    F: Future<Output = Result<T, ConnectError>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(ConnectError::Timeout(limit)),
    }
}
