//! Metrics collection.
//!
//! # Metrics
//! - `tunnel_requests_total` (counter): finished requests by outcome
//! - `tunnel_request_duration_seconds` (histogram): admission-to-completion latency
//! - `tunnel_reconnects_total` (counter): connect cycles started after a failure
//! - `tunnel_connect_failures_total` (counter): failed connect attempts by kind
//! - `tunnel_connections_active` (gauge): connections currently in `Connected`
//!
//! # Design Decisions
//! - Recorded through the `metrics` facade; the embedding application installs
//!   the exporter
//! - Without a recorder every call is a no-op

use std::time::Duration;

use crate::error::{ConnectError, TunnelError};

pub fn record_request(result: Result<u16, &TunnelError>, elapsed: Duration) {
    let outcome = match result {
        Ok(_) => "ok",
        Err(err) => err.kind(),
    };
    metrics::counter!("tunnel_requests_total", "outcome" => outcome).increment(1);
    metrics::histogram!("tunnel_request_duration_seconds").record(elapsed.as_secs_f64());
}

pub fn record_reconnect() {
    metrics::counter!("tunnel_reconnects_total").increment(1);
}

pub fn record_connect_failure(err: &ConnectError) {
    let kind = match err {
        ConnectError::Proxy(_) => "proxy",
        ConnectError::Rejected { .. } => "rejected",
        ConnectError::Tls(_) => "tls",
        ConnectError::Socket(_) => "socket",
        ConnectError::Closed => "closed",
        ConnectError::Protocol(_) => "protocol",
        ConnectError::Timeout(_) => "timeout",
        ConnectError::Exhausted { .. } => "exhausted",
    };
    metrics::counter!("tunnel_connect_failures_total", "kind" => kind).increment(1);
}

pub fn record_connection_up() {
    metrics::gauge!("tunnel_connections_active").increment(1.0);
}

pub fn record_connection_down() {
    metrics::gauge!("tunnel_connections_active").decrement(1.0);
}
