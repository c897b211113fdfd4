//! HTTP/1.1 client over persistent CONNECT-tunneled TLS connections.
//!
//! ```text
//!   Agent ──▶ ConnectionPool ──▶ RequestQueue ──▶ TunnelConnection ──▶ proxy ──▶ target
//!  (registry)  (least busy)      (pipelining)     (driver task)       CONNECT    HTTPS
//! ```

pub mod agent;
pub mod config;
pub mod error;
pub mod http;
pub mod lifecycle;
pub mod load_balancer;
pub mod net;
pub mod observability;
pub mod resilience;

pub use agent::Agent;
pub use config::TunnelConfig;
pub use error::{ConnectError, TunnelError, TunnelResult};
pub use http::{Body, HeaderValue, RequestOptions, Response};
pub use load_balancer::ConnectionPool;
pub use net::{ConnectionState, TunnelConnection};
