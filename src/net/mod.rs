//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! TunnelConnection::request(url, options)
//!     → queue.rs (pipelining limit, FIFO admission)
//!     → connection.rs (frame request, start deadline)
//!     → driver.rs (connection task: write frame, route parsed events)
//!         → connect.rs (TCP to proxy, CONNECT host:port, TLS via tls.rs)
//!     → response resolved back through the completion handle
//!
//! Connection States:
//!     Disconnected → Connecting → Connected → (lost) → Disconnected ...
//!     any → Destroyed
//! ```
//!
//! # Design Decisions
//! - One task owns each socket; callers only exchange messages with it
//! - Response state lives in a per-request context, never on the connection
//! - Certificate verification is on unless explicitly disabled

pub mod connect;
pub mod connection;
mod driver;
pub mod endpoint;
pub mod queue;
pub mod tls;

pub use connection::{ConnectionId, ConnectionSettings, ConnectionState, TunnelConnection};
pub use endpoint::{Credentials, TargetEndpoint, TunnelEndpoint};
pub use queue::RequestQueue;
