//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Connect attempt:
//!     → timeouts.rs (bound CONNECT + TLS handshake)
//!     → On failure: backoff.rs (exponential delay, attempt cap)
//!     → Cap exceeded: queued requests rejected, connection idles
//!
//! Request:
//!     → timeouts.rs (race response against the request deadline)
//! ```
//!
//! # Design Decisions
//! - Timeouts are non-negotiable; every request has a deadline
//! - Failed requests are surfaced, never retried here
//! - Only the connection itself is retried, with backoff

pub mod backoff;
pub mod timeouts;

pub use backoff::{calculate_backoff, ReconnectPolicy};
