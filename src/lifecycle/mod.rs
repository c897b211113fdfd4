//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Shutdown (shutdown.rs):
//!     destroy() → trigger → driver task observes signal
//!         → rejects in-flight requests → closes socket → exits
//! ```
//!
//! # Design Decisions
//! - One coordinator per connection; pools and agents fan out to them
//! - Triggering is idempotent, so repeated destroy() calls are harmless
//! - A destroyed connection never comes back; the agent builds new pools instead

pub mod shutdown;

pub use shutdown::{Shutdown, ShutdownSignal};
