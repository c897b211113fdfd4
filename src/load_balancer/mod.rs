//! Load balancing subsystem.
//!
//! # Data Flow
//! ```text
//! Agent key resolved → ConnectionPool identified
//!     → pool.rs (fixed list of TunnelConnections)
//!     → least_conn.rs (pick connection with shortest queue)
//!     → TunnelConnection::request
//! ```
//!
//! # Design Decisions
//! - Balancer is stateless; each connection's queue tracks its own load
//! - Greedy and non-reserving: back-to-back picks may land on the same connection
//! - Pool size is fixed at construction

pub mod least_conn;
pub mod pool;

pub use least_conn::{LeastBusy, QueueDepth};
pub use pool::ConnectionPool;

/// Connection selection strategy.
pub trait LoadBalancer {
    /// Index of the member to use, `None` for an empty slice.
    fn next_index<T: QueueDepth>(&self, members: &[T]) -> Option<usize>;
}
