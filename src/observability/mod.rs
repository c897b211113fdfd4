//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Connection driver, pool, agent produce:
//!     → logging.rs (structured log events with connection_id / seq fields)
//!     → metrics.rs (counters, gauges, histograms)
//!
//! Consumers:
//!     → Log aggregation (stdout via tracing-subscriber)
//!     → Whatever metrics recorder the host application installs
//! ```
//!
//! # Design Decisions
//! - Every log line about a request carries its connection and sequence number
//! - Metrics are cheap (facade calls are no-ops without a recorder)

pub mod logging;
pub mod metrics;
