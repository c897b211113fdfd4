//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (pool size, pipelining, timeouts, backoff)
//! - Check that both endpoint URLs parse and the target is https
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: TunnelConfig → Result<(), Vec<ValidationError>>
//! - Runs before any connection is created

use std::fmt;

use crate::config::schema::TunnelConfig;
use crate::net::endpoint::{TargetEndpoint, TunnelEndpoint};

/// A single semantic problem in a config.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Validate a configuration, collecting every error.
pub fn validate_config(config: &TunnelConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if let Err(e) = TunnelEndpoint::parse(&config.tunnel_url) {
        errors.push(ValidationError::new("tunnel_url", e.to_string()));
    }
    if let Err(e) = TargetEndpoint::parse(&config.target_url) {
        errors.push(ValidationError::new("target_url", e.to_string()));
    }

    errors.extend(validate_pool_shape(config.pool.size, config.pool.pipelining));

    if config.timeouts.request_ms == 0 {
        errors.push(ValidationError::new("timeouts.request_ms", "must be > 0"));
    }
    if config.timeouts.connect_ms == 0 {
        errors.push(ValidationError::new("timeouts.connect_ms", "must be > 0"));
    }

    let reconnect = &config.reconnect;
    if reconnect.base_delay_ms > reconnect.max_delay_ms {
        errors.push(ValidationError::new(
            "reconnect.base_delay_ms",
            format!(
                "base delay {}ms exceeds max delay {}ms",
                reconnect.base_delay_ms, reconnect.max_delay_ms
            ),
        ));
    }
    if reconnect.max_attempts == Some(0) {
        errors.push(ValidationError::new("reconnect.max_attempts", "must be >= 1 when set"));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Pool size and pipelining depth checks, shared with pool construction.
pub fn validate_pool_shape(size: usize, pipelining: usize) -> Vec<ValidationError> {
    let mut errors = Vec::new();
    if size < 1 {
        errors.push(ValidationError::new("pool.size", "pool size must be >= 1"));
    }
    if pipelining < 1 {
        errors.push(ValidationError::new("pool.pipelining", "pipelining depth must be >= 1"));
    }
    errors
}
