//! Exponential backoff with jitter.

use rand::Rng;
use std::time::Duration;

use crate::config::ReconnectConfig;

/// Calculate exponential backoff delay with jitter.
pub fn calculate_backoff(attempt: u32, base_ms: u64, max_ms: u64) -> Duration {
    if attempt == 0 {
        return Duration::from_millis(0);
    }

    let exponential_base = 2u64.saturating_pow(attempt - 1);
    let delay_ms = base_ms.saturating_mul(exponential_base);
    let capped_delay = delay_ms.min(max_ms);

    // Apply jitter (0 to 10% of the delay)
    let jitter_range = capped_delay / 10;
    let jitter = if jitter_range > 0 {
        rand::thread_rng().gen_range(0..jitter_range)
    } else {
        0
    };

    Duration::from_millis(capped_delay + jitter)
}

/// Reconnect schedule for one connection.
///
/// `attempt` counts consecutive failures since the last successful connect.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    base_ms: u64,
    max_ms: u64,
    max_attempts: Option<u32>,
    attempt: u32,
}

impl ReconnectPolicy {
    pub fn new(config: &ReconnectConfig) -> Self {
        Self {
            base_ms: config.base_delay_ms,
            max_ms: config.max_delay_ms,
            max_attempts: config.max_attempts,
            attempt: 0,
        }
    }

    /// Delay before the next connect attempt. Zero for the first one.
    pub fn next_delay(&self) -> Duration {
        calculate_backoff(self.attempt, self.base_ms, self.max_ms)
    }

    /// Record a failed attempt. Returns false once the cap is reached.
    pub fn record_failure(&mut self) -> bool {
        self.attempt = self.attempt.saturating_add(1);
        match self.max_attempts {
            Some(max) => self.attempt < max,
            None => true,
        }
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    pub fn attempts(&self) -> u32 {
        self.attempt
    }
}
