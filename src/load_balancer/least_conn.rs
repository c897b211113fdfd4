//! Least-busy load balancing strategy.

use std::sync::Arc;

use crate::load_balancer::LoadBalancer;
use crate::net::TunnelConnection;

/// Anything that can report how many requests it is holding.
pub trait QueueDepth {
    /// Queued + in-flight requests.
    fn queue_depth(&self) -> usize;
}

impl QueueDepth for TunnelConnection {
    fn queue_depth(&self) -> usize {
        self.queue_len()
    }
}

impl<T: QueueDepth + ?Sized> QueueDepth for Arc<T> {
    fn queue_depth(&self) -> usize {
        (**self).queue_depth()
    }
}

/// Least-busy selector.
/// Selects the member with the shortest queue.
#[derive(Debug, Default)]
pub struct LeastBusy;

impl LeastBusy {
    pub fn new() -> Self {
        Self
    }
}

impl LoadBalancer for LeastBusy {
    fn next_index<T: QueueDepth>(&self, members: &[T]) -> Option<usize> {
        match members.len() {
            0 => None,
            1 => Some(0),
            // In case of tie, the first one is selected (stability)
            _ => members
                .iter()
                .enumerate()
                .min_by_key(|(_, m)| m.queue_depth())
                .map(|(i, _)| i),
        }
    }
}
