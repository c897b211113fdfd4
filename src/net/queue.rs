//! Per-connection admission queue with a pipelining limit.
//!
//! # Responsibilities
//! - Admit at most `concurrency` requests at once (FIFO among waiters)
//! - Report queued + in-flight count for load-based routing
//! - Cancel waiting requests (`clear`) and close admission (`stop`)
//!
//! # Design Decisions
//! - Backed by a fair `tokio::sync::Semaphore`; a held permit is the slot
//! - The count is kept by an RAII guard so a dropped caller future frees it

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{watch, OwnedSemaphorePermit, Semaphore};

use crate::error::{TunnelError, TunnelResult};

/// Bounded admission for one connection.
#[derive(Debug)]
pub struct RequestQueue {
    slots: Arc<Semaphore>,
    pending: Arc<AtomicUsize>,
    /// Written by `clear()`; waiters that observe a change fail with the new value.
    cleared: watch::Sender<TunnelError>,
    concurrency: usize,
}

impl RequestQueue {
    pub fn new(concurrency: usize) -> Self {
        let (cleared, _) = watch::channel(TunnelError::Cancelled);
        Self {
            slots: Arc::new(Semaphore::new(concurrency.max(1))),
            pending: Arc::new(AtomicUsize::new(0)),
            cleared,
            concurrency: concurrency.max(1),
        }
    }

    /// Wait for a free slot. The slot is held until the permit is dropped.
    pub async fn admit(&self) -> TunnelResult<QueuePermit> {
        if self.slots.is_closed() {
            return Err(TunnelError::Destroyed);
        }

        let guard = PendingGuard::new(Arc::clone(&self.pending));
        let mut cleared = self.cleared.subscribe();
        cleared.borrow_and_update();

        let outcome = tokio::select! {
            biased;
            permit = Arc::clone(&self.slots).acquire_owned() => match permit {
                Ok(permit) => Ok(QueuePermit { _slot: permit, _pending: guard }),
                Err(_) => Err(TunnelError::Destroyed),
            },
            _ = cleared.changed() => {
                let reason = cleared.borrow().clone();
                Err(reason)
            }
        };
        outcome
    }

    /// Run `task` once a slot is free.
    pub async fn add<F, T>(&self, task: F) -> TunnelResult<T>
    where
        F: Future<Output = TunnelResult<T>>,
    {
        let _permit = self.admit().await?;
        task.await
    }

    /// Queued + in-flight requests.
    pub fn len(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Drop every request still waiting for a slot. Admitted requests keep running.
    pub fn clear(&self) {
        self.clear_with(TunnelError::Cancelled);
    }

    /// Like `clear`, failing the waiters with `reason`.
    pub fn clear_with(&self, reason: TunnelError) {
        self.cleared.send_replace(reason);
    }

    /// Refuse all future admissions and wake current waiters with `Destroyed`.
    pub fn stop(&self) {
        self.slots.close();
    }

    pub fn is_stopped(&self) -> bool {
        self.slots.is_closed()
    }
}

/// A held admission slot.
#[derive(Debug)]
pub struct QueuePermit {
    _slot: OwnedSemaphorePermit,
    _pending: PendingGuard,
}

#[derive(Debug)]
struct PendingGuard(Arc<AtomicUsize>);

impl PendingGuard {
    fn new(counter: Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::AcqRel);
        Self(counter)
    }
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}
