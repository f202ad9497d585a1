//! Adaptive concurrency limiter
//!
//! A stage spawns `ceiling` workers up front; each must hold a permit while it
//! works on a unit. The limiter moves the number of live permits between the
//! floor and ceiling. Shrinking forgets an idle permit when one is available;
//! otherwise the next permit returned by a busy worker is retired instead.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

#[derive(Debug)]
pub struct AdaptiveLimiter {
    name: &'static str,
    semaphore: Arc<Semaphore>,
    floor: usize,
    ceiling: usize,
    target: AtomicUsize,
    pending_shrink: AtomicUsize,
}

impl AdaptiveLimiter {
    /// New limiter starting at its ceiling; floor is at least one
    pub fn new(name: &'static str, floor: usize, ceiling: usize) -> Arc<Self> {
        let floor = floor.max(1);
        let ceiling = ceiling.max(floor);
        Arc::new(Self {
            name,
            semaphore: Arc::new(Semaphore::new(ceiling)),
            floor,
            ceiling,
            target: AtomicUsize::new(ceiling),
            pending_shrink: AtomicUsize::new(0),
        })
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn floor(&self) -> usize {
        self.floor
    }

    pub fn ceiling(&self) -> usize {
        self.ceiling
    }

    /// Desired number of concurrent workers
    pub fn current(&self) -> usize {
        self.target.load(Ordering::Acquire)
    }

    /// Wait for a permit; `None` once the limiter is closed
    pub async fn acquire(self: &Arc<Self>) -> Option<LimiterPermit> {
        let permit = Arc::clone(&self.semaphore).acquire_owned().await.ok()?;
        Some(LimiterPermit {
            permit: Some(permit),
            limiter: Arc::clone(self),
        })
    }

    /// Lower the target by one, never below the floor
    pub fn shrink(&self) -> bool {
        let lowered = self
            .target
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                (current > self.floor).then(|| current - 1)
            })
            .is_ok();
        if lowered && self.semaphore.forget_permits(1) == 0 {
            self.pending_shrink.fetch_add(1, Ordering::AcqRel);
        }
        lowered
    }

    /// Raise the target by one, never above the ceiling
    pub fn grow(&self) -> bool {
        let raised = self
            .target
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                (current < self.ceiling).then(|| current + 1)
            })
            .is_ok();
        if raised && !self.take_pending_shrink() {
            self.semaphore.add_permits(1);
        }
        raised
    }

    /// Stop handing out permits; waiting workers see `None`
    pub fn close(&self) {
        self.semaphore.close();
    }

    fn take_pending_shrink(&self) -> bool {
        self.pending_shrink
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |pending| pending.checked_sub(1))
            .is_ok()
    }
}

/// Permit held by a worker while it processes one unit
#[derive(Debug)]
pub struct LimiterPermit {
    permit: Option<OwnedSemaphorePermit>,
    limiter: Arc<AdaptiveLimiter>,
}

impl Drop for LimiterPermit {
    fn drop(&mut self) {
        if let Some(permit) = self.permit.take() {
            if self.limiter.take_pending_shrink() {
                permit.forget();
            }
        }
    }
}
