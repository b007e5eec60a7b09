//! Outbound concurrency limiting
//!
//! A single counting semaphore bounds the number of requests that are inside
//! the attempt loop at once. Callers over the ceiling wait; they are never
//! rejected.

use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::debug;

use crate::error::{GatewayError, Result};

/// Shared bound on concurrent outbound requests
#[derive(Debug, Clone)]
pub struct ConcurrencyLimiter {
    semaphore: Arc<Semaphore>,
    capacity: usize,
}

impl ConcurrencyLimiter {
    /// Create a limiter with `capacity` slots (at least one)
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Slots currently free
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Slots currently held
    pub fn in_flight(&self) -> usize {
        self.capacity - self.available()
    }

    /// Wait for a slot
    ///
    /// The slot is released when the returned permit is dropped, whichever
    /// way the holder exits.
    pub async fn acquire(&self) -> Result<OwnedSemaphorePermit> {
        if self.available() == 0 {
            debug!(capacity = self.capacity, "Concurrency ceiling reached, waiting");
        }

        Arc::clone(&self.semaphore)
            .acquire_owned()
            .await
            .map_err(|_| GatewayError::Internal("concurrency limiter closed".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_pending, assert_ready_ok, task};

    #[test]
    fn test_zero_capacity_is_raised_to_one() {
        let limiter = ConcurrencyLimiter::new(0);
        assert_eq!(limiter.capacity(), 1);
        assert_eq!(limiter.available(), 1);
    }

    #[test]
    fn test_acquire_suspends_at_capacity_until_release() {
        let limiter = ConcurrencyLimiter::new(1);

        let mut first = task::spawn(limiter.acquire());
        let permit = assert_ready_ok!(first.poll());
        assert_eq!(limiter.in_flight(), 1);

        let mut second = task::spawn(limiter.acquire());
        assert_pending!(second.poll());
        assert_pending!(second.poll());

        drop(permit);
        assert!(second.is_woken());
        let _permit = assert_ready_ok!(second.poll());
        assert_eq!(limiter.in_flight(), 1);
    }

    #[test]
    fn test_clones_share_slots() {
        let limiter = ConcurrencyLimiter::new(2);
        let other = limiter.clone();

        let mut a = task::spawn(limiter.acquire());
        let _a = assert_ready_ok!(a.poll());
        let mut b = task::spawn(other.acquire());
        let _b = assert_ready_ok!(b.poll());

        assert_eq!(limiter.available(), 0);
        let mut c = task::spawn(limiter.acquire());
        assert_pending!(c.poll());
    }

    #[tokio::test]
    async fn test_permit_released_on_error_path() {
        let limiter = ConcurrencyLimiter::new(1);

        async fn failing_attempt(limiter: &ConcurrencyLimiter) -> Result<()> {
            let _permit = limiter.acquire().await?;
            Err(GatewayError::ProxyTimeout)
        }

        assert!(failing_attempt(&limiter).await.is_err());
        assert_eq!(limiter.available(), 1);
    }
}
