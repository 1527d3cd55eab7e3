use std::{sync::Arc, time::Duration};

use tokio::{
    sync::{Mutex, OwnedSemaphorePermit, Semaphore},
    time::{sleep_until, Instant},
};

/// Gate combining a concurrency cap with paced request start times.
///
/// `acquire` suspends until a concurrency slot is free AND the next paced
/// start slot has arrived; both gates are independent, so a free slot
/// never lets a caller jump the rate floor. Waiters are served in FIFO
/// order (tokio's semaphore and mutex are both fair). This is a pure
/// scheduling primitive: it can delay, never fail.
pub struct RateLimiter {
    semaphore: Arc<Semaphore>,
    interval: Duration,
    next_slot: Mutex<Instant>,
}

/// Concurrency slot held while a request is in flight; dropping it
/// releases the slot and wakes the next waiter.
pub struct RatePermit {
    _permit: OwnedSemaphorePermit,
}

impl RateLimiter {
    pub fn new(requests_per_second: f64, max_concurrent: usize) -> Self {
        let interval = if requests_per_second > 0.0 {
            Duration::from_secs_f64(1.0 / requests_per_second)
        } else {
            Duration::ZERO
        };
        RateLimiter {
            semaphore: Arc::new(Semaphore::new(max_concurrent.max(1))),
            interval,
            next_slot: Mutex::new(Instant::now()),
        }
    }

    pub async fn acquire(&self) -> RatePermit {
        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .expect("rate limiter semaphore closed");

        // claim the next pacing slot, then sleep until it arrives
        let wake_at = {
            let mut next = self.next_slot.lock().await;
            let now = Instant::now();
            let at = if *next > now { *next } else { now };
            *next = at + self.interval;
            at
        };
        sleep_until(wake_at).await;

        RatePermit { _permit: permit }
    }
}
