use std::sync::Mutex;
use std::time::Duration;

use tokio::time::Instant;

/// Documented server ceiling is 3 requests per second; we stay at 1 to be safe.
pub const REQUEST_INTERVAL: Duration = Duration::from_secs(1);

/// Spaces outbound requests so no more than one is dispatched per interval,
/// shared across every product processed in a run. First-come-first-served by
/// call order; the only effect is delaying the caller.
pub struct RateLimiter {
    interval: Duration,
    next_slot: Mutex<Option<Instant>>,
}

impl RateLimiter {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            next_slot: Mutex::new(None),
        }
    }

    /// Suspend until the next dispatch slot is available.
    pub async fn acquire(&self) {
        let slot = {
            // The lock is released before awaiting.
            let mut next = self.next_slot.lock().unwrap();
            let now = Instant::now();
            let slot = next.map_or(now, |at| at.max(now));
            *next = Some(slot + self.interval);
            slot
        };
        tokio::time::sleep_until(slot).await;
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(REQUEST_INTERVAL)
    }
}
