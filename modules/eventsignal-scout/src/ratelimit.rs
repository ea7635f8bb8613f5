use std::time::Duration;

use rand::Rng;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

/// Enforces a randomized minimum gap between successive outbound invocations.
///
/// Every call to [`wait_turn`](Self::wait_turn) picks a fresh delay in
/// `[min, max]` and sleeps until that much time has passed since the previous
/// turn. Time already spent elsewhere (a retry backoff, say) counts toward it.
pub struct RateLimiter {
    min: Duration,
    max: Duration,
    last: Mutex<Option<Instant>>,
}

impl RateLimiter {
    pub fn new(min: Duration, max: Duration) -> Self {
        let (min, max) = if min <= max { (min, max) } else { (max, min) };
        Self {
            min,
            max,
            last: Mutex::new(None),
        }
    }

    pub fn disabled() -> Self {
        Self::new(Duration::ZERO, Duration::ZERO)
    }

    fn pick_delay(&self) -> Duration {
        if self.max <= self.min {
            return self.min;
        }
        let span = (self.max - self.min).as_millis() as u64;
        self.min + Duration::from_millis(rand::rng().random_range(0..=span))
    }

    /// Wait for this caller's turn. The first turn never waits.
    pub async fn wait_turn(&self) {
        let mut last = self.last.lock().await;
        if let Some(previous) = *last {
            let due = previous + self.pick_delay();
            let now = Instant::now();
            if due > now {
                debug!(delay_ms = (due - now).as_millis() as u64, "Rate limit pause");
                tokio::time::sleep_until(due).await;
            }
        }
        *last = Some(Instant::now());
    }
}
