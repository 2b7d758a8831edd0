//! Rate limiting module to prevent abuse

use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Interval gate limiting how often a single client may send.
///
/// `allow` accepts a call iff at least `interval` has elapsed since the
/// last accepted call. There is no burst allowance; the target is spam
/// floors, not traffic shaping.
pub struct RateLimiter {
    last_accepted: Mutex<Option<Instant>>,
    interval: Duration,
}

impl RateLimiter {
    pub fn new(interval: Duration) -> Self {
        Self {
            last_accepted: Mutex::new(None),
            interval,
        }
    }

    /// Limiter admitting `per_second` events per second
    pub fn per_second(per_second: u32) -> Self {
        let per_second = per_second.max(1);
        Self::new(Duration::from_secs(1) / per_second)
    }

    /// Returns true and records the call when the interval has elapsed
    pub fn allow(&self) -> bool {
        let mut last = self
            .last_accepted
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);

        let now = Instant::now();
        match *last {
            Some(prev) if now.duration_since(prev) < self.interval => false,
            _ => {
                *last = Some(now);
                true
            }
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }
}
