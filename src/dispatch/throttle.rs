use std::time::{Duration, Instant};

/// Drop-policy rate limiter: at most one pass per `min_interval`.
///
/// Calls inside the window are rejected outright; nothing is queued, so the
/// next sample after the window is whatever arrives then.
#[derive(Debug, Clone)]
pub struct Throttle {
    min_interval: Duration,
    last_pass: Option<Instant>,
}

impl Throttle {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_pass: None,
        }
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    pub fn set_min_interval(&mut self, min_interval: Duration) {
        self.min_interval = min_interval;
    }

    /// Returns `true` and starts a new window if `now` is outside the current one.
    pub fn try_pass(&mut self, now: Instant) -> bool {
        if let Some(last) = self.last_pass {
            if now.saturating_duration_since(last) < self.min_interval {
                return false;
            }
        }
        self.last_pass = Some(now);
        true
    }

    pub fn reset(&mut self) {
        self.last_pass = None;
    }
}
