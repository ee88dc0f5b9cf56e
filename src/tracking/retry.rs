use std::future::Future;
use std::time::Duration;

use log::warn;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::TrackingResult;

/// Attempts and delays used when a session has to be restarted without the
/// user asking for it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    /// Delay before the 2nd, 3rd, ... attempt. The last entry repeats.
    pub backoff_ms: Vec<u64>,
    /// Upper bound of the random delay added to each backoff.
    pub jitter_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_ms: vec![1_000, 3_000, 5_000],
            jitter_ms: 250,
        }
    }
}

impl RetryPolicy {
    /// Base delay before `attempt` (1-based), without jitter.
    pub fn base_delay(&self, attempt: u32) -> Duration {
        if attempt <= 1 || self.backoff_ms.is_empty() {
            return Duration::ZERO;
        }
        let index = ((attempt - 2) as usize).min(self.backoff_ms.len() - 1);
        Duration::from_millis(self.backoff_ms[index])
    }

    pub fn delay(&self, attempt: u32) -> Duration {
        let base = self.base_delay(attempt);
        if base.is_zero() || self.jitter_ms == 0 {
            return base;
        }
        base + Duration::from_millis(rand::thread_rng().gen_range(0..=self.jitter_ms))
    }

    /// Runs `op` until it succeeds, returns an error only the user can fix,
    /// or `max_attempts` is used up. The last error is returned.
    pub async fn run<T, F, Fut>(&self, label: &str, mut op: F) -> TrackingResult<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = TrackingResult<T>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            let delay = self.delay(attempt);
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }

            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(err) if err.needs_user_action() || attempt >= max_attempts => {
                    warn!("{label} failed after {attempt} attempt(s): {err}");
                    return Err(err);
                }
                Err(err) => {
                    warn!("{label} attempt {attempt}/{max_attempts} failed: {err}");
                    attempt += 1;
                }
            }
        }
    }
}
