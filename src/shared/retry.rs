//! Retry with exponential backoff, shared by every transient network call

use rand::Rng;
use serde::Deserialize;
use std::future::Future;
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    /// Randomize each delay by up to +/-50%
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 200,
            max_delay_ms: 2_000,
            jitter: true,
        }
    }
}

impl RetryPolicy {
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Delay before attempt `attempt + 1` (attempt counts from 1)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = self
            .base_delay_ms
            .saturating_mul(1u64 << attempt.saturating_sub(1).min(16));
        let capped = exp.min(self.max_delay_ms);
        if self.jitter && capped > 0 {
            let spread = capped / 2;
            let low = capped - spread;
            let high = capped + spread;
            Duration::from_millis(rand::thread_rng().gen_range(low..=high))
        } else {
            Duration::from_millis(capped)
        }
    }

    /// Run `op` until it succeeds, fails with a non-transient error, or attempts run out
    pub async fn run<T, E, F, Fut, P>(&self, mut op: F, is_transient: P) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        P: Fn(&E) -> bool,
        E: std::fmt::Display,
    {
        let attempts = self.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if attempt < attempts && is_transient(&e) => {
                    let delay = self.delay_for(attempt);
                    debug!(attempt, ?delay, error = %e, "transient failure, retrying");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
