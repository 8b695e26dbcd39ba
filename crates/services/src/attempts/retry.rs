use std::future::Future;
use std::time::Duration;

use rand::{Rng, rng};
use tokio_util::sync::CancellationToken;

use crate::attempts::timer::Timer;
use crate::config::DEFAULT_REQUEST_TIMEOUT;
use crate::error::GatewayError;

const JITTER_RATIO: f64 = 0.2;

/// Bounded retry with exponential backoff for transient gateway failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total tries, including the first one.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Per-try deadline; hitting it counts as `GatewayError::Timeout`.
    pub attempt_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(4),
            attempt_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

impl RetryPolicy {
    #[must_use]
    pub fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = timeout;
        self
    }

    /// Same deadline, but no retries.
    #[must_use]
    pub fn single_attempt(self) -> Self {
        Self {
            max_attempts: 1,
            ..self
        }
    }

    /// Delay before retry number `retry` (0-based), without jitter.
    #[must_use]
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// Run `op` until it succeeds, fails permanently or runs out of tries.
    ///
    /// # Errors
    ///
    /// Returns the last `GatewayError`, or `GatewayError::Aborted` once `cancel` fires.
    pub async fn run<T, F, Fut>(
        &self,
        label: &'static str,
        timer: &dyn Timer,
        cancel: &CancellationToken,
        mut op: F,
    ) -> Result<T, GatewayError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, GatewayError>>,
    {
        let mut attempt = 1;
        loop {
            let outcome = tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(GatewayError::Aborted),
                () = timer.sleep(self.attempt_timeout) => Err(GatewayError::Timeout),
                result = op() => result,
            };

            let err = match outcome {
                Ok(value) => return Ok(value),
                Err(err) if err.is_transient() && attempt < self.max_attempts => err,
                Err(err) => return Err(err),
            };

            let delay = jittered(self.backoff(attempt - 1));
            tracing::warn!(op = label, attempt, error = %err, ?delay, "transient gateway failure, retrying");
            tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(GatewayError::Aborted),
                () = timer.sleep(delay) => {}
            }
            attempt += 1;
        }
    }
}

fn jittered(delay: Duration) -> Duration {
    let extra = rng().random_range(0.0..=JITTER_RATIO);
    delay.mul_f64(1.0 + extra)
}
