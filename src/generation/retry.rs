//! Exponential backoff with jitter for transient provider errors

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::{error, warn};

use crate::generation::GenerationError;
use crate::providers::ProviderError;

pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;
pub const DEFAULT_BASE_DELAY_MS: u64 = 2000;
pub const DEFAULT_MAX_JITTER_MS: u64 = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: Duration::from_millis(DEFAULT_BASE_DELAY_MS),
            max_jitter: Duration::from_millis(DEFAULT_MAX_JITTER_MS),
        }
    }
}

impl RetryPolicy {
    /// A policy that retries immediately, for tests
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            base_delay: Duration::ZERO,
            max_jitter: Duration::ZERO,
        }
    }

    /// Delay before the retry that follows zero-based `attempt`, without jitter
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.base_delay
            .saturating_mul(2u32.saturating_pow(attempt.min(16)))
    }

    fn jitter(&self) -> Duration {
        let max = self.max_jitter.as_millis() as u64;
        if max == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::rng().random_range(0..=max))
    }

    /// Delay before retrying after `err` at zero-based `attempt`
    fn delay_for(&self, attempt: u32, err: &ProviderError) -> Duration {
        let delay = self.backoff(attempt).saturating_add(self.jitter());
        match err.retry_after() {
            Some(secs) => delay.max(Duration::from_secs(secs)),
            None => delay,
        }
    }

    /// Runs `op` until it succeeds, fails permanently, or attempts run out.
    ///
    /// Only retryable provider errors are retried. Exhaustion on rate limiting
    /// or overload is reported as `GenerationError::Overloaded`; exhaustion on
    /// network errors or timeouts is a plain failure.
    pub async fn run<T, F, Fut>(&self, operation: &str, mut op: F) -> Result<T, GenerationError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        let attempts = self.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            let e = match op().await {
                Ok(value) => return Ok(value),
                Err(e) => e,
            };
            if !e.is_retryable() {
                error!(operation, error = %e, "Non-retryable provider error");
                return Err(e.into());
            }

            attempt += 1;
            if attempt == attempts {
                error!(operation, attempts, error = %e, "Provider retries exhausted");
                return Err(if e.is_transient() {
                    GenerationError::Overloaded { attempts }
                } else {
                    e.into()
                });
            }

            let delay = self.delay_for(attempt - 1, &e);
            warn!(
                operation,
                attempt,
                max_attempts = attempts,
                delay_ms = delay.as_millis() as u64,
                error = %e,
                "Transient provider error, retrying with backoff"
            );
            tokio::time::sleep(delay).await;
        }
    }
}
