//! Retry logic.
//!
//! # Responsibilities
//! - Decide per failure whether to retry (caller-supplied predicate)
//! - Execute retries with exponential backoff and optional jitter
//! - Report exhaustion as `RetryExhausted` carrying the last error
//!
//! # Design Decisions
//! - Attempt 1 runs immediately; the wait after attempt `n` is `base * 2^(n-1)`
//! - `CircuitOpen` and `RateLimitExceeded` are never retried, whatever the predicate says
//! - Non-retryable errors are returned unchanged
//! - Backoff sleeps suspend the task, never a thread

use std::future::Future;
use std::time::Duration;

use crate::config::RetryConfig;
use crate::error::{ResilienceError, ResilienceResult};
use crate::observability::metrics;
use crate::resilience::backoff::calculate_backoff;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

impl RetryPolicy {
    /// `max_attempts` total tries (at least one), no jitter, delays capped at 30s.
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay: Duration::from_secs(30).max(base_delay),
            jitter: false,
        }
    }

    pub fn from_config(config: &RetryConfig) -> Self {
        // Unvalidated configs fall back to the defaults instead of panicking
        let base_delay = Duration::try_from_secs_f64(config.base_delay_secs)
            .unwrap_or(Duration::from_secs(1));
        let max_delay = Duration::try_from_secs_f64(config.max_delay_secs)
            .unwrap_or(Duration::from_secs(30))
            .max(base_delay);
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay,
            max_delay,
            jitter: config.jitter,
        }
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    /// Wait before the retry that follows failed `attempt`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        calculate_backoff(attempt, self.base_delay, self.max_delay, self.jitter)
    }

    /// Run `op` until it succeeds, fails with an error `retryable` rejects,
    /// or `max_attempts` tries have failed.
    pub async fn execute<T, F, Fut, P>(&self, mut op: F, retryable: P) -> ResilienceResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = ResilienceResult<T>>,
        P: Fn(&ResilienceError) -> bool,
    {
        let mut attempt = 1;
        loop {
            let err = match op().await {
                Ok(value) => {
                    if attempt > 1 {
                        metrics::record_retry_attempt("recovered");
                        tracing::debug!(attempt, "Operation succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(err) => err,
            };

            if !Self::may_retry(&err, &retryable) {
                metrics::record_retry_attempt("not_retryable");
                return Err(err);
            }

            if attempt >= self.max_attempts {
                metrics::record_retry_attempt("exhausted");
                tracing::warn!(
                    attempts = attempt,
                    error = %err,
                    "Retries exhausted"
                );
                return Err(ResilienceError::RetryExhausted {
                    attempts: attempt,
                    last_error: Box::new(err),
                });
            }

            let delay = self.delay_for(attempt);
            metrics::record_retry_attempt("retrying");
            tracing::debug!(
                attempt,
                max_attempts = self.max_attempts,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "Retrying after failure"
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }

    /// [`execute`](Self::execute) retrying only transient failures.
    pub async fn execute_transient<T, F, Fut>(&self, op: F) -> ResilienceResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = ResilienceResult<T>>,
    {
        self.execute(op, ResilienceError::is_transient).await
    }

    fn may_retry<P>(err: &ResilienceError, retryable: &P) -> bool
    where
        P: Fn(&ResilienceError) -> bool,
    {
        match err {
            ResilienceError::CircuitOpen { .. } | ResilienceError::RateLimitExceeded { .. } => false,
            other => retryable(other),
        }
    }
}
