//! Error taxonomy shared by every primitive.
//!
//! A cache miss is not an error (it is `None`), and a failing health probe is
//! reported as data. Everything else that can cross a primitive boundary is a
//! [`ResilienceError`].

use std::time::Duration;
use thiserror::Error;

/// Errors surfaced by the cache, limiter, breaker, retry and recovery layers.
///
/// The type is `Clone` so a single producer outcome can be handed to every
/// caller waiting on the same cache key.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ResilienceError {
    /// The caller exceeded its request quota for the current window.
    #[error("rate limit exceeded for '{key}' ({limit} requests), resets at {reset_at}")]
    RateLimitExceeded {
        key: String,
        limit: u64,
        /// Unix timestamp (seconds) at which the window rolls over.
        reset_at: u64,
    },

    /// The named resource is failing fast.
    #[error("circuit open for '{resource}', retry after {retry_after:?}")]
    CircuitOpen {
        resource: String,
        retry_after: Duration,
    },

    /// Every attempt failed with a retryable error.
    #[error("retry exhausted after {attempts} attempts: {last_error}")]
    RetryExhausted {
        attempts: u32,
        last_error: Box<ResilienceError>,
    },

    /// A failure that may succeed if tried again (network, 5xx, lock contention).
    #[error("transient failure: {0}")]
    Transient(String),

    /// A failure that will not go away by retrying (validation, auth, not found).
    #[error("permanent failure: {0}")]
    Permanent(String),

    /// The operation did not complete within its deadline.
    #[error("operation timed out after {0:?}")]
    Timeout(Duration),

    /// A value could not be encoded for, or decoded from, the cache.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// The shared cache backend failed. Never escapes `CacheStore`.
    #[error("cache backend error: {0}")]
    Backend(String),

    /// A shared computation ended without producing a result.
    #[error("producer aborted: {0}")]
    ProducerAborted(String),
}

/// Result type for resilience operations.
pub type ResilienceResult<T> = Result<T, ResilienceError>;

impl ResilienceError {
    /// Wrap an upstream error as a transient failure.
    pub fn transient(err: impl std::fmt::Display) -> Self {
        Self::Transient(err.to_string())
    }

    /// Wrap an upstream error as a permanent failure.
    pub fn permanent(err: impl std::fmt::Display) -> Self {
        Self::Permanent(err.to_string())
    }

    /// Default retry predicate.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_) | Self::Timeout(_))
    }

    /// Whether this outcome counts as a failure of the protected resource.
    ///
    /// Permanent errors mean the resource answered, so they do not trip a breaker.
    pub fn trips_breaker(&self) -> bool {
        matches!(
            self,
            Self::Transient(_) | Self::Timeout(_) | Self::RetryExhausted { .. } | Self::ProducerAborted(_)
        )
    }

    /// Errors that signal an unavailable dependency. Recovery strategies
    /// recognize these by default and rethrow anything else.
    pub fn is_dependency_failure(&self) -> bool {
        matches!(
            self,
            Self::CircuitOpen { .. }
                | Self::RetryExhausted { .. }
                | Self::Transient(_)
                | Self::Timeout(_)
                | Self::ProducerAborted(_)
        )
    }

    /// Short label used for metrics and log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::RateLimitExceeded { .. } => "rate_limited",
            Self::CircuitOpen { .. } => "circuit_open",
            Self::RetryExhausted { .. } => "retry_exhausted",
            Self::Transient(_) => "transient",
            Self::Permanent(_) => "permanent",
            Self::Timeout(_) => "timeout",
            Self::Serialization(_) => "serialization",
            Self::Backend(_) => "backend",
            Self::ProducerAborted(_) => "producer_aborted",
        }
    }
}

impl From<serde_json::Error> for ResilienceError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
