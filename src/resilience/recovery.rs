//! Recovery strategies.
//!
//! A strategy turns a recognized failure into a substitute value, or hands
//! the error back unchanged. Substitute values carry their [`Source`] so
//! callers can tell them apart from a fresh result.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use crate::cache::{cache_key, CacheStore};
use crate::error::{ResilienceError, ResilienceResult};
use crate::observability::metrics;

/// Where a value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Source {
    /// The operation itself, or a cache fill it produced.
    Primary,
    /// A configured default.
    Fallback,
    /// A previously cached value, possibly expired.
    Stale,
}

/// A value tagged with where it came from.
///
/// Not serializable, so it cannot be stored by
/// [`compose::cached`](crate::resilience::compose::cached); use
/// [`compose::cached_recovered`](crate::resilience::compose::cached_recovered)
/// to cache only the primary values.
#[derive(Debug, Clone, PartialEq)]
pub struct Recovered<T> {
    pub value: T,
    pub source: Source,
}

impl<T> Recovered<T> {
    pub fn primary(value: T) -> Self {
        Self {
            value,
            source: Source::Primary,
        }
    }

    pub fn is_primary(&self) -> bool {
        self.source == Source::Primary
    }
}

/// Which errors a strategy handles.
pub type ErrorPredicate = Arc<dyn Fn(&ResilienceError) -> bool + Send + Sync>;

#[async_trait]
pub trait RecoveryStrategy<A, T>: Send + Sync {
    /// Label used in logs and metrics.
    fn name(&self) -> &'static str;

    /// Produce a substitute for the failed call with `args`, or return `error`.
    async fn recover(&self, args: &A, error: ResilienceError) -> ResilienceResult<Recovered<T>>;
}

/// Returns a fixed default value.
pub struct FallbackRecovery<T> {
    value: T,
    handles: ErrorPredicate,
}

impl<T> FallbackRecovery<T> {
    /// Recover dependency failures (open circuit, exhausted retries,
    /// timeouts, transient errors) with `value`.
    pub fn new(value: T) -> Self {
        Self {
            value,
            handles: Arc::new(ResilienceError::is_dependency_failure),
        }
    }

    /// Restrict or widen the errors this fallback handles.
    pub fn when<P>(mut self, predicate: P) -> Self
    where
        P: Fn(&ResilienceError) -> bool + Send + Sync + 'static,
    {
        self.handles = Arc::new(predicate);
        self
    }
}

impl<T: fmt::Debug> fmt::Debug for FallbackRecovery<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FallbackRecovery")
            .field("value", &self.value)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl<A, T> RecoveryStrategy<A, T> for FallbackRecovery<T>
where
    A: Send + Sync,
    T: Clone + Send + Sync,
{
    fn name(&self) -> &'static str {
        "fallback"
    }

    async fn recover(&self, _args: &A, error: ResilienceError) -> ResilienceResult<Recovered<T>> {
        if !(self.handles)(&error) {
            return Err(error);
        }
        metrics::record_recovery("fallback");
        tracing::warn!(error = %error, "Serving fallback value");
        Ok(Recovered {
            value: self.value.clone(),
            source: Source::Fallback,
        })
    }
}

/// Returns the last cached value for the call's arguments, even if expired.
///
/// The key is derived exactly as [`compose::cached`](crate::resilience::compose::cached)
/// derives it, so both must use the same prefix.
#[derive(Clone)]
pub struct StaleCacheRecovery {
    cache: CacheStore,
    key_prefix: String,
    handles: ErrorPredicate,
}

impl StaleCacheRecovery {
    pub fn new(cache: CacheStore, key_prefix: impl Into<String>) -> Self {
        Self {
            cache,
            key_prefix: key_prefix.into(),
            handles: Arc::new(ResilienceError::is_dependency_failure),
        }
    }

    pub fn when<P>(mut self, predicate: P) -> Self
    where
        P: Fn(&ResilienceError) -> bool + Send + Sync + 'static,
    {
        self.handles = Arc::new(predicate);
        self
    }

    pub fn key_prefix(&self) -> &str {
        &self.key_prefix
    }
}

impl fmt::Debug for StaleCacheRecovery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StaleCacheRecovery")
            .field("key_prefix", &self.key_prefix)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl<A, T> RecoveryStrategy<A, T> for StaleCacheRecovery
where
    A: Serialize + Send + Sync,
    T: DeserializeOwned + Send,
{
    fn name(&self) -> &'static str {
        "stale_cache"
    }

    async fn recover(&self, args: &A, error: ResilienceError) -> ResilienceResult<Recovered<T>> {
        if !(self.handles)(&error) {
            return Err(error);
        }

        let Ok(key) = cache_key(&self.key_prefix, args) else {
            return Err(error);
        };

        let Some(value) = self.cache.get_stale(&key) else {
            tracing::debug!(key = %key, error = %error, "No stale value to recover with");
            return Err(error);
        };

        match serde_json::from_value(value) {
            Ok(value) => {
                metrics::record_recovery("stale_cache");
                tracing::warn!(key = %key, error = %error, "Serving stale cached value");
                Ok(Recovered {
                    value,
                    source: Source::Stale,
                })
            }
            Err(decode) => {
                tracing::warn!(key = %key, error = %decode, "Stale value has unexpected shape");
                Err(error)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CacheConfig;
    use std::time::Duration;

    fn exhausted() -> ResilienceError {
        ResilienceError::RetryExhausted {
            attempts: 3,
            last_error: Box::new(ResilienceError::transient("503")),
        }
    }

    #[tokio::test]
    async fn test_fallback_returns_default_for_dependency_failures() {
        let fallback = FallbackRecovery::new(vec!["default".to_string()]);
        let recovered =
            RecoveryStrategy::<(), Vec<String>>::recover(&fallback, &(), exhausted()).await.unwrap();
        assert_eq!(recovered.value, vec!["default".to_string()]);
        assert_eq!(recovered.source, Source::Fallback);
    }

    #[tokio::test]
    async fn test_fallback_rethrows_unrecognized_errors() {
        let fallback = FallbackRecovery::new(0u32);
        let err = ResilienceError::permanent("bad request");
        let result = RecoveryStrategy::<(), u32>::recover(&fallback, &(), err.clone()).await;
        assert_eq!(result, Err(err));

        let narrow = FallbackRecovery::new(0u32)
            .when(|e| matches!(e, ResilienceError::CircuitOpen { .. }));
        let result = RecoveryStrategy::<(), u32>::recover(&narrow, &(), exhausted()).await;
        assert!(matches!(result, Err(ResilienceError::RetryExhausted { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_cache_serves_expired_value() {
        let cache = CacheStore::new(&CacheConfig::default());
        let key = cache_key("quotes:", &("AAPL", 1)).unwrap();
        cache.set(&key, &42.5f64, Duration::from_secs(5)).await.unwrap();

        tokio::time::advance(Duration::from_secs(6)).await;
        assert!(cache.get(&key).await.is_none());

        let strategy = StaleCacheRecovery::new(cache.clone(), "quotes:");
        let recovered: Recovered<f64> = strategy.recover(&("AAPL", 1), exhausted()).await.unwrap();
        assert_eq!(recovered.value, 42.5);
        assert_eq!(recovered.source, Source::Stale);

        let missing: ResilienceResult<Recovered<f64>> =
            strategy.recover(&("MSFT", 1), exhausted()).await;
        assert!(matches!(missing, Err(ResilienceError::RetryExhausted { .. })));
    }
}
