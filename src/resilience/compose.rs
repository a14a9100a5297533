//! Wrappers that layer caching, retries, circuit breaking and recovery
//! around an async operation.
//!
//! Each wrapper takes an [`Operation`] and returns a new one, so the
//! order of protection is whatever order the wrappers are applied in:
//!
//! ```text
//! cached(recovery(circuit_breaker(retry(op))))
//!
//! retry           - transient failures retried with backoff
//! circuit_breaker - exhausted retries count as one failure
//! recovery        - open circuit / exhausted retries become a fallback
//! cached          - fresh results stored, recovered values never stored
//! ```
//!
//! Once `recovery` has been applied, the outer cache layer must be
//! [`cached_recovered`]: [`Recovered`] is not serializable, so [`cached`]
//! rejects it at compile time. [`Pipeline`] builds the canonical order and
//! reports the [`Source`] of every value it returns.

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::cache::{cache_key, CacheStore};
use crate::error::{ResilienceError, ResilienceResult};
use crate::resilience::circuit_breaker::CircuitBreaker;
use crate::resilience::recovery::{Recovered, RecoveryStrategy, Source};
use crate::resilience::retries::RetryPolicy;

/// A shareable async operation taking `A` and producing `T`.
pub type Operation<A, T> = Arc<dyn Fn(A) -> BoxFuture<'static, ResilienceResult<T>> + Send + Sync>;

/// Type-erase an async function into an [`Operation`].
pub fn operation<A, T, F, Fut>(f: F) -> Operation<A, T>
where
    F: Fn(A) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ResilienceResult<T>> + Send + 'static,
{
    Arc::new(move |args| f(args).boxed())
}

/// Memoize `op` in `cache` under `key_prefix + sha256(args)` for `ttl`.
/// Concurrent calls with equal arguments share one invocation.
pub fn cached<A, T>(cache: CacheStore, ttl: Duration, key_prefix: &str, op: Operation<A, T>) -> Operation<A, T>
where
    A: Serialize + Send + 'static,
    T: Serialize + DeserializeOwned + Send + 'static,
{
    let key_prefix = key_prefix.to_string();
    Arc::new(move |args: A| {
        let cache = cache.clone();
        let op = op.clone();
        let key = cache_key(&key_prefix, &args);
        async move {
            let key = key?;
            cache.get_or_compute(&key, ttl, move || op(args)).await
        }
        .boxed()
    })
}

/// Retry transient failures of `op` according to `policy`.
pub fn retry<A, T>(policy: RetryPolicy, op: Operation<A, T>) -> Operation<A, T>
where
    A: Clone + Send + 'static,
    T: Send + 'static,
{
    retry_if(policy, ResilienceError::is_transient, op)
}

/// Retry failures of `op` that `retryable` accepts.
pub fn retry_if<A, T, P>(policy: RetryPolicy, retryable: P, op: Operation<A, T>) -> Operation<A, T>
where
    A: Clone + Send + 'static,
    T: Send + 'static,
    P: Fn(&ResilienceError) -> bool + Clone + Send + Sync + 'static,
{
    Arc::new(move |args: A| {
        let op = op.clone();
        let retryable = retryable.clone();
        async move { policy.execute(move || op(args.clone()), retryable).await }.boxed()
    })
}

/// Guard `op` with `breaker`. While the breaker is open `op` is not invoked.
pub fn circuit_breaker<A, T>(breaker: Arc<CircuitBreaker>, op: Operation<A, T>) -> Operation<A, T>
where
    A: Send + 'static,
    T: Send + 'static,
{
    Arc::new(move |args: A| {
        let op = op.clone();
        let breaker = breaker.clone();
        async move { breaker.call(|| op(args)).await }.boxed()
    })
}

/// Hand failures of `op` to `strategy`. Errors the strategy does not
/// recognize are returned unchanged.
pub fn recovery<A, T>(
    strategy: Arc<dyn RecoveryStrategy<A, T>>,
    op: Operation<A, T>,
) -> Operation<A, Recovered<T>>
where
    A: Clone + Send + Sync + 'static,
    T: Send + 'static,
{
    Arc::new(move |args: A| {
        let op = op.clone();
        let strategy = strategy.clone();
        async move {
            match op(args.clone()).await {
                Ok(value) => Ok(Recovered::primary(value)),
                Err(error) => strategy.recover(&args, error).await,
            }
        }
        .boxed()
    })
}

struct CacheLayer {
    store: CacheStore,
    key_prefix: String,
    ttl: Duration,
}

/// Builder for `cached(recovery(circuit_breaker(retry(op))))`.
///
/// Every layer is optional. Values produced by the recovery strategy are
/// returned to all concurrent callers but never written to the cache.
pub struct Pipeline<A, T> {
    op: Operation<A, T>,
    retry: Option<RetryPolicy>,
    breaker: Option<Arc<CircuitBreaker>>,
    recovery: Option<Arc<dyn RecoveryStrategy<A, T>>>,
    cache: Option<CacheLayer>,
}

impl<A, T> Pipeline<A, T>
where
    A: Serialize + Clone + Send + Sync + 'static,
    T: Serialize + DeserializeOwned + Send + 'static,
{
    pub fn new(op: Operation<A, T>) -> Self {
        Self {
            op,
            retry: None,
            breaker: None,
            recovery: None,
            cache: None,
        }
    }

    pub fn retry(mut self, policy: RetryPolicy) -> Self {
        self.retry = Some(policy);
        self
    }

    pub fn circuit_breaker(mut self, breaker: Arc<CircuitBreaker>) -> Self {
        self.breaker = Some(breaker);
        self
    }

    pub fn recovery(mut self, strategy: Arc<dyn RecoveryStrategy<A, T>>) -> Self {
        self.recovery = Some(strategy);
        self
    }

    /// Cache fresh results. Use the same `key_prefix` for a
    /// [`StaleCacheRecovery`](crate::resilience::StaleCacheRecovery) so it
    /// finds these entries.
    pub fn cached(mut self, store: CacheStore, key_prefix: impl Into<String>, ttl: Duration) -> Self {
        self.cache = Some(CacheLayer {
            store,
            key_prefix: key_prefix.into(),
            ttl,
        });
        self
    }

    pub fn build(self) -> Operation<A, Recovered<T>> {
        let mut op = self.op;
        if let Some(policy) = self.retry {
            op = retry(policy, op);
        }
        if let Some(breaker) = self.breaker {
            op = circuit_breaker(breaker, op);
        }

        let guarded = match self.recovery {
            Some(strategy) => recovery(strategy, op),
            None => operation(move |args: A| {
                let op = op.clone();
                async move { op(args).await.map(Recovered::primary) }
            }),
        };

        match self.cache {
            Some(layer) => cached_recovered(layer.store, layer.ttl, &layer.key_prefix, guarded),
            None => guarded,
        }
    }
}

/// Outcome of a [`cached_recovered`] flight as handed to coalesced callers.
#[derive(Serialize, Deserialize)]
struct SharedOutcome<T> {
    value: T,
    source: Source,
}

impl<T> From<Recovered<T>> for SharedOutcome<T> {
    fn from(r: Recovered<T>) -> Self {
        Self {
            value: r.value,
            source: r.source,
        }
    }
}

impl<T> From<SharedOutcome<T>> for Recovered<T> {
    fn from(o: SharedOutcome<T>) -> Self {
        Self {
            value: o.value,
            source: o.source,
        }
    }
}

/// Cache layer for an operation that already has recovery applied.
///
/// Only primary values are stored, as plain `T` under the key [`cached`]
/// would use, so a [`StaleCacheRecovery`](crate::resilience::StaleCacheRecovery)
/// with the same prefix can read them. Fallback and stale values reach every
/// concurrent caller but are never written.
pub fn cached_recovered<A, T>(
    cache: CacheStore,
    ttl: Duration,
    key_prefix: &str,
    op: Operation<A, Recovered<T>>,
) -> Operation<A, Recovered<T>>
where
    A: Serialize + Send + 'static,
    T: Serialize + DeserializeOwned + Send + 'static,
{
    let key_prefix = key_prefix.to_string();
    Arc::new(move |args: A| {
        let cache = cache.clone();
        let op = op.clone();
        let key = cache_key(&key_prefix, &args);
        async move {
            let key = key?;
            if let Some(value) = cache.get_as::<T>(&key).await? {
                return Ok(Recovered::primary(value));
            }

            let store = cache.clone();
            let flight_key = format!("pipeline:{key}");
            let shared: SharedOutcome<T> = store
                .coalesce(&flight_key, move || async move {
                    // A flight that finished just before this one may have filled the key
                    if let Some(value) = cache.get_as::<T>(&key).await? {
                        return Ok(SharedOutcome::from(Recovered::primary(value)));
                    }
                    let resolved = op(args).await?;
                    if resolved.is_primary() {
                        let value = serde_json::to_value(&resolved.value)?;
                        cache.insert_value(&key, value, ttl).await;
                    }
                    Ok::<_, ResilienceError>(SharedOutcome::from(resolved))
                })
                .await?;
            Ok(shared.into())
        }
        .boxed()
    })
}
