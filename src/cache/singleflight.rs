//! Get-or-compute with one producer per key.
//!
//! # Flow
//! ```text
//! caller ─▶ memory/backend hit? ──yes──▶ value
//!              │ no
//!              ▼
//!          in_flight[key]? ──yes──▶ wait on its watch channel
//!              │ no
//!              ▼
//!          register channel, spawn producer task, wait on it
//!
//! producer task: run → store in cache → unregister → publish result
//! ```
//!
//! The producer runs in its own task, so a waiter that gives up (its own
//! timeout, a dropped request) never cancels the computation the others
//! are waiting on.

use dashmap::mapref::entry::Entry;
use futures_util::{FutureExt, TryFutureExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;

use crate::cache::store::{CacheStore, Landed};
use crate::error::{ResilienceError, ResilienceResult};
use crate::observability::metrics;

/// A produced value and whether it may be written to the cache.
#[derive(Debug, Clone)]
pub struct Computed<T> {
    pub value: T,
    pub cacheable: bool,
}

impl<T> Computed<T> {
    pub fn cacheable(value: T) -> Self {
        Self {
            value,
            cacheable: true,
        }
    }

    /// Shared with current waiters but not stored.
    pub fn transient(value: T) -> Self {
        Self {
            value,
            cacheable: false,
        }
    }
}

/// Removes the in-flight registration, also when the producer panics.
struct FlightGuard {
    store: CacheStore,
    key: String,
}

impl Drop for FlightGuard {
    fn drop(&mut self) {
        self.store.inner.in_flight.remove(&self.key);
    }
}

impl CacheStore {
    /// Return the cached value for `key`, or compute it with `producer`.
    ///
    /// Concurrent callers for the same cold key share one `producer`
    /// invocation and all receive its outcome, errors included. Errors are
    /// never cached.
    pub async fn get_or_compute<T, F, Fut>(
        &self,
        key: &str,
        ttl: Duration,
        producer: F,
    ) -> ResilienceResult<T>
    where
        T: Serialize + DeserializeOwned + Send + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ResilienceResult<T>> + Send + 'static,
    {
        self.get_or_compute_with(key, ttl, move || producer().map_ok(Computed::cacheable))
            .await
    }

    /// Like [`get_or_compute`](Self::get_or_compute), but the producer decides
    /// per result whether it is stored.
    pub async fn get_or_compute_with<T, F, Fut>(
        &self,
        key: &str,
        ttl: Duration,
        producer: F,
    ) -> ResilienceResult<T>
    where
        T: Serialize + DeserializeOwned + Send + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ResilienceResult<Computed<T>>> + Send + 'static,
    {
        if let Some(value) = self.get(key).await {
            return Ok(serde_json::from_value(value)?);
        }
        self.join_flight(key, ttl, producer, true).await
    }

    /// Share one `producer` run among concurrent callers for `flight_key`
    /// without reading or writing the cache.
    ///
    /// Flight keys share a namespace with cache keys; callers coalescing
    /// work that is not a cache fill should use a distinct prefix.
    pub async fn coalesce<T, F, Fut>(&self, flight_key: &str, producer: F) -> ResilienceResult<T>
    where
        T: Serialize + DeserializeOwned + Send + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ResilienceResult<T>> + Send + 'static,
    {
        self.join_flight(
            flight_key,
            Duration::ZERO,
            move || producer().map_ok(Computed::transient),
            false,
        )
        .await
    }

    async fn join_flight<T, F, Fut>(
        &self,
        key: &str,
        ttl: Duration,
        producer: F,
        recheck_cache: bool,
    ) -> ResilienceResult<T>
    where
        T: Serialize + DeserializeOwned + Send + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ResilienceResult<Computed<T>>> + Send + 'static,
    {
        let mut flight = match self.inner.in_flight.entry(key.to_string()) {
            Entry::Occupied(existing) => {
                metrics::record_coalesced_wait();
                tracing::trace!(key = %key, "Joining in-flight computation");
                existing.get().clone()
            }
            Entry::Vacant(slot) => {
                // A producer may have finished between our miss and taking the slot.
                if recheck_cache {
                    if let Some(value) = self.lookup_local(key, Instant::now()) {
                        return Ok(serde_json::from_value(value)?);
                    }
                }
                let (tx, rx) = watch::channel(None);
                slot.insert(rx.clone());
                self.spawn_producer(key.to_string(), ttl, tx, producer);
                rx
            }
        };

        let landed = match flight.wait_for(Option::is_some).await {
            Ok(landed) => landed.clone(),
            Err(_) => None,
        };

        match landed {
            Some(Ok(value)) => Ok(serde_json::from_value(value)?),
            Some(Err(e)) => Err(e),
            None => Err(ResilienceError::ProducerAborted(format!(
                "computation for '{key}' ended without a result"
            ))),
        }
    }

    fn spawn_producer<T, F, Fut>(
        &self,
        key: String,
        ttl: Duration,
        tx: watch::Sender<Option<Landed>>,
        producer: F,
    ) where
        T: Serialize + Send + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ResilienceResult<Computed<T>>> + Send + 'static,
    {
        let store = self.clone();
        tokio::spawn(async move {
            let guard = FlightGuard {
                store: store.clone(),
                key: key.clone(),
            };

            let outcome = match AssertUnwindSafe(producer()).catch_unwind().await {
                Ok(outcome) => outcome,
                Err(_) => {
                    tracing::error!(key = %key, "Cache producer panicked");
                    Err(ResilienceError::ProducerAborted(format!(
                        "producer for '{key}' panicked"
                    )))
                }
            };

            let landed: Landed = match outcome {
                Ok(computed) => match serde_json::to_value(&computed.value) {
                    Ok(value) => {
                        if computed.cacheable {
                            store.insert_value(&key, value.clone(), ttl).await;
                        }
                        Ok(value)
                    }
                    Err(e) => Err(e.into()),
                },
                Err(e) => {
                    tracing::debug!(key = %key, error = %e, "Cache producer failed");
                    Err(e)
                }
            };

            drop(guard);
            let _ = tx.send(Some(landed));
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CacheConfig;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn store() -> CacheStore {
        CacheStore::new(&CacheConfig::default())
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_one_producer() {
        let cache = store();
        let calls = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..50 {
            let cache = cache.clone();
            let calls = calls.clone();
            handles.push(tokio::spawn(async move {
                cache
                    .get_or_compute("report:daily", Duration::from_secs(60), move || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        Ok(vec![1, 2, 3])
                    })
                    .await
            }));
        }

        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap(), vec![1, 2, 3]);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(cache.inner.in_flight.is_empty());
    }

    #[tokio::test]
    async fn test_error_shared_and_not_cached() {
        let cache = store();
        let calls = Arc::new(AtomicUsize::new(0));

        let run = |cache: CacheStore, calls: Arc<AtomicUsize>| async move {
            cache
                .get_or_compute::<u32, _, _>("k", Duration::from_secs(60), move || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    Err(ResilienceError::transient("upstream 502"))
                })
                .await
        };

        let (a, b) = tokio::join!(
            run(cache.clone(), calls.clone()),
            run(cache.clone(), calls.clone())
        );
        assert_eq!(a.unwrap_err(), ResilienceError::transient("upstream 502"));
        assert_eq!(b.unwrap_err(), ResilienceError::transient("upstream 502"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        // Nothing cached: the next call computes again
        let _ = run(cache.clone(), calls.clone()).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_abandoned_waiter_does_not_cancel_producer() {
        let cache = store();

        let waiter = cache.get_or_compute("slow", Duration::from_secs(60), || async {
            tokio::time::sleep(Duration::from_millis(100)).await;
            Ok("done".to_string())
        });
        let timed_out = tokio::time::timeout(Duration::from_millis(10), waiter).await;
        assert!(timed_out.is_err());

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(cache.get_as::<String>("slow").await.unwrap().as_deref(), Some("done"));
    }

    #[tokio::test]
    async fn test_panicking_producer_reports_abort() {
        let cache = store();
        async fn exploding() -> ResilienceResult<u8> {
            panic!("producer bug")
        }

        let result = cache
            .get_or_compute("boom", Duration::from_secs(60), exploding)
            .await;
        assert!(matches!(result, Err(ResilienceError::ProducerAborted(_))));
        assert!(cache.inner.in_flight.is_empty());
    }

    #[tokio::test]
    async fn test_transient_result_not_stored() {
        let cache = store();
        let value = cache
            .get_or_compute_with("fallback", Duration::from_secs(60), || async {
                Ok(Computed::transient(7u32))
            })
            .await
            .unwrap();
        assert_eq!(value, 7);
        assert!(cache.get("fallback").await.is_none());
    }

    #[tokio::test]
    async fn test_coalesce_shares_without_storing() {
        let cache = store();
        let calls = Arc::new(AtomicUsize::new(0));

        let run = |cache: CacheStore, calls: Arc<AtomicUsize>| async move {
            cache
                .coalesce("flight:lookup", move || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    Ok(11u32)
                })
                .await
        };

        let (a, b) = tokio::join!(
            run(cache.clone(), calls.clone()),
            run(cache.clone(), calls.clone())
        );
        assert_eq!((a.unwrap(), b.unwrap()), (11, 11));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_cached_value_skips_producer() {
        let cache = store();
        cache.set("warm", &5u32, Duration::from_secs(60)).await.unwrap();
        let value: u32 = cache
            .get_or_compute("warm", Duration::from_secs(60), || async {
                Err(ResilienceError::permanent("producer must not run"))
            })
            .await
            .unwrap();
        assert_eq!(value, 5);
    }
}
