//! In-memory TTL cache with an optional mirrored backend.

use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::cache::backend::{MirroredEntry, SharedBackend};
use crate::clock::Clock;
use crate::config::CacheConfig;
use crate::error::{ResilienceError, ResilienceResult};
use crate::observability::metrics;

/// A single cached value.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub key: String,
    pub value: Value,
    pub created_at: Instant,
    pub expires_at: Instant,
}

impl CacheEntry {
    pub fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// Last known value of an expired entry, kept for stale recovery.
#[derive(Debug, Clone)]
pub(crate) struct StaleEntry {
    value: Value,
    retained_until: Instant,
}

pub(crate) type Landed = ResilienceResult<Value>;

pub(crate) struct CacheInner {
    pub(crate) entries: DashMap<String, CacheEntry>,
    stale: DashMap<String, StaleEntry>,
    pub(crate) in_flight: DashMap<String, watch::Receiver<Option<Landed>>>,
    backend: Option<Arc<dyn SharedBackend>>,
    /// Set while the backend is bypassed after a failure.
    backend_down_until: Mutex<Option<Instant>>,
    clock: Clock,
    default_ttl: Duration,
    key_prefix: String,
    stale_retention: Duration,
    backend_retry: Duration,
}

/// Thread-safe key/value cache with per-entry TTL.
///
/// Cloning is cheap and every clone shares the same entries. Construct one
/// store at startup and hand clones to the consumers that need it.
#[derive(Clone)]
pub struct CacheStore {
    pub(crate) inner: Arc<CacheInner>,
}

impl CacheStore {
    /// Create a memory-only store.
    pub fn new(config: &CacheConfig) -> Self {
        Self::build(config, None)
    }

    /// Create a store that mirrors writes to `backend`.
    pub fn with_backend(config: &CacheConfig, backend: Arc<dyn SharedBackend>) -> Self {
        Self::build(config, Some(backend))
    }

    fn build(config: &CacheConfig, backend: Option<Arc<dyn SharedBackend>>) -> Self {
        Self {
            inner: Arc::new(CacheInner {
                entries: DashMap::new(),
                stale: DashMap::new(),
                in_flight: DashMap::new(),
                backend,
                backend_down_until: Mutex::new(None),
                clock: Clock::new(),
                default_ttl: config.ttl(),
                key_prefix: config.key_prefix.clone(),
                stale_retention: Duration::from_secs(config.stale_retention_secs),
                backend_retry: Duration::from_secs(config.backend_retry_secs),
            }),
        }
    }

    /// TTL used by callers that do not pick their own.
    pub fn default_ttl(&self) -> Duration {
        self.inner.default_ttl
    }

    /// Configured prefix for keys generated on behalf of a resource.
    pub fn key_prefix(&self) -> &str {
        &self.inner.key_prefix
    }

    /// Key prefix for `resource`: `<key_prefix><resource>:`.
    pub fn namespace(&self, resource: &str) -> String {
        format!("{}{}:", self.inner.key_prefix, resource)
    }

    /// Number of entries in the memory tier, expired ones included until
    /// they are read or swept.
    pub fn len(&self) -> usize {
        self.inner.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.entries.is_empty()
    }

    /// Look up a value. Expired entries are removed and reported as absent.
    pub async fn get(&self, key: &str) -> Option<Value> {
        if let Some(value) = self.lookup_local(key, Instant::now()) {
            metrics::record_cache_lookup("hit");
            return Some(value);
        }

        if let Some(value) = self.backend_get(key).await {
            metrics::record_cache_lookup("hit");
            return Some(value);
        }

        metrics::record_cache_lookup("miss");
        None
    }

    /// Look up and decode a value.
    pub async fn get_as<T: DeserializeOwned>(&self, key: &str) -> ResilienceResult<Option<T>> {
        match self.get(key).await {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    /// Store `value` under `key` for `ttl`, replacing any previous entry.
    pub async fn set<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
        ttl: Duration,
    ) -> ResilienceResult<()> {
        let value = serde_json::to_value(value)?;
        self.insert_value(key, value, ttl).await;
        Ok(())
    }

    pub(crate) async fn insert_value(&self, key: &str, value: Value, ttl: Duration) {
        let now = Instant::now();
        let entry = CacheEntry {
            key: key.to_string(),
            value: value.clone(),
            created_at: now,
            expires_at: now + ttl,
        };
        self.inner.entries.insert(key.to_string(), entry);
        self.inner.stale.remove(key);
        metrics::record_cache_size(self.inner.entries.len());

        self.backend_set(key, value, ttl).await;
    }

    /// Remove a key. Returns whether a live entry was present.
    pub async fn delete(&self, key: &str) -> bool {
        let now = Instant::now();
        let removed = self
            .inner
            .entries
            .remove(key)
            .is_some_and(|(_, entry)| !entry.is_expired(now));
        self.inner.stale.remove(key);

        if let Some(backend) = self.available_backend() {
            match backend.delete(key).await {
                Ok(()) => self.backend_recovered(),
                Err(e) => self.backend_failed("delete", &e),
            }
        }

        removed
    }

    /// Remove every key starting with `pattern`.
    ///
    /// Only prefix matching is supported; a trailing `*` is accepted and
    /// ignored. Each key is removed under its shard lock, so a concurrent
    /// reader sees either the old entry or nothing.
    pub async fn clear_pattern(&self, pattern: &str) -> usize {
        let prefix = pattern.trim_end_matches('*');

        let mut removed = 0;
        self.inner.entries.retain(|key, _| {
            let keep = !key.starts_with(prefix);
            if !keep {
                removed += 1;
            }
            keep
        });
        self.inner.stale.retain(|key, _| !key.starts_with(prefix));
        metrics::record_cache_size(self.inner.entries.len());

        if let Some(backend) = self.available_backend() {
            match backend.delete_prefix(prefix).await {
                Ok(_) => self.backend_recovered(),
                Err(e) => self.backend_failed("delete_prefix", &e),
            }
        }

        tracing::debug!(prefix = %prefix, removed, "Cleared cache entries by prefix");
        removed
    }

    /// Most recent value for `key`, even if it has expired.
    ///
    /// Expired values stay readable for `stale_retention_secs`.
    pub fn get_stale(&self, key: &str) -> Option<Value> {
        if let Some(entry) = self.inner.entries.get(key) {
            return Some(entry.value.clone());
        }
        let now = Instant::now();
        let value = self
            .inner
            .stale
            .get(key)
            .filter(|s| s.retained_until > now)
            .map(|s| s.value.clone());
        if value.is_some() {
            metrics::record_cache_lookup("stale");
        }
        value
    }

    /// Drop expired entries and stale values past their retention.
    /// Returns the number of expired entries moved out of the live map.
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let mut expired = Vec::new();
        self.inner.entries.retain(|_, entry| {
            if entry.is_expired(now) {
                expired.push(entry.clone());
                false
            } else {
                true
            }
        });
        let swept = expired.len();
        for entry in expired {
            self.retain_stale(entry, now);
        }
        self.inner.stale.retain(|_, s| s.retained_until > now);
        metrics::record_cache_size(self.inner.entries.len());
        swept
    }

    /// Run [`sweep`](Self::sweep) every `interval` until shutdown.
    pub fn spawn_sweeper(
        &self,
        interval: Duration,
        mut shutdown: broadcast::Receiver<()>,
    ) -> JoinHandle<()> {
        let store = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let swept = store.sweep();
                        if swept > 0 {
                            tracing::debug!(swept, "Cache sweep removed expired entries");
                        }
                    }
                    _ = shutdown.recv() => {
                        tracing::info!("Cache sweeper received shutdown signal, exiting loop");
                        break;
                    }
                }
            }
        })
    }

    /// Live value from the memory tier, removing it if expired.
    pub(crate) fn lookup_local(&self, key: &str, now: Instant) -> Option<Value> {
        if let Some((_, expired)) = self
            .inner
            .entries
            .remove_if(key, |_, entry| entry.is_expired(now))
        {
            self.retain_stale(expired, now);
            metrics::record_cache_size(self.inner.entries.len());
            return None;
        }
        self.inner
            .entries
            .get(key)
            .filter(|entry| !entry.is_expired(now))
            .map(|entry| entry.value.clone())
    }

    fn retain_stale(&self, entry: CacheEntry, now: Instant) {
        if self.inner.stale_retention.is_zero() {
            return;
        }
        self.inner.stale.insert(
            entry.key,
            StaleEntry {
                value: entry.value,
                retained_until: now + self.inner.stale_retention,
            },
        );
    }

    // --- Backend mirroring ---

    fn available_backend(&self) -> Option<Arc<dyn SharedBackend>> {
        let backend = self.inner.backend.as_ref()?;
        let down_until = self
            .inner
            .backend_down_until
            .lock()
            .expect("cache backend mutex poisoned");
        match *down_until {
            Some(until) if Instant::now() < until => None,
            _ => Some(backend.clone()),
        }
    }

    async fn backend_get(&self, key: &str) -> Option<Value> {
        let backend = self.available_backend()?;
        let bytes = match backend.get(key).await {
            Ok(Some(bytes)) => bytes,
            Ok(None) => {
                self.backend_recovered();
                return None;
            }
            Err(e) => {
                self.backend_failed("get", &e);
                return None;
            }
        };
        self.backend_recovered();

        let mirrored: MirroredEntry = match serde_json::from_slice(&bytes) {
            Ok(m) => m,
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Discarding undecodable backend entry");
                return None;
            }
        };

        let now_ms = self.inner.clock.now_unix().as_millis() as u64;
        let remaining = Duration::from_millis(mirrored.expires_at_ms.saturating_sub(now_ms));
        if remaining.is_zero() {
            return None;
        }

        let now = Instant::now();
        self.inner.entries.insert(
            key.to_string(),
            CacheEntry {
                key: key.to_string(),
                value: mirrored.value.clone(),
                created_at: now,
                expires_at: now + remaining,
            },
        );
        Some(mirrored.value)
    }

    async fn backend_set(&self, key: &str, value: Value, ttl: Duration) {
        let Some(backend) = self.available_backend() else {
            return;
        };
        let mirrored = MirroredEntry {
            value,
            expires_at_ms: (self.inner.clock.now_unix() + ttl).as_millis() as u64,
        };
        let bytes = match serde_json::to_vec(&mirrored) {
            Ok(b) => b,
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Failed to encode entry for backend");
                return;
            }
        };
        match backend.set(key, bytes, ttl).await {
            Ok(()) => self.backend_recovered(),
            Err(e) => self.backend_failed("set", &e),
        }
    }

    fn backend_failed(&self, op: &'static str, err: &ResilienceError) {
        let mut down_until = self
            .inner
            .backend_down_until
            .lock()
            .expect("cache backend mutex poisoned");
        if down_until.is_none() {
            tracing::warn!(
                op,
                error = %err,
                retry_in = ?self.inner.backend_retry,
                "Cache backend unavailable, degrading to memory-only"
            );
            metrics::record_backend_degraded(true);
        }
        *down_until = Some(Instant::now() + self.inner.backend_retry);
    }

    fn backend_recovered(&self) {
        let mut down_until = self
            .inner
            .backend_down_until
            .lock()
            .expect("cache backend mutex poisoned");
        if down_until.take().is_some() {
            tracing::info!("Cache backend recovered");
            metrics::record_backend_degraded(false);
        }
    }

    /// Whether the store is currently bypassing its backend.
    pub fn is_degraded(&self) -> bool {
        self.inner
            .backend_down_until
            .lock()
            .expect("cache backend mutex poisoned")
            .is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::backend::LocalBackend;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    fn store() -> CacheStore {
        CacheStore::new(&CacheConfig::default())
    }

    #[tokio::test(start_paused = true)]
    async fn test_round_trip_and_expiry() {
        let cache = store();
        cache.set("price:AAPL", &189.5, Duration::from_secs(10)).await.unwrap();

        assert_eq!(cache.get_as::<f64>("price:AAPL").await.unwrap(), Some(189.5));

        tokio::time::advance(Duration::from_secs(11)).await;
        assert!(cache.get("price:AAPL").await.is_none());
        // Lazily removed on read
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_overwrite_and_delete() {
        let cache = store();
        cache.set("k", "one", Duration::from_secs(60)).await.unwrap();
        cache.set("k", "two", Duration::from_secs(60)).await.unwrap();
        assert_eq!(cache.get_as::<String>("k").await.unwrap().as_deref(), Some("two"));

        assert!(cache.delete("k").await);
        assert!(!cache.delete("k").await);
        assert!(cache.get("k").await.is_none());
    }

    #[tokio::test]
    async fn test_clear_pattern_only_removes_prefix() {
        let cache = store();
        let ttl = Duration::from_secs(60);
        for key in ["user:1", "user:2", "user:1:orders", "users", "other:user:1"] {
            cache.set(key, &1, ttl).await.unwrap();
        }

        assert_eq!(cache.clear_pattern("user:*").await, 3);

        assert!(cache.get("user:1").await.is_none());
        assert!(cache.get("user:1:orders").await.is_none());
        assert!(cache.get("users").await.is_some());
        assert!(cache.get("other:user:1").await.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_value_survives_expiry() {
        let cache = store();
        cache.set("quote", &42, Duration::from_secs(5)).await.unwrap();
        tokio::time::advance(Duration::from_secs(6)).await;

        assert!(cache.get("quote").await.is_none());
        assert_eq!(cache.get_stale("quote"), Some(serde_json::json!(42)));

        // Explicit deletion also forgets the stale copy
        cache.delete("quote").await;
        assert_eq!(cache.get_stale("quote"), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_moves_expired_to_stale() {
        let config = CacheConfig {
            stale_retention_secs: 10,
            ..Default::default()
        };
        let cache = CacheStore::new(&config);
        cache.set("a", &1, Duration::from_secs(1)).await.unwrap();
        cache.set("b", &2, Duration::from_secs(100)).await.unwrap();

        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(cache.sweep(), 1);
        assert_eq!(cache.len(), 1);
        assert!(cache.get_stale("a").is_some());

        tokio::time::advance(Duration::from_secs(11)).await;
        cache.sweep();
        assert!(cache.get_stale("a").is_none());
    }

    #[tokio::test]
    async fn test_backend_shared_between_stores() {
        let backend = Arc::new(LocalBackend::new());
        let config = CacheConfig::default();
        let a = CacheStore::with_backend(&config, backend.clone());
        let b = CacheStore::with_backend(&config, backend.clone());

        a.set("shared", "value", Duration::from_secs(60)).await.unwrap();
        assert_eq!(b.get_as::<String>("shared").await.unwrap().as_deref(), Some("value"));

        b.delete("shared").await;
        assert!(backend.is_empty());
    }

    /// Backend that fails while `down` is set.
    #[derive(Default)]
    struct FlakyBackend {
        down: AtomicBool,
        calls: AtomicUsize,
        inner: LocalBackend,
    }

    impl FlakyBackend {
        fn check(&self) -> ResilienceResult<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.down.load(Ordering::SeqCst) {
                Err(ResilienceError::Backend("connection refused".into()))
            } else {
                Ok(())
            }
        }
    }

    #[async_trait]
    impl SharedBackend for FlakyBackend {
        async fn get(&self, key: &str) -> ResilienceResult<Option<Vec<u8>>> {
            self.check()?;
            self.inner.get(key).await
        }
        async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> ResilienceResult<()> {
            self.check()?;
            self.inner.set(key, value, ttl).await
        }
        async fn delete(&self, key: &str) -> ResilienceResult<()> {
            self.check()?;
            self.inner.delete(key).await
        }
        async fn delete_prefix(&self, prefix: &str) -> ResilienceResult<usize> {
            self.check()?;
            self.inner.delete_prefix(prefix).await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_backend_failure_degrades_to_memory() {
        let backend = Arc::new(FlakyBackend::default());
        backend.down.store(true, Ordering::SeqCst);
        let config = CacheConfig {
            backend_retry_secs: 30,
            ..Default::default()
        };
        let cache = CacheStore::with_backend(&config, backend.clone());

        // Never raises, memory tier still works
        cache.set("k", &1, Duration::from_secs(300)).await.unwrap();
        assert!(cache.is_degraded());
        assert_eq!(cache.get_as::<i32>("k").await.unwrap(), Some(1));
        assert!(cache.get("missing").await.is_none());

        // Bypassed while degraded
        assert_eq!(backend.calls.load(Ordering::SeqCst), 1);

        backend.down.store(false, Ordering::SeqCst);
        tokio::time::advance(Duration::from_secs(31)).await;
        cache.set("k2", &2, Duration::from_secs(300)).await.unwrap();
        assert!(!cache.is_degraded());
        assert_eq!(backend.inner.len(), 1);
    }
}
