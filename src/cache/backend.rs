//! Shared cache backends.
//!
//! A backend mirrors the memory tier so several stores (or processes, with a
//! networked implementation) observe the same values. Backends deal in opaque
//! bytes; the store encodes a [`MirroredEntry`] so the remaining TTL travels
//! with the value.

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use crate::error::ResilienceResult;

/// A remote key/value store the cache mirrors writes to.
///
/// Errors are reported as `ResilienceError::Backend`; the store never lets them
/// reach its callers.
#[async_trait]
pub trait SharedBackend: Send + Sync {
    async fn get(&self, key: &str) -> ResilienceResult<Option<Vec<u8>>>;

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> ResilienceResult<()>;

    async fn delete(&self, key: &str) -> ResilienceResult<()>;

    /// Remove every key starting with `prefix`, returning how many were removed.
    async fn delete_prefix(&self, prefix: &str) -> ResilienceResult<usize>;
}

/// Wire form of a mirrored value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MirroredEntry {
    pub value: serde_json::Value,
    /// Absolute expiry, milliseconds since the Unix epoch.
    pub expires_at_ms: u64,
}

/// In-process backend, shareable between several `CacheStore` instances.
#[derive(Clone, Default)]
pub struct LocalBackend {
    entries: Arc<DashMap<String, (Vec<u8>, Instant)>>,
}

impl LocalBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl SharedBackend for LocalBackend {
    async fn get(&self, key: &str) -> ResilienceResult<Option<Vec<u8>>> {
        let now = Instant::now();
        if self
            .entries
            .remove_if(key, |_, (_, expires_at)| *expires_at <= now)
            .is_some()
        {
            return Ok(None);
        }
        Ok(self.entries.get(key).map(|r| r.value().0.clone()))
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> ResilienceResult<()> {
        self.entries
            .insert(key.to_string(), (value, Instant::now() + ttl));
        Ok(())
    }

    async fn delete(&self, key: &str) -> ResilienceResult<()> {
        self.entries.remove(key);
        Ok(())
    }

    async fn delete_prefix(&self, prefix: &str) -> ResilienceResult<usize> {
        let mut removed = 0;
        self.entries.retain(|k, _| {
            let keep = !k.starts_with(prefix);
            if !keep {
                removed += 1;
            }
            keep
        });
        Ok(removed)
    }
}
