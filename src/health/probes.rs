//! Built-in probes for the primitives of this crate.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use crate::cache::CacheStore;
use crate::health::registry::HealthProbe;
use crate::resilience::{BreakerRegistry, CircuitStatus};

const PROBE_KEY_PREFIX: &str = "__health__:cache-probe:";

/// Writes, reads back and deletes a marker entry. Each check uses its own
/// key, so concurrent readiness polls never see each other's marker.
pub struct CacheProbe {
    cache: CacheStore,
}

impl CacheProbe {
    pub fn new(cache: CacheStore) -> Self {
        Self { cache }
    }
}

#[async_trait]
impl HealthProbe for CacheProbe {
    async fn check(&self) -> Result<(), String> {
        let marker = rand::random::<u64>().to_string();
        let key = format!("{PROBE_KEY_PREFIX}{marker}");
        self.cache
            .set(&key, &marker, Duration::from_secs(30))
            .await
            .map_err(|e| e.to_string())?;

        let read: Option<String> = self
            .cache
            .get_as(&key)
            .await
            .map_err(|e| e.to_string())?;
        self.cache.delete(&key).await;

        match read {
            Some(value) if value == marker => Ok(()),
            Some(_) => Err("cache returned a different value".to_string()),
            None => Err("cache lost the probe entry".to_string()),
        }
    }
}

/// Unhealthy while any registered breaker is open.
pub struct BreakerProbe {
    registry: Arc<BreakerRegistry>,
}

impl BreakerProbe {
    pub fn new(registry: Arc<BreakerRegistry>) -> Self {
        Self { registry }
    }
}

#[async_trait]
impl HealthProbe for BreakerProbe {
    async fn check(&self) -> Result<(), String> {
        let open: Vec<String> = self
            .registry
            .snapshots()
            .into_iter()
            .filter(|s| s.status == CircuitStatus::Open)
            .map(|s| s.resource_name)
            .collect();

        if open.is_empty() {
            Ok(())
        } else {
            Err(format!("open circuits: {}", open.join(", ")))
        }
    }
}
