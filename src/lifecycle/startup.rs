//! Startup orchestration.
//!
//! Builds each shared primitive exactly once from a validated config and
//! hands out clones of the handles. Nothing here binds a socket.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

use crate::cache::CacheStore;
use crate::config::ResilienceConfig;
use crate::health::{BreakerProbe, CacheProbe, HealthRegistry};
use crate::http::AppState;
use crate::lifecycle::Shutdown;
use crate::rate_limit::{QuotaParseError, TieredRateLimiter};
use crate::resilience::{BreakerRegistry, Operation, Pipeline, RetryPolicy, StaleCacheRecovery};

/// The process-wide primitives.
#[derive(Clone)]
pub struct Services {
    pub cache: CacheStore,
    pub breakers: Arc<BreakerRegistry>,
    pub limiter: Arc<TieredRateLimiter>,
    pub health: Arc<HealthRegistry>,
    pub retry: RetryPolicy,
}

impl Services {
    /// Build every primitive and register the built-in health probes.
    pub fn from_config(config: &ResilienceConfig) -> Result<Self, QuotaParseError> {
        let cache = CacheStore::new(&config.cache);
        let breakers = Arc::new(BreakerRegistry::new(config.circuit_breaker.clone()));
        let limiter = Arc::new(TieredRateLimiter::from_config(&config.rate_limit)?);
        let health = Arc::new(HealthRegistry::from_config(&config.health));

        health.register_check("cache", Arc::new(CacheProbe::new(cache.clone())));
        health.register_check("circuit_breakers", Arc::new(BreakerProbe::new(breakers.clone())));

        tracing::info!(
            cache_ttl_secs = config.cache.ttl_secs,
            breaker_threshold = config.circuit_breaker.failure_threshold,
            rate_limit_enabled = config.rate_limit.enabled,
            probes = health.len(),
            "Resilience services initialized"
        );

        Ok(Self {
            cache,
            breakers,
            limiter,
            health,
            retry: RetryPolicy::from_config(&config.retry),
        })
    }

    /// Start the cache sweeper and the rate-window purger, tracked by `shutdown`.
    ///
    /// A `sweep_interval_secs` of 0 leaves expiry to reads.
    pub fn spawn_background(&self, config: &ResilienceConfig, shutdown: &Shutdown) {
        if config.cache.sweep_interval_secs > 0 {
            let sweep = Duration::from_secs(config.cache.sweep_interval_secs);
            shutdown.track("cache-sweeper", self.cache.spawn_sweeper(sweep, shutdown.subscribe()));
        } else {
            tracing::info!("Cache sweeper disabled, expired entries are removed on read");
        }

        let purge = Duration::from_secs(config.rate_limit.purge_interval_secs.max(1));
        shutdown.track(
            "rate-window-purger",
            self.limiter.limiter().spawn_purger(purge, shutdown.subscribe()),
        );
    }

    /// Pipeline for calls to `resource` with the shared retry policy, the
    /// resource's breaker and the shared cache under
    /// [`CacheStore::namespace`]. Add a recovery strategy, then `build`.
    pub fn pipeline<A, T>(&self, resource: &str, op: Operation<A, T>) -> Pipeline<A, T>
    where
        A: Serialize + Clone + Send + Sync + 'static,
        T: Serialize + DeserializeOwned + Send + 'static,
    {
        Pipeline::new(op)
            .retry(self.retry)
            .circuit_breaker(self.breakers.get(resource))
            .cached(
                self.cache.clone(),
                self.cache.namespace(resource),
                self.cache.default_ttl(),
            )
    }

    /// Stale recovery that reads what [`pipeline`](Self::pipeline) cached
    /// for `resource`.
    pub fn stale_recovery(&self, resource: &str) -> StaleCacheRecovery {
        StaleCacheRecovery::new(self.cache.clone(), self.cache.namespace(resource))
    }

    pub fn app_state(&self) -> AppState {
        AppState {
            cache: self.cache.clone(),
            breakers: self.breakers.clone(),
            limiter: self.limiter.clone(),
            health: self.health.clone(),
        }
    }
}
