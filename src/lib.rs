//! Resilience and caching primitives for services that call flaky dependencies.
//!
//! - [`cache::CacheStore`]: TTL cache with lazy expiry, prefix invalidation,
//!   singleflight `get_or_compute` and an optional shared backend
//! - [`rate_limit::RateLimiter`]: fixed-window counters, with a tier-aware wrapper
//! - [`resilience`]: circuit breakers, retries with backoff, recovery strategies
//!   and the wrappers that compose them
//! - [`health::HealthRegistry`]: concurrent probes with per-probe timeouts

pub mod cache;
pub mod clock;
pub mod config;
pub mod error;
pub mod health;
pub mod http;
pub mod lifecycle;
pub mod observability;
pub mod rate_limit;
pub mod resilience;

pub use cache::CacheStore;
pub use config::schema::ResilienceConfig;
pub use error::{ResilienceError, ResilienceResult};
pub use health::HealthRegistry;
pub use lifecycle::{Services, Shutdown};
pub use rate_limit::{RateLimiter, TieredRateLimiter};
pub use resilience::{BreakerRegistry, CircuitBreaker, Pipeline, RetryPolicy};
