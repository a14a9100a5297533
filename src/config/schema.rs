//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the core.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Root configuration for the resilience core.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ResilienceConfig {
    /// Cache settings.
    pub cache: CacheConfig,

    /// Retry defaults.
    pub retry: RetryConfig,

    /// Circuit breaker defaults and per-resource overrides.
    pub circuit_breaker: CircuitBreakerConfig,

    /// Rate limiting policy.
    pub rate_limit: RateLimitConfig,

    /// Health check settings.
    pub health: HealthConfig,

    /// Demo service listener.
    pub server: ServerConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Cache configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Default time-to-live for entries, in seconds.
    pub ttl_secs: u64,

    /// Prefix prepended to every generated cache key.
    pub key_prefix: String,

    /// Interval of the background expiry sweep, in seconds. 0 disables it.
    pub sweep_interval_secs: u64,

    /// How long an expired value stays readable for stale recovery.
    pub stale_retention_secs: u64,

    /// How long to stay memory-only after the shared backend fails.
    pub backend_retry_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: 300,
            key_prefix: "cache:".to_string(),
            sweep_interval_secs: 60,
            stale_retention_secs: 3600,
            backend_retry_secs: 30,
        }
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

/// Retry configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts, including the first one.
    pub max_attempts: u32,

    /// Delay before the first retry, in seconds. Doubles on every attempt.
    pub base_delay_secs: f64,

    /// Upper bound for a single backoff delay, in seconds.
    pub max_delay_secs: f64,

    /// Apply ±10% jitter to every delay.
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_secs: 1.0,
            max_delay_secs: 30.0,
            jitter: true,
        }
    }
}

/// Circuit breaker configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open the circuit.
    pub failure_threshold: u32,

    /// Seconds the circuit stays open before admitting a trial call.
    pub reset_timeout_secs: u64,

    /// Per-resource overrides, keyed by resource name.
    pub resources: HashMap<String, BreakerOverride>,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout_secs: 30,
            resources: HashMap::new(),
        }
    }
}

/// Override for a single resource. Unset fields fall back to the defaults.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct BreakerOverride {
    pub failure_threshold: Option<u32>,
    pub reset_timeout_secs: Option<u64>,
}

/// Rate limiting configuration.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Enable rate limiting.
    pub enabled: bool,

    /// Quota for callers without a known tier, e.g. "100/hour".
    pub default: String,

    /// Quota per subscription tier, e.g. `pro = "1000/hour"`.
    pub tiers: HashMap<String, String>,

    /// How often stale windows are purged, in seconds.
    pub purge_interval_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        let tiers = HashMap::from([
            ("free".to_string(), "100/hour".to_string()),
            ("basic".to_string(), "1000/hour".to_string()),
            ("pro".to_string(), "10000/hour".to_string()),
        ]);
        Self {
            enabled: true,
            default: "60/hour".to_string(),
            tiers,
            purge_interval_secs: 300,
        }
    }
}

/// Health check configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HealthConfig {
    /// Per-probe timeout in seconds.
    pub probe_timeout_secs: u64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            probe_timeout_secs: 5,
        }
    }
}

/// Listener for the liveness/readiness service.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,

    /// Request timeout in seconds.
    pub request_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            request_timeout_secs: 10,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Default filter directive when `RUST_LOG` is unset.
    pub log_level: String,

    /// Emit JSON log lines instead of the human-readable format.
    pub json_logs: bool,

    /// Expose a Prometheus scrape endpoint.
    pub metrics_enabled: bool,

    /// Address of the Prometheus scrape endpoint.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "resilience_core=info,tower_http=info".to_string(),
            json_logs: false,
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}
