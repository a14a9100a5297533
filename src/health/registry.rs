//! Named health probes run concurrently with a per-probe deadline.
//!
//! # Responsibilities
//! - Keep the set of registered probes
//! - Run them all at once, each in its own task with its own timeout
//! - Fold errors, timeouts and panics into per-probe results
//!
//! `run_checks` never fails; an unhealthy dependency is data in the report.

use async_trait::async_trait;
use dashmap::DashMap;
use futures_util::future::join_all;
use serde::Serialize;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use crate::config::HealthConfig;
use crate::observability::metrics;

/// Error string recorded for a probe that missed its deadline.
pub const TIMEOUT_ERROR: &str = "timeout";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthCheckResult {
    pub name: String,
    pub healthy: bool,
    pub latency_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Aggregate of one `run_checks` pass.
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub checks: BTreeMap<String, HealthCheckResult>,
}

impl HealthReport {
    pub fn is_healthy(&self) -> bool {
        self.status == HealthStatus::Healthy
    }
}

/// A single dependency check. `Err` carries a human-readable reason.
#[async_trait]
pub trait HealthProbe: Send + Sync {
    async fn check(&self) -> Result<(), String>;
}

struct FnProbe<F>(F);

#[async_trait]
impl<F, Fut> HealthProbe for FnProbe<F>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), String>> + Send + 'static,
{
    async fn check(&self) -> Result<(), String> {
        (self.0)().await
    }
}

pub struct HealthRegistry {
    probes: DashMap<String, Arc<dyn HealthProbe>>,
    probe_timeout: Duration,
}

impl Default for HealthRegistry {
    fn default() -> Self {
        Self::new(Duration::from_secs(5))
    }
}

impl HealthRegistry {
    pub fn new(probe_timeout: Duration) -> Self {
        Self {
            probes: DashMap::new(),
            probe_timeout,
        }
    }

    pub fn from_config(config: &HealthConfig) -> Self {
        Self::new(Duration::from_secs(config.probe_timeout_secs))
    }

    /// Register `probe` under `name`, replacing any probe with that name.
    pub fn register_check(&self, name: impl Into<String>, probe: Arc<dyn HealthProbe>) {
        let name = name.into();
        tracing::debug!(probe = %name, "Registered health probe");
        self.probes.insert(name, probe);
    }

    /// Register an async closure as a probe.
    pub fn register_fn<F, Fut>(&self, name: impl Into<String>, f: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), String>> + Send + 'static,
    {
        self.register_check(name, Arc::new(FnProbe(f)));
    }

    pub fn unregister(&self, name: &str) -> bool {
        self.probes.remove(name).is_some()
    }

    pub fn len(&self) -> usize {
        self.probes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.probes.is_empty()
    }

    /// Run every probe concurrently. Healthy overall iff every probe is healthy.
    pub async fn run_checks(&self) -> HealthReport {
        let probes: Vec<_> = self
            .probes
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();

        let timeout = self.probe_timeout;
        let results = join_all(
            probes
                .into_iter()
                .map(|(name, probe)| run_probe(name, probe, timeout)),
        )
        .await;

        let status = if results.iter().all(|r| r.healthy) {
            HealthStatus::Healthy
        } else {
            HealthStatus::Unhealthy
        };

        HealthReport {
            status,
            checks: results.into_iter().map(|r| (r.name.clone(), r)).collect(),
        }
    }
}

async fn run_probe(name: String, probe: Arc<dyn HealthProbe>, timeout: Duration) -> HealthCheckResult {
    let start = Instant::now();
    let mut task = tokio::spawn(async move { probe.check().await });

    let error = match tokio::time::timeout(timeout, &mut task).await {
        Ok(Ok(Ok(()))) => None,
        Ok(Ok(Err(reason))) => Some(reason),
        Ok(Err(join_err)) if join_err.is_panic() => Some("probe panicked".to_string()),
        Ok(Err(_)) => Some("probe cancelled".to_string()),
        Err(_) => {
            task.abort();
            Some(TIMEOUT_ERROR.to_string())
        }
    };
    let latency = start.elapsed();

    let healthy = error.is_none();
    metrics::record_health_probe(&name, healthy, latency);
    if let Some(reason) = &error {
        tracing::warn!(probe = %name, error = %reason, latency_ms = latency.as_millis() as u64, "Health probe failed");
    }

    HealthCheckResult {
        name,
        healthy,
        latency_ms: latency.as_millis() as u64,
        error,
    }
}
