//! Metrics collection and exposition.
//!
//! # Metrics
//! - `cache_lookups_total` (counter): lookups by result (hit, miss, stale)
//! - `cache_entries` (gauge): live entries in the memory tier
//! - `cache_coalesced_waits_total` (counter): callers that joined an in-flight producer
//! - `cache_backend_degraded` (gauge): 1 while the shared backend is bypassed
//! - `rate_limit_decisions_total` (counter): decisions by tier and outcome
//! - `circuit_breaker_state` (gauge): 0=closed, 1=half_open, 2=open per resource
//! - `circuit_breaker_rejections_total` (counter): calls refused while open
//! - `retry_attempts_total` (counter): attempts by outcome
//! - `recoveries_total` (counter): recovered calls by strategy
//! - `health_probe_duration_seconds` (histogram) and `health_probe_healthy` (gauge)
//!
//! # Design Decisions
//! - Recording goes through the `metrics` facade; without an installed
//!   recorder every call is a no-op, so tests need no setup
//! - The Prometheus exporter is opt-in via configuration

use std::net::SocketAddr;
use std::time::Duration;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus recorder and its scrape listener.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_cache_lookup(result: &'static str) {
    counter!("cache_lookups_total", "result" => result).increment(1);
}

pub fn record_cache_size(entries: usize) {
    gauge!("cache_entries").set(entries as f64);
}

pub fn record_coalesced_wait() {
    counter!("cache_coalesced_waits_total").increment(1);
}

pub fn record_backend_degraded(degraded: bool) {
    gauge!("cache_backend_degraded").set(if degraded { 1.0 } else { 0.0 });
}

pub fn record_rate_limit(tier: &str, allowed: bool) {
    let outcome = if allowed { "allowed" } else { "denied" };
    counter!(
        "rate_limit_decisions_total",
        "tier" => tier.to_string(),
        "outcome" => outcome
    )
    .increment(1);
}

pub fn record_breaker_state(resource: &str, state: u8) {
    gauge!("circuit_breaker_state", "resource" => resource.to_string()).set(f64::from(state));
}

pub fn record_breaker_rejection(resource: &str) {
    counter!("circuit_breaker_rejections_total", "resource" => resource.to_string()).increment(1);
}

pub fn record_retry_attempt(outcome: &'static str) {
    counter!("retry_attempts_total", "outcome" => outcome).increment(1);
}

pub fn record_recovery(strategy: &'static str) {
    counter!("recoveries_total", "strategy" => strategy).increment(1);
}

pub fn record_health_probe(name: &str, healthy: bool, latency: Duration) {
    histogram!("health_probe_duration_seconds", "check" => name.to_string())
        .record(latency.as_secs_f64());
    gauge!("health_probe_healthy", "check" => name.to_string())
        .set(if healthy { 1.0 } else { 0.0 });
}
