//! Configuration validation.
//!
//! Serde handles syntax; this module checks value ranges and parses the
//! rate strings. All problems are collected, not just the first.

use std::fmt;
use std::time::Duration;

use crate::config::schema::ResilienceConfig;
use crate::rate_limit::quota::RateQuota;

/// A single semantic problem in a configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Validate a configuration, returning every error found.
pub fn validate_config(config: &ResilienceConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.cache.ttl_secs == 0 {
        errors.push(ValidationError::new("cache.ttl_secs", "must be greater than 0"));
    }

    if config.retry.max_attempts == 0 {
        errors.push(ValidationError::new("retry.max_attempts", "must be at least 1"));
    }
    let base_ok = check_delay(&mut errors, "retry.base_delay_secs", config.retry.base_delay_secs);
    let max_ok = check_delay(&mut errors, "retry.max_delay_secs", config.retry.max_delay_secs);
    if base_ok && max_ok && config.retry.max_delay_secs < config.retry.base_delay_secs {
        errors.push(ValidationError::new(
            "retry.max_delay_secs",
            "must not be smaller than base_delay_secs",
        ));
    }

    let breaker = &config.circuit_breaker;
    if breaker.failure_threshold == 0 {
        errors.push(ValidationError::new(
            "circuit_breaker.failure_threshold",
            "must be at least 1",
        ));
    }
    for (name, over) in &breaker.resources {
        if over.failure_threshold == Some(0) {
            errors.push(ValidationError::new(
                format!("circuit_breaker.resources.{name}.failure_threshold"),
                "must be at least 1",
            ));
        }
    }

    if let Err(e) = config.rate_limit.default.parse::<RateQuota>() {
        errors.push(ValidationError::new("rate_limit.default", e.to_string()));
    }
    for (tier, quota) in &config.rate_limit.tiers {
        if let Err(e) = quota.parse::<RateQuota>() {
            errors.push(ValidationError::new(format!("rate_limit.tiers.{tier}"), e.to_string()));
        }
    }

    if config.health.probe_timeout_secs == 0 {
        errors.push(ValidationError::new(
            "health.probe_timeout_secs",
            "must be greater than 0",
        ));
    }

    if config.observability.metrics_enabled
        && config
            .observability
            .metrics_address
            .parse::<std::net::SocketAddr>()
            .is_err()
    {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            "is not a valid socket address",
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// A delay must convert to a `Duration`: finite, non-negative and in range.
fn check_delay(errors: &mut Vec<ValidationError>, field: &str, secs: f64) -> bool {
    if Duration::try_from_secs_f64(secs).is_err() {
        errors.push(ValidationError::new(
            field,
            "must be a finite, non-negative number of seconds",
        ));
        return false;
    }
    true
}
