//! Circuit breaker for dependency protection.
//!
//! # States
//! - Closed: normal operation, calls pass through
//! - Open: dependency assumed down, calls fail fast with `CircuitOpen`
//! - Half-Open: one trial call decides whether to close or reopen
//!
//! # State Transitions
//! ```text
//! Closed → Open: consecutive_failures >= failure_threshold
//! Open → Half-Open: first call after reset_timeout has elapsed since opened_at
//! Half-Open → Closed: trial call succeeds (consecutive_failures = 0)
//! Half-Open → Open: trial call fails (opened_at = now)
//! ```
//!
//! # Design Decisions
//! - One breaker per resource name, shared by every caller via [`BreakerRegistry`]
//! - State lives behind a std mutex that is never held across an await
//! - Only the trial permit may move a Half-Open breaker; late results from
//!   calls admitted before the breaker opened are ignored
//! - Permanent errors mean the dependency answered and count as success

use dashmap::DashMap;
use serde::Serialize;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;

use crate::config::CircuitBreakerConfig;
use crate::error::{ResilienceError, ResilienceResult};
use crate::observability::metrics;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitStatus {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
        }
    }

    fn gauge(&self) -> u8 {
        match self {
            Self::Closed => 0,
            Self::HalfOpen => 1,
            Self::Open => 2,
        }
    }
}

/// Thresholds for one breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BreakerSettings {
    pub failure_threshold: u32,
    pub reset_timeout: Duration,
}

impl Default for BreakerSettings {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout: Duration::from_secs(30),
        }
    }
}

impl BreakerSettings {
    pub fn new(failure_threshold: u32, reset_timeout: Duration) -> Self {
        Self {
            failure_threshold: failure_threshold.max(1),
            reset_timeout,
        }
    }

    /// Settings for `resource`, applying any per-resource override.
    pub fn for_resource(config: &CircuitBreakerConfig, resource: &str) -> Self {
        let overrides = config.resources.get(resource);
        let threshold = overrides
            .and_then(|o| o.failure_threshold)
            .unwrap_or(config.failure_threshold);
        let reset = overrides
            .and_then(|o| o.reset_timeout_secs)
            .unwrap_or(config.reset_timeout_secs);
        Self::new(threshold, Duration::from_secs(reset))
    }
}

#[derive(Debug)]
struct BreakerState {
    status: CircuitStatus,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    trial_in_flight: bool,
}

/// Point-in-time view of a breaker.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BreakerSnapshot {
    pub resource_name: String,
    pub status: CircuitStatus,
    pub consecutive_failures: u32,
    #[serde(skip)]
    pub opened_at: Option<Instant>,
    /// Milliseconds until an Open breaker admits its trial call.
    pub retry_after_ms: Option<u64>,
}

/// Circuit breaker guarding one named resource.
#[derive(Debug)]
pub struct CircuitBreaker {
    resource: String,
    settings: BreakerSettings,
    state: Mutex<BreakerState>,
}

impl CircuitBreaker {
    pub fn new(resource: impl Into<String>, settings: BreakerSettings) -> Self {
        Self {
            resource: resource.into(),
            settings,
            state: Mutex::new(BreakerState {
                status: CircuitStatus::Closed,
                consecutive_failures: 0,
                opened_at: None,
                trial_in_flight: false,
            }),
        }
    }

    pub fn resource(&self) -> &str {
        &self.resource
    }

    pub fn settings(&self) -> BreakerSettings {
        self.settings
    }

    fn lock(&self) -> MutexGuard<'_, BreakerState> {
        self.state.lock().expect("circuit breaker mutex poisoned")
    }

    /// Current status. An Open breaker whose timeout has elapsed still reads
    /// as Open until a call claims the trial.
    pub fn status(&self) -> CircuitStatus {
        self.lock().status
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        let state = self.lock();
        let retry_after_ms = match (state.status, state.opened_at) {
            (CircuitStatus::Open, Some(opened_at)) => Some(
                self.settings
                    .reset_timeout
                    .saturating_sub(opened_at.elapsed())
                    .as_millis() as u64,
            ),
            _ => None,
        };
        BreakerSnapshot {
            resource_name: self.resource.clone(),
            status: state.status,
            consecutive_failures: state.consecutive_failures,
            opened_at: state.opened_at,
            retry_after_ms,
        }
    }

    /// Ask to make a call. The returned permit must be resolved with the
    /// call's outcome; dropping an unresolved trial permit frees the trial
    /// slot for the next caller.
    pub fn try_acquire(&self) -> ResilienceResult<CallPermit<'_>> {
        let mut state = self.lock();
        let status = state.status;
        match status {
            CircuitStatus::Closed => Ok(CallPermit::new(self, false)),
            CircuitStatus::Open => {
                let elapsed = state
                    .opened_at
                    .map(|t| t.elapsed())
                    .unwrap_or(self.settings.reset_timeout);
                if elapsed >= self.settings.reset_timeout {
                    state.status = CircuitStatus::HalfOpen;
                    state.trial_in_flight = true;
                    drop(state);
                    tracing::info!(resource = %self.resource, "Circuit breaker half-open, admitting trial call");
                    metrics::record_breaker_state(&self.resource, CircuitStatus::HalfOpen.gauge());
                    Ok(CallPermit::new(self, true))
                } else {
                    drop(state);
                    Err(self.reject(self.settings.reset_timeout - elapsed))
                }
            }
            CircuitStatus::HalfOpen => {
                if state.trial_in_flight {
                    drop(state);
                    Err(self.reject(Duration::ZERO))
                } else {
                    state.trial_in_flight = true;
                    Ok(CallPermit::new(self, true))
                }
            }
        }
    }

    fn reject(&self, retry_after: Duration) -> ResilienceError {
        metrics::record_breaker_rejection(&self.resource);
        tracing::debug!(resource = %self.resource, ?retry_after, "Circuit open, rejecting call");
        ResilienceError::CircuitOpen {
            resource: self.resource.clone(),
            retry_after,
        }
    }

    /// Run `op` through the breaker. The operation is not invoked while the
    /// breaker is Open.
    pub async fn call<T, F, Fut>(&self, op: F) -> ResilienceResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = ResilienceResult<T>>,
    {
        let permit = self.try_acquire()?;
        let result = op().await;
        permit.record(&result);
        result
    }

    /// Force the breaker back to Closed.
    pub fn reset(&self) {
        let mut state = self.lock();
        let previous = state.status;
        *state = BreakerState {
            status: CircuitStatus::Closed,
            consecutive_failures: 0,
            opened_at: None,
            trial_in_flight: false,
        };
        drop(state);
        if previous != CircuitStatus::Closed {
            tracing::info!(resource = %self.resource, "Circuit breaker manually reset");
            metrics::record_breaker_state(&self.resource, CircuitStatus::Closed.gauge());
        }
    }

    fn on_success(&self, trial: bool) {
        let mut state = self.lock();
        let status = state.status;
        match (status, trial) {
            (CircuitStatus::Closed, _) => state.consecutive_failures = 0,
            (CircuitStatus::HalfOpen, true) => {
                state.status = CircuitStatus::Closed;
                state.consecutive_failures = 0;
                state.opened_at = None;
                state.trial_in_flight = false;
                drop(state);
                tracing::info!(resource = %self.resource, "Circuit breaker closed after successful trial");
                metrics::record_breaker_state(&self.resource, CircuitStatus::Closed.gauge());
            }
            _ => {}
        }
    }

    fn on_failure(&self, trial: bool) {
        let mut state = self.lock();
        let status = state.status;
        match (status, trial) {
            (CircuitStatus::Closed, _) => {
                state.consecutive_failures = state.consecutive_failures.saturating_add(1);
                if state.consecutive_failures >= self.settings.failure_threshold {
                    state.status = CircuitStatus::Open;
                    state.opened_at = Some(Instant::now());
                    let failures = state.consecutive_failures;
                    drop(state);
                    tracing::warn!(
                        resource = %self.resource,
                        failures,
                        reset_timeout = ?self.settings.reset_timeout,
                        "Circuit breaker opened"
                    );
                    metrics::record_breaker_state(&self.resource, CircuitStatus::Open.gauge());
                }
            }
            (CircuitStatus::HalfOpen, true) => {
                state.status = CircuitStatus::Open;
                state.opened_at = Some(Instant::now());
                state.trial_in_flight = false;
                state.consecutive_failures = state.consecutive_failures.saturating_add(1);
                drop(state);
                tracing::warn!(resource = %self.resource, "Trial call failed, circuit breaker reopened");
                metrics::record_breaker_state(&self.resource, CircuitStatus::Open.gauge());
            }
            _ => {}
        }
    }

    fn release_trial(&self) {
        let mut state = self.lock();
        if state.status == CircuitStatus::HalfOpen {
            state.trial_in_flight = false;
        }
    }
}

/// Admission to call through a [`CircuitBreaker`].
#[must_use = "a permit must be resolved with the call outcome"]
#[derive(Debug)]
pub struct CallPermit<'a> {
    breaker: &'a CircuitBreaker,
    trial: bool,
    resolved: bool,
}

impl<'a> CallPermit<'a> {
    fn new(breaker: &'a CircuitBreaker, trial: bool) -> Self {
        Self {
            breaker,
            trial,
            resolved: false,
        }
    }

    /// Whether this permit is the Half-Open trial.
    pub fn is_trial(&self) -> bool {
        self.trial
    }

    pub fn success(mut self) {
        self.resolved = true;
        self.breaker.on_success(self.trial);
    }

    pub fn failure(mut self) {
        self.resolved = true;
        self.breaker.on_failure(self.trial);
    }

    /// Resolve from a call result.
    pub fn record<T>(self, result: &ResilienceResult<T>) {
        match result {
            Err(err) if err.trips_breaker() => self.failure(),
            _ => self.success(),
        }
    }
}

impl Drop for CallPermit<'_> {
    fn drop(&mut self) {
        if !self.resolved && self.trial {
            self.breaker.release_trial();
        }
    }
}

/// Breakers keyed by resource name, created on first use.
#[derive(Debug, Default)]
pub struct BreakerRegistry {
    breakers: DashMap<String, Arc<CircuitBreaker>>,
    config: CircuitBreakerConfig,
}

impl BreakerRegistry {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            breakers: DashMap::new(),
            config,
        }
    }

    /// The breaker for `resource`; every caller gets the same instance.
    pub fn get(&self, resource: &str) -> Arc<CircuitBreaker> {
        if let Some(breaker) = self.breakers.get(resource) {
            return breaker.clone();
        }
        self.breakers
            .entry(resource.to_string())
            .or_insert_with(|| {
                let settings = BreakerSettings::for_resource(&self.config, resource);
                tracing::debug!(resource, ?settings, "Created circuit breaker");
                metrics::record_breaker_state(resource, CircuitStatus::Closed.gauge());
                Arc::new(CircuitBreaker::new(resource, settings))
            })
            .clone()
    }

    /// Snapshots of every known breaker, ordered by resource name.
    pub fn snapshots(&self) -> Vec<BreakerSnapshot> {
        let mut snapshots: Vec<_> = self.breakers.iter().map(|b| b.snapshot()).collect();
        snapshots.sort_by(|a, b| a.resource_name.cmp(&b.resource_name));
        snapshots
    }

    /// Reset the named breaker. Returns false if it does not exist.
    pub fn reset(&self, resource: &str) -> bool {
        match self.breakers.get(resource) {
            Some(breaker) => {
                breaker.reset();
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.breakers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.breakers.is_empty()
    }
}
