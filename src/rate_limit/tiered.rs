//! Tier-aware rate limiting.
//!
//! Tiers only choose the quota; counting is done by the shared
//! [`RateLimiter`]. The policy lives behind an `ArcSwap` so a config reload
//! replaces it without blocking checks in progress.

use arc_swap::ArcSwap;
use std::collections::HashMap;
use std::sync::Arc;

use crate::config::RateLimitConfig;
use crate::error::{ResilienceError, ResilienceResult};
use crate::observability::metrics;
use crate::rate_limit::limiter::{RateDecision, RateLimiter};
use crate::rate_limit::quota::{QuotaParseError, RateQuota};

/// Quotas per subscription tier.
#[derive(Debug, Clone)]
pub struct TierPolicy {
    pub enabled: bool,
    pub default: RateQuota,
    pub tiers: HashMap<String, RateQuota>,
}

impl TierPolicy {
    pub fn from_config(config: &RateLimitConfig) -> Result<Self, QuotaParseError> {
        let default = config.default.parse()?;
        let tiers = config
            .tiers
            .iter()
            .map(|(tier, quota)| Ok((tier.clone(), quota.parse()?)))
            .collect::<Result<_, QuotaParseError>>()?;
        Ok(Self {
            enabled: config.enabled,
            default,
            tiers,
        })
    }

    /// Quota for `tier`; unknown or missing tiers get the default.
    pub fn quota_for(&self, tier: Option<&str>) -> RateQuota {
        tier.and_then(|t| self.tiers.get(t))
            .copied()
            .unwrap_or(self.default)
    }
}

/// Rate limiter that picks the quota from the caller's tier.
pub struct TieredRateLimiter {
    limiter: Arc<RateLimiter>,
    policy: ArcSwap<TierPolicy>,
}

impl TieredRateLimiter {
    pub fn new(limiter: Arc<RateLimiter>, policy: TierPolicy) -> Self {
        Self {
            limiter,
            policy: ArcSwap::from_pointee(policy),
        }
    }

    pub fn from_config(config: &RateLimitConfig) -> Result<Self, QuotaParseError> {
        Ok(Self::new(
            Arc::new(RateLimiter::new()),
            TierPolicy::from_config(config)?,
        ))
    }

    /// The underlying counter, shared with other consumers.
    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    pub fn policy(&self) -> Arc<TierPolicy> {
        self.policy.load_full()
    }

    /// Replace the policy. Windows already open keep their counts.
    pub fn reload(&self, config: &RateLimitConfig) -> Result<(), QuotaParseError> {
        let policy = TierPolicy::from_config(config)?;
        tracing::info!(
            enabled = policy.enabled,
            default = %policy.default,
            tiers = policy.tiers.len(),
            "Rate-limit policy reloaded"
        );
        self.policy.store(Arc::new(policy));
        Ok(())
    }

    /// Count a request for `key` against the quota of `tier`.
    pub fn check(&self, key: &str, tier: Option<&str>) -> RateDecision {
        let policy = self.policy.load();
        let quota = policy.quota_for(tier);

        if !policy.enabled {
            return RateDecision {
                allowed: true,
                remaining: quota.max_requests,
                reset_at: 0,
                limit: quota.max_requests,
            };
        }

        let decision = self
            .limiter
            .check_rate_limit(key, quota.max_requests, quota.window_secs());

        let tier_label = tier.unwrap_or("default");
        metrics::record_rate_limit(tier_label, decision.allowed);
        if !decision.allowed {
            tracing::warn!(
                key = %key,
                tier = tier_label,
                limit = decision.limit,
                reset_at = decision.reset_at,
                "Rate limit exceeded"
            );
        }
        decision
    }

    /// Like [`check`](Self::check), but a denial becomes
    /// `ResilienceError::RateLimitExceeded`.
    pub fn enforce(&self, key: &str, tier: Option<&str>) -> ResilienceResult<RateDecision> {
        let decision = self.check(key, tier);
        if decision.allowed {
            Ok(decision)
        } else {
            Err(ResilienceError::RateLimitExceeded {
                key: key.to_string(),
                limit: decision.limit,
                reset_at: decision.reset_at,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::Clock;
    use std::time::Duration;

    fn config() -> RateLimitConfig {
        RateLimitConfig {
            enabled: true,
            default: "2/minute".into(),
            tiers: HashMap::from([("pro".to_string(), "5/minute".to_string())]),
            purge_interval_secs: 60,
        }
    }

    fn limiter() -> TieredRateLimiter {
        let counter = RateLimiter::with_clock(Clock::anchored_at(Duration::from_secs(600)));
        TieredRateLimiter::new(Arc::new(counter), TierPolicy::from_config(&config()).unwrap())
    }

    #[tokio::test(start_paused = true)]
    async fn test_tier_selects_quota() {
        let limiter = limiter();
        assert_eq!(limiter.check("alice", Some("pro")).remaining, 4);
        assert_eq!(limiter.check("bob", None).remaining, 1);
        assert_eq!(limiter.check("carol", Some("unknown")).limit, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_enforce_returns_rate_limit_error() {
        let limiter = limiter();
        limiter.enforce("bob", None).unwrap();
        limiter.enforce("bob", None).unwrap();

        match limiter.enforce("bob", None) {
            Err(ResilienceError::RateLimitExceeded { key, limit, reset_at }) => {
                assert_eq!(key, "bob");
                assert_eq!(limit, 2);
                assert_eq!(reset_at, 660);
            }
            other => panic!("expected rate limit error, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_reload_swaps_policy() {
        let limiter = limiter();
        let mut updated = config();
        updated.enabled = false;
        limiter.reload(&updated).unwrap();

        for _ in 0..10 {
            assert!(limiter.check("bob", None).allowed);
        }

        updated.default = "nonsense".into();
        assert!(limiter.reload(&updated).is_err());
        assert!(!limiter.policy().enabled);
    }
}
