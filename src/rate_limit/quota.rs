//! `requests/period` quota strings.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// A request allowance per fixed window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateQuota {
    pub max_requests: u64,
    pub window: Duration,
}

impl RateQuota {
    pub fn new(max_requests: u64, window: Duration) -> Self {
        Self {
            max_requests,
            window,
        }
    }

    pub fn window_secs(&self) -> u64 {
        self.window.as_secs()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QuotaParseError {
    #[error("expected '<requests>/<period>', got '{0}'")]
    Format(String),

    #[error("request count must be a positive integer, got '{0}'")]
    Count(String),

    #[error("unknown period '{0}' (use second, minute, hour or day)")]
    Period(String),
}

impl FromStr for RateQuota {
    type Err = QuotaParseError;

    /// Parse strings such as `"100/hour"`, `"10/5m"` or `"1000 / days"`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (count, period) = s
            .split_once('/')
            .ok_or_else(|| QuotaParseError::Format(s.to_string()))?;

        let count = count.trim();
        let max_requests = match count.parse::<u64>() {
            Ok(n) if n > 0 => n,
            _ => return Err(QuotaParseError::Count(count.to_string())),
        };

        let period = period.trim();
        let split = period
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(period.len());
        let (multiplier, unit) = period.split_at(split);
        let multiplier = if multiplier.is_empty() {
            1
        } else {
            match multiplier.parse::<u64>() {
                Ok(n) if n > 0 => n,
                _ => return Err(QuotaParseError::Period(period.to_string())),
            }
        };

        let unit_secs = match unit.trim().to_ascii_lowercase().as_str() {
            "s" | "sec" | "secs" | "second" | "seconds" => 1,
            "m" | "min" | "mins" | "minute" | "minutes" => 60,
            "h" | "hr" | "hrs" | "hour" | "hours" => 3_600,
            "d" | "day" | "days" => 86_400,
            _ => return Err(QuotaParseError::Period(period.to_string())),
        };

        let window_secs = multiplier
            .checked_mul(unit_secs)
            .ok_or_else(|| QuotaParseError::Period(period.to_string()))?;

        Ok(Self::new(max_requests, Duration::from_secs(window_secs)))
    }
}

impl fmt::Display for RateQuota {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}s", self.max_requests, self.window_secs())
    }
}
