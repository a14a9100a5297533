//! Rate limiting subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming call (key, tier):
//!     → tiered.rs (pick quota for the tier from the current policy)
//!     → limiter.rs (fixed-window count for the key)
//!     → RateDecision { allowed, remaining, reset_at }
//!     → consumer maps a denial to its own error (e.g. HTTP 429)
//! ```
//!
//! # Design Decisions
//! - Fixed windows aligned to `floor(now / window)`; a burst straddling a
//!   boundary can reach twice the quota
//! - Denied requests still count, so the limiter never admits `limit + 1`
//! - Rate-limit errors are never retried by this crate

pub mod limiter;
pub mod quota;
pub mod tiered;

pub use limiter::{RateDecision, RateLimiter, RateWindow};
pub use quota::{QuotaParseError, RateQuota};
pub use tiered::{TierPolicy, TieredRateLimiter};
