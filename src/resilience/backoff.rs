//! Exponential backoff with jitter.

use rand::Rng;
use std::time::Duration;

/// Fraction of the delay used as the jitter band on either side.
const JITTER_RATIO: f64 = 0.1;

/// Delay before retrying after failed `attempt` (1-based): `base * 2^(attempt-1)`,
/// capped at `max`. With `jitter` the delay is scaled by a random factor in
/// `[0.9, 1.1]`, after capping.
pub fn calculate_backoff(attempt: u32, base: Duration, max: Duration, jitter: bool) -> Duration {
    if attempt == 0 {
        return Duration::ZERO;
    }

    let exponent = (attempt - 1).min(63) as i32;
    let delay_secs = base.as_secs_f64() * 2f64.powi(exponent);
    let capped = delay_secs.min(max.as_secs_f64());

    let factor = if jitter && capped > 0.0 {
        rand::thread_rng().gen_range((1.0 - JITTER_RATIO)..=(1.0 + JITTER_RATIO))
    } else {
        1.0
    };

    Duration::try_from_secs_f64((capped * factor).max(0.0)).unwrap_or(max)
}
