//! Monotonic clock anchored to the Unix epoch.
//!
//! Fixed rate-limit windows need an absolute timestamp (`reset_at`), but wall
//! time can jump. The clock samples `SystemTime` once and advances it with
//! tokio's monotonic `Instant`, which also lets tests drive it with
//! `tokio::time::pause`/`advance`.

use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::time::Instant;

#[derive(Debug, Clone, Copy)]
pub struct Clock {
    origin: Instant,
    origin_unix: Duration,
}

impl Clock {
    pub fn new() -> Self {
        let origin_unix = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        Self::anchored_at(origin_unix)
    }

    /// A clock whose current reading is `unix` since the epoch.
    pub fn anchored_at(unix: Duration) -> Self {
        Self {
            origin: Instant::now(),
            origin_unix: unix,
        }
    }

    /// Time since the Unix epoch, never moving backwards.
    pub fn now_unix(&self) -> Duration {
        self.origin_unix + self.origin.elapsed()
    }

    pub fn now_unix_secs(&self) -> u64 {
        self.now_unix().as_secs()
    }
}

impl Default for Clock {
    fn default() -> Self {
        Self::new()
    }
}
