//! Hot reload of the rate-limit policy.
//!
//! Only `[rate_limit]` is applied while running. On every change the whole
//! file is re-loaded and validated, but only a rate-limit section that
//! differs from the last one forwarded is sent on. Editors emit several
//! modify events per save; all but the first collapse into no-ops.

use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

use crate::config::loader::load_config;
use crate::config::schema::RateLimitConfig;

struct ReloadState {
    path: PathBuf,
    applied: Mutex<RateLimitConfig>,
    update_tx: mpsc::UnboundedSender<RateLimitConfig>,
}

impl ReloadState {
    fn reload(&self) -> bool {
        let config = match load_config(&self.path) {
            Ok(config) => config,
            Err(e) => {
                tracing::error!(
                    path = ?self.path,
                    error = %e,
                    "Rejected config change, keeping current rate limits"
                );
                return false;
            }
        };

        let mut applied = self.applied.lock().expect("config watcher mutex poisoned");
        if *applied == config.rate_limit {
            tracing::debug!(path = ?self.path, "Config changed, rate limits unchanged");
            return false;
        }

        tracing::info!(
            enabled = config.rate_limit.enabled,
            default = %config.rate_limit.default,
            tiers = config.rate_limit.tiers.len(),
            "Rate-limit section changed"
        );
        *applied = config.rate_limit.clone();
        self.update_tx.send(config.rate_limit).is_ok()
    }
}

/// Watches the config file and forwards changed `[rate_limit]` sections.
#[derive(Clone)]
pub struct RateLimitWatcher {
    state: Arc<ReloadState>,
}

impl RateLimitWatcher {
    /// `current` is the section already in effect; identical reloads are dropped.
    pub fn new(
        path: &Path,
        current: RateLimitConfig,
    ) -> (Self, mpsc::UnboundedReceiver<RateLimitConfig>) {
        let (update_tx, update_rx) = mpsc::unbounded_channel();
        let state = Arc::new(ReloadState {
            path: path.to_path_buf(),
            applied: Mutex::new(current),
            update_tx,
        });
        (Self { state }, update_rx)
    }

    /// Re-read the file now. Returns whether an update was sent.
    pub fn reload(&self) -> bool {
        self.state.reload()
    }

    /// Start watching the file. The returned handle must be kept alive.
    pub fn run(&self) -> Result<RecommendedWatcher, notify::Error> {
        let state = self.state.clone();
        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) if event.kind.is_modify() || event.kind.is_create() => {
                    state.reload();
                }
                Ok(_) => {}
                Err(e) => tracing::error!(error = ?e, "Config watch error"),
            },
            Config::default().with_poll_interval(Duration::from_secs(2)),
        )?;

        watcher.watch(&self.state.path, RecursiveMode::NonRecursive)?;
        tracing::info!(path = ?self.state.path, "Watching config for rate-limit changes");
        Ok(watcher)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::load_config;

    fn write_config(file: &tempfile::NamedTempFile, default_quota: &str) {
        let content = format!(
            r#"
            [cache]
            ttl_secs = 60

            [rate_limit]
            default = "{default_quota}"
            "#
        );
        std::fs::write(file.path(), content).unwrap();
    }

    #[test]
    fn test_forwards_only_changed_rate_limits() {
        let file = tempfile::NamedTempFile::new().unwrap();
        write_config(&file, "10/minute");
        let current = load_config(file.path()).unwrap().rate_limit;
        let (watcher, mut updates) = RateLimitWatcher::new(file.path(), current);

        // Same content, as after a duplicate modify event
        assert!(!watcher.reload());

        write_config(&file, "20/minute");
        assert!(watcher.reload());
        assert!(!watcher.reload());

        let update = updates.try_recv().unwrap();
        assert_eq!(update.default, "20/minute");
        assert!(updates.try_recv().is_err());
    }

    #[test]
    fn test_invalid_change_is_ignored() {
        let file = tempfile::NamedTempFile::new().unwrap();
        write_config(&file, "10/minute");
        let current = load_config(file.path()).unwrap().rate_limit;
        let (watcher, mut updates) = RateLimitWatcher::new(file.path(), current);

        write_config(&file, "ten/minute");
        assert!(!watcher.reload());
        assert!(updates.try_recv().is_err());

        // The rejected edit did not replace the applied section
        write_config(&file, "10/minute");
        assert!(!watcher.reload());
    }
}
