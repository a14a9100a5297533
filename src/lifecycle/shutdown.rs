//! Shutdown coordination for background tasks.
//!
//! Background loops (cache sweeper, rate-window purger, reload consumer)
//! are registered by name. On shutdown every loop is signalled, then
//! drained against one shared deadline; loops still running at the
//! deadline are aborted and reported.

use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

struct BackgroundTask {
    name: &'static str,
    handle: JoinHandle<()>,
}

/// Signals and drains the process's background tasks.
///
/// Clones share the same signal and task list.
#[derive(Clone)]
pub struct Shutdown {
    tx: broadcast::Sender<()>,
    tasks: Arc<Mutex<Vec<BackgroundTask>>>,
}

impl Shutdown {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(1);
        Self {
            tx,
            tasks: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.tx.subscribe()
    }

    /// Register a spawned loop so [`drain`](Self::drain) waits for it.
    pub fn track(&self, name: &'static str, handle: JoinHandle<()>) {
        tracing::debug!(task = name, "Background task started");
        self.tasks
            .lock()
            .expect("shutdown task list poisoned")
            .push(BackgroundTask { name, handle });
    }

    /// Names of the tracked tasks, in registration order.
    pub fn tracked(&self) -> Vec<&'static str> {
        self.tasks
            .lock()
            .expect("shutdown task list poisoned")
            .iter()
            .map(|task| task.name)
            .collect()
    }

    /// Signal every subscriber. Safe to call more than once.
    pub fn trigger(&self) {
        let notified = self.tx.send(()).unwrap_or(0);
        tracing::info!(subscribers = notified, "Shutdown triggered");
    }

    /// Wait for the tracked tasks to finish, all within `timeout`.
    ///
    /// Tasks still running at the deadline are aborted. Returns their names.
    pub async fn drain(&self, timeout: Duration) -> Vec<&'static str> {
        let tasks = std::mem::take(&mut *self.tasks.lock().expect("shutdown task list poisoned"));
        let deadline = tokio::time::Instant::now() + timeout;
        let mut stuck = Vec::new();

        for mut task in tasks {
            match tokio::time::timeout_at(deadline, &mut task.handle).await {
                Ok(Ok(())) => tracing::debug!(task = task.name, "Background task stopped"),
                Ok(Err(e)) => {
                    tracing::error!(task = task.name, error = %e, "Background task failed")
                }
                Err(_) => {
                    task.handle.abort();
                    tracing::warn!(
                        task = task.name,
                        timeout_secs = timeout.as_secs_f64(),
                        "Background task did not stop in time, aborted"
                    );
                    stuck.push(task.name);
                }
            }
        }
        stuck
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_drain_waits_for_signalled_tasks() {
        let shutdown = Shutdown::new();
        for name in ["sweeper", "purger"] {
            let mut rx = shutdown.subscribe();
            shutdown.track(
                name,
                tokio::spawn(async move {
                    let _ = rx.recv().await;
                }),
            );
        }
        assert_eq!(shutdown.tracked(), vec!["sweeper", "purger"]);

        shutdown.trigger();
        assert!(shutdown.drain(Duration::from_secs(1)).await.is_empty());
        assert!(shutdown.tracked().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_drain_aborts_tasks_that_ignore_the_signal() {
        let shutdown = Shutdown::new();
        let mut rx = shutdown.subscribe();
        shutdown.track(
            "polite",
            tokio::spawn(async move {
                let _ = rx.recv().await;
            }),
        );
        let (dropped_tx, dropped_rx) = tokio::sync::oneshot::channel::<()>();
        shutdown.track(
            "stubborn",
            tokio::spawn(async move {
                let _guard = dropped_tx;
                std::future::pending::<()>().await;
            }),
        );

        shutdown.trigger();
        let started = tokio::time::Instant::now();
        let stuck = shutdown.drain(Duration::from_secs(5)).await;

        assert_eq!(stuck, vec!["stubborn"]);
        assert!(started.elapsed() >= Duration::from_secs(5));
        // Aborting drops the task's future
        assert!(dropped_rx.await.is_err());
    }
}
