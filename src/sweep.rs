//! Periodic pruning of expired in-memory state.
//!
//! The sweeper ticks on a fixed interval and runs the supplied task. Shutdown
//! is signalled over a watch channel; a sweep already in progress is given the
//! grace period to finish before the task is aborted.

use std::future::Future;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, timeout, Instant, MissedTickBehavior};
use tracing::{debug, warn};

#[derive(Debug)]
pub struct Sweeper {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl Sweeper {
    /// Spawn the sweep loop. The first sweep runs one `period` after start.
    pub fn spawn<F, Fut>(period: Duration, task: F) -> Self
    where
        F: Fn() -> Fut + Send + 'static,
        Fut: Future<Output = usize> + Send + 'static,
    {
        let (shutdown, mut rx) = watch::channel(false);
        let handle = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let removed = task().await;
                        if removed > 0 {
                            debug!(removed, "sweep removed expired entries");
                        }
                    }
                    changed = rx.changed() => {
                        if changed.is_err() || *rx.borrow() {
                            break;
                        }
                    }
                }
            }
            debug!("sweeper stopped");
        });
        Self { shutdown, handle }
    }

    /// Stop the loop. Returns `false` when it had to be aborted after `grace`.
    pub async fn shutdown(mut self, grace: Duration) -> bool {
        let _ = self.shutdown.send(true);
        if timeout(grace, &mut self.handle).await.is_ok() {
            true
        } else {
            warn!(?grace, "sweeper did not stop in time, aborting");
            self.handle.abort();
            false
        }
    }
}
