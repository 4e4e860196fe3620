//! Background idle-bucket eviction.
//!
//! The request path never sweeps; a tokio task does it on a fixed interval.
//! Sweeps take the store's shard locks, the same exclusion admission checks
//! hold, so a bucket is never removed mid-check.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::debug;

use crate::rate_limit::store::BucketStore;
use crate::ConfigError;

/// How often to sweep and how long a bucket may sit idle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EvictionConfig {
    interval: Duration,
    idle_threshold: Duration,
}

impl EvictionConfig {
    /// Create a config; both durations must be non-zero.
    pub fn new(interval: Duration, idle_threshold: Duration) -> Result<Self, ConfigError> {
        if interval.is_zero() {
            return Err(ConfigError::InvalidEvictionInterval(interval));
        }
        if idle_threshold.is_zero() {
            return Err(ConfigError::InvalidIdleThreshold(idle_threshold));
        }
        Ok(Self { interval, idle_threshold })
    }

    /// Time between sweeps.
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Buckets idle for longer than this are removed.
    pub fn idle_threshold(&self) -> Duration {
        self.idle_threshold
    }
}

/// Handle to a running evictor.
///
/// Dropping the handle also stops the task, at its next wakeup.
#[derive(Debug)]
pub struct EvictorHandle {
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl EvictorHandle {
    /// Stop the evictor and wait for it to exit.
    pub async fn shutdown(self) {
        let Self { shutdown, task } = self;
        let _ = shutdown.send(());
        let _ = task.await;
    }

    /// Whether the task has exited (shut down, or its store was dropped).
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

/// Spawn a task that evicts idle buckets from `store` every `config.interval()`.
///
/// The task keeps only a weak reference, so it ends on its own once the store
/// is dropped.
///
/// # Panics
///
/// Panics when called outside a tokio runtime; [`RateLimiter::start_eviction`](crate::RateLimiter::start_eviction)
/// checks for one first.
pub fn spawn_evictor(store: &Arc<BucketStore>, config: EvictionConfig) -> EvictorHandle {
    store.warn_if_lossy_threshold(config.idle_threshold);
    let store = Arc::downgrade(store);
    let (shutdown, mut stop) = oneshot::channel::<()>();

    let task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = &mut stop => break,
                _ = ticker.tick() => {
                    let Some(store) = store.upgrade() else { break };
                    store.evict_idle(config.idle_threshold);
                }
            }
        }
        debug!(target: "tollgate::eviction", "evictor stopped");
    });

    EvictorHandle { shutdown, task }
}
