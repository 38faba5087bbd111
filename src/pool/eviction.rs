// ABOUTME: Background eviction sweep for the browser pool
// ABOUTME: Periodically validates a sample of idle resources, destroys stale ones and replenishes to min

//! Eviction sweep for the resource pool.
//!
//! The `EvictionSweeper` runs as a background task that:
//! - Wakes at the configured `eviction_interval`
//! - Tests up to `eviction_sample` idle resources per run
//! - Destroys resources that fail validation
//! - Creates replacements until the pool holds `min` resources
//!
//! The task only keeps a weak reference to the pool, so dropping the last
//! `Pool` handle also ends the sweep.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use super::engine::{Pool, PoolInner};
use super::factory::ResourceFactory;

/// Background sweeper that evicts stale idle resources
pub struct EvictionSweeper {
    /// Interval between sweeps
    interval: Duration,

    /// Shutdown flag for graceful termination
    shutdown: Arc<AtomicBool>,

    /// Wakes the sweep loop when stopping
    wake: Arc<Notify>,

    /// Handle to the background task
    handle: Option<JoinHandle<()>>,
}

impl EvictionSweeper {
    /// Create a sweeper with the given interval
    #[must_use]
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            shutdown: Arc::new(AtomicBool::new(false)),
            wake: Arc::new(Notify::new()),
            handle: None,
        }
    }

    /// Start sweeping the given pool
    pub(crate) fn start<F: ResourceFactory>(&mut self, pool: Weak<PoolInner<F>>) {
        self.shutdown.store(false, Ordering::SeqCst);

        let shutdown = Arc::clone(&self.shutdown);
        let wake = Arc::clone(&self.wake);
        let interval = self.interval;

        let handle = tokio::spawn(async move {
            Self::sweep_loop(pool, interval, shutdown, wake).await;
        });

        self.handle = Some(handle);
        info!(interval_ms = %self.interval.as_millis(), "Eviction sweeper started");
    }

    /// Stop the sweeper and wait for the task to finish
    pub async fn stop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        self.wake.notify_one();

        if let Some(handle) = self.handle.take() {
            let _ = tokio::time::timeout(Duration::from_secs(5), handle).await;
        }

        debug!("Eviction sweeper stopped");
    }

    /// Check if the sweeper is currently running
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.handle.is_some() && !self.shutdown.load(Ordering::SeqCst)
    }

    async fn sweep_loop<F: ResourceFactory>(
        pool: Weak<PoolInner<F>>,
        interval: Duration,
        shutdown: Arc<AtomicBool>,
        wake: Arc<Notify>,
    ) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                () = wake.notified() => {}
            }

            if shutdown.load(Ordering::SeqCst) {
                break;
            }

            let Some(inner) = pool.upgrade() else {
                debug!("Pool dropped, ending eviction sweep");
                break;
            };

            let evicted = Pool::from_inner(inner).run_eviction().await;
            if evicted > 0 {
                debug!(evicted, "Eviction sweep destroyed stale resources");
            }
        }
    }
}

impl Drop for EvictionSweeper {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}
