// ABOUTME: Metrics and observability for the browser pool
//
// Tracks:
// - Creations: successes and factory failures
// - Destructions: successes and destructor failures
// - Evictions: resources dropped by borrow-time or sweep validation
// - Checkouts: acquired, released, queue timeouts

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Pool-level counters
#[derive(Debug, Default)]
pub struct PoolMetrics {
    pub created: AtomicU64,
    pub creation_failures: AtomicU64,
    pub destroyed: AtomicU64,
    pub destroy_failures: AtomicU64,
    pub evicted: AtomicU64,
    pub acquired: AtomicU64,
    pub released: AtomicU64,
    pub exhausted: AtomicU64,
}

impl PoolMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn resource_created(&self) {
        self.created.fetch_add(1, Ordering::Relaxed);
    }

    pub fn creation_failed(&self) {
        self.creation_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn resource_destroyed(&self) {
        self.destroyed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn destroy_failed(&self) {
        self.destroy_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn resource_evicted(&self) {
        self.evicted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn resource_acquired(&self) {
        self.acquired.fetch_add(1, Ordering::Relaxed);
    }

    pub fn resource_released(&self) {
        self.released.fetch_add(1, Ordering::Relaxed);
    }

    pub fn acquire_timed_out(&self) {
        self.exhausted.fetch_add(1, Ordering::Relaxed);
    }

    /// Point-in-time copy of every counter
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            created: self.created.load(Ordering::Relaxed),
            creation_failures: self.creation_failures.load(Ordering::Relaxed),
            destroyed: self.destroyed.load(Ordering::Relaxed),
            destroy_failures: self.destroy_failures.load(Ordering::Relaxed),
            evicted: self.evicted.load(Ordering::Relaxed),
            acquired: self.acquired.load(Ordering::Relaxed),
            released: self.released.load(Ordering::Relaxed),
            exhausted: self.exhausted.load(Ordering::Relaxed),
        }
    }
}

/// Plain copy of `PoolMetrics`, suitable for printing or serializing
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub created: u64,
    pub creation_failures: u64,
    pub destroyed: u64,
    pub destroy_failures: u64,
    pub evicted: u64,
    pub acquired: u64,
    pub released: u64,
    pub exhausted: u64,
}
