// ABOUTME: Generic bounded pool for expensive remote resources such as browser instances
//
// The pool keeps warm resources idle, leases them to callers in FIFO order,
// validates freshness before reuse and destroys everything on drain.
//
// Key components:
// - factory: ResourceFactory trait and the ManagedResource wrapper (id, age)
// - engine: Pool (acquire, release, destroy, drain, clear)
// - eviction: background sweep of stale idle resources
// - metrics: lifecycle counters
// - config: PoolConfig (min/max sizing, freshness window, timeouts)

pub mod config;
pub mod engine;
pub mod eviction;
pub mod factory;
pub mod metrics;

// Re-exports for convenient access
pub use config::PoolConfig;
pub use engine::{Pool, PoolError, PoolResult, PoolStatus};
pub use eviction::EvictionSweeper;
pub use factory::{BoxError, ManagedResource, ResourceFactory, ResourceId};
pub use metrics::{MetricsSnapshot, PoolMetrics};
