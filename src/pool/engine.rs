// ABOUTME: Bounded pool engine for expensive remote resources (browser instances)
// ABOUTME: FIFO acquire queue, idle/in-use/pending-destroy bookkeeping, min/max sizing and graceful drain

//! Resource pool engine
//!
//! The `Pool` owns every resource that is not currently leased, and tracks
//! the ones that are:
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                         Pool<F>                              │
//! │  ┌────────────────────────────────────────────────────────┐  │
//! │  │ PoolState (one critical section, never held on await)  │  │
//! │  │   idle:            VecDeque<ManagedResource>           │  │
//! │  │   in_use:          HashSet<ResourceId>                 │  │
//! │  │   pending_destroy: HashSet<ResourceId>                 │  │
//! │  │   waiters:         VecDeque<Waiter>   (FIFO)           │  │
//! │  │   creating:        usize                               │  │
//! │  └────────────────────────────────────────────────────────┘  │
//! │                                                              │
//! │  ┌───────────────┐  ┌───────────────┐  ┌─────────────────┐  │
//! │  │FactoryAdapter │  │ PoolMetrics   │  │ EvictionSweeper │  │
//! │  │(create/destroy)│ │ (counters)    │  │ (background)    │  │
//! │  └───────────────┘  └───────────────┘  └─────────────────┘  │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! Creations run in spawned tasks and always deliver to the oldest waiter,
//! so a cancelled `acquire()` never leaks a slot: the resource goes to the
//! next waiter or is parked idle.
//!
//! # Usage
//!
//! ```ignore
//! let pool = Pool::new(MyBrowserFactory::default(), PoolConfig::default());
//!
//! let browser = pool.acquire().await?;
//! // ... use the browser ...
//! pool.release(browser).await?;
//!
//! // Destroy everything before exit
//! pool.clear().await;
//! ```

use std::collections::{HashSet, VecDeque};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures_util::future::join_all;
use futures_util::FutureExt;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::{oneshot, Notify};
use tracing::{debug, info, warn};

use super::config::PoolConfig;
use super::eviction::EvictionSweeper;
use super::factory::{BoxError, FactoryAdapter, ManagedResource, ResourceFactory, ResourceId};
use super::metrics::PoolMetrics;

// === Pool Errors ===

/// Errors that can occur during pool operations
#[derive(Debug, Error)]
pub enum PoolError {
    /// The factory failed to create a resource
    #[error("Resource creation failed: {0}")]
    Creation(#[source] BoxError),

    /// The factory failed to destroy a resource
    #[error("Resource destruction failed: {0}")]
    Destroy(#[source] BoxError),

    /// Waited longer than the configured acquire timeout
    #[error("Timed out after {waited:?} waiting for a pooled resource")]
    Exhausted {
        /// How long the caller waited
        waited: Duration,
    },

    /// Pool is draining or drained
    #[error("Pool is draining")]
    Drained,

    /// Resource was not checked out from this pool
    #[error("Resource {0} is not checked out from this pool")]
    UnknownResource(ResourceId),
}

/// Result type for pool operations
pub type PoolResult<T> = Result<T, PoolError>;

// === Pool Status ===

/// Snapshot of the pool's bookkeeping
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PoolStatus {
    /// Resources waiting in the pool
    pub idle: usize,
    /// Resources leased to callers
    pub in_use: usize,
    /// Resources handed to the destructor, not yet gone
    pub pending_destroy: usize,
    /// Creations in flight
    pub creating: usize,
    /// Callers queued in `acquire()`
    pub waiting: usize,
    /// Effective minimum size
    pub min: usize,
    /// Effective maximum size
    pub max: usize,
    /// Whether the pool has started
    pub started: bool,
    /// Whether the pool is draining
    pub draining: bool,
}

impl PoolStatus {
    /// Resources counted against `max`
    pub const fn size(&self) -> usize {
        self.idle + self.in_use + self.creating
    }
}

// === Internal State ===

type Delivery<R> = Result<ManagedResource<R>, PoolError>;

struct Waiter<R> {
    ticket: u64,
    tx: oneshot::Sender<Delivery<R>>,
}

struct PoolState<R> {
    idle: VecDeque<ManagedResource<R>>,
    in_use: HashSet<ResourceId>,
    pending_destroy: HashSet<ResourceId>,
    creating: usize,
    waiters: VecDeque<Waiter<R>>,
    next_ticket: u64,
    started: bool,
    draining: bool,
    sweep_cursor: usize,
}

impl<R> PoolState<R> {
    fn new() -> Self {
        Self {
            idle: VecDeque::new(),
            in_use: HashSet::new(),
            pending_destroy: HashSet::new(),
            creating: 0,
            waiters: VecDeque::new(),
            next_ticket: 0,
            started: false,
            draining: false,
            sweep_cursor: 0,
        }
    }

    /// Resources counted against `max`
    fn size(&self) -> usize {
        self.idle.len() + self.in_use.len() + self.creating
    }

    /// Nothing leased, being created or being destroyed
    fn is_settled(&self) -> bool {
        self.in_use.is_empty() && self.pending_destroy.is_empty() && self.creating == 0
    }
}

#[derive(Debug, Clone, Copy)]
enum CreateReason {
    /// Demand from queued acquire callers
    Waiter,
    /// Keeping the pool at `min`
    Replenish,
}

enum Step<R> {
    Ready(ManagedResource<R>),
    Evict(ManagedResource<R>),
    Wait(u64, oneshot::Receiver<Delivery<R>>),
}

pub(crate) struct PoolInner<F: ResourceFactory> {
    config: PoolConfig,
    adapter: FactoryAdapter<F>,
    state: Mutex<PoolState<F::Resource>>,
    metrics: PoolMetrics,
    settled: Notify,
    sweeper: Mutex<Option<EvictionSweeper>>,
}

impl<F: ResourceFactory> PoolInner<F> {
    fn lock_state(&self) -> MutexGuard<'_, PoolState<F::Resource>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<F: ResourceFactory> Drop for PoolInner<F> {
    fn drop(&mut self) {
        let state = self.state.get_mut().unwrap_or_else(PoisonError::into_inner);
        if !state.idle.is_empty() {
            // Async cleanup cannot be done in Drop.
            // Callers should call clear() explicitly before dropping the pool.
            warn!(idle = state.idle.len(), "Pool dropped without clear(), idle resources were not destroyed");
        }
    }
}

// === Pool ===

/// Bounded pool of resources created by a `ResourceFactory`
///
/// Cheap to clone; every clone refers to the same pool.
pub struct Pool<F: ResourceFactory> {
    inner: Arc<PoolInner<F>>,
}

impl<F: ResourceFactory> Clone for Pool<F> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<F: ResourceFactory> fmt::Debug for Pool<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pool")
            .field("config", &self.inner.config)
            .field("status", &self.status())
            .finish()
    }
}

impl<F: ResourceFactory> Pool<F> {
    /// Create a new pool
    ///
    /// `min` is clamped to `max`. With `autostart` the pool immediately warms
    /// up to `min` and starts the eviction sweep, which requires a running
    /// tokio runtime.
    pub fn new(factory: F, config: PoolConfig) -> Self {
        let config = config.normalized();
        let adapter = FactoryAdapter::new(factory, config.timeout);

        let pool = Self {
            inner: Arc::new(PoolInner {
                config,
                adapter,
                state: Mutex::new(PoolState::new()),
                metrics: PoolMetrics::new(),
                settled: Notify::new(),
                sweeper: Mutex::new(None),
            }),
        };

        if pool.inner.config.autostart {
            pool.start();
        }

        pool
    }

    pub(crate) const fn from_inner(inner: Arc<PoolInner<F>>) -> Self {
        Self { inner }
    }

    /// Get the effective pool configuration
    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    /// Get pool metrics
    pub fn metrics(&self) -> &PoolMetrics {
        &self.inner.metrics
    }

    /// Get the user supplied factory
    pub fn factory(&self) -> &F {
        self.inner.adapter.factory()
    }

    /// Snapshot of the pool's bookkeeping
    pub fn status(&self) -> PoolStatus {
        let state = self.inner.lock_state();
        PoolStatus {
            idle: state.idle.len(),
            in_use: state.in_use.len(),
            pending_destroy: state.pending_destroy.len(),
            creating: state.creating,
            waiting: state.waiters.len(),
            min: self.inner.config.min,
            max: self.inner.config.max,
            started: state.started,
            draining: state.draining,
        }
    }

    /// Start warming up to `min` and the eviction sweep
    ///
    /// Called automatically on construction with `autostart`, and by the
    /// first `acquire()` otherwise. Calling it again is a no-op.
    pub fn start(&self) {
        {
            let mut state = self.inner.lock_state();
            if state.started || state.draining {
                return;
            }
            state.started = true;

            info!(
                min = self.inner.config.min,
                max = self.inner.config.max,
                "Starting resource pool"
            );
            self.ensure_minimum(&mut state);
        }

        if self.inner.config.eviction_enabled() {
            if let Some(interval) = self.inner.config.eviction_interval {
                let mut sweeper = EvictionSweeper::new(interval);
                sweeper.start(Arc::downgrade(&self.inner));
                *self.inner.sweeper.lock().unwrap_or_else(PoisonError::into_inner) = Some(sweeper);
            }
        }
    }

    /// Acquire a resource
    ///
    /// Returns a validated idle resource, creates one while the pool is
    /// below `max`, or waits in FIFO order until one is released.
    ///
    /// # Errors
    ///
    /// - `PoolError::Creation` if the factory failed for this caller
    /// - `PoolError::Exhausted` if `acquire_timeout` elapsed
    /// - `PoolError::Drained` if the pool is draining
    pub async fn acquire(&self) -> PoolResult<ManagedResource<F::Resource>> {
        self.start();

        loop {
            let step = {
                let mut state = self.inner.lock_state();
                if state.draining {
                    return Err(PoolError::Drained);
                }

                // Queued callers are served first
                let idle = if state.waiters.is_empty() {
                    state.idle.pop_front()
                } else {
                    None
                };

                match idle {
                    Some(resource) => {
                        if self.inner.config.test_on_borrow && !self.inner.adapter.validate(&resource) {
                            state.pending_destroy.insert(resource.id());
                            Step::Evict(resource)
                        } else {
                            state.in_use.insert(resource.id());
                            Step::Ready(resource)
                        }
                    }
                    None => self.enqueue(&mut state),
                }
            };

            match step {
                Step::Ready(resource) => {
                    self.inner.metrics.resource_acquired();
                    debug!(resource = %resource.id(), "Acquired idle resource");
                    return Ok(resource);
                }
                Step::Evict(resource) => {
                    self.inner.metrics.resource_evicted();
                    debug!(resource = %resource.id(), age = ?resource.age(), "Idle resource failed validation, evicting");
                    self.spawn_destroy(resource);
                }
                Step::Wait(ticket, rx) => return self.wait(ticket, rx).await,
            }
        }
    }

    /// Return a resource to the pool
    ///
    /// The oldest queued caller receives it directly. While draining, the
    /// resource is destroyed instead.
    ///
    /// # Errors
    ///
    /// Returns `PoolError::UnknownResource` if the resource was not checked
    /// out from this pool; it is destroyed regardless.
    pub async fn release(&self, resource: ManagedResource<F::Resource>) -> PoolResult<()> {
        let id = resource.id();

        let outcome = {
            let mut state = self.inner.lock_state();
            if !state.in_use.remove(&id) {
                Err(resource)
            } else if state.draining {
                state.pending_destroy.insert(id);
                Ok(Some(resource))
            } else {
                Ok(self.place(&mut state, resource, true))
            }
        };

        let leftover = match outcome {
            Ok(leftover) => leftover,
            Err(foreign) => {
                warn!(resource = %id, "Released resource was not checked out from this pool");
                if let Err(e) = self.inner.adapter.destroy(foreign).await {
                    warn!(resource = %id, error = %e, "Failed to destroy foreign resource");
                }
                return Err(PoolError::UnknownResource(id));
            }
        };

        self.inner.metrics.resource_released();

        match leftover {
            Some(resource) => {
                debug!(resource = %id, "Destroying released resource");
                let _ = self.destroy_pending(resource).await;
            }
            None => debug!(resource = %id, "Resource released"),
        }

        self.inner.settled.notify_waiters();
        Ok(())
    }

    /// Remove a checked out resource from the pool and destroy it
    ///
    /// The resource never returns to the pool, even if destruction fails.
    pub async fn destroy(&self, resource: ManagedResource<F::Resource>) -> PoolResult<()> {
        {
            let mut state = self.inner.lock_state();
            if !state.in_use.remove(&resource.id()) {
                debug!(resource = %resource.id(), "Destroying resource that was not checked out");
            }
            state.pending_destroy.insert(resource.id());
        }

        self.destroy_pending(resource).await.map_err(PoolError::Destroy)
    }

    /// Run one eviction sweep over a sample of idle resources
    ///
    /// Returns the number of resources evicted. Exposed for manual sweeps
    /// when the periodic sweep is disabled.
    pub async fn run_eviction(&self) -> usize {
        let expired = {
            let mut state = self.inner.lock_state();
            if state.draining {
                return 0;
            }

            if state.sweep_cursor >= state.idle.len() {
                state.sweep_cursor = 0;
            }

            let sample = self.inner.config.eviction_sample.min(state.idle.len());
            let mut expired = Vec::new();
            let mut index = state.sweep_cursor;
            let mut tested = 0;

            while tested < sample && index < state.idle.len() {
                tested += 1;
                if self.inner.adapter.validate(&state.idle[index]) {
                    index += 1;
                } else if let Some(resource) = state.idle.remove(index) {
                    state.pending_destroy.insert(resource.id());
                    expired.push(resource);
                }
            }

            state.sweep_cursor = index;
            expired
        };

        let evicted = expired.len();
        for resource in expired {
            self.inner.metrics.resource_evicted();
            debug!(resource = %resource.id(), age = ?resource.age(), "Evicting stale idle resource");
            let _ = self.destroy_pending(resource).await;
        }

        {
            let mut state = self.inner.lock_state();
            self.ensure_minimum(&mut state);
        }

        evicted
    }

    /// Stop accepting acquisitions and destroy idle resources
    ///
    /// Queued callers fail with `PoolError::Drained`. Leased resources are
    /// destroyed when their holders release them.
    pub async fn drain(&self) {
        let idle: Vec<_> = {
            let mut state = self.inner.lock_state();
            let first = !state.draining;
            state.draining = true;

            let rejected = state.waiters.len();
            while let Some(waiter) = state.waiters.pop_front() {
                let _ = waiter.tx.send(Err(PoolError::Drained));
            }

            let idle: Vec<_> = state.idle.drain(..).collect();
            for resource in &idle {
                state.pending_destroy.insert(resource.id());
            }

            if first {
                info!(
                    idle = idle.len(),
                    in_use = state.in_use.len(),
                    rejected,
                    "Draining resource pool"
                );
            }
            idle
        };

        let sweeper = self.inner.sweeper.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(mut sweeper) = sweeper {
            sweeper.stop().await;
        }

        join_all(idle.into_iter().map(|resource| self.destroy_pending(resource))).await;
        self.inner.settled.notify_waiters();
    }

    /// Drain the pool and wait until every resource has been destroyed
    ///
    /// Waits for leased resources to be released, so a lease that is never
    /// released blocks this call; bound it with a timeout when needed.
    pub async fn clear(&self) {
        self.drain().await;

        loop {
            let notified = self.inner.settled.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let state = self.inner.lock_state();
                if state.is_settled() {
                    break;
                }
                debug!(
                    in_use = state.in_use.len(),
                    creating = state.creating,
                    pending_destroy = state.pending_destroy.len(),
                    "Waiting for outstanding resources"
                );
            }

            notified.await;
        }

        info!("Resource pool cleared");
    }

    /// Register `clear()` as the process-wide shutdown hook
    ///
    /// The hook waits at most `grace` for leased resources to come back.
    pub fn register_shutdown_drain(&self, grace: Duration) -> Result<(), crate::shutdown::ShutdownError> {
        let pool = self.clone();
        crate::shutdown::global().register(move || {
            async move {
                if tokio::time::timeout(grace, pool.clear()).await.is_err() {
                    let status = pool.status();
                    warn!(
                        in_use = status.in_use,
                        grace_secs = grace.as_secs(),
                        "Shutdown grace period elapsed with resources still leased"
                    );
                }
            }
            .boxed()
        })
    }

    // === Internal helpers ===

    fn enqueue(&self, state: &mut PoolState<F::Resource>) -> Step<F::Resource> {
        let (tx, rx) = oneshot::channel();
        let ticket = state.next_ticket;
        state.next_ticket += 1;
        state.waiters.push_back(Waiter { ticket, tx });
        debug!(ticket, waiting = state.waiters.len(), "Queued acquire request");

        self.serve_waiters(state);
        Step::Wait(ticket, rx)
    }

    async fn wait(
        &self,
        ticket: u64,
        mut rx: oneshot::Receiver<Delivery<F::Resource>>,
    ) -> PoolResult<ManagedResource<F::Resource>> {
        let delivery = match self.inner.config.acquire_timeout {
            None => rx.await.unwrap_or(Err(PoolError::Drained)),
            Some(limit) => match tokio::time::timeout(limit, &mut rx).await {
                Ok(delivery) => delivery.unwrap_or(Err(PoolError::Drained)),
                Err(_) => {
                    let still_queued = {
                        let mut state = self.inner.lock_state();
                        let position = state.waiters.iter().position(|w| w.ticket == ticket);
                        position.and_then(|index| state.waiters.remove(index)).is_some()
                    };

                    if still_queued {
                        self.inner.metrics.acquire_timed_out();
                        warn!(ticket, waited = ?limit, "Timed out waiting for a pooled resource");
                        return Err(PoolError::Exhausted { waited: limit });
                    }

                    // Served while the timer fired; deliveries happen under the state lock
                    rx.try_recv().unwrap_or(Err(PoolError::Drained))
                }
            },
        };

        let resource = delivery?;
        self.inner.metrics.resource_acquired();
        debug!(ticket, resource = %resource.id(), "Acquire request served");
        Ok(resource)
    }

    /// Hand a resource to the oldest live waiter, or park it idle
    ///
    /// Returns the resource when it must be destroyed instead; it has
    /// already been moved to `pending_destroy`.
    fn place(
        &self,
        state: &mut PoolState<F::Resource>,
        mut resource: ManagedResource<F::Resource>,
        validate: bool,
    ) -> Option<ManagedResource<F::Resource>> {
        state.waiters.retain(|waiter| !waiter.tx.is_closed());

        if validate
            && !state.waiters.is_empty()
            && self.inner.config.test_on_borrow
            && !self.inner.adapter.validate(&resource)
        {
            self.inner.metrics.resource_evicted();
            debug!(resource = %resource.id(), "Released resource failed validation, evicting");
            state.pending_destroy.insert(resource.id());
            return Some(resource);
        }

        let id = resource.id();
        while let Some(waiter) = state.waiters.pop_front() {
            state.in_use.insert(id);
            match waiter.tx.send(Ok(resource)) {
                Ok(()) => return None,
                Err(returned) => {
                    state.in_use.remove(&id);
                    let Ok(returned) = returned else {
                        return None;
                    };
                    resource = returned;
                }
            }
        }

        state.idle.push_back(resource);
        None
    }

    /// Start creations for queued callers that no in-flight creation covers
    fn serve_waiters(&self, state: &mut PoolState<F::Resource>) {
        if state.draining {
            return;
        }

        state.waiters.retain(|waiter| !waiter.tx.is_closed());
        let demand = state.waiters.len().saturating_sub(state.creating);
        let capacity = self.inner.config.max.saturating_sub(state.size());
        for _ in 0..demand.min(capacity) {
            self.spawn_create(state, CreateReason::Waiter);
        }
    }

    /// Start creations until the pool holds `min` resources
    fn ensure_minimum(&self, state: &mut PoolState<F::Resource>) {
        if state.draining || !state.started {
            return;
        }

        let deficit = self.inner.config.min.saturating_sub(state.size());
        for _ in 0..deficit {
            self.spawn_create(state, CreateReason::Replenish);
        }
    }

    fn spawn_create(&self, state: &mut PoolState<F::Resource>, reason: CreateReason) {
        state.creating += 1;
        let pool = self.clone();
        tokio::spawn(async move {
            pool.run_create(reason).await;
        });
    }

    async fn run_create(&self, reason: CreateReason) {
        match self.inner.adapter.create().await {
            Ok(resource) => {
                self.inner.metrics.resource_created();
                debug!(resource = %resource.id(), ?reason, "Resource created");

                let leftover = {
                    let mut state = self.inner.lock_state();
                    state.creating -= 1;
                    if state.draining {
                        state.pending_destroy.insert(resource.id());
                        Some(resource)
                    } else {
                        self.place(&mut state, resource, false)
                    }
                };

                if let Some(resource) = leftover {
                    let _ = self.destroy_pending(resource).await;
                }
            }
            Err(e) => {
                self.inner.metrics.creation_failed();

                let mut state = self.inner.lock_state();
                state.creating -= 1;
                match reason {
                    CreateReason::Waiter => {
                        state.waiters.retain(|waiter| !waiter.tx.is_closed());
                        if let Some(waiter) = state.waiters.pop_front() {
                            warn!(ticket = waiter.ticket, error = %e, "Resource creation failed");
                            let _ = waiter.tx.send(Err(PoolError::Creation(e)));
                        } else {
                            warn!(error = %e, "Resource creation failed with no caller waiting");
                        }
                    }
                    CreateReason::Replenish => {
                        warn!(error = %e, "Failed to create resource while replenishing to min");
                    }
                }
                self.serve_waiters(&mut state);
            }
        }

        self.inner.settled.notify_waiters();
    }

    fn spawn_destroy(&self, resource: ManagedResource<F::Resource>) {
        let pool = self.clone();
        tokio::spawn(async move {
            let _ = pool.run_destroy(resource).await;
        });
    }

    /// Destroy a resource already recorded in `pending_destroy`
    ///
    /// Runs in its own task so a cancelled caller cannot strand the entry.
    async fn destroy_pending(&self, resource: ManagedResource<F::Resource>) -> Result<(), BoxError> {
        let pool = self.clone();
        match tokio::spawn(async move { pool.run_destroy(resource).await }).await {
            Ok(result) => result,
            Err(join_error) => Err(Box::new(join_error)),
        }
    }

    async fn run_destroy(&self, resource: ManagedResource<F::Resource>) -> Result<(), BoxError> {
        let id = resource.id();
        let result = self.inner.adapter.destroy(resource).await;

        match &result {
            Ok(()) => {
                self.inner.metrics.resource_destroyed();
                debug!(resource = %id, "Resource destroyed");
            }
            Err(e) => {
                self.inner.metrics.destroy_failed();
                warn!(resource = %id, error = %e, "Failed to destroy resource");
            }
        }

        {
            let mut state = self.inner.lock_state();
            state.pending_destroy.remove(&id);
            self.serve_waiters(&mut state);
            self.ensure_minimum(&mut state);
        }

        self.inner.settled.notify_waiters();
        result
    }
}
