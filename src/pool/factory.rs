// ABOUTME: Resource factory adapter for the browser pool
//
// Wraps an externally supplied async constructor/destructor pair and stamps
// every created resource with an id, a creation instant and a freshness window.

use std::fmt;
use std::ops::Deref;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use uuid::Uuid;

/// Error type used at collaborator boundaries (factories, browsers, rule hooks)
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Creates and destroys the remote resources held by a pool
///
/// Implementations talk to whatever actually launches a browser. The pool
/// never retries a failed `create`, and treats `destroy` as best effort.
#[async_trait]
pub trait ResourceFactory: Send + Sync + 'static {
    /// The pooled resource type
    type Resource: Send + Sync + 'static;

    /// Create a new resource
    async fn create(&self) -> Result<Self::Resource, BoxError>;

    /// Destroy a resource that left the pool
    async fn destroy(&self, resource: Self::Resource) -> Result<(), BoxError>;

    /// Cheap liveness probe combined with the freshness check
    fn is_alive(&self, _resource: &Self::Resource) -> bool {
        true
    }
}

/// Unique identifier of a pooled resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceId(Uuid);

impl ResourceId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A pooled resource together with its pool bookkeeping
pub struct ManagedResource<R> {
    id: ResourceId,
    resource: R,
    created_at: Instant,
    timeout: Duration,
}

impl<R> ManagedResource<R> {
    pub(crate) fn new(resource: R, timeout: Duration) -> Self {
        Self {
            id: ResourceId::new(),
            resource,
            created_at: Instant::now(),
            timeout,
        }
    }

    /// Identifier assigned at creation
    pub const fn id(&self) -> ResourceId {
        self.id
    }

    /// When the factory produced this resource
    pub const fn created_at(&self) -> Instant {
        self.created_at
    }

    /// Time since creation
    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    /// Whether the resource is still inside its freshness window
    pub fn is_valid(&self) -> bool {
        self.age() < self.timeout
    }

    /// Borrow the underlying resource
    pub const fn resource(&self) -> &R {
        &self.resource
    }

    pub(crate) fn into_inner(self) -> R {
        self.resource
    }
}

impl<R> Deref for ManagedResource<R> {
    type Target = R;

    fn deref(&self) -> &R {
        &self.resource
    }
}

impl<R> fmt::Debug for ManagedResource<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManagedResource")
            .field("id", &self.id)
            .field("age", &self.age())
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

/// Adapter between the pool engine and a user supplied factory
pub(crate) struct FactoryAdapter<F: ResourceFactory> {
    factory: Arc<F>,
    timeout: Duration,
}

impl<F: ResourceFactory> FactoryAdapter<F> {
    pub(crate) fn new(factory: F, timeout: Duration) -> Self {
        Self {
            factory: Arc::new(factory),
            timeout,
        }
    }

    pub(crate) async fn create(&self) -> Result<ManagedResource<F::Resource>, BoxError> {
        let resource = self.factory.create().await?;
        Ok(ManagedResource::new(resource, self.timeout))
    }

    pub(crate) async fn destroy(&self, managed: ManagedResource<F::Resource>) -> Result<(), BoxError> {
        self.factory.destroy(managed.into_inner()).await
    }

    /// Freshness plus the factory's liveness probe
    pub(crate) fn validate(&self, managed: &ManagedResource<F::Resource>) -> bool {
        managed.is_valid() && self.factory.is_alive(managed.resource())
    }

    pub(crate) fn factory(&self) -> &F {
        &self.factory
    }
}
