//! Bounded pool of reusable resources.
//!
//! At most `max_size` resources exist at once. Checkouts block once the cap
//! is reached and resume when a holder drops its [`PooledResource`].

use std::collections::VecDeque;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, TryAcquireError};
use tracing::debug;

use crate::error::{ConfigError, PoolError};

/// Creates and disposes pooled resources.
#[async_trait]
pub trait ResourceFactory: Send + Sync {
    type Resource: Send;

    /// Create a new resource.
    async fn create(&self) -> anyhow::Result<Self::Resource>;

    /// Dispose of a resource removed from the pool.
    async fn dispose(&self, _resource: Self::Resource) {}
}

#[derive(Debug)]
struct PoolState<R> {
    idle: VecDeque<R>,
    active_count: usize,
}

struct PoolInner<F: ResourceFactory> {
    factory: F,
    max_size: usize,
    permits: Arc<Semaphore>,
    state: Mutex<PoolState<F::Resource>>,
}

/// Bounded resource pool.
///
/// `active_count` tracks every resource created and not yet disposed,
/// whether idle or checked out.
pub struct ResourcePool<F: ResourceFactory> {
    inner: Arc<PoolInner<F>>,
}

impl<F: ResourceFactory> Clone for ResourcePool<F> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<F: ResourceFactory> ResourcePool<F> {
    pub fn new(factory: F, max_size: usize) -> Result<Self, ConfigError> {
        if max_size < 1 {
            return Err(ConfigError::invalid("pool max_size must be at least 1"));
        }

        Ok(Self {
            inner: Arc::new(PoolInner {
                factory,
                max_size,
                permits: Arc::new(Semaphore::new(max_size)),
                state: Mutex::new(PoolState {
                    idle: VecDeque::with_capacity(max_size),
                    active_count: 0,
                }),
            }),
        })
    }

    pub fn max_size(&self) -> usize {
        self.inner.max_size
    }

    pub fn active_count(&self) -> usize {
        self.inner.state.lock().active_count
    }

    pub fn idle_count(&self) -> usize {
        self.inner.state.lock().idle.len()
    }

    /// Check out a resource, waiting while the pool is exhausted.
    ///
    /// Reuses an idle resource when one exists, otherwise creates one. If
    /// creation fails, or the returned future is dropped before it
    /// completes, the reserved slot is given back.
    pub async fn acquire(&self) -> Result<PooledResource<F>, PoolError> {
        let permit = Arc::clone(&self.inner.permits)
            .acquire_owned()
            .await
            .map_err(|_| PoolError::Closed)?;
        self.checkout(permit).await
    }

    /// Check out a resource only if one can be had without waiting.
    pub async fn try_acquire(&self) -> Result<Option<PooledResource<F>>, PoolError> {
        match Arc::clone(&self.inner.permits).try_acquire_owned() {
            Ok(permit) => self.checkout(permit).await.map(Some),
            Err(TryAcquireError::NoPermits) => Ok(None),
            Err(TryAcquireError::Closed) => Err(PoolError::Closed),
        }
    }

    /// Return a resource to the pool. Equivalent to dropping the guard.
    pub fn release(&self, resource: PooledResource<F>) {
        drop(resource);
    }

    /// Dispose every idle resource.
    ///
    /// Checked-out resources are untouched and return to the pool as usual
    /// when released. Safe to call repeatedly.
    pub async fn close_all(&self) {
        let drained: Vec<F::Resource> = {
            let mut state = self.inner.state.lock();
            let drained: Vec<_> = state.idle.drain(..).collect();
            state.active_count -= drained.len();
            drained
        };

        let count = drained.len();
        for resource in drained {
            self.inner.factory.dispose(resource).await;
        }
        if count > 0 {
            debug!(disposed = count, "closed idle pool resources");
        }
    }

    async fn checkout(&self, permit: OwnedSemaphorePermit) -> Result<PooledResource<F>, PoolError> {
        let reused = self.inner.state.lock().idle.pop_front();

        // The permit already reserves the slot, so a new resource is only
        // counted once it exists. A checkout dropped while `create` is
        // pending leaves the count untouched.
        let resource = match reused {
            Some(resource) => resource,
            None => {
                let resource = self
                    .inner
                    .factory
                    .create()
                    .await
                    .map_err(PoolError::ResourceCreation)?;
                self.inner.state.lock().active_count += 1;
                debug!(max_size = self.inner.max_size, "created pool resource");
                resource
            }
        };

        Ok(PooledResource {
            resource: Some(resource),
            inner: Arc::clone(&self.inner),
            _permit: permit,
        })
    }
}

/// A checked-out resource. Returns itself to the pool on drop.
pub struct PooledResource<F: ResourceFactory> {
    resource: Option<F::Resource>,
    inner: Arc<PoolInner<F>>,
    // Dropped after the resource is back in the idle queue, waking one waiter.
    _permit: OwnedSemaphorePermit,
}

impl<F: ResourceFactory> Deref for PooledResource<F> {
    type Target = F::Resource;

    fn deref(&self) -> &Self::Target {
        self.resource.as_ref().expect("resource is present until drop")
    }
}

impl<F: ResourceFactory> DerefMut for PooledResource<F> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.resource.as_mut().expect("resource is present until drop")
    }
}

impl<F: ResourceFactory> Drop for PooledResource<F> {
    fn drop(&mut self) {
        if let Some(resource) = self.resource.take() {
            self.inner.state.lock().idle.push_back(resource);
        }
    }
}
