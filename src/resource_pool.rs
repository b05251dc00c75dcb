//! Generic resource pool with RAII release (ResourcePool, component C8).
//!
//! Closely modeled on `knhk-workflow-engine`'s `connectors/pool.rs`: a semaphore
//! bounds concurrent checkouts, idle resources are reused when available,
//! and a `Drop` impl on the checked-out handle returns the resource to
//! the pool automatically instead of requiring callers to remember to
//! release it.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, Semaphore};
use tracing::{debug, instrument, warn};

use crate::error::CoreError;

/// Caller-supplied behavior for creating and tearing down pooled
/// resources. `create` is async because most real resources (db
/// connections, model handles) require an async handshake; `close` is
/// best-effort and fire-and-forgotten from `Drop`.
#[async_trait::async_trait]
pub trait ResourceFactory<T>: Send + Sync {
    async fn create(&self) -> Result<T, CoreError>;
    async fn close(&self, resource: T);
}

struct PoolInner<T> {
    idle: Mutex<VecDeque<T>>,
    semaphore: Semaphore,
    factory: Box<dyn ResourceFactory<T>>,
    closed: std::sync::atomic::AtomicBool,
    max_size: usize,
}

/// Bound applied to each individual idle-entry teardown during `close()`,
/// so one stuck `factory.close()` can't stall the rest.
const CLOSE_ENTRY_TIMEOUT: Duration = Duration::from_secs(1);

/// A bounded pool of resources of type `T`, created on demand up to
/// `max_size` concurrently checked-out instances.
pub struct ResourcePool<T: Send + 'static> {
    inner: Arc<PoolInner<T>>,
}

impl<T: Send + 'static> Clone for ResourcePool<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

/// A checked-out resource. Returns itself to the pool's idle queue on
/// drop unless the pool has been closed, in which case it is torn down
/// instead.
pub struct PooledResource<T: Send + 'static> {
    resource: Option<T>,
    pool: Arc<PoolInner<T>>,
}

impl<T: Send + 'static> std::ops::Deref for PooledResource<T> {
    type Target = T;

    // `resource` is only ever `None` inside `Drop::drop`, after which this
    // handle is unreachable; `expect` here can't observe that state.
    #[allow(clippy::expect_used)]
    fn deref(&self) -> &T {
        self.resource.as_ref().expect("resource present until drop")
    }
}

impl<T: Send + 'static> std::ops::DerefMut for PooledResource<T> {
    #[allow(clippy::expect_used)]
    fn deref_mut(&mut self) -> &mut T {
        self.resource.as_mut().expect("resource present until drop")
    }
}

impl<T: Send + 'static> Drop for PooledResource<T> {
    fn drop(&mut self) {
        let Some(resource) = self.resource.take() else {
            return;
        };
        let pool = self.pool.clone();
        tokio::spawn(async move {
            if pool.closed.load(std::sync::atomic::Ordering::SeqCst) {
                pool.factory.close(resource).await;
            } else {
                pool.idle.lock().await.push_back(resource);
            }
            pool.semaphore.add_permits(1);
        });
    }
}

impl<T: Send + 'static> ResourcePool<T> {
    pub fn new(max_size: usize, factory: impl ResourceFactory<T> + 'static) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                idle: Mutex::new(VecDeque::new()),
                semaphore: Semaphore::new(max_size),
                factory: Box::new(factory),
                closed: std::sync::atomic::AtomicBool::new(false),
                max_size,
            }),
        }
    }

    /// Pre-create `min_size` entries into the idle queue so the first
    /// `min_size` acquisitions don't pay the factory's creation cost.
    /// Pre-created entries sit idle without holding a semaphore permit,
    /// same as any other entry returned to the idle queue: a permit is
    /// only consumed for the duration an entry is actually checked out
    /// (see `acquire`/`Drop`), so this can't let `idle + active` exceed
    /// `max_size`.
    #[instrument(skip(self))]
    pub async fn initialize(&self, min_size: usize) -> Result<(), CoreError> {
        if min_size > self.inner.max_size {
            return Err(CoreError::internal("min_size exceeds max_size"));
        }
        let mut idle = self.inner.idle.lock().await;
        for _ in 0..min_size {
            let resource = self.inner.factory.create().await?;
            idle.push_back(resource);
        }
        debug!(min_size, "resource pool pre-initialized");
        Ok(())
    }

    /// Acquire a resource within `timeout`: reuses an idle instance if one
    /// exists, otherwise creates a new one. Blocks (bounded by `timeout`)
    /// if the pool is at capacity and nothing is idle.
    #[instrument(skip(self))]
    pub async fn acquire(&self, timeout: Duration) -> Result<PooledResource<T>, CoreError> {
        if self.inner.closed.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(CoreError::pool_closed("resource pool is closed"));
        }

        let permit = tokio::time::timeout(timeout, self.inner.semaphore.acquire())
            .await
            .map_err(|_| CoreError::timeout("timed out waiting for a pooled resource"))?
            .map_err(|_| CoreError::pool_closed("resource pool is closed"))?;
        permit.forget();

        let existing = self.inner.idle.lock().await.pop_front();
        let resource = match existing {
            Some(resource) => {
                debug!("reusing idle pooled resource");
                resource
            }
            None => {
                debug!("creating new pooled resource");
                match self.inner.factory.create().await {
                    Ok(resource) => resource,
                    Err(err) => {
                        self.inner.semaphore.add_permits(1);
                        return Err(err);
                    }
                }
            }
        };

        Ok(PooledResource {
            resource: Some(resource),
            pool: self.inner.clone(),
        })
    }

    /// Run `f` with a checked-out resource, guaranteeing release even if
    /// `f` returns an error or panics partway through (scope-guard usage,
    /// the common case).
    pub async fn with_resource<F, Fut, R>(&self, timeout: Duration, f: F) -> Result<R, CoreError>
    where
        F: FnOnce(&mut T) -> Fut,
        Fut: Future<Output = Result<R, CoreError>>,
    {
        let mut resource = self.acquire(timeout).await?;
        f(&mut resource).await
    }

    /// Idempotent. Marks the pool closed (new `acquire` calls fail
    /// immediately and outstanding resources are torn down as they are
    /// returned rather than recycled), then drains and closes every
    /// entry currently sitting idle, each bounded by `CLOSE_ENTRY_TIMEOUT`
    /// so one stuck `factory.close()` can't stall the rest.
    #[instrument(skip(self))]
    pub async fn close(&self) {
        let already_closed = self
            .inner
            .closed
            .swap(true, std::sync::atomic::Ordering::SeqCst);
        if already_closed {
            return;
        }
        warn!("resource pool closed");

        let mut idle = self.inner.idle.lock().await;
        while let Some(resource) = idle.pop_front() {
            if tokio::time::timeout(CLOSE_ENTRY_TIMEOUT, self.inner.factory.close(resource))
                .await
                .is_err()
            {
                warn!("idle pooled resource close() exceeded its bound, abandoning it");
            }
        }
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(std::sync::atomic::Ordering::SeqCst)
    }
}
