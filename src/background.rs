//! `BackgroundTaskOwner` sugar, grounded on the Python original's
//! `AsyncServiceInterface`/`AsyncTaskService` base-class pair
//! (`interfaces_agent.py`, `interfaces_base.py`): a worker type that runs
//! its own background tasks implements this trait once instead of
//! hand-rolling submission and lifecycle registration.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::CoreError;
use crate::task_pool::TaskPool;

/// A component that owns one or more long-running background tasks and
/// wants those tasks driven by a shared [`TaskPool`] instead of spawning
/// directly.
#[async_trait]
pub trait BackgroundTaskOwner: Send + Sync {
    /// Spawn this component's background work onto `pool`. Implementors
    /// typically call `pool.submit_background` once per task they own.
    async fn start_background_tasks(&self, pool: &TaskPool) -> Result<(), CoreError>;
}

/// Convenience adapter: wraps a single future as a `BackgroundTaskOwner`,
/// for components that own exactly one background loop.
pub struct SingleTask<F> {
    factory: Arc<dyn Fn() -> F + Send + Sync>,
}

impl<F> SingleTask<F>
where
    F: Future<Output = ()> + Send + 'static,
{
    pub fn new(factory: impl Fn() -> F + Send + Sync + 'static) -> Self {
        Self {
            factory: Arc::new(factory),
        }
    }
}

#[async_trait]
impl<F> BackgroundTaskOwner for SingleTask<F>
where
    F: Future<Output = ()> + Send + 'static,
{
    async fn start_background_tasks(&self, pool: &TaskPool) -> Result<(), CoreError> {
        let task = (self.factory)();
        pool.submit_background(task)
    }
}
