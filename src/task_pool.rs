//! Bounded-concurrency task pool with cancellation (TaskPool, component
//! C7). The cancellation primitives are adapted closely from the
//! teacher's `concurrency/cancel_token.rs`; the submit/shutdown surface
//! follows the Python original's `AsyncTaskPool` (`async_utils.py`).

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use parking_lot::RwLock;
use tokio::sync::{Notify, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use crate::error::CoreError;

/// A cooperative cancellation signal that can be forked into a tree:
/// cancelling a parent cancels every child transitively.
#[derive(Clone)]
pub struct CancelToken {
    inner: Arc<CancelTokenInner>,
}

struct CancelTokenInner {
    cancelled: RwLock<bool>,
    notify: Notify,
    children: RwLock<Vec<CancelToken>>,
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelToken {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(CancelTokenInner {
                cancelled: RwLock::new(false),
                notify: Notify::new(),
                children: RwLock::new(Vec::new()),
            }),
        }
    }

    /// Create a child token. Cancelling `self` cancels the child; the
    /// child can be cancelled independently without affecting `self`.
    pub fn child_token(&self) -> Self {
        let child = CancelToken::new();
        self.inner.children.write().push(child.clone());
        child
    }

    pub fn cancel(&self) {
        *self.inner.cancelled.write() = true;
        self.inner.notify.notify_waiters();
        let children = self.inner.children.read().clone();
        for child in children {
            child.cancel();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        *self.inner.cancelled.read()
    }

    /// Await until this token is cancelled.
    pub fn cancelled(&self) -> CancelledFuture {
        CancelledFuture {
            token: self.clone(),
        }
    }
}

pub struct CancelledFuture {
    token: CancelToken,
}

impl Future for CancelledFuture {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        if self.token.is_cancelled() {
            return Poll::Ready(());
        }
        let notified = self.token.inner.notify.notified();
        tokio::pin!(notified);
        match notified.poll(cx) {
            Poll::Ready(()) => Poll::Ready(()),
            Poll::Pending => {
                if self.token.is_cancelled() {
                    Poll::Ready(())
                } else {
                    Poll::Pending
                }
            }
        }
    }
}

/// A semaphore-bounded pool of spawned tasks. Foreground tasks submitted
/// via `submit` are awaited by their caller; background tasks submitted
/// via `submit_background` are tracked so `shutdown` can cancel and join
/// them, but nobody else awaits their result directly.
pub struct TaskPool {
    semaphore: Arc<Semaphore>,
    cancel: CancelToken,
    active: Arc<AtomicUsize>,
    background: RwLock<Vec<JoinHandle<()>>>,
}

impl TaskPool {
    pub fn new(max_concurrency: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(max_concurrency)),
            cancel: CancelToken::new(),
            active: Arc::new(AtomicUsize::new(0)),
            background: RwLock::new(Vec::new()),
        }
    }

    /// Number of tasks currently holding a concurrency permit.
    pub fn active_task_count(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// A child cancellation token tasks can poll to cooperatively stop
    /// when the pool shuts down.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.child_token()
    }

    /// Run `task` under the pool's concurrency bound and return its
    /// result to the caller. Rejects with `Lifecycle` if the pool has
    /// already begun shutting down.
    #[instrument(skip(self, task))]
    pub async fn submit<F, T>(&self, task: F) -> Result<T, CoreError>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        if self.cancel.is_cancelled() {
            return Err(CoreError::lifecycle("task pool is shutting down"));
        }

        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| CoreError::lifecycle("task pool semaphore closed"))?;

        self.active.fetch_add(1, Ordering::SeqCst);
        let active = self.active.clone();
        let handle = tokio::spawn(async move {
            let _permit = permit;
            let result = task.await;
            active.fetch_sub(1, Ordering::SeqCst);
            result
        });

        handle
            .await
            .map_err(|_| CoreError::internal("submitted task panicked"))
    }

    /// Spawn `task` without awaiting it. The pool takes ownership of
    /// cancelling it on shutdown; it still competes for the pool's
    /// concurrency permits.
    #[instrument(skip(self, task))]
    pub fn submit_background<F>(&self, task: F) -> Result<(), CoreError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if self.cancel.is_cancelled() {
            return Err(CoreError::lifecycle("task pool is shutting down"));
        }

        let semaphore = self.semaphore.clone();
        let active = self.active.clone();
        let cancel = self.cancel.child_token();

        let handle = tokio::spawn(async move {
            let permit = match semaphore.acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => return,
            };
            active.fetch_add(1, Ordering::SeqCst);
            tokio::select! {
                _ = task => {}
                _ = cancel.cancelled() => {
                    debug!("background task cancelled before completion");
                }
            }
            active.fetch_sub(1, Ordering::SeqCst);
            drop(permit);
        });

        self.background.write().push(handle);
        Ok(())
    }

    /// Signal cancellation to every outstanding and future task, then
    /// wait up to `timeout` for background tasks to wind down. Tasks that
    /// don't observe cancellation within the budget are aborted.
    #[instrument(skip(self))]
    pub async fn shutdown(&self, timeout: Duration) {
        info!("task pool shutdown initiated");
        self.cancel.cancel();

        let handles: Vec<_> = self.background.write().drain(..).collect();
        let join_all = futures::future::join_all(handles.into_iter().map(|h| async move {
            let _ = h.await;
        }));

        if tokio::time::timeout(timeout, join_all).await.is_err() {
            warn!("task pool shutdown timed out waiting for background tasks");
        }
        info!("task pool shutdown complete");
    }
}
