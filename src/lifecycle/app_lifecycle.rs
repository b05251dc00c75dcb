//! Application lifecycle orchestration (AppLifecycle, component C3).
//!
//! Coordinates startup/shutdown hooks, OS signal trapping, and the final
//! priority-ordered teardown of every resource registered with the
//! attached `ResourceTracker`. Grounded on `knhk-workflow-engine`'s
//! `api/grpc_server.rs` signal-handling pattern (a spawned task awaiting
//! `tokio::signal::ctrl_c()` that triggers graceful shutdown) for
//! `trap_signals`. Startup and shutdown are each idempotent: calling
//! either more than once only runs the hooks the first time.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tracing::{info, instrument, warn};

use crate::error::CoreError;
use crate::lifecycle::resource_tracker::ResourceTracker;

const SHUTDOWN_HOOK_BUDGET: Duration = Duration::from_secs(5);
const STARTUP_FAILURE_SHUTDOWN_BUDGET: Duration = Duration::from_secs(30);

type StartupHook =
    Box<dyn FnOnce() -> Pin<Box<dyn Future<Output = Result<(), CoreError>> + Send>> + Send>;
type ShutdownHook =
    Box<dyn FnOnce() -> Pin<Box<dyn Future<Output = Result<(), CoreError>> + Send>> + Send>;

/// Orchestrates ordered startup and shutdown hooks for an application, OS
/// signal trapping that triggers shutdown, and the final handoff to a
/// `ResourceTracker` for priority-ordered resource teardown.
pub struct AppLifecycle {
    startup_hooks: Mutex<Vec<StartupHook>>,
    shutdown_hooks: Mutex<Vec<ShutdownHook>>,
    started: AtomicBool,
    shutting_down: AtomicBool,
    shutdown_complete: Arc<Notify>,
    resources: Arc<ResourceTracker>,
}

impl AppLifecycle {
    pub fn new(resources: Arc<ResourceTracker>) -> Self {
        Self {
            startup_hooks: Mutex::new(Vec::new()),
            shutdown_hooks: Mutex::new(Vec::new()),
            started: AtomicBool::new(false),
            shutting_down: AtomicBool::new(false),
            shutdown_complete: Arc::new(Notify::new()),
            resources,
        }
    }

    /// Register a hook to run during `startup`, in registration order.
    pub fn register_startup<F, Fut>(&self, hook: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), CoreError>> + Send + 'static,
    {
        self.startup_hooks.lock().push(Box::new(move || Box::pin(hook())));
    }

    /// Register a hook to run during `shutdown`, in registration order.
    /// Each hook gets its own 5s budget; failures and timeouts are
    /// logged and do not stop the remaining hooks from running.
    pub fn register_shutdown<F, Fut>(&self, hook: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), CoreError>> + Send + 'static,
    {
        self.shutdown_hooks.lock().push(Box::new(move || Box::pin(hook())));
    }

    /// Run every startup hook once, in order. A second call is a no-op.
    /// If any hook fails, `shutdown` is run (to tear down whatever
    /// earlier hooks already brought up) and the original error is
    /// re-raised to the caller.
    #[instrument(skip(self))]
    pub async fn startup(&self) -> Result<(), CoreError> {
        if self.started.swap(true, Ordering::SeqCst) {
            warn!("startup called more than once, ignoring");
            return Ok(());
        }
        let hooks: Vec<StartupHook> = self.startup_hooks.lock().drain(..).collect();
        info!(count = hooks.len(), "running startup hooks");
        for hook in hooks {
            if let Err(err) = hook().await {
                warn!(error = %err, "startup hook failed, unwinding via shutdown");
                self.shutdown(STARTUP_FAILURE_SHUTDOWN_BUDGET).await;
                return Err(err);
            }
        }
        Ok(())
    }

    /// Run every shutdown hook once (in registration order, each bounded
    /// by a 5s budget with failures isolated), then hand off to the
    /// attached `ResourceTracker` for priority-ordered resource teardown
    /// within `total_timeout`. A second call is a no-op.
    #[instrument(skip(self))]
    pub async fn shutdown(&self, total_timeout: Duration) {
        if self.shutting_down.swap(true, Ordering::SeqCst) {
            warn!("shutdown called more than once, ignoring");
            return;
        }
        let hooks: Vec<ShutdownHook> = self.shutdown_hooks.lock().drain(..).collect();
        info!(count = hooks.len(), "running shutdown hooks");
        for hook in hooks {
            match tokio::time::timeout(SHUTDOWN_HOOK_BUDGET, hook()).await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => warn!(error = %err, "shutdown hook failed, continuing"),
                Err(_) => warn!("shutdown hook exceeded its 5s budget, continuing"),
            }
        }
        self.resources.shutdown_all(total_timeout).await;
        self.shutdown_complete.notify_waiters();
    }

    /// Spawn a task that awaits `Ctrl+C` and triggers `shutdown` once
    /// received.
    pub fn trap_signals(self: &Arc<Self>, total_timeout: Duration) {
        let lifecycle = self.clone();
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    info!("received interrupt signal, initiating graceful shutdown");
                    lifecycle.shutdown(total_timeout).await;
                }
                Err(err) => {
                    warn!(%err, "failed to install signal handler");
                }
            }
        });
    }

    /// Wait until `shutdown` has run to completion. Returns immediately if
    /// shutdown has already completed.
    pub async fn wait_for_shutdown(&self) {
        if self.shutting_down.load(Ordering::SeqCst) {
            return;
        }
        self.shutdown_complete.notified().await;
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }

    /// Scoped combinator: run `startup`, then `body`, then `shutdown`
    /// unconditionally (even if `body` panics via unwind, since the
    /// `shutdown` call sits after the `.await` point and a panic inside
    /// `body` propagates before it — callers that need shutdown-on-panic
    /// guarantees should catch the panic inside `body` itself). Mirrors
    /// the source's `async with lifespan():` context manager.
    pub async fn lifespan<F, Fut, T>(self: &Arc<Self>, total_timeout: Duration, body: F) -> Result<T, CoreError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        self.startup().await?;
        let result = body().await;
        self.shutdown(total_timeout).await;
        Ok(result)
    }
}
