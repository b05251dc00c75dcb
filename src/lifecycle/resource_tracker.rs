//! Priority-ordered resource tracker (ResourceTracker, component C2).
//!
//! Grounded on the Python original's `AsyncResourceManager`
//! (`async_utils.py`): resources register with an optional cleanup
//! callback. Unlike the Python version's weak-set-plus-callback-list, this
//! tracker additionally runs shutdown in priority order under a
//! timeout budget, so every resource is released exactly once within a
//! bounded total time; the loose "cleanup optional, priority optional"
//! registration ergonomics of the original are kept, with `priority = 0`
//! as the default for callers that don't care.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{info, instrument, warn};

use crate::error::CoreError;

/// Capability every tracked resource must expose: an async close that may
/// fail only in the sense of taking too long (timeouts are enforced by the
/// tracker, not the resource itself).
#[async_trait::async_trait]
pub trait Closable: Send + Sync {
    async fn close(&self);
}

/// Adapts a plain async closure into a `Closable`, so callers aren't
/// forced to define a one-off type for a simple cleanup callback.
pub struct ClosableFn<F> {
    f: Mutex<Option<F>>,
}

impl<F, Fut> ClosableFn<F>
where
    F: FnOnce() -> Fut + Send,
    Fut: Future<Output = ()> + Send,
{
    pub fn new(f: F) -> Self {
        Self { f: Mutex::new(Some(f)) }
    }
}

#[async_trait::async_trait]
impl<F, Fut> Closable for ClosableFn<F>
where
    F: FnOnce() -> Fut + Send,
    Fut: Future<Output = ()> + Send,
{
    async fn close(&self) {
        let f = self.f.lock().take();
        if let Some(f) = f {
            f().await;
        }
    }
}

struct Entry {
    name: String,
    priority: i32,
    resource: Arc<dyn Closable>,
    registration_order: usize,
}

/// Tracks registered resources and shuts them down in priority order
/// (higher priority first), breaking ties by reverse registration order
/// (last-registered-first, matching typical constructor/destructor
/// nesting), each bounded by an equal share of the overall shutdown
/// timeout budget.
pub struct ResourceTracker {
    entries: Mutex<Vec<Entry>>,
    next_order: Mutex<usize>,
    shutting_down: AtomicBool,
}

impl Default for ResourceTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl ResourceTracker {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
            next_order: Mutex::new(0),
            shutting_down: AtomicBool::new(false),
        }
    }

    /// Register a resource with a priority (default 0 when unspecified by
    /// callers that don't care about ordering relative to others). Fails
    /// with `Lifecycle` if shutdown is already in progress, or with
    /// `Validation` if `name` is already registered — names must be
    /// unique.
    pub fn register(
        &self,
        name: impl Into<String>,
        priority: i32,
        resource: Arc<dyn Closable>,
    ) -> Result<(), CoreError> {
        if self.shutting_down.load(Ordering::SeqCst) {
            return Err(CoreError::lifecycle(
                "resource tracker is shutting down, refusing new registrations",
            ));
        }

        let name = name.into();
        let mut entries = self.entries.lock();
        if entries.iter().any(|e| e.name == name) {
            return Err(CoreError::validation(format!(
                "resource {name:?} is already registered"
            )));
        }

        let mut order = self.next_order.lock();
        let registration_order = *order;
        *order += 1;
        drop(order);

        entries.push(Entry {
            name,
            priority,
            resource,
            registration_order,
        });
        Ok(())
    }

    /// Look up a previously registered resource by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Closable>> {
        self.entries
            .lock()
            .iter()
            .find(|e| e.name == name)
            .map(|e| e.resource.clone())
    }

    /// Remove a resource from tracking without closing it (the caller has
    /// already closed it, or is transferring ownership elsewhere). Returns
    /// whether a resource by that name was actually tracked.
    pub fn unregister(&self, name: &str) -> bool {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|e| e.name != name);
        entries.len() != before
    }

    pub fn registered_count(&self) -> usize {
        self.entries.lock().len()
    }

    /// Close every tracked resource, highest priority first, ties broken
    /// by most-recently-registered-first. Each resource gets
    /// `total_timeout / N` to close; a resource that overruns its budget
    /// is logged and skipped rather than blocking the remaining resources.
    /// Idempotent: once shutdown has begun, subsequent calls return
    /// immediately without re-closing anything, so every resource is
    /// released exactly once.
    #[instrument(skip(self))]
    pub async fn shutdown_all(&self, total_timeout: Duration) {
        if self.shutting_down.swap(true, Ordering::SeqCst) {
            warn!("shutdown_all called more than once, ignoring");
            return;
        }

        let mut entries: Vec<Entry> = self.entries.lock().drain(..).collect();
        entries.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then_with(|| b.registration_order.cmp(&a.registration_order))
        });

        if entries.is_empty() {
            return;
        }

        let per_resource_timeout = total_timeout / entries.len() as u32;
        info!(
            count = entries.len(),
            per_resource_timeout_ms = per_resource_timeout.as_millis() as u64,
            "shutting down tracked resources"
        );

        for entry in entries {
            let close: Pin<Box<dyn Future<Output = ()> + Send>> = Box::pin(entry.resource.close());
            if tokio::time::timeout(per_resource_timeout, close).await.is_err() {
                warn!(
                    resource = %entry.name,
                    priority = entry.priority,
                    "resource close exceeded its shutdown budget, abandoning"
                );
            }
        }
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    struct RecordingResource {
        name: &'static str,
        order: Arc<Mutex<Vec<&'static str>>>,
        delay: Duration,
    }

    #[async_trait::async_trait]
    impl Closable for RecordingResource {
        async fn close(&self) {
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            self.order.lock().push(self.name);
        }
    }

    #[tokio::test]
    async fn shuts_down_in_priority_order() {
        let tracker = ResourceTracker::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        tracker
            .register(
                "low",
                0,
                Arc::new(RecordingResource {
                    name: "low",
                    order: order.clone(),
                    delay: Duration::ZERO,
                }),
            )
            .unwrap();
        tracker
            .register(
                "high",
                10,
                Arc::new(RecordingResource {
                    name: "high",
                    order: order.clone(),
                    delay: Duration::ZERO,
                }),
            )
            .unwrap();

        tracker.shutdown_all(Duration::from_secs(5)).await;
        assert_eq!(*order.lock(), vec!["high", "low"]);
    }

    #[tokio::test]
    async fn ties_break_by_most_recently_registered_first() {
        let tracker = ResourceTracker::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        tracker
            .register(
                "first",
                5,
                Arc::new(RecordingResource {
                    name: "first",
                    order: order.clone(),
                    delay: Duration::ZERO,
                }),
            )
            .unwrap();
        tracker
            .register(
                "second",
                5,
                Arc::new(RecordingResource {
                    name: "second",
                    order: order.clone(),
                    delay: Duration::ZERO,
                }),
            )
            .unwrap();

        tracker.shutdown_all(Duration::from_secs(5)).await;
        assert_eq!(*order.lock(), vec!["second", "first"]);
    }

    #[tokio::test]
    async fn overrunning_resource_is_abandoned_not_blocking() {
        let tracker = ResourceTracker::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        tracker
            .register(
                "slow",
                0,
                Arc::new(RecordingResource {
                    name: "slow",
                    order: order.clone(),
                    delay: Duration::from_secs(10),
                }),
            )
            .unwrap();
        tracker
            .register(
                "fast",
                0,
                Arc::new(RecordingResource {
                    name: "fast",
                    order: order.clone(),
                    delay: Duration::ZERO,
                }),
            )
            .unwrap();

        let start = std::time::Instant::now();
        tracker.shutdown_all(Duration::from_millis(100)).await;
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn closure_adapter_runs_exactly_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls2 = calls.clone();
        let tracker = ResourceTracker::new();
        tracker
            .register(
                "fn-resource",
                0,
                Arc::new(ClosableFn::new(move || {
                    let calls = calls2.clone();
                    async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                    }
                })),
            )
            .unwrap();
        tracker.shutdown_all(Duration::from_secs(1)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn duplicate_name_registration_fails() {
        let tracker = ResourceTracker::new();
        tracker
            .register(
                "dup",
                0,
                Arc::new(RecordingResource {
                    name: "dup",
                    order: Arc::new(Mutex::new(Vec::new())),
                    delay: Duration::ZERO,
                }),
            )
            .unwrap();

        let err = tracker
            .register(
                "dup",
                0,
                Arc::new(RecordingResource {
                    name: "dup",
                    order: Arc::new(Mutex::new(Vec::new())),
                    delay: Duration::ZERO,
                }),
            )
            .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Validation);
    }

    #[tokio::test]
    async fn registration_after_shutdown_is_rejected() {
        let tracker = ResourceTracker::new();
        tracker.shutdown_all(Duration::from_secs(1)).await;

        let err = tracker
            .register(
                "late",
                0,
                Arc::new(RecordingResource {
                    name: "late",
                    order: Arc::new(Mutex::new(Vec::new())),
                    delay: Duration::ZERO,
                }),
            )
            .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Lifecycle);
    }

    #[tokio::test]
    async fn shutdown_all_is_idempotent() {
        let tracker = ResourceTracker::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let calls2 = calls.clone();
        tracker
            .register(
                "once",
                0,
                Arc::new(ClosableFn::new(move || {
                    let calls = calls2.clone();
                    async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                    }
                })),
            )
            .unwrap();

        tracker.shutdown_all(Duration::from_secs(1)).await;
        tracker.shutdown_all(Duration::from_secs(1)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn get_returns_the_registered_resource() {
        let tracker = ResourceTracker::new();
        tracker
            .register(
                "named",
                0,
                Arc::new(RecordingResource {
                    name: "named",
                    order: Arc::new(Mutex::new(Vec::new())),
                    delay: Duration::ZERO,
                }),
            )
            .unwrap();
        assert!(tracker.get("named").is_some());
        assert!(tracker.get("missing").is_none());
    }

    #[tokio::test]
    async fn unregister_reports_whether_it_removed_anything() {
        let tracker = ResourceTracker::new();
        tracker
            .register(
                "named",
                0,
                Arc::new(RecordingResource {
                    name: "named",
                    order: Arc::new(Mutex::new(Vec::new())),
                    delay: Duration::ZERO,
                }),
            )
            .unwrap();
        assert!(tracker.unregister("named"));
        assert!(!tracker.unregister("named"));
    }
}
