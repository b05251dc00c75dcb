//! Named mutual-exclusion lock with timeout (NamedLock, component C4).

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, instrument, warn};

use crate::error::CoreError;

/// Point-in-time information about a named lock.
#[derive(Debug, Clone)]
pub struct LockInfo {
    pub name: String,
    pub held: bool,
    pub acquired_by: Option<String>,
    pub held_since: Option<Instant>,
}

struct Slot {
    mutex: Arc<Mutex<()>>,
    acquired_by: parking_lot::RwLock<Option<(String, Instant)>>,
}

/// A registry of exclusive, non-reentrant locks keyed by name.
///
/// Each name maps to its own `tokio::sync::Mutex`; acquiring the same name
/// twice from the same caller without releasing in between will deadlock
/// the second acquire exactly like any other non-reentrant mutex — this
/// crate does not attempt reentrancy detection beyond what `acquire`'s
/// timeout surfaces.
#[derive(Clone, Default)]
pub struct NamedLock {
    slots: Arc<DashMap<String, Arc<Slot>>>,
}

/// RAII handle returned by a successful acquire; the lock is released when
/// this value is dropped.
pub struct LockGuard {
    name: String,
    slot: Arc<Slot>,
    _guard: OwnedMutexGuard<()>,
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        *self.slot.acquired_by.write() = None;
        debug!(lock = %self.name, "released named lock");
    }
}

impl NamedLock {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot_for(&self, name: &str) -> Arc<Slot> {
        self.slots
            .entry(name.to_string())
            .or_insert_with(|| {
                Arc::new(Slot {
                    mutex: Arc::new(Mutex::new(())),
                    acquired_by: parking_lot::RwLock::new(None),
                })
            })
            .clone()
    }

    /// Attempt to acquire the named lock within `timeout`, tagging the
    /// holder with `correlation_id` for diagnostics. Returns a guard that
    /// releases on drop, or a `Timeout` error if the wait elapses.
    #[instrument(skip(self), fields(lock = %name))]
    pub async fn acquire(
        &self,
        name: &str,
        correlation_id: &str,
        timeout: Duration,
    ) -> Result<LockGuard, CoreError> {
        let slot = self.slot_for(name);
        let mutex = slot.mutex.clone();
        let guard = tokio::time::timeout(timeout, mutex.lock_owned())
            .await
            .map_err(|_| {
                warn!(lock = %name, "timed out acquiring named lock");
                CoreError::timeout(format!("timed out acquiring lock {name:?}"))
            })?;
        *slot.acquired_by.write() = Some((correlation_id.to_string(), Instant::now()));
        Ok(LockGuard {
            name: name.to_string(),
            slot,
            _guard: guard,
        })
    }

    /// Snapshot the current state of a named lock without acquiring it.
    pub fn info(&self, name: &str) -> LockInfo {
        match self.slots.get(name) {
            Some(slot) => {
                let held_by = slot.acquired_by.read().clone();
                LockInfo {
                    name: name.to_string(),
                    held: held_by.is_some(),
                    acquired_by: held_by.as_ref().map(|(id, _)| id.clone()),
                    held_since: held_by.map(|(_, at)| at),
                }
            }
            None => LockInfo {
                name: name.to_string(),
                held: false,
                acquired_by: None,
                held_since: None,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn acquire_and_release_round_trips() {
        let locks = NamedLock::new();
        let guard = locks
            .acquire("resource-a", "corr-1", Duration::from_secs(1))
            .await
            .unwrap();
        assert!(locks.info("resource-a").held);
        drop(guard);
        assert!(!locks.info("resource-a").held);
    }

    #[tokio::test]
    async fn second_acquire_times_out_while_held() {
        let locks = NamedLock::new();
        let _guard = locks
            .acquire("resource-a", "corr-1", Duration::from_secs(1))
            .await
            .unwrap();

        let err = locks
            .acquire("resource-a", "corr-2", Duration::from_millis(50))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Timeout);
    }

    #[tokio::test]
    async fn independent_names_do_not_contend() {
        let locks = NamedLock::new();
        let _a = locks
            .acquire("resource-a", "corr-1", Duration::from_secs(1))
            .await
            .unwrap();
        let _b = locks
            .acquire("resource-b", "corr-2", Duration::from_secs(1))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn unheld_lock_reports_not_held() {
        let locks = NamedLock::new();
        let info = locks.info("never-touched");
        assert!(!info.held);
        assert!(info.acquired_by.is_none());
    }
}
