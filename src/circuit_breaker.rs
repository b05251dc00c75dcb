//! Circuit breaker (component C6), grounded on
//! `knhk-workflow-engine`'s `resilience/circuit_breaker.rs`:
//! Closed/Open/HalfOpen transitions around an arbitrary fallible async
//! operation.

use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::time::Instant;
use tracing::{info, instrument, warn};

use crate::error::CoreError;

/// Decides whether an error returned by the guarded operation should count
/// against the breaker. Errors the predicate rejects pass straight through
/// to the caller without affecting breaker state at all — a `NotFound`
/// from a downstream lookup, say, shouldn't trip a breaker meant to watch
/// for connectivity failures.
pub type FailurePredicate = Arc<dyn Fn(&CoreError) -> bool + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

struct Inner {
    state: RwLock<BreakerState>,
    last_failure: RwLock<Option<Instant>>,
    failure_count: AtomicU32,
    /// Claimed by the single call admitted through a half-open episode;
    /// any call arriving while this is already held is rejected with
    /// `circuit_open` instead of being let through as a second probe.
    half_open_probe_claimed: AtomicBool,
}

/// Guards calls to a flaky dependency: trips open after
/// `failure_threshold` consecutive failures and waits `reset_timeout`
/// before admitting exactly one trial call in half-open state. That
/// trial's success closes the breaker; its failure re-opens it.
pub struct CircuitBreaker {
    failure_threshold: u32,
    reset_timeout: Duration,
    failure_predicate: FailurePredicate,
    inner: Inner,
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, reset_timeout: Duration) -> Self {
        Self {
            failure_threshold,
            reset_timeout,
            failure_predicate: Arc::new(|_| true),
            inner: Inner {
                state: RwLock::new(BreakerState::Closed),
                last_failure: RwLock::new(None),
                failure_count: AtomicU32::new(0),
                half_open_probe_claimed: AtomicBool::new(false),
            },
        }
    }

    /// Narrow which errors count against the breaker. By default every
    /// error counts; a predicate lets callers exempt expected, non-systemic
    /// errors (validation failures, not-found lookups) from tripping it.
    #[must_use]
    pub fn with_failure_predicate(mut self, predicate: FailurePredicate) -> Self {
        self.failure_predicate = predicate;
        self
    }

    pub fn state(&self) -> BreakerState {
        *self.inner.state.read()
    }

    /// Run `operation` through the breaker. Rejects immediately with
    /// `CircuitOpen` while open and the reset timeout hasn't elapsed;
    /// otherwise transitions to half-open and admits exactly one trial
    /// call, closing or re-opening based on its outcome. Any other call
    /// arriving during that trial is rejected with `circuit_open` rather
    /// than let through as a second probe. An error the failure predicate
    /// rejects is returned to the caller unchanged without moving breaker
    /// state at all.
    #[instrument(skip(self, operation))]
    pub async fn execute<F, Fut, T>(&self, operation: F) -> Result<T, CoreError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, CoreError>>,
    {
        self.before_call()?;

        match operation().await {
            Ok(value) => {
                self.on_success();
                Ok(value)
            }
            Err(err) => {
                if (self.failure_predicate)(&err) {
                    self.on_failure();
                } else {
                    tracing::debug!(error = %err, "error exempted by failure predicate, not counted");
                }
                Err(err)
            }
        }
    }

    fn before_call(&self) -> Result<(), CoreError> {
        let state = *self.inner.state.read();
        match state {
            BreakerState::Closed => Ok(()),
            BreakerState::HalfOpen => {
                if self
                    .inner
                    .half_open_probe_claimed
                    .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                    .is_ok()
                {
                    Ok(())
                } else {
                    Err(CoreError::circuit_open(
                        "circuit breaker is half-open, trial call already in flight",
                    ))
                }
            }
            BreakerState::Open => {
                let elapsed = self
                    .inner
                    .last_failure
                    .read()
                    .map(|at| at.elapsed())
                    .unwrap_or(Duration::MAX);
                if elapsed >= self.reset_timeout {
                    *self.inner.state.write() = BreakerState::HalfOpen;
                    self.inner.half_open_probe_claimed.store(true, Ordering::SeqCst);
                    info!("circuit breaker transitioning Open -> HalfOpen");
                    Ok(())
                } else {
                    Err(CoreError::circuit_open("circuit breaker is open"))
                }
            }
        }
    }

    fn on_success(&self) {
        let state = *self.inner.state.read();
        match state {
            BreakerState::Closed => {
                self.inner.failure_count.store(0, Ordering::SeqCst);
            }
            BreakerState::HalfOpen => {
                *self.inner.state.write() = BreakerState::Closed;
                self.inner.failure_count.store(0, Ordering::SeqCst);
                self.inner.half_open_probe_claimed.store(false, Ordering::SeqCst);
                info!("circuit breaker transitioning HalfOpen -> Closed");
            }
            BreakerState::Open => {}
        }
    }

    fn on_failure(&self) {
        *self.inner.last_failure.write() = Some(Instant::now());
        let state = *self.inner.state.read();
        match state {
            BreakerState::Closed => {
                let failures = self.inner.failure_count.fetch_add(1, Ordering::SeqCst) + 1;
                if failures >= self.failure_threshold {
                    *self.inner.state.write() = BreakerState::Open;
                    warn!(failures, "circuit breaker transitioning Closed -> Open");
                }
            }
            BreakerState::HalfOpen => {
                *self.inner.state.write() = BreakerState::Open;
                self.inner.half_open_probe_claimed.store(false, Ordering::SeqCst);
                warn!("circuit breaker transitioning HalfOpen -> Open (probe failed)");
            }
            BreakerState::Open => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn ok() -> Result<(), CoreError> {
        Ok(())
    }

    async fn fail() -> Result<(), CoreError> {
        Err(CoreError::service_unavailable("downstream is down"))
    }

    #[tokio::test]
    async fn opens_after_failure_threshold() {
        let breaker = CircuitBreaker::new(2, Duration::from_secs(30));
        assert!(breaker.execute(|| fail()).await.is_err());
        assert_eq!(breaker.state(), BreakerState::Closed);
        assert!(breaker.execute(|| fail()).await.is_err());
        assert_eq!(breaker.state(), BreakerState::Open);
    }

    #[tokio::test]
    async fn rejects_immediately_while_open() {
        let breaker = CircuitBreaker::new(1, Duration::from_secs(30));
        assert!(breaker.execute(|| fail()).await.is_err());
        assert_eq!(breaker.state(), BreakerState::Open);

        let err = breaker.execute(|| ok()).await.unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::CircuitOpen);
    }

    #[tokio::test(start_paused = true)]
    async fn half_opens_after_reset_timeout_and_closes_on_success() {
        let breaker = CircuitBreaker::new(1, Duration::from_millis(50));
        assert!(breaker.execute(|| fail()).await.is_err());
        assert_eq!(breaker.state(), BreakerState::Open);

        tokio::time::advance(Duration::from_millis(60)).await;

        assert!(breaker.execute(|| ok()).await.is_ok());
        assert_eq!(breaker.state(), BreakerState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_probe_in_half_open_reopens() {
        let breaker = CircuitBreaker::new(1, Duration::from_millis(50));
        assert!(breaker.execute(|| fail()).await.is_err());
        tokio::time::advance(Duration::from_millis(60)).await;

        assert!(breaker.execute(|| fail()).await.is_err());
        assert_eq!(breaker.state(), BreakerState::Open);
    }

    #[tokio::test(start_paused = true)]
    async fn only_one_probe_admitted_per_half_open_episode() {
        let breaker = CircuitBreaker::new(1, Duration::from_millis(50));
        assert!(breaker.execute(|| fail()).await.is_err());
        tokio::time::advance(Duration::from_millis(60)).await;

        // The first call through `before_call` transitions Open -> HalfOpen
        // and claims the single probe slot.
        assert!(breaker.before_call().is_ok());
        assert_eq!(breaker.state(), BreakerState::HalfOpen);

        // A second, concurrent arrival while that probe is still in
        // flight must be rejected rather than let through as another
        // trial call.
        let err = breaker.before_call().unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::CircuitOpen);
    }

    #[tokio::test]
    async fn errors_exempted_by_predicate_do_not_count_toward_the_threshold() {
        let breaker = CircuitBreaker::new(2, Duration::from_secs(30))
            .with_failure_predicate(Arc::new(|err| err.kind() != crate::error::ErrorKind::Validation));

        for _ in 0..5 {
            let err = breaker
                .execute(|| async { Err(CoreError::validation("bad input")) })
                .await
                .unwrap_err();
            assert_eq!(err.kind(), crate::error::ErrorKind::Validation);
        }
        assert_eq!(breaker.state(), BreakerState::Closed);

        assert!(breaker.execute(|| fail()).await.is_err());
        assert!(breaker.execute(|| fail()).await.is_err());
        assert_eq!(breaker.state(), BreakerState::Open);
    }
}
