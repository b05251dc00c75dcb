//! Resilient factory with degrading modes (ResilientFactory, component
//! C11), grounded on the Python original's `StagingResilientLLMFactory`
//! (`staging_resilient_factory.py`): `LLMFactoryMode` becomes
//! `FactoryMode`, and its `health()` accessor becomes
//! `ResilientFactoryHealth`.

use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use parking_lot::RwLock;
use tokio::time::Instant;
use tracing::{instrument, warn};

use crate::error::CoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FactoryMode {
    /// Everything works; primary path is used.
    Full,
    /// Primary has degraded (elevated failures) but is still attempted.
    Degraded,
    /// Primary is considered down; only the fallback path is used.
    FallbackOnly,
    /// Both primary and fallback are unavailable; calls fail fast.
    Disabled,
}

/// A snapshot of the factory's operational state, mirroring the Python
/// original's `LLMFactoryHealth` dataclass.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ResilientFactoryHealth {
    pub mode: FactoryMode,
    pub available: bool,
    pub consecutive_failures: u32,
    pub last_error: Option<String>,
}

struct State {
    mode: RwLock<FactoryMode>,
    last_error: RwLock<Option<String>>,
    circuit_open_until: RwLock<Option<Instant>>,
}

/// Wraps a primary async operation with an optional fallback, tracking
/// consecutive failures to move through `Full -> Degraded -> FallbackOnly
/// -> Disabled` and recovering on success.
pub struct ResilientFactory {
    degraded_after_failures: u32,
    disabled_after_failures: u32,
    circuit_open_duration: Duration,
    consecutive_failures: AtomicU32,
    state: State,
}

impl ResilientFactory {
    pub fn new(degraded_after_failures: u32, circuit_open_duration: Duration) -> Self {
        Self {
            degraded_after_failures,
            disabled_after_failures: degraded_after_failures * 3,
            circuit_open_duration,
            consecutive_failures: AtomicU32::new(0),
            state: State {
                mode: RwLock::new(FactoryMode::Full),
                last_error: RwLock::new(None),
                circuit_open_until: RwLock::new(None),
            },
        }
    }

    pub fn mode(&self) -> FactoryMode {
        *self.state.mode.read()
    }

    pub fn health(&self) -> ResilientFactoryHealth {
        let mode = self.mode();
        ResilientFactoryHealth {
            mode,
            available: mode != FactoryMode::Disabled,
            consecutive_failures: self.consecutive_failures.load(Ordering::SeqCst),
            last_error: self.state.last_error.read().clone(),
        }
    }

    /// Run `primary`, falling back to `fallback` if the primary fails (or
    /// is skipped entirely while in `FallbackOnly`/`Disabled`). Updates
    /// `mode` based on the outcome.
    #[instrument(skip(self, primary, fallback))]
    pub async fn call<P, PF, F, FF, T>(&self, primary: P, fallback: F) -> Result<T, CoreError>
    where
        P: FnOnce() -> PF,
        PF: Future<Output = Result<T, CoreError>>,
        F: FnOnce() -> FF,
        FF: Future<Output = Result<T, CoreError>>,
    {
        let mut mode = self.mode();

        if mode == FactoryMode::Disabled {
            match *self.state.circuit_open_until.read() {
                Some(open_until) if Instant::now() < open_until => {
                    return Err(CoreError::service_unavailable(
                        "resilient factory is disabled",
                    ));
                }
                _ => {
                    // Circuit duration elapsed: allow one probe attempt
                    // through the primary path, same as a breaker's
                    // half-open state.
                    mode = FactoryMode::Degraded;
                }
            }
        }

        if mode != FactoryMode::FallbackOnly {
            match primary().await {
                Ok(value) => {
                    self.record_success();
                    return Ok(value);
                }
                Err(err) => {
                    warn!(error = %err, "primary path failed, falling back");
                    self.record_failure(err.message());
                }
            }
        }

        fallback().await
    }

    fn record_success(&self) {
        self.consecutive_failures.store(0, Ordering::SeqCst);
        *self.state.mode.write() = FactoryMode::Full;
        *self.state.last_error.write() = None;
        *self.state.circuit_open_until.write() = None;
    }

    fn record_failure(&self, message: &str) {
        let failures = self.consecutive_failures.fetch_add(1, Ordering::SeqCst) + 1;
        *self.state.last_error.write() = Some(message.to_string());

        let mut mode = self.state.mode.write();
        *mode = if failures >= self.disabled_after_failures {
            *self.state.circuit_open_until.write() =
                Some(Instant::now() + self.circuit_open_duration);
            FactoryMode::Disabled
        } else if failures >= self.degraded_after_failures {
            FactoryMode::FallbackOnly
        } else {
            FactoryMode::Degraded
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn ok() -> Result<&'static str, CoreError> {
        Ok("primary")
    }

    async fn fail() -> Result<&'static str, CoreError> {
        Err(CoreError::service_unavailable("primary down"))
    }

    async fn fallback_ok() -> Result<&'static str, CoreError> {
        Ok("fallback")
    }

    #[tokio::test]
    async fn successful_primary_keeps_full_mode() {
        let factory = ResilientFactory::new(2, Duration::from_secs(30));
        let result = factory.call(ok, fallback_ok).await.unwrap();
        assert_eq!(result, "primary");
        assert_eq!(factory.mode(), FactoryMode::Full);
    }

    #[tokio::test]
    async fn repeated_failures_degrade_then_fallback_only() {
        let factory = ResilientFactory::new(2, Duration::from_secs(30));
        assert_eq!(factory.call(fail, fallback_ok).await.unwrap(), "fallback");
        assert_eq!(factory.mode(), FactoryMode::Degraded);

        assert_eq!(factory.call(fail, fallback_ok).await.unwrap(), "fallback");
        assert_eq!(factory.mode(), FactoryMode::FallbackOnly);
    }

    #[tokio::test]
    async fn success_after_failures_resets_to_full() {
        let factory = ResilientFactory::new(2, Duration::from_secs(30));
        let _ = factory.call(fail, fallback_ok).await;
        assert_eq!(factory.mode(), FactoryMode::Degraded);

        let _ = factory.call(ok, fallback_ok).await;
        assert_eq!(factory.mode(), FactoryMode::Full);
        assert_eq!(factory.health().consecutive_failures, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn disabled_mode_reopens_after_circuit_duration() {
        let factory = ResilientFactory::new(1, Duration::from_millis(50));
        for _ in 0..3 {
            let _ = factory.call(fail, fallback_ok).await;
        }
        assert_eq!(factory.mode(), FactoryMode::Disabled);

        let err = factory.call(ok, fallback_ok).await;
        assert!(err.is_err());

        tokio::time::advance(Duration::from_millis(60)).await;
        let result = factory.call(ok, fallback_ok).await;
        assert!(result.is_ok());
    }
}
