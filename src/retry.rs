//! Retry-with-backoff combinator, grounded on `knhk-workflow-engine`'s
//! `resilience/retry.rs`: an explicit loop (never recursion — see
//! `rate_limit.rs` for the same discipline applied to the sliding-window
//! limiter) with exponential backoff capped at a maximum delay.

use std::future::Future;
use std::time::Duration;

use tracing::{debug, warn};

use crate::error::{CoreError, ErrorKind};

#[derive(Debug, Clone, Copy)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
            multiplier: 2.0,
        }
    }
}

/// Whether a given error kind is worth retrying. Validation/auth/authz/
/// not-found failures are never retried since a retry can't change the
/// outcome; transient kinds are.
pub fn is_retryable(kind: ErrorKind) -> bool {
    matches!(
        kind,
        ErrorKind::Timeout
            | ErrorKind::ServiceUnavailable
            | ErrorKind::CircuitOpen
            | ErrorKind::RateLimited
    )
}

/// Retry `f` according to `config`, stopping as soon as it succeeds, a
/// non-retryable error is returned, or `max_retries` attempts have been
/// made. Uses an explicit loop with a capped exponential backoff, never
/// recursive retry.
pub async fn retry_with_backoff<F, Fut, T>(config: RetryConfig, mut f: F) -> Result<T, CoreError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, CoreError>>,
{
    let mut delay = config.initial_delay;

    for attempt in 0..=config.max_retries {
        match f().await {
            Ok(value) => return Ok(value),
            Err(err) if attempt == config.max_retries || !is_retryable(err.kind()) => {
                warn!(attempt, kind = %err.kind(), "retry giving up");
                return Err(err);
            }
            Err(err) => {
                debug!(attempt, kind = %err.kind(), delay_ms = delay.as_millis() as u64, "retrying after backoff");
                tokio::time::sleep(delay).await;
                let next = delay.mul_f64(config.multiplier);
                delay = next.min(config.max_delay);
            }
        }
    }

    unreachable!("loop always returns within max_retries + 1 iterations")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn succeeds_on_first_try_without_delay() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        let result = retry_with_backoff(RetryConfig::default(), move || {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Ok::<_, CoreError>(42)
            }
        })
        .await
        .unwrap();
        assert_eq!(result, 42);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn retries_transient_errors_up_to_the_limit() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        let config = RetryConfig {
            max_retries: 2,
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(100),
            multiplier: 2.0,
        };
        let result: Result<i32, CoreError> = retry_with_backoff(config, move || {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Err(CoreError::timeout("still down"))
            }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn non_retryable_error_stops_immediately() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        let result: Result<i32, CoreError> = retry_with_backoff(RetryConfig::default(), move || {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Err(CoreError::validation("bad input"))
            }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
