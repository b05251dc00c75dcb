//! Sliding-window rate limiter (RateLimiter, component C5).
//!
//! Grounded on the Python original's `AsyncRateLimiter`
//! (`async_utils.py`): a window of call timestamps is purged on every
//! `acquire`, and if the window is full the caller waits until the oldest
//! call falls out of the window before retrying. The Python version
//! retries by recursively calling `self.acquire()` again after sleeping;
//! per the design notes this must become an explicit loop in Rust to
//! avoid unbounded async recursion.

use std::collections::VecDeque;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, instrument};

use crate::error::CoreError;

struct State {
    calls: VecDeque<Instant>,
}

/// A sliding-window limiter: at most `max_calls` calls are permitted to
/// start within any trailing `window` of wall-clock time.
pub struct RateLimiter {
    max_calls: u32,
    window: Duration,
    state: Mutex<State>,
}

impl RateLimiter {
    pub fn new(max_calls: u32, window: Duration) -> Self {
        Self {
            max_calls,
            window,
            state: Mutex::new(State {
                calls: VecDeque::new(),
            }),
        }
    }

    /// Block until a slot in the window is available, then record the
    /// call. Never recurses: loops until the window has room.
    #[instrument(skip(self))]
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut state = self.state.lock().await;
                let now = Instant::now();
                self.purge(&mut state, now);

                if (state.calls.len() as u32) < self.max_calls {
                    state.calls.push_back(now);
                    return;
                }

                let oldest = state.calls.front().copied().unwrap_or(now);
                oldest + self.window - now
            };

            debug!(wait_ms = wait.as_millis(), "rate limit window full, waiting");
            tokio::time::sleep(wait).await;
        }
    }

    /// Non-blocking variant: succeeds immediately or returns a
    /// `RateLimited` error, never waits.
    #[instrument(skip(self))]
    pub async fn try_acquire(&self) -> Result<(), CoreError> {
        let mut state = self.state.lock().await;
        let now = Instant::now();
        self.purge(&mut state, now);

        if (state.calls.len() as u32) < self.max_calls {
            state.calls.push_back(now);
            Ok(())
        } else {
            Err(CoreError::rate_limited(format!(
                "rate limit exceeded: {} calls per {:?}",
                self.max_calls, self.window
            )))
        }
    }

    /// Number of calls currently counted within the window.
    pub async fn current_count(&self) -> u32 {
        let mut state = self.state.lock().await;
        let now = Instant::now();
        self.purge(&mut state, now);
        state.calls.len() as u32
    }

    fn purge(&self, state: &mut State, now: Instant) {
        while let Some(&front) = state.calls.front() {
            if now.duration_since(front) >= self.window {
                state.calls.pop_front();
            } else {
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn allows_up_to_max_calls_immediately() {
        let limiter = RateLimiter::new(3, Duration::from_secs(1));
        for _ in 0..3 {
            limiter.acquire().await;
        }
        assert_eq!(limiter.current_count().await, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn try_acquire_rejects_once_window_is_full() {
        let limiter = RateLimiter::new(2, Duration::from_secs(1));
        limiter.try_acquire().await.unwrap();
        limiter.try_acquire().await.unwrap();
        let err = limiter.try_acquire().await.unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::RateLimited);
    }

    #[tokio::test(start_paused = true)]
    async fn acquire_waits_for_window_to_clear_then_proceeds() {
        let limiter = RateLimiter::new(1, Duration::from_millis(100));
        limiter.acquire().await;

        let limiter = std::sync::Arc::new(limiter);
        let limiter2 = limiter.clone();
        let handle = tokio::spawn(async move {
            limiter2.acquire().await;
        });

        tokio::time::advance(Duration::from_millis(150)).await;
        handle.await.unwrap();
        assert_eq!(limiter.current_count().await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn purges_calls_outside_the_window() {
        let limiter = RateLimiter::new(1, Duration::from_millis(50));
        limiter.acquire().await;
        tokio::time::advance(Duration::from_millis(60)).await;
        assert_eq!(limiter.current_count().await, 0);
        limiter.try_acquire().await.unwrap();
    }
}
