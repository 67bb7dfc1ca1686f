//! Time provider abstraction.
//!
//! All timers of the RPC layer (register timeout, heartbeats, reconnect
//! delay, batch flush, timeout sweep, coarse clock) go through this trait so
//! tests can run them on Tokio's paused clock.

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur during time operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TimeError {
    /// The operation timed out.
    #[error("operation timed out")]
    Elapsed,

    /// The time provider has been shut down and is no longer accessible.
    #[error("time provider shut down")]
    Shutdown,
}

/// Provider trait for time operations.
///
/// `now()` is a monotonic duration since the provider was created. Deadlines
/// are plain `Duration`s on that scale.
#[async_trait(?Send)]
pub trait TimeProvider: Clone {
    /// Sleep for the specified duration.
    async fn sleep(&self, duration: Duration) -> Result<(), TimeError>;

    /// Monotonic time elapsed since provider creation.
    fn now(&self) -> Duration;

    /// Sleep until `now()` reaches `deadline`. Returns at once if it already has.
    async fn sleep_until(&self, deadline: Duration) -> Result<(), TimeError> {
        let remaining = deadline.saturating_sub(self.now());
        self.sleep(remaining).await
    }

    /// Run a future with a timeout.
    ///
    /// Returns `Ok(result)` if the future completes within the timeout,
    /// or `Err(TimeError::Elapsed)` if it times out.
    async fn timeout<F, T>(&self, duration: Duration, future: F) -> Result<T, TimeError>
    where
        F: std::future::Future<Output = T>;
}

/// Time provider using Tokio's time facilities.
///
/// Built on `tokio::time::Instant` so it follows the runtime clock, including
/// a paused clock under `start_paused`.
#[derive(Debug, Clone)]
pub struct TokioTimeProvider {
    start_time: tokio::time::Instant,
}

impl TokioTimeProvider {
    /// Create a new Tokio time provider.
    pub fn new() -> Self {
        Self {
            start_time: tokio::time::Instant::now(),
        }
    }
}

impl Default for TokioTimeProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait(?Send)]
impl TimeProvider for TokioTimeProvider {
    async fn sleep(&self, duration: Duration) -> Result<(), TimeError> {
        tokio::time::sleep(duration).await;
        Ok(())
    }

    fn now(&self) -> Duration {
        self.start_time.elapsed()
    }

    async fn timeout<F, T>(&self, duration: Duration, future: F) -> Result<T, TimeError>
    where
        F: std::future::Future<Output = T>,
    {
        tokio::time::timeout(duration, future)
            .await
            .map_err(|_| TimeError::Elapsed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_now_follows_paused_clock() {
        let time = TokioTimeProvider::new();
        let before = time.now();
        time.sleep(Duration::from_secs(30)).await.expect("sleep");
        assert!(time.now() - before >= Duration::from_secs(30));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sleep_until_past_deadline_returns() {
        let time = TokioTimeProvider::new();
        time.sleep(Duration::from_secs(1)).await.expect("sleep");
        let at = time.now();
        time.sleep_until(Duration::ZERO).await.expect("sleep_until");
        assert_eq!(time.now(), at);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_elapsed() {
        let time = TokioTimeProvider::new();
        let result = time
            .timeout(Duration::from_secs(1), std::future::pending::<()>())
            .await;
        assert_eq!(result, Err(TimeError::Elapsed));
    }
}
