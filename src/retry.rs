//! Bounded retry with exponential backoff.
//!
//! [`RetryStrategy`] shields a single external call from isolated transient
//! failures. It has no knowledge of why an operation failed: callers that need
//! to distinguish transient from fatal failures classify errors themselves
//! (see [`crate::llm::Outcome`]).
//!
//! # Example
//!
//! ```rust,ignore
//! use diary_pilot::retry::RetryStrategy;
//!
//! let strategy = RetryStrategy::new(3, 2.0);
//! let page = strategy.retry(|| driver.navigate(url, timeout)).await?;
//! ```

use std::future::Future;
use std::time::Duration;
use tracing::{error, info, warn};

// ============================================================================
// Backoff Constants and Calculation
// ============================================================================

/// Default number of attempts (first try included).
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Default exponential base, in seconds.
pub const DEFAULT_BACKOFF_FACTOR: f64 = 2.0;

/// Calculate the delay before the retry that follows `attempt`.
///
/// `attempt` is zero-based, so the first retry waits `factor^0 = 1` second.
/// There is no jitter and no cap.
///
/// # Example
///
/// ```rust
/// use diary_pilot::retry::backoff_delay;
/// use std::time::Duration;
///
/// assert_eq!(backoff_delay(2.0, 0), Duration::from_secs(1));
/// assert_eq!(backoff_delay(2.0, 1), Duration::from_secs(2));
/// assert_eq!(backoff_delay(2.0, 3), Duration::from_secs(8));
/// ```
#[must_use]
pub fn backoff_delay(factor: f64, attempt: u32) -> Duration {
    let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
    let secs = factor.max(0.0).powi(exponent);
    Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX)
}

// ============================================================================
// Retry Strategy
// ============================================================================

/// Exponential backoff retry strategy.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryStrategy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    /// Base of the exponential backoff, in seconds.
    pub backoff_factor: f64,
}

impl Default for RetryStrategy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff_factor: DEFAULT_BACKOFF_FACTOR,
        }
    }
}

impl RetryStrategy {
    /// Create a strategy with the given attempt budget and backoff base.
    ///
    /// A zero attempt budget is treated as one attempt.
    #[must_use]
    pub fn new(max_attempts: u32, backoff_factor: f64) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff_factor,
        }
    }

    /// A strategy that never retries.
    #[must_use]
    pub fn once() -> Self {
        Self::new(1, DEFAULT_BACKOFF_FACTOR)
    }

    /// Execute `operation`, retrying failures with exponential backoff.
    ///
    /// Returns the first success, or the last error once every attempt has
    /// been used.
    pub async fn retry<T, E, F, Fut>(&self, mut operation: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        let attempts = self.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(err) => {
                    warn!(
                        attempt = attempt + 1,
                        max_attempts = attempts,
                        "Attempt failed: {}",
                        err
                    );

                    if attempt + 1 >= attempts {
                        error!("All {} attempts failed", attempts);
                        return Err(err);
                    }

                    let delay = backoff_delay(self.backoff_factor, attempt);
                    info!("Retrying in {:.1}s...", delay.as_secs_f64());
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_backoff_delay_exponential() {
        assert_eq!(backoff_delay(2.0, 0), Duration::from_secs(1));
        assert_eq!(backoff_delay(2.0, 1), Duration::from_secs(2));
        assert_eq!(backoff_delay(2.0, 2), Duration::from_secs(4));
        assert_eq!(backoff_delay(3.0, 2), Duration::from_secs(9));
    }

    #[test]
    fn test_backoff_delay_has_no_cap() {
        assert_eq!(backoff_delay(2.0, 10), Duration::from_secs(1024));
    }

    #[test]
    fn test_backoff_delay_fractional_factor() {
        assert_eq!(backoff_delay(0.5, 1), Duration::from_millis(500));
    }

    #[test]
    fn test_zero_attempts_clamped_to_one() {
        assert_eq!(RetryStrategy::new(0, 2.0).max_attempts, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_returns_first_success() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        let result: Result<u32, String> = RetryStrategy::new(3, 2.0)
            .retry(|| {
                let c = c.clone();
                async move { Ok(c.fetch_add(1, Ordering::SeqCst)) }
            })
            .await;

        assert_eq!(result.unwrap(), 0);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_recovers_after_transient_failures() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        let start = tokio::time::Instant::now();

        let result: Result<&str, String> = RetryStrategy::new(3, 2.0)
            .retry(|| {
                let c = c.clone();
                async move {
                    if c.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err("element not yet rendered".to_string())
                    } else {
                        Ok("done")
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), "done");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        // 2^0 + 2^1 seconds of backoff
        assert!(start.elapsed() >= Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_propagates_last_error() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();

        let result: Result<(), String> = RetryStrategy::new(4, 2.0)
            .retry(|| {
                let c = c.clone();
                async move {
                    let n = c.fetch_add(1, Ordering::SeqCst);
                    Err(format!("failure {n}"))
                }
            })
            .await;

        assert_eq!(result.unwrap_err(), "failure 3");
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_once_never_sleeps() {
        let start = tokio::time::Instant::now();
        let result: Result<(), String> = RetryStrategy::once()
            .retry(|| async { Err("boom".to_string()) })
            .await;

        assert!(result.is_err());
        assert_eq!(start.elapsed(), Duration::ZERO);
    }
}
