//! Bounded retry with exponential backoff
//!
//! Used by publishers that must not give up on the first transient bus
//! failure but also must not block forever. The caller decides what happens
//! once attempts are exhausted (typically a dead-letter write).

use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

/// Configuration for retry behavior
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Total number of attempts, including the first one
    pub max_attempts: u32,
    /// Sleep after the first failure; doubles after each further failure
    pub initial_backoff: Duration,
    /// Upper bound for a single sleep
    pub max_backoff: Duration,
    /// Also sleep after the final failed attempt before giving up
    pub backoff_after_final_attempt: bool,
}

impl RetryConfig {
    /// Backoff slept after failed attempt number `attempt` (1-based).
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(30),
            backoff_after_final_attempt: false,
        }
    }
}

/// Retry a fallible async operation with exponential backoff.
///
/// The operation receives the 1-based attempt number so it can log or audit
/// each attempt. The last error is returned as is, after one more backoff
/// when `backoff_after_final_attempt` is set.
///
/// ```rust
/// use event_bus::retry::{retry_with_backoff, RetryConfig};
///
/// # async fn example() -> Result<(), String> {
/// let config = RetryConfig::default();
/// let value = retry_with_backoff(
///     |_attempt| async { Ok::<_, String>(42) },
///     &config,
///     "example_operation",
/// )
/// .await?;
/// assert_eq!(value, 42);
/// # Ok(())
/// # }
/// ```
pub async fn retry_with_backoff<F, Fut, T, E>(
    operation: F,
    config: &RetryConfig,
    context: &str,
) -> Result<T, E>
where
    F: Fn(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let max_attempts = config.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;

        match operation(attempt).await {
            Ok(result) => {
                if attempt > 1 {
                    debug!(context = %context, attempt, "Operation succeeded after retry");
                }
                return Ok(result);
            }
            Err(e) if attempt >= max_attempts => {
                warn!(
                    context = %context,
                    attempts = attempt,
                    error = %e,
                    "Operation failed after max retries"
                );
                if config.backoff_after_final_attempt {
                    sleep(config.backoff_for(attempt)).await;
                }
                return Err(e);
            }
            Err(e) => {
                let backoff = config.backoff_for(attempt);
                warn!(
                    context = %context,
                    attempt,
                    max_attempts,
                    backoff_ms = backoff.as_millis() as u64,
                    error = %e,
                    "Operation failed, retrying with backoff"
                );
                sleep(backoff).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::{Arc, Mutex};

    #[test]
    fn backoff_doubles_and_caps() {
        let config = RetryConfig {
            max_attempts: 6,
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(5),
            backoff_after_final_attempt: false,
        };
        assert_eq!(config.backoff_for(1), Duration::from_secs(1));
        assert_eq!(config.backoff_for(2), Duration::from_secs(2));
        assert_eq!(config.backoff_for(3), Duration::from_secs(4));
        assert_eq!(config.backoff_for(4), Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_retry_succeeds_first_attempt() {
        let result = retry_with_backoff(
            |_| async { Ok::<_, String>(42) },
            &RetryConfig::default(),
            "test_operation",
        )
        .await;

        assert_eq!(result, Ok(42));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_succeeds_after_failures() {
        let seen = Arc::new(Mutex::new(Vec::new()));

        let result = retry_with_backoff(
            |attempt| {
                let seen = seen.clone();
                async move {
                    seen.lock().unwrap().push(attempt);
                    if attempt < 3 {
                        Err(format!("attempt {attempt}"))
                    } else {
                        Ok(attempt)
                    }
                }
            },
            &RetryConfig::default(),
            "test_operation",
        )
        .await;

        assert_eq!(result, Ok(3));
        assert_eq!(*seen.lock().unwrap(), vec![1, 2, 3]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_returns_last_error_without_trailing_sleep() {
        let calls = AtomicU32::new(0);
        let start = tokio::time::Instant::now();

        let result = retry_with_backoff(
            |attempt| {
                calls.fetch_add(1, Ordering::SeqCst);
                async move { Err::<(), _>(format!("failure {attempt}")) }
            },
            &RetryConfig::default(),
            "test_operation",
        )
        .await;

        assert_eq!(result, Err("failure 3".to_string()));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        // 1s + 2s between the three attempts, nothing after the last
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_secs(3));
        assert!(elapsed < Duration::from_secs(4));
    }

    #[tokio::test(start_paused = true)]
    async fn test_final_backoff_waits_full_schedule() {
        let config = RetryConfig {
            backoff_after_final_attempt: true,
            ..RetryConfig::default()
        };
        let start = tokio::time::Instant::now();

        let result = retry_with_backoff(
            |attempt| async move { Err::<(), _>(format!("failure {attempt}")) },
            &config,
            "test_operation",
        )
        .await;

        assert_eq!(result, Err("failure 3".to_string()));
        // 1s + 2s + 4s
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_secs(7));
        assert!(elapsed < Duration::from_secs(8));
    }

    #[tokio::test]
    async fn zero_attempts_still_tries_once() {
        let config = RetryConfig {
            max_attempts: 0,
            ..RetryConfig::default()
        };
        let result = retry_with_backoff(|_| async { Err::<(), _>("nope") }, &config, "t").await;
        assert_eq!(result, Err("nope"));
    }
}
