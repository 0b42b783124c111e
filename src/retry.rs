//! Bounded retry with exponential backoff for outbound Gmail calls

use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::RetryConfig;
use crate::error::{GmailError, Result};

pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(300);

/// How often and how patiently a remote call is retried
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first one
    pub max_attempts: u32,
    /// Delay before the second attempt; doubles for every further attempt
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: DEFAULT_BASE_DELAY,
        }
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self::new(config.max_attempts, Duration::from_millis(config.base_delay_ms))
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
        }
    }

    /// Backoff slept after failed attempt number `attempt` (1-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.base_delay.saturating_mul(1u32 << exponent)
    }

    /// Worst-case time spent sleeping if every attempt fails
    pub fn total_backoff(&self) -> Duration {
        (1..self.max_attempts).map(|a| self.delay_for(a)).sum()
    }
}

/// Execute an async operation, retrying transient failures with exponential backoff
///
/// Only [`GmailError::is_transient`] errors are retried. Permanent errors are
/// returned unchanged after the first attempt. When every attempt fails with a
/// transient error the last one is wrapped in
/// [`GmailError::RemoteOperationFailed`].
pub async fn with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    operation_name: &str,
    mut operation: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0;

    loop {
        attempt += 1;
        match operation().await {
            Ok(result) => {
                if attempt > 1 {
                    debug!("{} succeeded on attempt {}", operation_name, attempt);
                }
                return Ok(result);
            }
            Err(e) if e.is_transient() && attempt < policy.max_attempts => {
                let delay = policy.delay_for(attempt);
                warn!(
                    "{} failed (attempt {}/{}): {}. Retrying in {:?}...",
                    operation_name, attempt, policy.max_attempts, e, delay
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) if e.is_transient() => {
                warn!(
                    "{} failed after {} attempt(s): {}",
                    operation_name, attempt, e
                );
                return Err(GmailError::RemoteOperationFailed {
                    operation: operation_name.to_string(),
                    attempts: attempt,
                    source: Box::new(e),
                });
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::new(max_attempts, Duration::from_millis(1))
    }

    fn server_error() -> GmailError {
        GmailError::ServerError {
            status: 500,
            message: "Internal Server Error".to_string(),
        }
    }

    #[test]
    fn test_delay_doubles() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(1), Duration::from_millis(300));
        assert_eq!(policy.delay_for(2), Duration::from_millis(600));
        assert_eq!(policy.delay_for(3), Duration::from_millis(1200));
        assert_eq!(policy.total_backoff(), Duration::from_millis(900));
    }

    #[test]
    fn test_zero_attempts_means_one() {
        assert_eq!(RetryPolicy::new(0, Duration::ZERO).max_attempts, 1);
    }

    #[tokio::test]
    async fn test_retries_server_errors_then_succeeds() {
        for n in 1..=4u32 {
            let calls = Arc::new(AtomicU32::new(0));
            let calls_clone = Arc::clone(&calls);

            let result = with_retry(&fast_policy(n), "test_op", || {
                let calls = Arc::clone(&calls_clone);
                async move {
                    let current = calls.fetch_add(1, Ordering::SeqCst) + 1;
                    if current < n {
                        Err(server_error())
                    } else {
                        Ok("success")
                    }
                }
            })
            .await;

            assert_eq!(result.unwrap(), "success");
            assert_eq!(calls.load(Ordering::SeqCst), n);
        }
    }

    #[tokio::test]
    async fn test_exhausts_attempts() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls_clone = Arc::clone(&calls);

        let result: Result<()> = with_retry(&fast_policy(3), "modify_message", || {
            let calls = Arc::clone(&calls_clone);
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(server_error())
            }
        })
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        match result {
            Err(GmailError::RemoteOperationFailed {
                operation,
                attempts,
                source,
            }) => {
                assert_eq!(operation, "modify_message");
                assert_eq!(attempts, 3);
                assert!(matches!(*source, GmailError::ServerError { status: 500, .. }));
            }
            other => panic!("expected RemoteOperationFailed, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_client_error_not_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls_clone = Arc::clone(&calls);

        let result: Result<()> = with_retry(&fast_policy(3), "test_op", || {
            let calls = Arc::clone(&calls_clone);
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(GmailError::from_status(404, "Not Found"))
            }
        })
        .await;

        assert!(matches!(result, Err(GmailError::NotFound(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_network_error_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls_clone = Arc::clone(&calls);

        let result = with_retry(&fast_policy(3), "test_op", || {
            let calls = Arc::clone(&calls_clone);
            async move {
                if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(GmailError::NetworkError("connection reset".to_string()))
                } else {
                    Ok(7)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_sleeps_between_attempts() {
        let start = tokio::time::Instant::now();
        let result: Result<()> = with_retry(&RetryPolicy::default(), "test_op", || async {
            Err(server_error())
        })
        .await;

        assert!(result.is_err());
        // 300ms + 600ms, no sleep after the final attempt
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(900), "elapsed {:?}", elapsed);
        assert!(elapsed < Duration::from_millis(1200), "elapsed {:?}", elapsed);
    }
}
