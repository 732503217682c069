//! Fixed-delay retry with a per-attempt timeout.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::{sleep, timeout};
use tracing::{debug, warn};

use crate::error::ErrorKind;
use crate::models::BatchJobConfig;

/// Configuration for retry behavior.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Total number of attempts, including the first.
    pub max_attempts: u32,
    /// Fixed delay between attempts.
    pub delay: Duration,
    /// Upper bound on a single attempt.
    pub attempt_timeout: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay: Duration::from_millis(100),
            attempt_timeout: Duration::from_secs(30),
        }
    }
}

impl RetryConfig {
    /// Create a new retry configuration.
    #[must_use]
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            ..Default::default()
        }
    }

    /// Set the delay between attempts.
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Set the per-attempt timeout.
    #[must_use]
    pub fn with_attempt_timeout(mut self, attempt_timeout: Duration) -> Self {
        self.attempt_timeout = attempt_timeout;
        self
    }
}

impl From<&BatchJobConfig> for RetryConfig {
    fn from(config: &BatchJobConfig) -> Self {
        Self {
            max_attempts: config.retry_attempts,
            delay: config.retry_delay,
            attempt_timeout: config.timeout_per_batch,
        }
    }
}

/// Retry result indicating what happened.
#[derive(Debug)]
pub enum RetryResult<T> {
    /// Operation succeeded.
    Success { value: T, attempts: u32 },
    /// Operation failed on every attempt.
    Failed {
        kind: ErrorKind,
        message: String,
        attempts: u32,
    },
}

impl<T> RetryResult<T> {
    pub fn attempts(&self) -> u32 {
        match self {
            RetryResult::Success { attempts, .. } | RetryResult::Failed { attempts, .. } => {
                *attempts
            }
        }
    }
}

/// Run `operation` until it succeeds or `max_attempts` is reached.
///
/// Attempts run strictly one after another. A `max_attempts` of zero is
/// treated as one.
pub async fn with_retry<T, F, Fut>(
    config: &RetryConfig,
    label: &str,
    mut operation: F,
) -> RetryResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = anyhow::Result<T>>,
{
    with_exclusive_retry(config, label, |_attempt| operation()).await
}

/// Like [`with_retry`], handing every attempt a permit it must hold for as
/// long as its work runs.
///
/// An attempt that times out may leave work behind that cannot be
/// cancelled, such as a call on a blocking thread. Moving the permit into
/// that work keeps the next attempt from starting until it has returned.
/// Waiting for the permit does not count against the attempt timeout.
pub async fn with_exclusive_retry<T, F, Fut>(
    config: &RetryConfig,
    label: &str,
    mut operation: F,
) -> RetryResult<T>
where
    F: FnMut(OwnedSemaphorePermit) -> Fut,
    Fut: Future<Output = anyhow::Result<T>>,
{
    let max_attempts = config.max_attempts.max(1);
    let gate = Arc::new(Semaphore::new(1));
    let mut attempts = 0;

    loop {
        attempts += 1;

        let permit = match Arc::clone(&gate).try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => {
                debug!(%label, attempt = attempts, "waiting for abandoned attempt to return");
                let Ok(permit) = Arc::clone(&gate).acquire_owned().await else {
                    return RetryResult::Failed {
                        kind: ErrorKind::ProcessingError,
                        message: "attempt gate closed".to_string(),
                        attempts: attempts - 1,
                    };
                };
                permit
            }
        };

        let (kind, message) = match timeout(config.attempt_timeout, operation(permit)).await {
            Ok(Ok(value)) => return RetryResult::Success { value, attempts },
            Ok(Err(error)) => {
                let message = format!("{error:#}");
                warn!(%label, attempt = attempts, max_attempts, error = %message, "attempt failed");
                (ErrorKind::ProcessingError, message)
            }
            Err(_) => {
                let message = format!(
                    "attempt timed out after {}ms",
                    config.attempt_timeout.as_millis()
                );
                warn!(%label, attempt = attempts, max_attempts, "attempt timed out");
                (ErrorKind::Timeout, message)
            }
        };

        if attempts >= max_attempts {
            return RetryResult::Failed {
                kind,
                message,
                attempts,
            };
        }

        sleep(config.delay).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

    fn fast(max_attempts: u32) -> RetryConfig {
        RetryConfig::new(max_attempts)
            .with_delay(Duration::from_millis(10))
            .with_attempt_timeout(Duration::from_millis(200))
    }

    #[tokio::test]
    async fn test_retry_success_first_attempt() {
        let counter = AtomicU32::new(0);
        let result = with_retry(&fast(3), "test", || async {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok::<_, anyhow::Error>("success")
        })
        .await;

        match result {
            RetryResult::Success { value, attempts } => {
                assert_eq!(value, "success");
                assert_eq!(attempts, 1);
            }
            _ => panic!("expected success"),
        }
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_retry_success_after_retries() {
        let counter = AtomicU32::new(0);
        let result = with_retry(&fast(3), "test", || async {
            let count = counter.fetch_add(1, Ordering::SeqCst);
            if count < 2 {
                anyhow::bail!("transient error")
            }
            Ok("success")
        })
        .await;

        assert!(matches!(result, RetryResult::Success { attempts: 3, .. }));
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_exhausted() {
        let counter = AtomicU32::new(0);
        let result = with_retry(&fast(3), "test", || async {
            counter.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>(anyhow::anyhow!("permanent error"))
        })
        .await;

        match result {
            RetryResult::Failed {
                kind,
                message,
                attempts,
            } => {
                assert_eq!(kind, ErrorKind::ProcessingError);
                assert!(message.contains("permanent error"));
                assert_eq!(attempts, 3);
            }
            _ => panic!("expected failure"),
        }
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_timeout_every_attempt() {
        let config = RetryConfig::new(2)
            .with_delay(Duration::from_millis(50))
            .with_attempt_timeout(Duration::from_millis(100));
        let result = with_retry(&config, "test", || async {
            sleep(Duration::from_secs(10)).await;
            Ok::<(), anyhow::Error>(())
        })
        .await;

        match result {
            RetryResult::Failed { kind, attempts, .. } => {
                assert_eq!(kind, ErrorKind::Timeout);
                assert_eq!(attempts, 2);
            }
            _ => panic!("expected timeout"),
        }
    }

    #[tokio::test]
    async fn test_zero_attempts_runs_once() {
        let counter = AtomicU32::new(0);
        let result = with_retry(&fast(0), "test", || async {
            counter.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>(anyhow::anyhow!("nope"))
        })
        .await;
        assert_eq!(result.attempts(), 1);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timed_out_work_finishes_before_next_attempt() {
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let config = RetryConfig::new(3)
            .with_delay(Duration::from_millis(10))
            .with_attempt_timeout(Duration::from_millis(50));

        let start = tokio::time::Instant::now();
        let result = with_exclusive_retry(&config, "test", |permit| {
            let running = Arc::clone(&running);
            let peak = Arc::clone(&peak);
            // Detached work that outlives the attempt timeout.
            let work = tokio::spawn(async move {
                let _permit = permit;
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                sleep(Duration::from_millis(200)).await;
                running.fetch_sub(1, Ordering::SeqCst);
            });
            async move {
                work.await?;
                Ok::<(), anyhow::Error>(())
            }
        })
        .await;

        match result {
            RetryResult::Failed { kind, attempts, .. } => {
                assert_eq!(kind, ErrorKind::Timeout);
                assert_eq!(attempts, 3);
            }
            _ => panic!("expected timeout"),
        }
        assert_eq!(peak.load(Ordering::SeqCst), 1);
        assert!(start.elapsed() >= Duration::from_millis(400));
    }
}
