//! Retry with linear backoff
//!
//! Attempt `n` (1-based) that fails is followed by a pause of `step * n`,
//! up to `max_retries` extra attempts.

use crate::client::cancel::CancelToken;
use crate::config::ProviderInstanceConfig;
use crate::error::{Result, RouterError};
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// How often and how patiently to retry an upstream call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Extra attempts after the first one
    pub max_retries: u32,

    /// Base delay, multiplied by the attempt number
    pub step: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, step: Duration) -> Self {
        Self { max_retries, step }
    }

    pub fn for_instance(config: &ProviderInstanceConfig) -> Self {
        Self::new(
            config.max_retries,
            Duration::from_millis(config.retry_delay_ms),
        )
    }
}

/// `backoff` schedule yielding `step`, `2 * step`, ... for `max_retries` pauses
#[derive(Debug, Clone)]
pub struct LinearBackoff {
    step: Duration,
    max_retries: u32,
    attempt: u32,
}

impl LinearBackoff {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            step: policy.step,
            max_retries: policy.max_retries,
            attempt: 0,
        }
    }
}

impl backoff::backoff::Backoff for LinearBackoff {
    fn next_backoff(&mut self) -> Option<Duration> {
        if self.attempt >= self.max_retries {
            return None;
        }
        self.attempt += 1;
        Some(self.step.checked_mul(self.attempt).unwrap_or(Duration::MAX))
    }

    fn reset(&mut self) {
        self.attempt = 0;
    }
}

/// Run `op` until it succeeds, fails permanently or runs out of retries.
///
/// Cancellation aborts both a running attempt and a pending pause.
pub async fn with_retry<T, F, Fut>(
    policy: RetryPolicy,
    cancel: &CancelToken,
    label: &str,
    mut op: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    if cancel.is_cancelled() {
        return Err(RouterError::Cancelled);
    }

    let attempts = backoff::future::retry_notify(
        LinearBackoff::new(policy),
        || {
            let attempt = op();
            async move {
                attempt.await.map_err(|err| {
                    if err.is_retryable() {
                        backoff::Error::transient(err)
                    } else {
                        backoff::Error::permanent(err)
                    }
                })
            }
        },
        |err: RouterError, delay: Duration| {
            warn!(
                call = label,
                error = %err,
                delay_ms = delay.as_millis() as u64,
                "Upstream call failed, retrying"
            );
        },
    );

    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(RouterError::Cancelled),
        result = attempts => result,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use backoff::backoff::Backoff;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn fast(max_retries: u32) -> RetryPolicy {
        RetryPolicy::new(max_retries, Duration::from_millis(5))
    }

    fn server_error() -> RouterError {
        RouterError::Upstream {
            status: 500,
            body: "boom".to_string(),
        }
    }

    #[test]
    fn test_linear_schedule() {
        let mut schedule = LinearBackoff::new(RetryPolicy::new(3, Duration::from_secs(1)));

        assert_eq!(schedule.next_backoff(), Some(Duration::from_secs(1)));
        assert_eq!(schedule.next_backoff(), Some(Duration::from_secs(2)));
        assert_eq!(schedule.next_backoff(), Some(Duration::from_secs(3)));
        assert_eq!(schedule.next_backoff(), None);

        schedule.reset();
        assert_eq!(schedule.next_backoff(), Some(Duration::from_secs(1)));
    }

    #[test]
    fn test_huge_step_saturates() {
        let step = Duration::from_secs(u64::MAX / 2 + 1);
        let mut schedule = LinearBackoff::new(RetryPolicy::new(3, step));

        assert_eq!(schedule.next_backoff(), Some(step));
        assert_eq!(schedule.next_backoff(), Some(Duration::MAX));
        assert_eq!(schedule.next_backoff(), Some(Duration::MAX));
    }

    #[test]
    fn test_zero_retries_never_pauses() {
        let mut schedule = LinearBackoff::new(RetryPolicy::new(0, Duration::from_secs(1)));
        assert_eq!(schedule.next_backoff(), None);
    }

    #[tokio::test]
    async fn test_retries_until_success() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result = with_retry(fast(3), &CancelToken::new(), "test", || {
            let counter = counter.clone();
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(server_error())
                } else {
                    Ok("done")
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), "done");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_retries() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result: Result<()> = with_retry(fast(2), &CancelToken::new(), "test", || {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Err(server_error()) }
        })
        .await;

        assert!(matches!(result, Err(RouterError::Upstream { status: 500, .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_permanent_error_is_not_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result: Result<()> = with_retry(fast(5), &CancelToken::new(), "test", || {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Err(RouterError::NoKeysAvailable("openai:a".to_string())) }
        })
        .await;

        assert!(matches!(result, Err(RouterError::NoKeysAvailable(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cancel_interrupts_backoff() {
        let cancel = CancelToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let policy = RetryPolicy::new(3, Duration::from_secs(30));
        let result: Result<()> = tokio::time::timeout(
            Duration::from_secs(5),
            with_retry(policy, &cancel, "test", || async { Err(server_error()) }),
        )
        .await
        .unwrap();

        assert!(matches!(result, Err(RouterError::Cancelled)));
    }
}
