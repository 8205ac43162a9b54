//! Rate-limit handling for forge requests.
//!
//! A primary rate limit (the hourly quota) is waited out once, for as long
//! as the forge says the quota needs to reset, up to a configured ceiling.
//! A secondary rate limit is reported and propagated without a retry.

use std::{future::Future, time::Duration};

use tracing::warn;

use crate::error::ReleaseError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitSignal {
    Primary,
    Secondary,
}

/// Errors that can tell whether they were caused by a rate limit.
pub trait RateLimitAware {
    fn rate_limit_signal(&self) -> Option<RateLimitSignal>;
}

/// Classifies an HTTP error response by status and message.
pub fn classify_response(status: u16, message: &str) -> Option<RateLimitSignal> {
    if !matches!(status, 403 | 429) {
        return None;
    }

    let message = message.to_ascii_lowercase();
    if message.contains("secondary rate limit") {
        Some(RateLimitSignal::Secondary)
    } else if message.contains("api rate limit exceeded") {
        Some(RateLimitSignal::Primary)
    } else {
        None
    }
}

impl RateLimitAware for octocrab::Error {
    fn rate_limit_signal(&self) -> Option<RateLimitSignal> {
        match self {
            octocrab::Error::GitHub { source, .. } => {
                classify_response(source.status_code.as_u16(), &source.message)
            }
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Longest the adapter will sleep before its single retry.
    pub max_wait: Duration,
    /// Used when the forge does not say when the quota resets.
    pub fallback: Duration,
}

impl RetryPolicy {
    pub fn new(max_wait: Duration) -> Self {
        Self {
            max_wait,
            fallback: Duration::from_secs(60),
        }
    }

    fn delay(&self, advertised: Option<Duration>) -> Duration {
        advertised.unwrap_or(self.fallback).min(self.max_wait)
    }
}

/// Runs `call`, retrying exactly once after a primary rate limit.
///
/// `backoff` is only consulted when a primary rate limit was hit and
/// reports how long until the quota resets. Every error returned is a
/// [`ReleaseError::ForgeRequest`] naming `operation`.
pub async fn with_rate_limit_retry<T, E, Call, Fut, Backoff, BackoffFut>(
    operation: &str,
    policy: &RetryPolicy,
    backoff: Backoff,
    mut call: Call,
) -> anyhow::Result<T>
where
    Call: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: RateLimitAware + std::error::Error + Send + Sync + 'static,
    Backoff: FnOnce() -> BackoffFut,
    BackoffFut: Future<Output = Option<Duration>>,
{
    let err = match call().await {
        Ok(value) => return Ok(value),
        Err(err) => err,
    };

    match err.rate_limit_signal() {
        Some(RateLimitSignal::Primary) => {
            let delay = policy.delay(backoff().await);
            warn!(
                operation,
                delay_secs = delay.as_secs(),
                "primary rate limit exceeded, retrying once after backoff"
            );
            tokio::time::sleep(delay).await;

            call()
                .await
                .map_err(|err| ReleaseError::forge_request(operation, err).into())
        }
        Some(RateLimitSignal::Secondary) => {
            warn!(operation, error = %err, "secondary rate limit hit, not retrying");
            Err(ReleaseError::forge_request(operation, err).into())
        }
        None => Err(ReleaseError::forge_request(operation, err).into()),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[derive(Debug, thiserror::Error)]
    #[error("{message}")]
    struct FakeError {
        status: u16,
        message: String,
    }

    impl FakeError {
        fn new(status: u16, message: &str) -> Self {
            Self {
                status,
                message: message.to_string(),
            }
        }
    }

    impl RateLimitAware for FakeError {
        fn rate_limit_signal(&self) -> Option<RateLimitSignal> {
            classify_response(self.status, &self.message)
        }
    }

    fn policy() -> RetryPolicy {
        RetryPolicy {
            max_wait: Duration::ZERO,
            fallback: Duration::ZERO,
        }
    }

    #[test]
    fn test_classify_response() {
        assert_eq!(
            classify_response(403, "API rate limit exceeded for installation ID 1."),
            Some(RateLimitSignal::Primary)
        );
        assert_eq!(
            classify_response(429, "You have exceeded a secondary rate limit."),
            Some(RateLimitSignal::Secondary)
        );
        assert_eq!(classify_response(403, "Resource not accessible by integration"), None);
        assert_eq!(classify_response(500, "API rate limit exceeded"), None);
    }

    #[test]
    fn test_delay_is_capped() {
        let policy = RetryPolicy::new(Duration::from_secs(30));
        assert_eq!(policy.delay(Some(Duration::from_secs(3600))), Duration::from_secs(30));
        assert_eq!(policy.delay(Some(Duration::from_secs(5))), Duration::from_secs(5));
        assert_eq!(policy.delay(None), Duration::from_secs(30));
    }

    #[tokio::test]
    async fn test_primary_rate_limit_retries_once() {
        let calls = AtomicUsize::new(0);
        let calls = &calls;

        let result = with_rate_limit_retry(
            "list tags",
            &policy(),
            || async { Some(Duration::from_secs(3600)) },
            move || async move {
                match calls.fetch_add(1, Ordering::SeqCst) {
                    0 => Err(FakeError::new(403, "API rate limit exceeded")),
                    _ => Ok(7),
                }
            },
        )
        .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_primary_rate_limit_gives_up_after_one_retry() {
        let calls = AtomicUsize::new(0);
        let calls = &calls;

        let result: anyhow::Result<()> = with_rate_limit_retry(
            "create comment",
            &policy(),
            || async { None },
            move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(FakeError::new(403, "API rate limit exceeded"))
            },
        )
        .await;

        let err = result.unwrap_err();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(matches!(
            err.downcast_ref::<ReleaseError>(),
            Some(ReleaseError::ForgeRequest { operation, .. }) if operation == "create comment"
        ));
    }

    #[tokio::test]
    async fn test_secondary_and_other_errors_are_not_retried() {
        for (status, message) in [(403, "secondary rate limit"), (404, "Not Found")] {
            let calls = AtomicUsize::new(0);
            let calls = &calls;
            let backoff_consulted = AtomicUsize::new(0);

            let result: anyhow::Result<()> = with_rate_limit_retry(
                "close issue",
                &policy(),
                || async {
                    backoff_consulted.fetch_add(1, Ordering::SeqCst);
                    None
                },
                move || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(FakeError::new(status, message))
                },
            )
            .await;

            assert!(result.is_err());
            assert_eq!(calls.load(Ordering::SeqCst), 1);
            assert_eq!(backoff_consulted.load(Ordering::SeqCst), 0);
        }
    }
}
