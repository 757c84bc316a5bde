//! Retry policies for non-streaming calls.
//!
//! The executor and the stream reader never retry on their own. A policy
//! decides whether another attempt is worth making based on
//! [`ApiError::is_recoverable`] and the caller's [`RequestContext`].

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::context::RequestContext;
use crate::error::{ApiError, ErrorCategory};

#[async_trait]
pub trait Retry: Send + Sync {
    /// Run `op` until it succeeds or the policy gives up.
    ///
    /// `op` receives the attempt number, starting at 1. A non-recoverable
    /// error is returned immediately, and no attempt starts once `ctx` is
    /// cancelled or past its deadline.
    async fn retry<T, F, Fut>(&self, ctx: &RequestContext, label: &str, op: F) -> Result<T, ApiError>
    where
        T: Send,
        F: FnMut(u32) -> Fut + Send,
        Fut: Future<Output = Result<T, ApiError>> + Send;
}

/// Exactly one attempt.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoRetry;

#[async_trait]
impl Retry for NoRetry {
    async fn retry<T, F, Fut>(&self, ctx: &RequestContext, label: &str, mut op: F) -> Result<T, ApiError>
    where
        T: Send,
        F: FnMut(u32) -> Fut + Send,
        Fut: Future<Output = Result<T, ApiError>> + Send,
    {
        if let Some(err) = interrupted(ctx, label) {
            return Err(err);
        }
        op(1).await
    }
}

/// Up to `max_attempts` attempts with a constant pause between them.
#[derive(Debug, Clone, Copy)]
pub struct FixedRetry {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl Default for FixedRetry {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay: Duration::from_millis(500),
        }
    }
}

impl FixedRetry {
    #[must_use]
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay,
        }
    }
}

#[async_trait]
impl Retry for FixedRetry {
    async fn retry<T, F, Fut>(&self, ctx: &RequestContext, label: &str, mut op: F) -> Result<T, ApiError>
    where
        T: Send,
        F: FnMut(u32) -> Fut + Send,
        Fut: Future<Output = Result<T, ApiError>> + Send,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            if let Some(err) = interrupted(ctx, label) {
                return Err(err);
            }
            debug!(operation = label, attempt, "starting attempt");

            let err = match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };

            if !err.is_recoverable() {
                return Err(err);
            }
            if attempt >= max_attempts {
                return Err(err.with_context("retryAttempts", attempt));
            }

            warn!(
                operation = label,
                attempt,
                code = err.code(),
                delay = ?self.delay,
                "recoverable failure, retrying"
            );

            tokio::select! {
                biased;
                () = ctx.deadline_elapsed() => return Err(deadline_error(ctx, label)),
                () = ctx.token().cancelled() => return Err(cancelled_error(label)),
                () = tokio::time::sleep(self.delay) => {}
            }
            attempt += 1;
        }
    }
}

fn interrupted(ctx: &RequestContext, label: &str) -> Option<ApiError> {
    if ctx.deadline_exceeded() {
        Some(deadline_error(ctx, label))
    } else if ctx.is_cancelled() {
        Some(cancelled_error(label))
    } else {
        None
    }
}

fn deadline_error(ctx: &RequestContext, label: &str) -> ApiError {
    let timeout = ctx
        .timeout_duration()
        .map(|d| humantime::format_duration(d).to_string())
        .unwrap_or_default();
    ApiError::new(
        ErrorCategory::Network,
        "REQUEST_TIMEOUT",
        format!("{label} timed out after {timeout}"),
    )
    .recoverable()
    .with_context("operation", label)
    .with_context("timeout", timeout)
}

fn cancelled_error(label: &str) -> ApiError {
    ApiError::new(
        ErrorCategory::Internal,
        "RETRY_CANCELLED",
        format!("{label} was cancelled before it could complete"),
    )
    .with_context("operation", label)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    fn flaky() -> ApiError {
        ApiError::new(ErrorCategory::Network, "HTTP_REQUEST_FAILED", "reset").recoverable()
    }

    #[tokio::test]
    async fn attempts_start_at_one() {
        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let policy = FixedRetry::new(3, Duration::from_millis(1));
        let result = policy
            .retry(&RequestContext::new(), "GET /x", |attempt| {
                let seen = Arc::clone(&seen);
                async move {
                    seen.lock().push(attempt);
                    if attempt < 3 { Err(flaky()) } else { Ok(attempt) }
                }
            })
            .await;
        assert_eq!(result.unwrap(), 3);
        assert_eq!(*seen.lock(), vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn stops_on_non_recoverable() {
        let calls = AtomicU32::new(0);
        let policy = FixedRetry::new(5, Duration::from_millis(1));
        let err = policy
            .retry(&RequestContext::new(), "GET /x", |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(ApiError::new(ErrorCategory::Auth, "UNAUTHORIZED", "no")) }
            })
            .await
            .unwrap_err();
        assert!(err.is_code("UNAUTHORIZED"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn exhaustion_records_attempts() {
        let policy = FixedRetry::new(2, Duration::from_millis(1));
        let err = policy
            .retry(&RequestContext::new(), "GET /x", |_| async { Err::<(), _>(flaky()) })
            .await
            .unwrap_err();
        assert!(err.is_code("HTTP_REQUEST_FAILED"));
        assert_eq!(err.context_value("retryAttempts"), Some("2"));
    }

    #[tokio::test]
    async fn cancellation_interrupts_the_pause() {
        let ctx = RequestContext::new();
        let calls = AtomicU32::new(0);
        let policy = FixedRetry::new(10, Duration::from_secs(3600));
        let canceller = ctx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            canceller.cancel();
        });
        let err = policy
            .retry(&ctx, "GET /x", |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(flaky()) }
            })
            .await
            .unwrap_err();
        assert!(err.is_code("RETRY_CANCELLED"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_stops_new_attempts() {
        let ctx = RequestContext::with_timeout(Duration::from_secs(1));
        let policy = FixedRetry::new(10, Duration::from_secs(5));
        let err = policy
            .retry(&ctx, "GET /x", |_| async { Err::<(), _>(flaky()) })
            .await
            .unwrap_err();
        assert!(err.is_code("REQUEST_TIMEOUT"));
        assert_eq!(err.context_value("timeout"), Some("1s"));
    }

    #[tokio::test]
    async fn no_retry_runs_once() {
        let calls = AtomicU32::new(0);
        let err = NoRetry
            .retry(&RequestContext::new(), "GET /x", |attempt| {
                assert_eq!(attempt, 1);
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(flaky()) }
            })
            .await
            .unwrap_err();
        assert!(err.is_recoverable());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn cancelled_context_skips_the_first_attempt() {
        let ctx = RequestContext::new();
        ctx.cancel();
        let err = NoRetry
            .retry(&ctx, "GET /x", |_| async { Ok(()) })
            .await
            .unwrap_err();
        assert!(err.is_code("RETRY_CANCELLED"));
    }
}
