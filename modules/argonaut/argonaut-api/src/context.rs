use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Cancellation and deadline for one logical call.
///
/// Cloning shares the same cancellation token. The original timeout is kept
/// so error messages report what the caller asked for rather than the time
/// left when the failure happened.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    cancel: CancellationToken,
    deadline: Option<Instant>,
    timeout: Option<Duration>,
}

impl RequestContext {
    /// No deadline, fresh cancellation token.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Deadline `timeout` from now.
    #[must_use]
    pub fn with_timeout(timeout: Duration) -> Self {
        Self::new().timeout(timeout)
    }

    /// Use an existing token, e.g. one owned by a UI view.
    #[must_use]
    pub fn with_token(cancel: CancellationToken) -> Self {
        Self {
            cancel,
            deadline: None,
            timeout: None,
        }
    }

    /// Set a deadline `timeout` from now, keeping the token.
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.deadline = Some(Instant::now() + timeout);
        self.timeout = Some(timeout);
        self
    }

    /// A context cancelled together with this one, but which can also be
    /// cancelled on its own.
    #[must_use]
    pub fn child(&self) -> Self {
        Self {
            cancel: self.cancel.child_token(),
            deadline: self.deadline,
            timeout: self.timeout,
        }
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    #[must_use]
    pub fn token(&self) -> &CancellationToken {
        &self.cancel
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    #[must_use]
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    #[must_use]
    pub fn timeout_duration(&self) -> Option<Duration> {
        self.timeout
    }

    #[must_use]
    pub fn deadline_exceeded(&self) -> bool {
        self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// Resolves when the deadline passes; never when there is none.
    pub async fn deadline_elapsed(&self) {
        match self.deadline {
            Some(deadline) => tokio::time::sleep_until(deadline).await,
            None => std::future::pending::<()>().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn child_follows_parent_cancellation() {
        let parent = RequestContext::new();
        let child = parent.child();
        assert!(!child.is_cancelled());
        parent.cancel();
        assert!(child.is_cancelled());
    }

    #[tokio::test]
    async fn child_cancellation_does_not_reach_parent() {
        let parent = RequestContext::new();
        let child = parent.child();
        child.cancel();
        assert!(!parent.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_elapses() {
        let ctx = RequestContext::with_timeout(Duration::from_secs(3));
        assert!(!ctx.deadline_exceeded());
        assert_eq!(ctx.timeout_duration(), Some(Duration::from_secs(3)));
        ctx.deadline_elapsed().await;
        assert!(ctx.deadline_exceeded());
    }

    #[tokio::test]
    async fn no_deadline_never_elapses() {
        let ctx = RequestContext::new();
        let raced = tokio::time::timeout(Duration::from_millis(20), ctx.deadline_elapsed()).await;
        assert!(raced.is_err());
    }
}
