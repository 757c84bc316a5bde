use std::collections::BTreeMap;
use std::fmt;
use std::io;

use thiserror::Error;

/// Broad error category used for user-facing handling and retry decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Missing, expired, or rejected credentials.
    Auth,
    /// Authenticated, but not allowed to perform the operation.
    Permission,
    /// Bad input or a conflicting request. Never retried.
    Validation,
    /// Transport-level failure, including timeouts.
    Network,
    /// Status-driven failure reported by the control plane.
    Api,
    /// Client-side failure, including cancellation.
    Internal,
    /// An event or buffer grew past its configured ceiling.
    ResourceExhausted,
}

impl ErrorCategory {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCategory::Auth => "auth",
            ErrorCategory::Permission => "permission",
            ErrorCategory::Validation => "validation",
            ErrorCategory::Network => "network",
            ErrorCategory::Api => "api",
            ErrorCategory::Internal => "internal",
            ErrorCategory::ResourceExhausted => "resource_exhausted",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A categorized, user-actionable error.
///
/// Created once at the failure site and never mutated afterwards; callers
/// may only add context entries that were not already present.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("[{category}:{code}] {message}")]
pub struct ApiError {
    category: ErrorCategory,
    code: String,
    message: String,
    context: BTreeMap<String, String>,
    recoverable: bool,
    user_action: Option<String>,
}

impl ApiError {
    /// Create a non-recoverable error with no context.
    pub fn new(category: ErrorCategory, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            category,
            code: code.into(),
            message: message.into(),
            context: BTreeMap::new(),
            recoverable: false,
            user_action: None,
        }
    }

    /// Attach a context entry. Existing keys keep their first value.
    #[must_use]
    pub fn with_context(mut self, key: impl Into<String>, value: impl fmt::Display) -> Self {
        self.context
            .entry(key.into())
            .or_insert_with(|| value.to_string());
        self
    }

    #[must_use]
    pub fn with_user_action(mut self, action: impl Into<String>) -> Self {
        self.user_action = Some(action.into());
        self
    }

    #[must_use]
    pub fn recoverable(mut self) -> Self {
        self.recoverable = true;
        self
    }

    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        self.category
    }

    #[must_use]
    pub fn code(&self) -> &str {
        &self.code
    }

    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    #[must_use]
    pub fn context(&self) -> &BTreeMap<String, String> {
        &self.context
    }

    #[must_use]
    pub fn context_value(&self, key: &str) -> Option<&str> {
        self.context.get(key).map(String::as_str)
    }

    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        self.recoverable
    }

    #[must_use]
    pub fn user_action(&self) -> Option<&str> {
        self.user_action.as_deref()
    }

    #[must_use]
    pub fn is_code(&self, code: &str) -> bool {
        self.code == code
    }

    #[must_use]
    pub fn is_category(&self, category: ErrorCategory) -> bool {
        self.category == category
    }
}

/// Failures raised by the event-stream reader.
#[derive(Debug, Error)]
pub enum StreamError {
    /// A single event grew past `max_accumulated_size`. The reader that
    /// raised this must not be read again.
    #[error("stream event exceeds maximum size: {size} bytes accumulated, limit {limit} bytes")]
    EventTooLarge { size: usize, limit: usize },

    #[error("stream read failed: {0}")]
    Io(#[from] io::Error),

    /// The reader already failed with [`StreamError::EventTooLarge`].
    #[error("stream reader is no longer usable after a previous failure")]
    Unusable,
}

impl StreamError {
    #[must_use]
    pub fn is_size_exceeded(&self) -> bool {
        matches!(self, StreamError::EventTooLarge { .. })
    }
}

impl From<StreamError> for ApiError {
    fn from(err: StreamError) -> Self {
        match err {
            StreamError::EventTooLarge { size, limit } => ApiError::new(
                ErrorCategory::ResourceExhausted,
                "EVENT_TOO_LARGE",
                format!("Stream event of {size} bytes exceeds the {limit} byte limit"),
            )
            .with_context("accumulated", size)
            .with_context("limit", limit)
            .with_user_action("Raise ARGONAUT_SSE_MAX_ACCUMULATED or narrow the watch"),
            StreamError::Io(e) => ApiError::new(
                ErrorCategory::Network,
                "STREAM_READ_FAILED",
                format!("Stream read failed: {e}"),
            )
            .recoverable()
            .with_user_action("Check your network connection and Argo CD server status"),
            StreamError::Unusable => ApiError::new(
                ErrorCategory::Internal,
                "STREAM_UNUSABLE",
                "Stream reader was used after a fatal error",
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_category_and_code() {
        let err = ApiError::new(ErrorCategory::Api, "NOT_FOUND", "app missing");
        assert_eq!(err.to_string(), "[api:NOT_FOUND] app missing");
    }

    #[test]
    fn context_is_append_only() {
        let err = ApiError::new(ErrorCategory::Network, "HTTP_REQUEST_FAILED", "boom")
            .with_context("url", "https://a")
            .with_context("url", "https://b")
            .with_context("method", "GET");
        assert_eq!(err.context_value("url"), Some("https://a"));
        assert_eq!(err.context_value("method"), Some("GET"));
    }

    #[test]
    fn new_errors_are_not_recoverable() {
        let err = ApiError::new(ErrorCategory::Api, "X", "y");
        assert!(!err.is_recoverable());
        assert!(err.recoverable().is_recoverable());
    }

    #[test]
    fn size_exceeded_maps_to_resource_exhausted() {
        let stream_err = StreamError::EventTooLarge { size: 10, limit: 5 };
        assert!(stream_err.is_size_exceeded());
        let err = ApiError::from(stream_err);
        assert_eq!(err.category(), ErrorCategory::ResourceExhausted);
        assert!(err.is_code("EVENT_TOO_LARGE"));
        assert!(!err.is_recoverable());
    }

    #[test]
    fn io_failure_maps_to_recoverable_network_error() {
        let err = ApiError::from(StreamError::Io(io::Error::other("reset")));
        assert_eq!(err.category(), ErrorCategory::Network);
        assert!(err.is_code("STREAM_READ_FAILED"));
        assert!(err.is_recoverable());
    }
}
