//! Maps HTTP error responses onto [`ApiError`] values.

use serde::Deserialize;

use crate::error::{ApiError, ErrorCategory};

const LOGIN_ACTION: &str = "Please run 'argocd login' to authenticate";

/// Bodies at least this long are never sniffed for auth keywords.
const KEYWORD_SNIFF_LIMIT: usize = 500;

const AUTH_KEYWORDS: &[&str] = &["unauthorized", "invalid token", "authentication"];

/// The error envelope returned by the Argo CD API (`runtimeError`).
#[derive(Debug, Default, Deserialize)]
struct ServerErrorBody {
    #[serde(default)]
    error: String,
    #[serde(default)]
    message: String,
}

impl ServerErrorBody {
    /// Parse the envelope, treating a body without any message text as absent.
    fn parse(body: &[u8]) -> Option<Self> {
        if body.is_empty() {
            return None;
        }
        let parsed: Self = serde_json::from_slice(body).ok()?;
        (!parsed.message.is_empty() || !parsed.error.is_empty()).then_some(parsed)
    }

    /// `message` wins over `error`.
    fn into_text(self) -> String {
        if self.message.is_empty() {
            self.error
        } else {
            self.message
        }
    }
}

struct StatusRule {
    category: ErrorCategory,
    code: &'static str,
    message: Option<&'static str>,
    user_action: &'static str,
    recoverable: bool,
}

fn status_rule(status: u16) -> StatusRule {
    match status {
        401 => StatusRule {
            category: ErrorCategory::Auth,
            code: "UNAUTHORIZED",
            message: Some("Authentication required or token expired"),
            user_action: LOGIN_ACTION,
            recoverable: false,
        },
        403 => StatusRule {
            category: ErrorCategory::Permission,
            code: "FORBIDDEN",
            message: Some("Insufficient permissions for this operation"),
            user_action: "Check your Argo CD user permissions",
            recoverable: false,
        },
        404 => StatusRule {
            category: ErrorCategory::Api,
            code: "NOT_FOUND",
            message: Some("Requested resource not found"),
            user_action: "Verify the resource exists and the path is correct",
            recoverable: false,
        },
        409 => StatusRule {
            category: ErrorCategory::Validation,
            code: "CONFLICT",
            message: Some("Request conflicts with current state"),
            user_action: "Check the current state and adjust your request",
            recoverable: true,
        },
        429 => StatusRule {
            category: ErrorCategory::Api,
            code: "RATE_LIMITED",
            message: Some("Too many requests - rate limited"),
            user_action: "Wait a moment and try again",
            recoverable: true,
        },
        500..=599 => StatusRule {
            category: ErrorCategory::Api,
            code: "SERVER_ERROR",
            message: Some("Argo CD server error"),
            user_action: "Check Argo CD server status and try again",
            recoverable: true,
        },
        _ => StatusRule {
            category: ErrorCategory::Api,
            code: "API_ERROR",
            message: None,
            user_action: "Check the request and try again",
            recoverable: true,
        },
    }
}

fn mentions_auth_failure(body: &[u8]) -> bool {
    if body.is_empty() || body.len() >= KEYWORD_SNIFF_LIMIT {
        return false;
    }
    let text = String::from_utf8_lossy(body).to_lowercase();
    AUTH_KEYWORDS.iter().any(|keyword| text.contains(keyword))
}

/// Classify an error response.
///
/// The status table decides category and recoverability. A structured
/// server message replaces the generic one. Only when no structured
/// envelope is present, a short raw body mentioning an authentication
/// failure escalates the error to [`ErrorCategory::Auth`].
#[must_use]
pub fn classify_status(status: u16, body: &[u8]) -> ApiError {
    let rule = status_rule(status);
    let mut category = rule.category;
    let mut code = rule.code;
    let mut user_action = rule.user_action;
    let mut recoverable = rule.recoverable;
    let mut message = rule.message.map_or_else(
        || format!("API request failed with status {status}"),
        str::to_owned,
    );

    if let Some(server) = ServerErrorBody::parse(body) {
        message = server.into_text();
        tracing::debug!(status, message = %message, "parsed server error envelope");
    } else if mentions_auth_failure(body) {
        category = ErrorCategory::Auth;
        code = "AUTHENTICATION_FAILED";
        user_action = LOGIN_ACTION;
        recoverable = false;
    }

    let err = ApiError::new(category, code, message)
        .with_context("status", status)
        .with_user_action(user_action);
    if recoverable { err.recoverable() } else { err }
}
