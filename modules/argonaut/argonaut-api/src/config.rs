use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Deserializer};

use crate::error::{ApiError, ErrorCategory};
use crate::sse::StreamConfig;
use crate::trust::{MinTlsVersion, TlsConfig};

const DEFAULT_SERVER: &str = "https://localhost:8080";

/// Transport timeouts.
///
/// `response_header` only bounds non-streaming calls; stream opens may wait
/// indefinitely for the first byte. `request` caps a plain call whose
/// [`crate::RequestContext`] carries no deadline of its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    #[serde(deserialize_with = "duration_str")]
    pub connect: Duration,
    #[serde(deserialize_with = "duration_str")]
    pub response_header: Duration,
    #[serde(deserialize_with = "duration_str")]
    pub request: Duration,
    #[serde(deserialize_with = "duration_str")]
    pub pool_idle: Duration,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect: Duration::from_secs(5),
            response_header: Duration::from_secs(10),
            request: Duration::from_secs(10),
            pool_idle: Duration::from_secs(30),
        }
    }
}

fn duration_str<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
    let raw = String::deserialize(deserializer)?;
    humantime::parse_duration(&raw).map_err(serde::de::Error::custom)
}

/// Connection settings for one Argo CD server.
#[derive(Clone, Deserialize)]
pub struct ClientConfig {
    #[serde(default = "default_server")]
    pub server_url: String,
    pub token: String,
    #[serde(default)]
    pub insecure: bool,
    /// Path prefix inserted by gRPC-web rewriting gateways.
    #[serde(default)]
    pub grpc_web_root_path: Option<String>,
    #[serde(default)]
    pub stream: StreamConfig,
    #[serde(default)]
    pub timeouts: TimeoutConfig,
    #[serde(default)]
    pub tls: TlsConfig,
}

fn default_server() -> String {
    DEFAULT_SERVER.to_owned()
}

impl std::fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConfig")
            .field("server_url", &self.server_url)
            .field("token", &"<redacted>")
            .field("insecure", &self.insecure)
            .field("grpc_web_root_path", &self.grpc_web_root_path)
            .field("stream", &self.stream)
            .field("timeouts", &self.timeouts)
            .field("tls", &self.tls)
            .finish()
    }
}

impl ClientConfig {
    pub fn new(server_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            server_url: server_url.into(),
            token: token.into(),
            insecure: false,
            grpc_web_root_path: None,
            stream: StreamConfig::default(),
            timeouts: TimeoutConfig::default(),
            tls: TlsConfig::default(),
        }
    }

    /// Skip certificate validation on every transport.
    #[must_use]
    pub fn with_insecure(mut self, insecure: bool) -> Self {
        self.insecure = insecure;
        self
    }

    #[must_use]
    pub fn with_grpc_web_root_path(mut self, root: impl Into<String>) -> Self {
        self.grpc_web_root_path = Some(root.into());
        self
    }

    #[must_use]
    pub fn with_stream(mut self, stream: StreamConfig) -> Self {
        self.stream = stream;
        self
    }

    #[must_use]
    pub fn with_timeouts(mut self, timeouts: TimeoutConfig) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Extra roots, client certificate and minimum TLS version, shared by
    /// the plain and streaming transports.
    #[must_use]
    pub fn with_tls(mut self, tls: TlsConfig) -> Self {
        self.tls = tls;
        self
    }

    /// Create configuration from environment variables
    ///
    /// Expects:
    /// - `ARGONAUT_SERVER`: server URL (default: `https://localhost:8080`)
    /// - `ARGONAUT_AUTH_TOKEN`: bearer token (required)
    /// - `ARGONAUT_INSECURE`: `true` or `1` to skip TLS verification
    /// - `ARGONAUT_GRPC_WEB_ROOT_PATH`: optional gateway path prefix
    /// - `ARGONAUT_REQUEST_TIMEOUT`: e.g. `30s` (default: `10s`)
    /// - `ARGONAUT_CACERT`, else `SSL_CERT_FILE`: extra PEM roots
    /// - `ARGONAUT_CAPATH`, else `SSL_CERT_DIR`: `:`-separated root directories
    /// - `ARGONAUT_CLIENT_CERT` / `ARGONAUT_CLIENT_KEY`: client certificate pair
    /// - `ARGONAUT_MIN_TLS`: `1.2` or `1.3`
    ///
    /// Directories from `ARGONAUT_CAPATH` must exist; missing ones from
    /// `SSL_CERT_DIR` are skipped. Stream buffer sizes come from
    /// [`StreamConfig::from_env`].
    ///
    /// # Errors
    /// Fails when the token is missing, or the timeout or TLS version does
    /// not parse.
    pub fn from_env() -> Result<Self, ApiError> {
        let server_url = std::env::var("ARGONAUT_SERVER").unwrap_or_else(|_| default_server());
        let token = std::env::var("ARGONAUT_AUTH_TOKEN")
            .ok()
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| {
                ApiError::new(
                    ErrorCategory::Auth,
                    "MISSING_AUTH_TOKEN",
                    "ARGONAUT_AUTH_TOKEN is not set",
                )
                .with_user_action("Log in with 'argocd login' and export the session token")
            })?;

        let mut config = Self::new(server_url, token).with_stream(StreamConfig::from_env());
        config.insecure = std::env::var("ARGONAUT_INSECURE")
            .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "true" | "1"))
            .unwrap_or(false);
        config.grpc_web_root_path = std::env::var("ARGONAUT_GRPC_WEB_ROOT_PATH")
            .ok()
            .filter(|v| !v.trim().is_empty());

        if let Ok(raw) = std::env::var("ARGONAUT_REQUEST_TIMEOUT") {
            let timeout = humantime::parse_duration(raw.trim()).map_err(|e| {
                ApiError::new(
                    ErrorCategory::Validation,
                    "INVALID_CONFIG",
                    format!("ARGONAUT_REQUEST_TIMEOUT '{raw}' is not a duration: {e}"),
                )
                .with_user_action("Use a value such as '10s' or '1m'")
            })?;
            config.timeouts.request = timeout;
        }

        config.tls = tls_from_env()?;
        Ok(config)
    }
}

fn non_empty_var(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn tls_from_env() -> Result<TlsConfig, ApiError> {
    let ca_cert_file = non_empty_var("ARGONAUT_CACERT")
        .or_else(|| non_empty_var("SSL_CERT_FILE"))
        .map(PathBuf::from);

    let ca_cert_dirs = match non_empty_var("ARGONAUT_CAPATH") {
        Some(raw) => split_dirs(&raw).collect(),
        None => non_empty_var("SSL_CERT_DIR")
            .map(|raw| split_dirs(&raw).filter(|dir| dir.is_dir()).collect())
            .unwrap_or_default(),
    };

    let min_version = non_empty_var("ARGONAUT_MIN_TLS")
        .map(|raw| raw.parse::<MinTlsVersion>())
        .transpose()?;

    Ok(TlsConfig {
        ca_cert_file,
        ca_cert_dirs,
        client_cert_file: non_empty_var("ARGONAUT_CLIENT_CERT").map(PathBuf::from),
        client_key_file: non_empty_var("ARGONAUT_CLIENT_KEY").map(PathBuf::from),
        min_version,
    })
}

fn split_dirs(raw: &str) -> impl Iterator<Item = PathBuf> + '_ {
    raw.split(':')
        .map(str::trim)
        .filter(|d| !d.is_empty())
        .map(PathBuf::from)
}
