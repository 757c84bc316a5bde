//! Certificate trust for both transports.
//!
//! Extra roots are merged into the built-in store, never substituted for it,
//! so a CA bundle for a private Argo CD install does not break public hosts.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use reqwest::tls::{Certificate, Identity, Version};
use serde::Deserialize;
use tracing::debug;

use crate::error::{ApiError, ErrorCategory};

/// Lowest TLS version the transports will negotiate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum MinTlsVersion {
    #[serde(rename = "1.2")]
    Tls12,
    #[serde(rename = "1.3")]
    Tls13,
}

impl MinTlsVersion {
    fn as_reqwest(self) -> Version {
        match self {
            Self::Tls12 => Version::TLS_1_2,
            Self::Tls13 => Version::TLS_1_3,
        }
    }
}

impl FromStr for MinTlsVersion {
    type Err = ApiError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().trim_start_matches("tls").trim() {
            "1.2" | "12" => Ok(Self::Tls12),
            "1.3" | "13" => Ok(Self::Tls13),
            _ => Err(ApiError::new(
                ErrorCategory::Validation,
                "INVALID_CONFIG",
                format!("Unsupported minimum TLS version '{raw}'"),
            )
            .with_user_action("Use '1.2' or '1.3'")),
        }
    }
}

/// Certificate validation settings.
///
/// Every listed CA directory must exist. Directories picked up from
/// `SSL_CERT_DIR` are filtered before they get here, see
/// [`crate::ClientConfig::from_env`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct TlsConfig {
    /// PEM bundle with one or more extra root certificates.
    pub ca_cert_file: Option<PathBuf>,
    /// Directories searched recursively for `*.pem` and `*.crt` roots.
    pub ca_cert_dirs: Vec<PathBuf>,
    pub client_cert_file: Option<PathBuf>,
    pub client_key_file: Option<PathBuf>,
    pub min_version: Option<MinTlsVersion>,
}

impl TlsConfig {
    /// Nothing beyond the built-in roots and library defaults.
    #[must_use]
    pub fn is_default(&self) -> bool {
        *self == Self::default()
    }
}

/// Loaded trust material, applied identically to every transport.
#[derive(Clone, Default)]
pub struct Trust {
    roots: Vec<Certificate>,
    identity: Option<Identity>,
    min_version: Option<MinTlsVersion>,
}

impl fmt::Debug for Trust {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Trust")
            .field("roots", &self.roots.len())
            .field("identity", &self.identity.is_some())
            .field("min_version", &self.min_version)
            .finish()
    }
}

impl Trust {
    /// Read every configured file.
    ///
    /// # Errors
    /// `INVALID_CA_CERT` when a CA source is unreadable or holds no
    /// certificate, `INVALID_CLIENT_CERT` when the client pair is
    /// incomplete or does not parse.
    pub fn load(config: &TlsConfig) -> Result<Self, ApiError> {
        let mut roots = Vec::new();
        if let Some(file) = &config.ca_cert_file {
            roots.extend(read_bundle(file)?);
        }
        for dir in &config.ca_cert_dirs {
            if !dir.is_dir() {
                return Err(ca_error(dir, "not a directory"));
            }
            load_dir(dir, &mut roots)?;
        }

        let identity = load_identity(
            config.client_cert_file.as_deref(),
            config.client_key_file.as_deref(),
        )?;

        if !roots.is_empty() || identity.is_some() {
            debug!(roots = roots.len(), client_cert = identity.is_some(), "loaded TLS trust");
        }
        Ok(Self {
            roots,
            identity,
            min_version: config.min_version,
        })
    }

    #[must_use]
    pub fn root_count(&self) -> usize {
        self.roots.len()
    }

    #[must_use]
    pub fn has_identity(&self) -> bool {
        self.identity.is_some()
    }

    #[must_use]
    pub fn apply(&self, mut builder: reqwest::ClientBuilder) -> reqwest::ClientBuilder {
        if !self.roots.is_empty() {
            builder = builder.tls_certs_merge(self.roots.iter().cloned());
        }
        if let Some(identity) = &self.identity {
            builder = builder.identity(identity.clone());
        }
        if let Some(min) = self.min_version {
            builder = builder.tls_version_min(min.as_reqwest());
        }
        builder
    }
}

fn read_bundle(path: &Path) -> Result<Vec<Certificate>, ApiError> {
    let pem = std::fs::read(path).map_err(|e| ca_error(path, &e.to_string()))?;
    let certs = Certificate::from_pem_bundle(&pem).map_err(|e| ca_error(path, &e.to_string()))?;
    if certs.is_empty() {
        return Err(ca_error(path, "no valid certificates found"));
    }
    Ok(certs)
}

fn load_dir(dir: &Path, roots: &mut Vec<Certificate>) -> Result<(), ApiError> {
    let entries = std::fs::read_dir(dir).map_err(|e| ca_error(dir, &e.to_string()))?;
    let mut paths = entries
        .map(|entry| entry.map(|e| e.path()))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| ca_error(dir, &e.to_string()))?;
    paths.sort();

    for path in paths {
        if path.is_dir() {
            load_dir(&path, roots)?;
        } else if is_cert_file(&path) {
            roots.extend(read_bundle(&path)?);
        }
    }
    Ok(())
}

fn is_cert_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("pem") || ext.eq_ignore_ascii_case("crt"))
}

fn load_identity(cert: Option<&Path>, key: Option<&Path>) -> Result<Option<Identity>, ApiError> {
    let (cert, key) = match (cert, key) {
        (None, None) => return Ok(None),
        (Some(cert), Some(key)) => (cert, key),
        _ => {
            return Err(ApiError::new(
                ErrorCategory::Validation,
                "INVALID_CLIENT_CERT",
                "Client certificate and key must be set together",
            )
            .with_user_action("Set both ARGONAUT_CLIENT_CERT and ARGONAUT_CLIENT_KEY"));
        }
    };

    let mut pem = std::fs::read(cert).map_err(|e| client_cert_error(cert, &e.to_string()))?;
    pem.push(b'\n');
    pem.extend(std::fs::read(key).map_err(|e| client_cert_error(key, &e.to_string()))?);
    Identity::from_pem(&pem)
        .map(Some)
        .map_err(|e| client_cert_error(cert, &e.to_string()))
}

fn ca_error(path: &Path, reason: &str) -> ApiError {
    ApiError::new(
        ErrorCategory::Validation,
        "INVALID_CA_CERT",
        format!("Failed to load CA certificates from {}: {reason}", path.display()),
    )
    .with_context("path", path.display())
    .with_user_action("Point ARGONAUT_CACERT or ARGONAUT_CAPATH at PEM encoded certificates")
}

fn client_cert_error(path: &Path, reason: &str) -> ApiError {
    ApiError::new(
        ErrorCategory::Validation,
        "INVALID_CLIENT_CERT",
        format!("Failed to load client certificate: {reason}"),
    )
    .with_context("path", path.display())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture(name: &str) -> PathBuf {
        Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures/tls").join(name)
    }

    #[test]
    fn test_default_loads_nothing() {
        let trust = Trust::load(&TlsConfig::default()).unwrap();
        assert_eq!(trust.root_count(), 0);
        assert!(!trust.has_identity());
        assert!(TlsConfig::default().is_default());
    }

    #[test]
    fn test_ca_file() {
        let config = TlsConfig {
            ca_cert_file: Some(fixture("roots/ca.pem")),
            ..TlsConfig::default()
        };
        assert_eq!(Trust::load(&config).unwrap().root_count(), 1);
    }

    #[test]
    fn test_ca_dir_is_recursive_and_skips_other_files() {
        let config = TlsConfig {
            ca_cert_dirs: vec![fixture("roots")],
            ..TlsConfig::default()
        };
        // ca.pem plus nested/gateway.crt; README.txt is ignored
        assert_eq!(Trust::load(&config).unwrap().root_count(), 2);
    }

    #[test]
    fn test_file_without_certificates_is_rejected() {
        let config = TlsConfig {
            ca_cert_file: Some(fixture("broken/empty.pem")),
            ..TlsConfig::default()
        };
        let err = Trust::load(&config).unwrap_err();
        assert!(err.is_code("INVALID_CA_CERT"));
        assert_eq!(err.category(), ErrorCategory::Validation);
        assert!(err.context_value("path").unwrap().ends_with("empty.pem"));
    }

    #[test]
    fn test_bad_file_inside_dir_is_rejected() {
        let config = TlsConfig {
            ca_cert_dirs: vec![fixture("broken")],
            ..TlsConfig::default()
        };
        assert!(Trust::load(&config).unwrap_err().is_code("INVALID_CA_CERT"));
    }

    #[test]
    fn test_missing_sources_are_rejected() {
        let config = TlsConfig {
            ca_cert_file: Some(fixture("missing.pem")),
            ..TlsConfig::default()
        };
        assert!(Trust::load(&config).unwrap_err().is_code("INVALID_CA_CERT"));

        let config = TlsConfig {
            ca_cert_dirs: vec![fixture("missing-dir")],
            ..TlsConfig::default()
        };
        assert!(Trust::load(&config).unwrap_err().is_code("INVALID_CA_CERT"));
    }

    #[test]
    fn test_client_identity() {
        let config = TlsConfig {
            client_cert_file: Some(fixture("client.pem")),
            client_key_file: Some(fixture("client.key")),
            ..TlsConfig::default()
        };
        assert!(Trust::load(&config).unwrap().has_identity());
    }

    #[test]
    fn test_client_identity_needs_both_halves() {
        let config = TlsConfig {
            client_cert_file: Some(fixture("client.pem")),
            ..TlsConfig::default()
        };
        assert!(Trust::load(&config).unwrap_err().is_code("INVALID_CLIENT_CERT"));
    }

    #[test]
    fn test_client_identity_rejects_non_pem() {
        let config = TlsConfig {
            client_cert_file: Some(fixture("broken/empty.pem")),
            client_key_file: Some(fixture("broken/empty.pem")),
            ..TlsConfig::default()
        };
        assert!(Trust::load(&config).unwrap_err().is_code("INVALID_CLIENT_CERT"));
    }

    #[test]
    fn test_min_version_parsing() {
        assert_eq!("1.2".parse::<MinTlsVersion>().unwrap(), MinTlsVersion::Tls12);
        assert_eq!("TLS1.3".parse::<MinTlsVersion>().unwrap(), MinTlsVersion::Tls13);
        assert!("1.0".parse::<MinTlsVersion>().unwrap_err().is_code("INVALID_CONFIG"));
        let config: TlsConfig = serde_json::from_str(r#"{"min_version": "1.3"}"#).unwrap();
        assert_eq!(config.min_version, Some(MinTlsVersion::Tls13));
    }
}
