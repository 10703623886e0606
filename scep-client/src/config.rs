//! Enrollment configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use scep_pki::{CertsSelector, CsrSubject, Fingerprint};
use url::Url;

use crate::error::EnrollError;

pub const DEFAULT_SERVER_URL: &str = "http://localhost:8000/api/v1/scep";

/// Certificate request, kept next to the key.
pub const CSR_FILE: &str = "csr.pem";
/// Bootstrap self-signed certificate, removed after enrollment.
pub const BOOTSTRAP_FILE: &str = "self.pem";
/// Issued certificate when no path is configured.
pub const DEFAULT_CERT_FILE: &str = "client.pem";

pub const DEFAULT_KEY_SIZE: usize = 2048;

/// How long to wait between resubmissions of a pending request.
pub const DEFAULT_PENDING_INTERVAL: Duration = Duration::from_secs(30);

/// Pending-response handling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub interval: Duration,
    /// Total submissions allowed; `None` retries until cancelled.
    pub max_attempts: Option<u32>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            interval: DEFAULT_PENDING_INTERVAL,
            max_attempts: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct EnrollConfig {
    pub server_url: Url,
    pub key_path: PathBuf,
    pub cert_path: PathBuf,
    /// RSA modulus size used when a new key is generated.
    pub key_size: usize,
    pub subject: CsrSubject,
    /// `message` sent with `GetCACert`, naming the CA type.
    pub ca_message: String,
    pub selector: CertsSelector,
    pub retry: RetryPolicy,
}

impl EnrollConfig {
    /// Validate the required flags and derive defaults from the key path.
    pub fn new(server_url: &str, key_path: impl Into<PathBuf>) -> Result<Self, EnrollError> {
        let key_path = key_path.into();
        if key_path.as_os_str().is_empty() {
            return Err(EnrollError::Config("private key path is required".to_string()));
        }
        if server_url.is_empty() {
            return Err(EnrollError::Config("server URL is required".to_string()));
        }
        let server_url = Url::parse(server_url)
            .map_err(|e| EnrollError::Config(format!("invalid server URL {server_url:?}: {e}")))?;

        let cert_path = key_dir(&key_path).join(DEFAULT_CERT_FILE);
        Ok(Self {
            server_url,
            key_path,
            cert_path,
            key_size: DEFAULT_KEY_SIZE,
            subject: CsrSubject::default(),
            ca_message: String::new(),
            selector: CertsSelector::All,
            retry: RetryPolicy::default(),
        })
    }

    #[must_use]
    pub fn key_dir(&self) -> &Path {
        key_dir(&self.key_path)
    }

    #[must_use]
    pub fn csr_path(&self) -> PathBuf {
        self.key_dir().join(CSR_FILE)
    }

    #[must_use]
    pub fn bootstrap_path(&self) -> PathBuf {
        self.key_dir().join(BOOTSTRAP_FILE)
    }
}

fn key_dir(key_path: &Path) -> &Path {
    match key_path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    }
}

/// Build the CA selector from the `--ca-fingerprint` and
/// `--key-encipherment-selector` flags, which are mutually exclusive.
pub fn selector_from_flags(
    ca_fingerprint: Option<&str>,
    key_encipherment: bool,
) -> Result<CertsSelector, EnrollError> {
    match (ca_fingerprint.filter(|f| !f.is_empty()), key_encipherment) {
        (Some(_), true) => Err(EnrollError::Config(
            "ca-fingerprint and key-encipherment-selector are mutually exclusive".to_string(),
        )),
        (Some(fp), false) => Fingerprint::parse(fp)
            .map(CertsSelector::Fingerprint)
            .map_err(|e| EnrollError::Config(format!("invalid CA fingerprint: {e}"))),
        (None, true) => Ok(CertsSelector::KeyEncipherment),
        (None, false) => Ok(CertsSelector::All),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paths_follow_key_dir() {
        let config = EnrollConfig::new(DEFAULT_SERVER_URL, "/var/lib/scep/client.key").unwrap();
        assert_eq!(config.csr_path(), PathBuf::from("/var/lib/scep/csr.pem"));
        assert_eq!(config.bootstrap_path(), PathBuf::from("/var/lib/scep/self.pem"));
        assert_eq!(config.cert_path, PathBuf::from("/var/lib/scep/client.pem"));
    }

    #[test]
    fn test_bare_key_name_uses_current_dir() {
        let config = EnrollConfig::new(DEFAULT_SERVER_URL, "client.key").unwrap();
        assert_eq!(config.csr_path(), PathBuf::from("./csr.pem"));
    }

    #[test]
    fn test_required_flags() {
        assert!(matches!(
            EnrollConfig::new(DEFAULT_SERVER_URL, ""),
            Err(EnrollError::Config(_))
        ));
        assert!(matches!(
            EnrollConfig::new("", "client.key"),
            Err(EnrollError::Config(_))
        ));
        assert!(matches!(
            EnrollConfig::new("not a url", "client.key"),
            Err(EnrollError::Config(_))
        ));
    }

    #[test]
    fn test_selector_flags() {
        let fp = "ab".repeat(32);
        assert_eq!(selector_from_flags(None, false).unwrap(), CertsSelector::All);
        assert_eq!(
            selector_from_flags(None, true).unwrap(),
            CertsSelector::KeyEncipherment
        );
        assert!(matches!(
            selector_from_flags(Some(&fp), false).unwrap(),
            CertsSelector::Fingerprint(_)
        ));
        assert!(selector_from_flags(Some(&fp), true).is_err());
        assert!(selector_from_flags(Some("abcd"), false).is_err());
    }

    #[test]
    fn test_default_retry_policy() {
        let retry = RetryPolicy::default();
        assert_eq!(retry.interval, Duration::from_secs(30));
        assert_eq!(retry.max_attempts, None);
    }
}
