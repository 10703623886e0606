//! Self-signed certificates: the client's bootstrap signer and fresh CAs.
//!
//! Uses rcgen. The bootstrap certificate only has to be good enough to sign
//! the first enrollment envelope; the CA variant is what `ca init` writes.

use rand::RngCore;
use rcgen::{
    BasicConstraints, CertificateParams, DistinguishedName, DnType, ExtendedKeyUsagePurpose,
    IsCa, KeyUsagePurpose, SerialNumber,
};
use time::{Duration, OffsetDateTime};

use crate::identity::{KeyError, PrivateKey};

/// Common name of the temporary signer used before a real certificate exists.
pub const BOOTSTRAP_COMMON_NAME: &str = "SCEP-CLIENT-SIGNER";

/// Lifetime of a bootstrap certificate.
pub const BOOTSTRAP_VALIDITY: Duration = Duration::hours(1);

/// Errors that can occur while building a self-signed certificate.
#[derive(Debug, thiserror::Error)]
pub enum SelfSignedError {
    #[error(transparent)]
    Key(#[from] KeyError),
    #[error("failed to generate certificate: {0}")]
    Generation(String),
}

/// Parameters for self-signed certificate generation.
#[derive(Debug, Clone)]
pub struct SelfSignedParams {
    pub common_name: String,
    pub organization: Option<String>,
    pub validity: Duration,
    /// Emit CA basic constraints and cert-signing key usage.
    pub is_ca: bool,
}

impl SelfSignedParams {
    /// Bootstrap signer for a client that has no certificate yet.
    #[must_use]
    pub fn bootstrap(organization: Option<String>) -> Self {
        Self {
            common_name: BOOTSTRAP_COMMON_NAME.to_string(),
            organization,
            validity: BOOTSTRAP_VALIDITY,
            is_ca: false,
        }
    }

    /// Root CA for a depot.
    #[must_use]
    pub fn certificate_authority(
        common_name: impl Into<String>,
        organization: Option<String>,
        validity_days: u32,
    ) -> Self {
        Self {
            common_name: common_name.into(),
            organization,
            validity: Duration::days(i64::from(validity_days)),
            is_ca: true,
        }
    }
}

/// Random positive 128-bit serial.
fn random_serial() -> SerialNumber {
    let mut bytes = [0u8; 16];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    bytes[0] &= 0x7f;
    SerialNumber::from_slice(&bytes)
}

/// Generate a self-signed certificate for `key`, returned as DER.
pub fn build_self_signed(
    key: &PrivateKey,
    params: &SelfSignedParams,
) -> Result<Vec<u8>, SelfSignedError> {
    let key_pair = key.key_pair()?;

    let mut cert_params = CertificateParams::default();
    cert_params.distinguished_name = DistinguishedName::new();
    if let Some(org) = params.organization.as_deref().filter(|o| !o.is_empty()) {
        cert_params
            .distinguished_name
            .push(DnType::OrganizationName, org);
    }
    cert_params
        .distinguished_name
        .push(DnType::CommonName, params.common_name.as_str());

    cert_params.serial_number = Some(random_serial());
    cert_params.not_before = OffsetDateTime::now_utc();
    cert_params.not_after = cert_params.not_before + params.validity;

    if params.is_ca {
        cert_params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        cert_params.key_usages = vec![
            KeyUsagePurpose::KeyCertSign,
            KeyUsagePurpose::CrlSign,
            KeyUsagePurpose::DigitalSignature,
            KeyUsagePurpose::KeyEncipherment,
        ];
    } else {
        cert_params.is_ca = IsCa::ExplicitNoCa;
        cert_params.key_usages = vec![
            KeyUsagePurpose::KeyEncipherment,
            KeyUsagePurpose::DigitalSignature,
        ];
        cert_params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ServerAuth];
    }

    let cert = cert_params
        .self_signed(&key_pair)
        .map_err(|e| SelfSignedError::Generation(e.to_string()))?;
    Ok(cert.der().to_vec())
}
