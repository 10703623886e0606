//! Certificate issuance policy.

use std::fmt;
use std::sync::Arc;

use rcgen::{
    CertificateParams, CertificateSigningRequestParams, ExtendedKeyUsagePurpose, IsCa,
    KeyIdMethod, KeyUsagePurpose,
};
use scep_pki::cert::encode_pem_certificate;
use scep_pki::{request, CertificateInfo};
use scep_proto::CaType;
use time::{Duration, OffsetDateTime};
use zeroize::Zeroizing;

use crate::depot::{CaIdentity, CertificateDepot};
use crate::error::ScepError;

/// Backdating applied to `notBefore` for client clock skew.
const CLOCK_SKEW: Duration = Duration::minutes(10);

/// Fixed base lifetime; `validity_days` is added on top.
const BASE_VALIDITY_YEARS: i32 = 10;

/// Issuance settings, fixed at startup.
#[derive(Clone, Default)]
pub struct SigningConfig {
    /// Passphrase for encrypted CA keys; empty when the key is plain.
    pub ca_passphrase: Zeroizing<Vec<u8>>,
    /// CA used for `PKIOperation`.
    pub ca_type: CaType,
    /// Days before expiry within which a DN may be re-issued. Zero disables
    /// the check.
    pub allow_renewal_days: u32,
    /// Extra days on top of the ten-year base validity.
    pub validity_days: u32,
    /// Add key/data encipherment and server-auth usage.
    pub server_attributes: bool,
}

impl fmt::Debug for SigningConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningConfig")
            .field("ca_passphrase", &"[redacted]")
            .field("ca_type", &self.ca_type)
            .field("allow_renewal_days", &self.allow_renewal_days)
            .field("validity_days", &self.validity_days)
            .field("server_attributes", &self.server_attributes)
            .finish()
    }
}

/// `t` plus whole calendar years; Feb 29 falls back to Feb 28.
fn add_years(t: OffsetDateTime, years: i32) -> Option<OffsetDateTime> {
    let year = t.year().checked_add(years)?;
    t.replace_year(year)
        .or_else(|_| t.replace_day(28).and_then(|t| t.replace_year(year)))
        .ok()
}

/// Turns certificate requests into issued, recorded certificates.
pub struct SigningPolicy {
    depot: Arc<dyn CertificateDepot>,
    config: SigningConfig,
}

impl SigningPolicy {
    pub fn new(depot: Arc<dyn CertificateDepot>, config: SigningConfig) -> Self {
        Self { depot, config }
    }

    #[must_use]
    pub fn config(&self) -> &SigningConfig {
        &self.config
    }

    /// Load the configured CA from the depot.
    pub fn load_ca(&self) -> Result<CaIdentity, ScepError> {
        self.depot
            .load_ca(&self.config.ca_passphrase, self.config.ca_type)
    }

    /// Issue a certificate for a DER PKCS#10 request, signed by `ca`.
    ///
    /// Fails with `Policy` when the request's DN holds a certificate outside
    /// its renewal window, `InvalidInput` when the subject cannot be
    /// recorded, `Storage` on depot I/O, `Crypto` on a bad request or
    /// signing failure.
    pub fn sign(&self, ca: &CaIdentity, csr_der: &[u8]) -> Result<Vec<u8>, ScepError> {
        let mut csr = CertificateSigningRequestParams::from_pem(&request::encode_pem(csr_der))
            .map_err(|e| ScepError::Crypto(format!("invalid certificate request: {e}")))?;

        let issuer_key = ca.key.key_pair()?;
        let issuer = CertificateParams::from_ca_cert_pem(&encode_pem_certificate(&ca.certificate))
            .and_then(|params| params.self_signed(&issuer_key))
            .map_err(|e| ScepError::Crypto(format!("invalid CA certificate: {e}")))?;

        let serial = self.depot.allocate_serial()?;

        let now = OffsetDateTime::now_utc();
        let not_after = add_years(now, BASE_VALIDITY_YEARS)
            .map(|t| t + Duration::days(i64::from(self.config.validity_days)))
            .ok_or_else(|| ScepError::Crypto("validity period out of range".to_string()))?;

        // Subject, DNS/email/IP/URI names come from the request as parsed.
        let params = &mut csr.params;
        params.serial_number = Some(serial.into());
        params.not_before = now - CLOCK_SKEW;
        params.not_after = not_after;
        params.is_ca = IsCa::NoCa;
        params.key_identifier_method = KeyIdMethod::Sha256;
        params.use_authority_key_identifier_extension = true;
        params.key_usages = vec![KeyUsagePurpose::DigitalSignature];
        params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ClientAuth];
        if self.config.server_attributes {
            params.key_usages.extend([
                KeyUsagePurpose::DataEncipherment,
                KeyUsagePurpose::KeyEncipherment,
            ]);
            params
                .extended_key_usages
                .push(ExtendedKeyUsagePurpose::ServerAuth);
        }

        let issued = csr
            .signed_by(&issuer, &issuer_key)
            .map_err(|e| ScepError::Crypto(format!("signing failed: {e}")))?;
        let der = issued.der().to_vec();
        let info = CertificateInfo::from_der(&der)?;

        self.depot.store(
            info.common_name().unwrap_or_default(),
            &der,
            self.config.allow_renewal_days,
        )?;

        tracing::info!(
            serial = %serial,
            dn = %info.distinguished_name(),
            not_after = %info.not_after,
            "Issued certificate"
        );
        Ok(der)
    }
}
