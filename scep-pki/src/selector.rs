//! Choosing which CA certificates a request envelope is encrypted to.

use crate::cert::CertificateInfo;
use crate::identity::Fingerprint;

/// Filter over the CA certificates returned by the server.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum CertsSelector {
    /// Every certificate.
    #[default]
    All,
    /// Only the certificate with this SHA-256 fingerprint.
    Fingerprint(Fingerprint),
    /// Only certificates whose key usage permits key encipherment.
    KeyEncipherment,
}

impl CertsSelector {
    /// Return the DER certificates that match, preserving order.
    ///
    /// Certificates that fail to parse never match a filtering selector.
    #[must_use]
    pub fn select(&self, certs: &[Vec<u8>]) -> Vec<Vec<u8>> {
        certs
            .iter()
            .filter(|der| self.matches(der))
            .cloned()
            .collect()
    }

    fn matches(&self, der: &[u8]) -> bool {
        match self {
            Self::All => true,
            Self::Fingerprint(fp) => Fingerprint::of_der(der) == *fp,
            Self::KeyEncipherment => CertificateInfo::from_der(der)
                .map(|info| info.key_encipherment)
                .unwrap_or(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rcgen::{CertificateParams, KeyPair, KeyUsagePurpose};

    fn cert(usages: Vec<KeyUsagePurpose>) -> Vec<u8> {
        let mut params = CertificateParams::default();
        params.key_usages = usages;
        params
            .self_signed(&KeyPair::generate().unwrap())
            .unwrap()
            .der()
            .to_vec()
    }

    #[test]
    fn test_all_keeps_everything() {
        let certs = vec![cert(vec![]), cert(vec![])];
        assert_eq!(CertsSelector::All.select(&certs).len(), 2);
    }

    #[test]
    fn test_fingerprint_selects_one() {
        let certs = vec![cert(vec![]), cert(vec![])];
        let selector = CertsSelector::Fingerprint(Fingerprint::of_der(&certs[1]));
        assert_eq!(selector.select(&certs), vec![certs[1].clone()]);
    }

    #[test]
    fn test_key_encipherment_filter() {
        let signer = cert(vec![KeyUsagePurpose::DigitalSignature]);
        let encipher = cert(vec![KeyUsagePurpose::KeyEncipherment]);
        let selected =
            CertsSelector::KeyEncipherment.select(&[signer, encipher.clone(), b"junk".to_vec()]);
        assert_eq!(selected, vec![encipher]);
    }
}
