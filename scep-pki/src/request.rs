//! Certificate signing requests.

use rcgen::{CertificateParams, DistinguishedName, DnType, SanType};
use thiserror::Error;
use x509_parser::certification_request::X509CertificationRequest;
use x509_parser::prelude::FromDer;

use crate::cert::SubjectName;
use crate::identity::{KeyError, PrivateKey};

const CSR_LABEL: &str = "CERTIFICATE REQUEST";

#[derive(Debug, Error)]
pub enum CsrError {
    #[error(transparent)]
    Key(#[from] KeyError),

    #[error("failed to build certificate request: {0}")]
    Generation(String),

    #[error("PEM decode failed: {0}")]
    Pem(String),

    #[error("unmatched PEM type or headers")]
    UnexpectedBlock,

    #[error("failed to parse certificate request: {0}")]
    ParseError(String),
}

/// Subject fields a client puts into its request. Empty strings are omitted.
#[derive(Debug, Clone, Default)]
pub struct CsrSubject {
    pub common_name: String,
    pub organization: String,
    pub organizational_unit: String,
    pub country: String,
    pub province: String,
    pub locality: String,
    /// Optional DNS subject alternative name.
    pub dns_name: String,
}

impl CsrSubject {
    fn distinguished_name(&self) -> DistinguishedName {
        let mut dn = DistinguishedName::new();
        let fields = [
            (DnType::CountryName, &self.country),
            (DnType::StateOrProvinceName, &self.province),
            (DnType::LocalityName, &self.locality),
            (DnType::OrganizationName, &self.organization),
            (DnType::OrganizationalUnitName, &self.organizational_unit),
            (DnType::CommonName, &self.common_name),
        ];
        for (ty, value) in fields {
            if !value.is_empty() {
                dn.push(ty, value.as_str());
            }
        }
        dn
    }
}

/// Build a DER-encoded PKCS#10 request signed by `key`.
pub fn build_csr(key: &PrivateKey, subject: &CsrSubject) -> Result<Vec<u8>, CsrError> {
    let key_pair = key.key_pair()?;

    let mut params = CertificateParams::default();
    params.distinguished_name = subject.distinguished_name();
    if !subject.dns_name.is_empty() {
        let name = subject
            .dns_name
            .clone()
            .try_into()
            .map_err(|e: rcgen::Error| CsrError::Generation(e.to_string()))?;
        params.subject_alt_names.push(SanType::DnsName(name));
    }

    let csr = params
        .serialize_request(&key_pair)
        .map_err(|e| CsrError::Generation(e.to_string()))?;
    Ok(csr.der().to_vec())
}

/// Encode request DER as PEM.
#[must_use]
pub fn encode_pem(der: &[u8]) -> String {
    pem::encode(&pem::Pem::new(CSR_LABEL, der.to_vec()))
}

/// Decode a PEM `CERTIFICATE REQUEST` to DER. Header-bearing blocks are
/// rejected.
pub fn decode_pem(input: &[u8]) -> Result<Vec<u8>, CsrError> {
    let block = pem::parse(input).map_err(|e| CsrError::Pem(e.to_string()))?;
    if block.tag() != CSR_LABEL || block.headers().iter().next().is_some() {
        return Err(CsrError::UnexpectedBlock);
    }
    Ok(block.into_contents())
}

/// Fields read back from a request.
#[derive(Debug, Clone)]
pub struct CsrInfo {
    pub subject: SubjectName,
    /// DER-encoded SubjectPublicKeyInfo.
    pub public_key_der: Vec<u8>,
}

impl CsrInfo {
    pub fn from_der(der: &[u8]) -> Result<Self, CsrError> {
        let (_, csr) = X509CertificationRequest::from_der(der)
            .map_err(|e| CsrError::ParseError(format!("{e:?}")))?;
        let info = &csr.certification_request_info;
        Ok(Self {
            subject: SubjectName::from_x509_name(&info.subject),
            public_key_der: info.subject_pki.raw.to_vec(),
        })
    }
}
