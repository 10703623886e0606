//! Certificate utilities for X.509 parsing.
//!
//! # Security
//!
//! - Input is limited to 16KB per certificate to prevent DoS
//! - The x509_parser library handles ASN.1 parsing safely

use thiserror::Error;
use ::time::OffsetDateTime;
use x509_parser::extensions::GeneralName;
use x509_parser::prelude::*;

/// Maximum certificate size (16KB is generous for a single cert)
pub const MAX_CERT_SIZE: usize = 16 * 1024;

const CERTIFICATE_LABEL: &str = "CERTIFICATE";

/// Errors that can occur during certificate parsing.
#[derive(Debug, Error)]
pub enum CertError {
    #[error("certificate too large: {0} bytes (max {MAX_CERT_SIZE})")]
    TooLarge(usize),

    #[error("failed to parse X.509 certificate: {0}")]
    ParseError(String),

    #[error("PEM decode failed: {0}")]
    Pem(String),

    #[error("no CERTIFICATE block found")]
    NoCertificate,
}

/// The subject attributes that take part in the ledger DN.
///
/// Only the first value of each attribute is kept.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubjectName {
    pub country: Option<String>,
    pub province: Option<String>,
    pub locality: Option<String>,
    pub organization: Option<String>,
    pub organizational_unit: Option<String>,
    pub common_name: Option<String>,
}

impl SubjectName {
    /// Collect the first value of each attribute from an X.509 name.
    #[must_use]
    pub fn from_x509_name(name: &X509Name<'_>) -> Self {
        fn first<'a, 'b: 'a>(
            mut iter: impl Iterator<Item = &'a AttributeTypeAndValue<'b>>,
        ) -> Option<String> {
            iter.find_map(|attr| attr.as_str().ok())
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        }

        Self {
            country: first(name.iter_country()),
            province: first(name.iter_state_or_province()),
            locality: first(name.iter_locality()),
            organization: first(name.iter_organization()),
            organizational_unit: first(name.iter_organizational_unit()),
            common_name: first(name.iter_common_name()),
        }
    }
}

/// Owned view of the certificate fields the depot and client care about.
#[derive(Debug, Clone)]
pub struct CertificateInfo {
    pub subject: SubjectName,
    /// RFC 822 names from the subject alternative name extension.
    pub emails: Vec<String>,
    /// Issuer common name, empty when the issuer has none.
    pub issuer_common_name: String,
    pub not_before: OffsetDateTime,
    pub not_after: OffsetDateTime,
    /// Big-endian serial with leading zero bytes removed.
    pub serial: Vec<u8>,
    /// Whether key usage allows key encipherment.
    pub key_encipherment: bool,
    /// DER-encoded SubjectPublicKeyInfo.
    pub public_key_der: Vec<u8>,
}

impl CertificateInfo {
    /// Parse a DER-encoded certificate.
    ///
    /// # Errors
    ///
    /// Returns `CertError::TooLarge` if certificate exceeds 16KB.
    /// Returns `CertError::ParseError` if the certificate is malformed.
    pub fn from_der(der: &[u8]) -> Result<Self, CertError> {
        if der.len() > MAX_CERT_SIZE {
            return Err(CertError::TooLarge(der.len()));
        }

        let (_, cert) =
            X509Certificate::from_der(der).map_err(|e| CertError::ParseError(format!("{e:?}")))?;

        let emails = match cert.subject_alternative_name() {
            Ok(Some(san)) => san
                .value
                .general_names
                .iter()
                .filter_map(|name| match name {
                    GeneralName::RFC822Name(email) => Some((*email).to_string()),
                    _ => None,
                })
                .collect(),
            Ok(None) => Vec::new(),
            Err(e) => return Err(CertError::ParseError(format!("{e:?}"))),
        };

        let key_encipherment = match cert.key_usage() {
            Ok(Some(ku)) => ku.value.key_encipherment(),
            Ok(None) => false,
            Err(e) => return Err(CertError::ParseError(format!("{e:?}"))),
        };

        let issuer_common_name = SubjectName::from_x509_name(cert.issuer())
            .common_name
            .unwrap_or_default();

        let raw_serial = cert.raw_serial();
        let first_nonzero = raw_serial
            .iter()
            .position(|b| *b != 0)
            .unwrap_or(raw_serial.len());

        Ok(Self {
            subject: SubjectName::from_x509_name(cert.subject()),
            emails,
            issuer_common_name,
            not_before: cert.validity().not_before.to_datetime(),
            not_after: cert.validity().not_after.to_datetime(),
            serial: raw_serial[first_nonzero..].to_vec(),
            key_encipherment,
            public_key_der: cert.public_key().raw.to_vec(),
        })
    }

    /// Subject common name, if any.
    #[must_use]
    pub fn common_name(&self) -> Option<&str> {
        self.subject.common_name.as_deref()
    }

    /// OpenSSL-style slash-separated DN used as the ledger's identity key.
    ///
    /// Fields appear in a fixed order (C, ST, L, O, OU, CN, emailAddress)
    /// and empty ones are omitted.
    #[must_use]
    pub fn distinguished_name(&self) -> String {
        let subject = &self.subject;
        let parts = [
            ("C", subject.country.as_deref()),
            ("ST", subject.province.as_deref()),
            ("L", subject.locality.as_deref()),
            ("O", subject.organization.as_deref()),
            ("OU", subject.organizational_unit.as_deref()),
            ("CN", subject.common_name.as_deref()),
            ("emailAddress", self.emails.first().map(String::as_str)),
        ];

        let mut dn = String::new();
        for (key, value) in parts {
            if let Some(value) = value.filter(|v| !v.is_empty()) {
                dn.push('/');
                dn.push_str(key);
                dn.push('=');
                dn.push_str(value);
            }
        }
        dn
    }

    /// Upper-case hex serial, zero-padded to an even number of digits.
    #[must_use]
    pub fn serial_hex(&self) -> String {
        if self.serial.is_empty() {
            return "00".to_string();
        }
        hex::encode_upper(&self.serial)
    }
}

/// Extract every `CERTIFICATE` block from a PEM document, as DER.
///
/// # Errors
///
/// Returns `CertError::Pem` on malformed PEM and `CertError::NoCertificate`
/// when the document contains no certificate block.
pub fn parse_pem_certificates(input: &[u8]) -> Result<Vec<Vec<u8>>, CertError> {
    let blocks = ::pem::parse_many(input).map_err(|e| CertError::Pem(e.to_string()))?;
    let certs: Vec<Vec<u8>> = blocks
        .into_iter()
        .filter(|b| b.tag() == CERTIFICATE_LABEL)
        .map(::pem::Pem::into_contents)
        .collect();
    if certs.is_empty() {
        return Err(CertError::NoCertificate);
    }
    Ok(certs)
}

/// Decode the first `CERTIFICATE` block of a PEM document.
pub fn parse_pem_certificate(input: &[u8]) -> Result<Vec<u8>, CertError> {
    parse_pem_certificates(input)?
        .into_iter()
        .next()
        .ok_or(CertError::NoCertificate)
}

/// Encode DER as a `CERTIFICATE` PEM block.
#[must_use]
pub fn encode_pem_certificate(der: &[u8]) -> String {
    ::pem::encode(&::pem::Pem::new(CERTIFICATE_LABEL, der.to_vec()))
}
