//! PKI message vocabulary carried inside envelopes.

use std::fmt;

use serde::{Deserialize, Serialize};

/// SCEP `messageType` attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageType {
    CertRep,
    RenewalReq,
    UpdateReq,
    #[serde(rename = "PKCSReq")]
    PkcsReq,
    CertPoll,
    GetCert,
    #[serde(rename = "GetCRL")]
    GetCrl,
}

impl MessageType {
    /// Numeric value used on the wire by CMS encodings.
    #[must_use]
    pub fn code(self) -> u8 {
        match self {
            Self::CertRep => 3,
            Self::RenewalReq => 17,
            Self::UpdateReq => 18,
            Self::PkcsReq => 19,
            Self::CertPoll => 20,
            Self::GetCert => 21,
            Self::GetCrl => 22,
        }
    }

    /// Message types whose payload is a certificate request.
    #[must_use]
    pub fn carries_csr(self) -> bool {
        matches!(self, Self::PkcsReq | Self::RenewalReq | Self::UpdateReq)
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::CertRep => "CertRep",
            Self::RenewalReq => "RenewalReq",
            Self::UpdateReq => "UpdateReq",
            Self::PkcsReq => "PKCSReq",
            Self::CertPoll => "CertPoll",
            Self::GetCert => "GetCert",
            Self::GetCrl => "GetCRL",
        };
        f.write_str(name)
    }
}

/// `pkiStatus` of a `CertRep`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PkiStatus {
    Success,
    Failure,
    Pending,
}

/// `failInfo` of a failed `CertRep`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
pub enum FailInfo {
    #[error("unrecognized or unsupported algorithm")]
    BadAlg,
    #[error("integrity check failed")]
    BadMessageCheck,
    #[error("transaction not permitted or supported")]
    BadRequest,
    #[error("message time too far from system time")]
    BadTime,
    #[error("no certificate could be identified matching the provided criteria")]
    BadCertId,
}

impl FailInfo {
    #[must_use]
    pub fn code(self) -> u8 {
        match self {
            Self::BadAlg => 0,
            Self::BadMessageCheck => 1,
            Self::BadRequest => 2,
            Self::BadTime => 3,
            Self::BadCertId => 4,
        }
    }
}
