//! HTTP-level protocol vocabulary: operations, content types, capabilities.

use std::fmt;
use std::str::FromStr;

/// Default mount point of the SCEP endpoint.
pub const DEFAULT_PATH: &str = "/api/v1/scep";

/// Largest response body a client will read.
pub const MAX_PAYLOAD_SIZE: usize = 2 << 20;

/// Response content types.
pub mod content_type {
    pub const TEXT_PLAIN: &str = "text/plain";
    /// A single DER CA certificate.
    pub const CA_CERT: &str = "application/x-x509-ca-cert";
    /// A degenerate bundle holding the CA and its chain.
    pub const CA_RA_CERT: &str = "application/x-x509-ca-ra-cert";
    pub const PKI_MESSAGE: &str = "application/x-pki-message";

    /// Content type for a `GetCACert` answer carrying `count` certificates.
    #[must_use]
    pub fn for_ca_certs(count: usize) -> &'static str {
        if count > 1 {
            CA_RA_CERT
        } else {
            CA_CERT
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unsupported operation")]
pub struct UnknownOperation;

/// The `operation` query parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    GetCaCaps,
    GetCaCert,
    PkiOperation,
    GetNextCaCert,
}

impl Operation {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::GetCaCaps => "GetCACaps",
            Self::GetCaCert => "GetCACert",
            Self::PkiOperation => "PKIOperation",
            Self::GetNextCaCert => "GetNextCACert",
        }
    }

    /// Whether a GET request may omit the `message` parameter.
    #[must_use]
    pub fn message_optional(self) -> bool {
        matches!(self, Self::GetCaCaps | Self::GetCaCert)
    }
}

impl FromStr for Operation {
    type Err = UnknownOperation;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "GetCACaps" => Ok(Self::GetCaCaps),
            "GetCACert" => Ok(Self::GetCaCert),
            "PKIOperation" => Ok(Self::PkiOperation),
            "GetNextCACert" => Ok(Self::GetNextCaCert),
            _ => Err(UnknownOperation),
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unsupported CA type")]
pub struct UnknownCaType;

/// Key algorithm family of a CA; selects the `<TYPE>.pem`/`<TYPE>.key` pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CaType {
    #[default]
    Rsa,
    Ecc,
    Sm2,
}

impl CaType {
    /// File prefix inside the depot.
    #[must_use]
    pub fn prefix(self) -> &'static str {
        match self {
            Self::Rsa => "RSA",
            Self::Ecc => "ECC",
            Self::Sm2 => "SM2",
        }
    }

    /// Interpret a `GetCACert` message. Newlines are trimmed, case is
    /// ignored and an empty message means RSA.
    pub fn from_message(message: &str) -> Result<Self, UnknownCaType> {
        let normalized = message.trim_matches(|c| c == '\n' || c == '\r').to_uppercase();
        match normalized.as_str() {
            "" | "RSA" => Ok(Self::Rsa),
            "ECC" => Ok(Self::Ecc),
            "SM2" => Ok(Self::Sm2),
            _ => Err(UnknownCaType),
        }
    }
}

impl FromStr for CaType {
    type Err = UnknownCaType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_message(s)
    }
}

impl fmt::Display for CaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.prefix())
    }
}

/// Capability list advertised by `GetCACaps`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Capabilities(Vec<String>);

impl Capabilities {
    pub const DEFAULT: &'static [&'static str] = &[
        "Renewal",
        "SHA-1",
        "SHA-256",
        "AES",
        "DES3",
        "SCEPStandard",
        "POSTPKIOperation",
    ];

    #[must_use]
    pub fn new(items: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self(items.into_iter().map(Into::into).collect())
    }

    /// Parse a newline-separated capability document.
    #[must_use]
    pub fn parse(text: &str) -> Self {
        Self(
            text.lines()
                .map(str::trim)
                .filter(|l| !l.is_empty())
                .map(str::to_string)
                .collect(),
        )
    }

    /// Case-insensitive membership test.
    #[must_use]
    pub fn supports(&self, capability: &str) -> bool {
        self.0.iter().any(|c| c.eq_ignore_ascii_case(capability))
    }

    /// Whether `PKIOperation` may be sent as a POST body.
    #[must_use]
    pub fn supports_post(&self) -> bool {
        self.supports("POSTPKIOperation") || self.supports("SCEPStandard")
    }

    #[must_use]
    pub fn to_text(&self) -> String {
        self.0.join("\n")
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }
}

impl Default for Capabilities {
    fn default() -> Self {
        Self::new(Self::DEFAULT.iter().copied())
    }
}
