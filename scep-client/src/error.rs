//! Client error types.

use std::io;
use std::path::PathBuf;

use scep_pki::request::CsrError;
use scep_pki::selfsigned::SelfSignedError;
use scep_pki::{CertError, KeyError};
use scep_proto::{CodecError, FailInfo, MessageType};

/// Failures talking to the SCEP endpoint.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// HTTP status >= 400; `body` is the start of the response text.
    #[error("server returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("response exceeds {limit} bytes")]
    TooLarge { limit: usize },

    #[error("invalid server URL: {0}")]
    Url(String),
}

#[derive(Debug, thiserror::Error)]
pub enum EnrollError {
    /// The server answered `Failure`.
    #[error("{message_type} request failed, failInfo: {fail_info}")]
    Failure {
        message_type: MessageType,
        fail_info: FailInfo,
    },

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("envelope: {0}")]
    Codec(#[from] CodecError),

    #[error("key: {0}")]
    Key(#[from] KeyError),

    #[error("certificate request: {0}")]
    Csr(#[from] CsrError),

    #[error("certificate: {0}")]
    Cert(#[from] CertError),

    #[error("bootstrap certificate: {0}")]
    SelfSigned(#[from] SelfSignedError),

    #[error("{}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("enrollment cancelled")]
    Cancelled,

    #[error("request still pending after {0} attempts")]
    RetriesExhausted(u32),

    #[error("no CA certificate matches the selector")]
    NoRecipients,

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("unexpected reply: {0}")]
    UnexpectedReply(String),
}

impl EnrollError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
