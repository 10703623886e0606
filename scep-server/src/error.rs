//! Server error taxonomy.

use std::io;
use std::path::PathBuf;

use scep_pki::identity::KeyError;
use scep_pki::request::CsrError;
use scep_pki::CertError;
use scep_proto::{CodecError, UnknownCaType, UnknownOperation};

/// Depot file I/O failures.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("{}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The target file already exists; nothing was overwritten.
    #[error("{} already exists", .0.display())]
    Conflict(PathBuf),

    #[error("corrupt {file}: {reason}")]
    Corrupt { file: &'static str, reason: String },

    #[error("missing CA certificate: {0}")]
    MissingCa(PathBuf),
}

impl StorageError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Errors surfaced by the depot, signer and dispatcher.
#[derive(Debug, thiserror::Error)]
pub enum ScepError {
    #[error("depot config error: {0}")]
    Config(String),

    #[error(transparent)]
    Storage(#[from] StorageError),

    /// Parse, decrypt or signing failure.
    #[error("crypto error: {0}")]
    Crypto(String),

    /// Duplicate non-renewable DN, unsupported CA type.
    #[error("{0}")]
    Policy(String),

    /// Missing operation/message, undecodable envelope.
    #[error("{0}")]
    Protocol(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("certificate not found")]
    NotFound,

    #[error("not implemented")]
    NotImplemented,

    /// A blocking task panicked or was cancelled.
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<KeyError> for ScepError {
    fn from(e: KeyError) -> Self {
        Self::Crypto(e.to_string())
    }
}

impl From<CertError> for ScepError {
    fn from(e: CertError) -> Self {
        Self::Crypto(e.to_string())
    }
}

impl From<CsrError> for ScepError {
    fn from(e: CsrError) -> Self {
        Self::Crypto(e.to_string())
    }
}

impl From<CodecError> for ScepError {
    fn from(e: CodecError) -> Self {
        Self::Protocol(e.to_string())
    }
}

impl From<UnknownCaType> for ScepError {
    fn from(e: UnknownCaType) -> Self {
        Self::Policy(e.to_string())
    }
}

impl From<UnknownOperation> for ScepError {
    fn from(e: UnknownOperation) -> Self {
        Self::Protocol(e.to_string())
    }
}
