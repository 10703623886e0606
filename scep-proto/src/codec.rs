//! The envelope codec seam.
//!
//! Everything that touches signed/encrypted PKI messages goes through
//! [`EnvelopeCodec`]. The dispatcher and the enrollment client never look
//! inside an envelope beyond the attributes exposed on [`Envelope`].

use scep_pki::identity::{Fingerprint, KeyError, PrivateKey};
use scep_pki::CertError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::message::{FailInfo, MessageType, PkiStatus};

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("malformed envelope: {0}")]
    Malformed(String),

    #[error("unsupported envelope version {0}")]
    UnsupportedVersion(u8),

    #[error("envelope signer is not trusted")]
    UntrustedSigner,

    #[error("certificate is not a recipient of this envelope")]
    NotRecipient,

    #[error("private key does not match certificate")]
    KeyMismatch,

    #[error("no recipient certificates")]
    NoRecipients,

    #[error("missing message")]
    MissingContent,

    #[error("unexpected payload for {0}")]
    UnexpectedPayload(MessageType),

    #[error(transparent)]
    Key(#[from] KeyError),

    #[error(transparent)]
    Cert(#[from] CertError),
}

/// Issuer common name and serial identifying an issued certificate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssuerAndSerial {
    pub issuer: String,
    /// Upper-case hex serial as written in the ledger.
    pub serial: String,
}

/// Decrypted content of an envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Payload {
    /// DER PKCS#10 request (`PKCSReq`, `RenewalReq`, `UpdateReq`).
    CertificateRequest(#[serde(with = "crate::framed::b64")] Vec<u8>),
    /// `GetCert` lookup key.
    IssuerAndSerial(IssuerAndSerial),
    /// DER certificates returned in a successful `CertRep`.
    Certificates(#[serde(with = "crate::framed::b64_list")] Vec<Vec<u8>>),
}

/// A decoded PKI message.
///
/// `raw` keeps the exact bytes so a pending request can be resubmitted
/// unchanged.
#[derive(Debug, Clone)]
pub struct Envelope {
    pub message_type: MessageType,
    pub transaction_id: String,
    pub sender_nonce: Vec<u8>,
    pub recipient_nonce: Option<Vec<u8>>,
    /// Set on `CertRep` only.
    pub status: Option<PkiStatus>,
    /// Set when `status` is `Failure`.
    pub fail_info: Option<FailInfo>,
    /// DER certificate of the signer.
    pub signer_cert: Vec<u8>,
    /// Fingerprints of the certificates the content is sealed to.
    pub recipients: Vec<Fingerprint>,
    /// Codec-specific sealed content; empty for pending and failure replies.
    pub sealed: Vec<u8>,
    pub raw: Vec<u8>,
}

/// Inputs for a client request envelope.
pub struct RequestParams<'a> {
    pub message_type: MessageType,
    pub payload: &'a Payload,
    /// DER certificate the envelope is signed with.
    pub signer_cert: &'a [u8],
    pub signer_key: &'a PrivateKey,
    /// DER CA certificates the payload is sealed to.
    pub recipients: &'a [Vec<u8>],
}

/// Encoding and decoding of signed, encrypted PKI messages.
///
/// Responses always answer a decoded request: they echo its transaction id
/// and sender nonce and are sealed to its signer.
pub trait EnvelopeCodec: Send + Sync {
    /// Parse an envelope. When `trusted` is non-empty the signer must be one
    /// of those DER certificates.
    fn decode(&self, raw: &[u8], trusted: &[Vec<u8>]) -> Result<Envelope, CodecError>;

    /// Open the sealed content as one of the recipients.
    fn decrypt(
        &self,
        envelope: &Envelope,
        cert_der: &[u8],
        key: &PrivateKey,
    ) -> Result<Payload, CodecError>;

    fn build_request(&self, params: RequestParams<'_>) -> Result<Vec<u8>, CodecError>;

    fn build_success(
        &self,
        request: &Envelope,
        ca_cert: &[u8],
        ca_key: &PrivateKey,
        issued: &[u8],
    ) -> Result<Vec<u8>, CodecError>;

    fn build_failure(
        &self,
        request: &Envelope,
        ca_cert: &[u8],
        ca_key: &PrivateKey,
        reason: FailInfo,
    ) -> Result<Vec<u8>, CodecError>;

    fn build_pending(
        &self,
        request: &Envelope,
        ca_cert: &[u8],
        ca_key: &PrivateKey,
    ) -> Result<Vec<u8>, CodecError>;

    /// Bundle certificates for `GetCACert` with more than one certificate.
    fn degenerate(&self, certs: &[Vec<u8>]) -> Result<Vec<u8>, CodecError>;

    fn parse_degenerate(&self, raw: &[u8]) -> Result<Vec<Vec<u8>>, CodecError>;
}
