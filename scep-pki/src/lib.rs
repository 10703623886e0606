//! X.509 building blocks shared by the SCEP server and client.
//!
//! This crate is IO-light: it parses and builds keys, certificate requests
//! and certificates, but leaves file placement and policy to its callers.
//!
//! - [`cert`]: certificate inspection (subject DN, issuer, expiry, serial)
//! - [`identity`]: private keys and fingerprints
//! - [`request`]: certificate signing requests
//! - [`selfsigned`]: bootstrap and CA self-signed certificates
//! - [`selector`]: choosing recipient CA certificates

pub mod cert;
pub mod identity;
pub mod request;
pub mod selector;
pub mod selfsigned;

pub use cert::{CertError, CertificateInfo, SubjectName};
pub use identity::{Fingerprint, KeyError, PrivateKey, SecretBytes};
pub use request::{CsrError, CsrInfo, CsrSubject};
pub use selector::CertsSelector;
pub use selfsigned::{SelfSignedError, SelfSignedParams};
