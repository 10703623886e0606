//! SCEP Server - certificate enrollment front-end for a file-backed CA
//!
//! Layers, bottom-up:
//! - [`depot`]: CA identity, serial counter and issuance ledger on disk
//! - [`signer`]: turns a certificate request into an issued certificate
//! - [`dispatcher`]: the four protocol operations
//! - [`http`]: axum routes mapping query strings and bodies onto the dispatcher

pub mod config;
pub mod depot;
pub mod dispatcher;
pub mod error;
pub mod http;
pub mod signer;

pub use config::{ConfigError, ServerConfig};
pub use depot::{CaIdentity, CertificateDepot, FileDepot, Serial};
pub use dispatcher::{CaCertResponse, Dispatcher};
pub use error::{ScepError, StorageError};
pub use signer::{SigningConfig, SigningPolicy};
