//! Private keys and certificate fingerprints.

mod keys;

pub use keys::{Fingerprint, KeyError, PrivateKey, SecretBytes};
