//! Private keys and certificate fingerprints for SCEP identities.
//!
//! Keys are held as PKCS#8 DER in a zeroize-on-drop buffer:
//! - Legacy PKCS#1 and encrypted PKCS#8 PEM are normalised on load
//! - No Debug/Display implementations that leak secrets
//! - Fingerprints are SHA-256 over certificate DER, compared in constant time

use std::fmt;

use pkcs8::EncryptedPrivateKeyInfo;
use rsa::pkcs1::DecodeRsaPrivateKey;
use rsa::pkcs8::EncodePrivateKey;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

const PKCS8_LABEL: &str = "PRIVATE KEY";
const ENCRYPTED_PKCS8_LABEL: &str = "ENCRYPTED PRIVATE KEY";
const PKCS1_LABEL: &str = "RSA PRIVATE KEY";

/// Smallest RSA modulus the signing backend accepts.
pub const MIN_RSA_BITS: usize = 2048;

/// Errors that can occur during key operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum KeyError {
    /// The input is not PEM.
    #[error("PEM decode failed: {0}")]
    InvalidPem(String),

    /// The PEM block carries a label we do not load.
    #[error("unsupported key block: {0}")]
    UnsupportedFormat(String),

    /// Pre-PKCS#8 encryption (`Proc-Type`/`DEK-Info` headers).
    #[error("legacy PEM encryption is not supported; convert the key to PKCS#8")]
    LegacyEncryption,

    /// The key is encrypted but no passphrase was configured.
    #[error("key is encrypted and no passphrase was given")]
    MissingPassphrase,

    /// Decryption failed, usually a wrong passphrase.
    #[error("failed to decrypt private key")]
    Decrypt,

    /// The bytes do not represent a usable key.
    #[error("invalid key: {0}")]
    InvalidFormat(String),

    /// Key generation failed.
    #[error("key generation failed: {0}")]
    Generation(String),

    /// The fingerprint string has an invalid format.
    #[error("invalid fingerprint format")]
    InvalidFingerprint,
}

/// A zeroize-on-drop wrapper for secret bytes.
///
/// Used for PKCS#8 DER exports so key material doesn't linger in memory.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct SecretBytes(Vec<u8>);

impl SecretBytes {
    /// Get a reference to the secret bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl AsRef<[u8]> for SecretBytes {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl std::ops::Deref for SecretBytes {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

/// A private key (RSA or ECDSA) stored as PKCS#8 DER.
///
/// # Security
///
/// - Zeroized on drop
/// - No `Debug` implementation to prevent accidental logging
pub struct PrivateKey(SecretBytes);

impl PrivateKey {
    /// Generate a new RSA key with the given modulus size.
    ///
    /// # Errors
    ///
    /// Returns `KeyError::Generation` if `bits` is below [`MIN_RSA_BITS`] or
    /// the RSA backend fails.
    pub fn generate_rsa(bits: usize) -> Result<Self, KeyError> {
        if bits < MIN_RSA_BITS {
            return Err(KeyError::Generation(format!(
                "RSA key size {bits} is below the minimum of {MIN_RSA_BITS}"
            )));
        }
        let key = rsa::RsaPrivateKey::new(&mut rand::rngs::OsRng, bits)
            .map_err(|e| KeyError::Generation(e.to_string()))?;
        let doc = key
            .to_pkcs8_der()
            .map_err(|e| KeyError::Generation(e.to_string()))?;
        Ok(Self(SecretBytes(doc.as_bytes().to_vec())))
    }

    /// Generate a new ECDSA P-256 key.
    ///
    /// Much faster than RSA; used for test fixtures and non-RSA CAs.
    pub fn generate_ecdsa() -> Result<Self, KeyError> {
        let pair = rcgen::KeyPair::generate().map_err(|e| KeyError::Generation(e.to_string()))?;
        Ok(Self(SecretBytes(pair.serialize_der())))
    }

    /// Load a key from PKCS#8 DER.
    ///
    /// # Errors
    ///
    /// Returns `KeyError::InvalidFormat` if the signing backend rejects it.
    pub fn from_pkcs8_der(der: &[u8]) -> Result<Self, KeyError> {
        rcgen::KeyPair::try_from(der).map_err(|e| KeyError::InvalidFormat(e.to_string()))?;
        Ok(Self(SecretBytes(der.to_vec())))
    }

    /// Load a key from PEM.
    ///
    /// Accepts `PRIVATE KEY`, `ENCRYPTED PRIVATE KEY` (needs `passphrase`) and
    /// unencrypted `RSA PRIVATE KEY` blocks. An empty passphrase counts as
    /// none.
    pub fn from_pem(input: &[u8], passphrase: Option<&[u8]>) -> Result<Self, KeyError> {
        let block = pem::parse(input).map_err(|e| KeyError::InvalidPem(e.to_string()))?;
        if block.headers().get("Proc-Type").is_some() || block.headers().get("DEK-Info").is_some()
        {
            return Err(KeyError::LegacyEncryption);
        }

        match block.tag() {
            PKCS8_LABEL => Self::from_pkcs8_der(block.contents()),
            ENCRYPTED_PKCS8_LABEL => {
                let passphrase = passphrase
                    .filter(|p| !p.is_empty())
                    .ok_or(KeyError::MissingPassphrase)?;
                let info = EncryptedPrivateKeyInfo::try_from(block.contents())
                    .map_err(|e| KeyError::InvalidFormat(e.to_string()))?;
                let doc = info.decrypt(passphrase).map_err(|_| KeyError::Decrypt)?;
                // A wrong passphrase can still yield valid padding.
                Self::from_pkcs8_der(doc.as_bytes()).map_err(|_| KeyError::Decrypt)
            }
            PKCS1_LABEL => {
                let key = rsa::RsaPrivateKey::from_pkcs1_der(block.contents())
                    .map_err(|e| KeyError::InvalidFormat(e.to_string()))?;
                let doc = key
                    .to_pkcs8_der()
                    .map_err(|e| KeyError::InvalidFormat(e.to_string()))?;
                Self::from_pkcs8_der(doc.as_bytes())
            }
            other => Err(KeyError::UnsupportedFormat(other.to_string())),
        }
    }

    /// Export as PKCS#8 DER (zeroized on drop).
    #[must_use]
    pub fn to_pkcs8_der(&self) -> SecretBytes {
        SecretBytes(self.0.as_bytes().to_vec())
    }

    /// Export as an unencrypted PKCS#8 PEM document.
    #[must_use]
    pub fn to_pem(&self) -> Zeroizing<String> {
        let block = pem::Pem::new(PKCS8_LABEL, self.0.as_bytes().to_vec());
        Zeroizing::new(pem::encode(&block))
    }

    /// Build an rcgen key pair for signing.
    pub fn key_pair(&self) -> Result<rcgen::KeyPair, KeyError> {
        rcgen::KeyPair::try_from(self.0.as_bytes())
            .map_err(|e| KeyError::InvalidFormat(e.to_string()))
    }

    /// DER-encoded SubjectPublicKeyInfo of this key.
    pub fn public_key_der(&self) -> Result<Vec<u8>, KeyError> {
        Ok(self.key_pair()?.public_key_der())
    }
}

/// SHA-256 fingerprint of a DER certificate.
///
/// Displayed as lowercase hex; parsed leniently (spaces and colons ignored).
#[derive(Clone, Copy)]
pub struct Fingerprint([u8; 32]);

impl Fingerprint {
    /// Fingerprint a DER-encoded certificate.
    #[must_use]
    pub fn of_der(der: &[u8]) -> Self {
        Self(Sha256::digest(der).into())
    }

    /// Parse a hex fingerprint such as `AB:CD:...` or `abcd...`.
    ///
    /// # Errors
    ///
    /// Returns `KeyError::InvalidFingerprint` unless the input decodes to
    /// exactly 32 bytes.
    pub fn parse(s: &str) -> Result<Self, KeyError> {
        let cleaned: String = s.chars().filter(|c| *c != ' ' && *c != ':').collect();
        let bytes = hex::decode(cleaned).map_err(|_| KeyError::InvalidFingerprint)?;
        let bytes: [u8; 32] = bytes
            .try_into()
            .map_err(|_| KeyError::InvalidFingerprint)?;
        Ok(Self(bytes))
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl PartialEq for Fingerprint {
    fn eq(&self, other: &Self) -> bool {
        self.0.ct_eq(&other.0).into()
    }
}

impl Eq for Fingerprint {}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({self})")
    }
}
