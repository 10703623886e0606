//! Certificate depot: CA identity, serial counter and issuance ledger.

mod file;
pub mod ledger;

use std::fmt;

use scep_pki::{CertificateInfo, PrivateKey};
use scep_proto::CaType;

use crate::error::ScepError;

pub use file::FileDepot;

/// A certificate serial number allocated by the depot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Serial(u64);

impl Serial {
    /// First serial handed out by a fresh depot.
    pub const INITIAL: Serial = Serial(2);

    #[must_use]
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    #[must_use]
    pub fn value(self) -> u64 {
        self.0
    }

    /// Upper-case hex, zero-padded to an even number of digits.
    #[must_use]
    pub fn ledger_hex(self) -> String {
        let hex = format!("{:X}", self.0);
        if hex.len() % 2 == 1 {
            format!("0{hex}")
        } else {
            hex
        }
    }
}

impl fmt::Display for Serial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Serial> for rcgen::SerialNumber {
    fn from(serial: Serial) -> Self {
        rcgen::SerialNumber::from(serial.0)
    }
}

/// CA certificate (DER) and its private key.
pub struct CaIdentity {
    pub certificate: Vec<u8>,
    pub key: PrivateKey,
}

impl fmt::Debug for CaIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CaIdentity")
            .field("certificate_len", &self.certificate.len())
            .finish_non_exhaustive()
    }
}

/// Storage backend for the CA and everything it has issued.
///
/// Methods block on file I/O; async callers go through `spawn_blocking`.
pub trait CertificateDepot: Send + Sync {
    /// Read `<TYPE>.pem` and `<TYPE>.key`. Never cached.
    fn load_ca(&self, passphrase: &[u8], ca_type: CaType) -> Result<CaIdentity, ScepError>;

    /// Return the stored serial and persist its successor.
    fn allocate_serial(&self) -> Result<Serial, ScepError>;

    /// Persist an issued certificate and record it in the ledger, revoking
    /// any still-valid entry with the same DN.
    ///
    /// The renewal window is checked under the same ledger lock as the
    /// append: `Policy` when a valid entry for the DN is outside it, and
    /// the certificate file is removed again. `InvalidInput` when the
    /// subject or name holds control characters.
    fn store(
        &self,
        common_name: &str,
        certificate: &[u8],
        allow_renewal_days: u32,
    ) -> Result<(), ScepError>;

    /// Duplicate/renewal check for `candidate`'s DN.
    ///
    /// Fails with `ScepError::Policy` when a valid entry for the DN is
    /// outside its renewal window. Otherwise returns whether a valid entry
    /// exists, revoking all of them first when `revoke_old` is set.
    fn check_and_maybe_revoke(
        &self,
        allow_renewal_days: u32,
        candidate: &CertificateInfo,
        revoke_old: bool,
    ) -> Result<bool, ScepError>;

    /// Certificate (DER) for a valid ledger entry with exactly this issuer
    /// CN and ledger serial (upper-case, even-length hex).
    fn find(&self, issuer: &str, serial: &str) -> Result<Vec<u8>, ScepError>;
}
