//! File-backed depot, layout-compatible with an OpenSSL CA directory.
//!
//! ```text
//! <dir>/index.txt            issuance ledger
//! <dir>/serial               next serial, hex
//! <dir>/<TYPE>.pem|.key      CA identity per key type
//! <dir>/<cn>.<serial>.pem    issued certificates
//! ```

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use scep_pki::cert::{encode_pem_certificate, parse_pem_certificate};
use scep_pki::{CertificateInfo, PrivateKey};
use scep_proto::CaType;
use sha2::{Digest, Sha256};
use time::{Duration, OffsetDateTime};

use super::ledger::{self, LedgerEntry, Status, LEDGER_FILE};
use super::{CaIdentity, CertificateDepot, Serial};
use crate::error::{ScepError, StorageError};

const SERIAL_FILE: &str = "serial";

const CERT_MODE: u32 = 0o444;
const SERIAL_MODE: u32 = 0o400;
const LEDGER_MODE: u32 = 0o600;
const KEY_MODE: u32 = 0o600;

#[cfg(unix)]
fn set_mode(path: &Path, mode: u32) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(mode))
}

#[cfg(not(unix))]
fn set_mode(_path: &Path, _mode: u32) -> io::Result<()> {
    Ok(())
}

/// Exclusive-create options; the mode applies from the first byte.
fn create_new_options(mode: u32) -> OpenOptions {
    let mut options = OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(mode);
    }
    #[cfg(not(unix))]
    let _ = mode;
    options
}

/// Decimal rendering of a big-endian unsigned integer.
fn decimal(bytes: &[u8]) -> String {
    let mut digits = bytes.to_vec();
    let mut out = Vec::new();
    while digits.iter().any(|d| *d != 0) {
        let mut rem = 0u32;
        for d in &mut digits {
            let acc = rem * 256 + u32::from(*d);
            *d = (acc / 10) as u8;
            rem = acc % 10;
        }
        out.push(b'0' + rem as u8);
    }
    if out.is_empty() {
        return "0".to_string();
    }
    out.iter().rev().map(|d| char::from(*d)).collect()
}

/// Depot rooted at a directory.
pub struct FileDepot {
    dir: PathBuf,
    serial_lock: Mutex<()>,
    ledger_lock: Mutex<()>,
}

impl std::fmt::Debug for FileDepot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileDepot").field("dir", &self.dir).finish()
    }
}

impl FileDepot {
    /// Open (or initialise) a depot, creating the directory and an empty
    /// ledger when missing.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|e| StorageError::io(&dir, e))?;

        let ledger = dir.join(LEDGER_FILE);
        match create_new_options(LEDGER_MODE).open(&ledger) {
            Ok(_) => tracing::info!(path = %ledger.display(), "Created empty ledger"),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {}
            Err(e) => return Err(StorageError::io(ledger, e)),
        }

        Ok(Self {
            dir,
            serial_lock: Mutex::new(()),
            ledger_lock: Mutex::new(()),
        })
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn join(&self, name: &str) -> PathBuf {
        self.dir.join(name)
    }

    fn ensure_dir(&self) -> Result<(), StorageError> {
        fs::create_dir_all(&self.dir).map_err(|e| StorageError::io(&self.dir, e))
    }

    /// Replace `name` via write-to-temp and rename.
    fn write_atomic(&self, name: &str, contents: &[u8], mode: u32) -> Result<(), StorageError> {
        self.ensure_dir()?;
        let target = self.join(name);
        let mut tmp =
            tempfile::NamedTempFile::new_in(&self.dir).map_err(|e| StorageError::io(&self.dir, e))?;
        tmp.write_all(contents)
            .and_then(|()| tmp.as_file().sync_all())
            .and_then(|()| set_mode(tmp.path(), mode))
            .map_err(|e| StorageError::io(tmp.path(), e))?;
        tmp.persist(&target)
            .map_err(|e| StorageError::io(&target, e.error))?;
        Ok(())
    }

    fn create_exclusive(&self, name: &str, contents: &[u8], mode: u32) -> Result<PathBuf, StorageError> {
        self.ensure_dir()?;
        let path = self.join(name);
        let mut file = create_new_options(mode).open(&path).map_err(|e| {
            if e.kind() == io::ErrorKind::AlreadyExists {
                StorageError::Conflict(path.clone())
            } else {
                StorageError::io(&path, e)
            }
        })?;
        if let Err(e) = file.write_all(contents) {
            let _ = fs::remove_file(&path);
            return Err(StorageError::io(path, e));
        }
        Ok(path)
    }

    fn read_ledger(&self) -> Result<String, StorageError> {
        let path = self.join(LEDGER_FILE);
        match fs::read_to_string(&path) {
            Ok(contents) => Ok(contents),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(String::new()),
            Err(e) => Err(StorageError::io(path, e)),
        }
    }

    /// Write a new CA identity for `ca_type`. Refuses to replace one.
    pub fn install_ca(
        &self,
        ca_type: CaType,
        certificate: &[u8],
        key: &PrivateKey,
    ) -> Result<(), ScepError> {
        let prefix = ca_type.prefix();
        self.create_exclusive(&format!("{prefix}.key"), key.to_pem().as_bytes(), KEY_MODE)?;
        self.create_exclusive(
            &format!("{prefix}.pem"),
            encode_pem_certificate(certificate).as_bytes(),
            CERT_MODE,
        )?;
        Ok(())
    }

    /// The single ledger writer.
    ///
    /// Scans once; fails on a non-renewable match without touching the
    /// file; otherwise revokes matches (if asked), appends `append`, and
    /// rewrites the ledger only when something changed.
    fn update_ledger(
        &self,
        dn: &str,
        allow_renewal_days: u32,
        revoke_old: bool,
        append: Option<LedgerEntry>,
    ) -> Result<bool, ScepError> {
        let _guard = self.ledger_lock.lock().unwrap_or_else(PoisonError::into_inner);

        let contents = self.read_ledger()?;
        let now = OffsetDateTime::now_utc();
        let renew_boundary = now + Duration::days(i64::from(allow_renewal_days));

        let mut exists = false;
        let mut non_renewable = false;
        let mut revoked = Vec::new();
        let mut lines: Vec<String> = Vec::new();

        for line in contents.lines() {
            let entry = match LedgerEntry::parse(line) {
                Some(entry) if entry.status == Status::Valid && entry.matches_dn(dn) => entry,
                _ => {
                    lines.push(line.to_string());
                    continue;
                }
            };

            let expiry = ledger::parse_time(&entry.expiry).ok_or_else(|| StorageError::Corrupt {
                file: LEDGER_FILE,
                reason: format!("bad expiry {:?} for serial {}", entry.expiry, entry.serial),
            })?;
            exists = true;
            if allow_renewal_days > 0 && expiry > renew_boundary {
                non_renewable = true;
            }

            if revoke_old {
                revoked.push(entry.serial.clone());
                lines.push(entry.revoked(now).to_line());
            } else {
                lines.push(line.to_string());
            }
        }

        if non_renewable {
            return Err(ScepError::Policy(format!("DN {dn} already exists")));
        }
        if revoked.is_empty() && append.is_none() {
            return Ok(exists);
        }

        if let Some(entry) = append {
            lines.push(entry.to_line());
        }
        let mut out = lines.join("\n");
        out.push('\n');
        self.write_atomic(LEDGER_FILE, out.as_bytes(), LEDGER_MODE)?;

        for serial in &revoked {
            tracing::info!(
                serial = %serial,
                dn = %dn,
                "Revoked superseded certificate; CRL regeneration needed"
            );
        }
        Ok(exists)
    }
}

impl CertificateDepot for FileDepot {
    fn load_ca(&self, passphrase: &[u8], ca_type: CaType) -> Result<CaIdentity, ScepError> {
        let read = |name: String| -> Result<Vec<u8>, StorageError> {
            let path = self.join(&name);
            fs::read(&path).map_err(|e| {
                if e.kind() == io::ErrorKind::NotFound {
                    StorageError::MissingCa(path)
                } else {
                    StorageError::io(path, e)
                }
            })
        };

        let prefix = ca_type.prefix();
        let cert_pem = read(format!("{prefix}.pem"))?;
        let key_pem = read(format!("{prefix}.key"))?;

        let certificate = parse_pem_certificate(&cert_pem)?;
        let key = PrivateKey::from_pem(&key_pem, Some(passphrase))?;
        Ok(CaIdentity { certificate, key })
    }

    fn allocate_serial(&self) -> Result<Serial, ScepError> {
        let _guard = self.serial_lock.lock().unwrap_or_else(PoisonError::into_inner);

        let path = self.join(SERIAL_FILE);
        let current = match fs::read_to_string(&path) {
            Ok(text) => {
                let text = text.trim_end_matches(['\r', '\n']);
                u64::from_str_radix(text, 16)
                    .map(Serial::new)
                    .map_err(|_| StorageError::Corrupt {
                        file: SERIAL_FILE,
                        reason: format!("could not convert {text:?} to serial number"),
                    })?
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Serial::INITIAL,
            Err(e) => return Err(StorageError::io(path, e).into()),
        };

        let next = current.value().checked_add(1).ok_or(StorageError::Corrupt {
            file: SERIAL_FILE,
            reason: "serial counter exhausted".to_string(),
        })?;
        let record = format!("{}\n", Serial::new(next).ledger_hex().to_lowercase());
        self.write_atomic(SERIAL_FILE, record.as_bytes(), SERIAL_MODE)?;

        tracing::debug!(serial = %current, "Allocated serial");
        Ok(current)
    }

    fn store(
        &self,
        common_name: &str,
        certificate: &[u8],
        allow_renewal_days: u32,
    ) -> Result<(), ScepError> {
        if certificate.is_empty() {
            return Err(ScepError::InvalidInput("certificate is empty".to_string()));
        }
        let info = CertificateInfo::from_der(certificate)?;
        let dn = info.distinguished_name();
        for (field, value) in [
            ("subject", dn.as_str()),
            ("issuer", info.issuer_common_name.as_str()),
            ("common name", common_name),
        ] {
            if !ledger::is_safe_field(value) {
                return Err(ScepError::InvalidInput(format!(
                    "{field} contains control characters"
                )));
            }
        }

        // Without a subject CN the name would be meaningless; use a digest.
        let name = match info.common_name() {
            Some(_) => common_name.replace(['/', '\\'], "_"),
            None => hex::encode(Sha256::digest(certificate)),
        };
        let filename = format!("{name}.{}.pem", decimal(&info.serial));
        let path = self.create_exclusive(
            &filename,
            encode_pem_certificate(certificate).as_bytes(),
            CERT_MODE,
        )?;

        let entry = LedgerEntry {
            status: Status::Valid,
            expiry: ledger::format_time(info.not_after),
            revoked_at: String::new(),
            serial: info.serial_hex(),
            filename: filename.clone(),
            issuer: info.issuer_common_name.clone(),
            dn: dn.clone(),
        };
        if let Err(e) = self.update_ledger(&dn, allow_renewal_days, true, Some(entry)) {
            let _ = fs::remove_file(&path);
            return Err(e);
        }

        tracing::info!(file = %filename, serial = %info.serial_hex(), dn = %dn, "Stored certificate");
        Ok(())
    }

    fn check_and_maybe_revoke(
        &self,
        allow_renewal_days: u32,
        candidate: &CertificateInfo,
        revoke_old: bool,
    ) -> Result<bool, ScepError> {
        self.update_ledger(
            &candidate.distinguished_name(),
            allow_renewal_days,
            revoke_old,
            None,
        )
    }

    fn find(&self, issuer: &str, serial: &str) -> Result<Vec<u8>, ScepError> {
        let contents = self.read_ledger()?;
        for entry in contents.lines().filter_map(LedgerEntry::parse) {
            if entry.status != Status::Valid
                || entry.issuer != issuer
                || entry.serial != serial
            {
                continue;
            }
            let path = self.join(&entry.filename);
            let pem = match fs::read(&path) {
                Ok(pem) => pem,
                Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                Err(e) => return Err(StorageError::io(path, e).into()),
            };
            return Ok(parse_pem_certificate(&pem)?);
        }
        Err(ScepError::NotFound)
    }
}
