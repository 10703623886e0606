//! Concurrency tests for the file depot: serial allocation and issuance
//! from many threads against one directory.

mod common;

use std::collections::HashSet;
use std::sync::{Arc, Barrier};
use std::thread;

use common::{TestCa, TestClient};
use scep_pki::CertificateInfo;
use scep_proto::CaType;
use scep_server::depot::ledger::{LedgerEntry, Status, LEDGER_FILE};
use scep_server::{
    CaIdentity, CertificateDepot, FileDepot, ScepError, Serial, SigningConfig, SigningPolicy,
};

const THREADS: usize = 8;
const PER_THREAD: usize = 16;

#[test]
fn test_concurrent_serials_are_contiguous() {
    let ca = TestCa::new();
    let depot = ca.depot();

    let handles: Vec<_> = (0..THREADS)
        .map(|_| {
            let depot = depot.clone();
            thread::spawn(move || {
                (0..PER_THREAD)
                    .map(|_| depot.allocate_serial().unwrap().value())
                    .collect::<Vec<_>>()
            })
        })
        .collect();

    let mut serials: Vec<u64> = handles
        .into_iter()
        .flat_map(|h| h.join().unwrap())
        .collect();
    serials.sort_unstable();

    let expected: Vec<u64> = (2..2 + (THREADS * PER_THREAD) as u64).collect();
    assert_eq!(serials, expected);

    let next = depot.allocate_serial().unwrap().value();
    assert_eq!(next, 2 + (THREADS * PER_THREAD) as u64);
}

#[test]
fn test_concurrent_issuance_keeps_ledger_consistent() {
    const SIGNERS: usize = 4;
    const EACH: usize = 3;

    let ca = TestCa::new();
    let depot = ca.depot();
    let policy = Arc::new(SigningPolicy::new(depot.clone(), SigningConfig::default()));

    let handles: Vec<_> = (0..SIGNERS)
        .map(|t| {
            let policy = policy.clone();
            thread::spawn(move || {
                let identity = policy.load_ca().unwrap();
                let client = TestClient::new();
                for i in 0..EACH {
                    policy
                        .sign(&identity, &client.csr(&format!("device-{t}-{i}")))
                        .unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let ledger = std::fs::read_to_string(ca.depot_dir().join(LEDGER_FILE)).unwrap();
    let entries: Vec<LedgerEntry> = ledger.lines().filter_map(LedgerEntry::parse).collect();
    assert_eq!(entries.len(), SIGNERS * EACH);
    assert!(entries.iter().all(|e| e.status == Status::Valid));

    let serials: HashSet<&str> = entries.iter().map(|e| e.serial.as_str()).collect();
    assert_eq!(serials.len(), SIGNERS * EACH);

    for entry in &entries {
        assert!(ca.depot_dir().join(&entry.filename).exists());
    }
}

/// Holds every `store` call until all signers have reached it, so they race
/// on the ledger.
struct GatedDepot {
    inner: Arc<FileDepot>,
    gate: Barrier,
}

impl CertificateDepot for GatedDepot {
    fn load_ca(&self, passphrase: &[u8], ca_type: CaType) -> Result<CaIdentity, ScepError> {
        self.inner.load_ca(passphrase, ca_type)
    }

    fn allocate_serial(&self) -> Result<Serial, ScepError> {
        self.inner.allocate_serial()
    }

    fn store(
        &self,
        common_name: &str,
        certificate: &[u8],
        allow_renewal_days: u32,
    ) -> Result<(), ScepError> {
        self.gate.wait();
        self.inner.store(common_name, certificate, allow_renewal_days)
    }

    fn check_and_maybe_revoke(
        &self,
        allow_renewal_days: u32,
        candidate: &CertificateInfo,
        revoke_old: bool,
    ) -> Result<bool, ScepError> {
        self.inner
            .check_and_maybe_revoke(allow_renewal_days, candidate, revoke_old)
    }

    fn find(&self, issuer: &str, serial: &str) -> Result<Vec<u8>, ScepError> {
        self.inner.find(issuer, serial)
    }
}

#[test]
fn test_concurrent_same_subject_issues_once() {
    const SIGNERS: usize = 4;

    let ca = TestCa::new();
    let depot = Arc::new(GatedDepot {
        inner: ca.depot(),
        gate: Barrier::new(SIGNERS),
    });
    let policy = Arc::new(SigningPolicy::new(
        depot,
        SigningConfig {
            allow_renewal_days: 14,
            ..Default::default()
        },
    ));

    let handles: Vec<_> = (0..SIGNERS)
        .map(|_| {
            let policy = policy.clone();
            thread::spawn(move || {
                let identity = policy.load_ca().unwrap();
                policy.sign(&identity, &TestClient::new().csr("device-dup"))
            })
        })
        .collect();
    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(results
        .iter()
        .filter_map(|r| r.as_ref().err())
        .all(|e| matches!(e, ScepError::Policy(_))));

    let ledger = std::fs::read_to_string(ca.depot_dir().join(LEDGER_FILE)).unwrap();
    let entries: Vec<LedgerEntry> = ledger.lines().filter_map(LedgerEntry::parse).collect();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].status, Status::Valid);

    // Losers leave no certificate file behind.
    let issued = std::fs::read_dir(ca.depot_dir())
        .unwrap()
        .filter_map(Result::ok)
        .filter(|e| e.file_name().to_string_lossy().starts_with("device-dup."))
        .count();
    assert_eq!(issued, 1);
}
