//! Test harness: a temporary depot with an installed CA, plus a client
//! identity that can build PKI messages for it.

use std::path::PathBuf;
use std::sync::Arc;

use scep_pki::request::{build_csr, CsrSubject};
use scep_pki::selfsigned::{build_self_signed, SelfSignedParams};
use scep_pki::PrivateKey;
use scep_proto::{
    CaType, EnvelopeCodec, FailInfo, FramedCodec, MessageType, Payload, PkiStatus, RequestParams,
};
use scep_server::{Dispatcher, FileDepot, ServerConfig, SigningConfig};

pub const CA_COMMON_NAME: &str = "Harness CA";

/// A depot directory with an ECDSA CA installed under the RSA slot, which
/// is what the default configuration signs with.
pub struct TestCa {
    dir: tempfile::TempDir,
    pub certificate: Vec<u8>,
}

impl TestCa {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let key = PrivateKey::generate_ecdsa().expect("Failed to generate CA key");
        let certificate = build_self_signed(
            &key,
            &SelfSignedParams::certificate_authority(CA_COMMON_NAME, None, 3650),
        )
        .expect("Failed to build CA certificate");
        FileDepot::open(dir.path())
            .expect("Failed to open depot")
            .install_ca(CaType::Rsa, &certificate, &key)
            .expect("Failed to install CA");
        Self { dir, certificate }
    }

    pub fn depot_dir(&self) -> PathBuf {
        self.dir.path().to_path_buf()
    }

    /// Another handle onto the same depot directory.
    pub fn depot(&self) -> Arc<FileDepot> {
        Arc::new(FileDepot::open(self.dir.path()).expect("Failed to open depot"))
    }

    pub fn config(&self) -> ServerConfig {
        ServerConfig {
            depot_dir: self.depot_dir(),
            signing: SigningConfig::default(),
            ..Default::default()
        }
    }

    pub fn dispatcher(&self) -> Arc<Dispatcher> {
        self.dispatcher_with(self.config())
    }

    pub fn dispatcher_with(&self, config: ServerConfig) -> Arc<Dispatcher> {
        Arc::new(config.build_dispatcher().expect("Failed to build dispatcher"))
    }
}

/// Decoded server reply.
#[derive(Debug)]
pub struct Reply {
    pub status: PkiStatus,
    pub fail_info: Option<FailInfo>,
    pub certificates: Vec<Vec<u8>>,
}

/// A device enrolling with a bootstrap self-signed certificate.
pub struct TestClient {
    pub key: PrivateKey,
    pub signer_cert: Vec<u8>,
    codec: FramedCodec,
}

impl TestClient {
    pub fn new() -> Self {
        let key = PrivateKey::generate_ecdsa().expect("Failed to generate client key");
        let signer_cert = build_self_signed(&key, &SelfSignedParams::bootstrap(None))
            .expect("Failed to build bootstrap certificate");
        Self {
            key,
            signer_cert,
            codec: FramedCodec::new(),
        }
    }

    pub fn csr(&self, common_name: &str) -> Vec<u8> {
        let subject = CsrSubject {
            common_name: common_name.to_string(),
            organization: "Harness".to_string(),
            ..Default::default()
        };
        build_csr(&self.key, &subject).expect("Failed to build CSR")
    }

    /// Raw `PKCSReq` envelope for `common_name`, addressed to `ca`.
    pub fn enrollment_request(&self, ca: &TestCa, common_name: &str) -> Vec<u8> {
        self.request(
            ca,
            MessageType::PkcsReq,
            Payload::CertificateRequest(self.csr(common_name)),
        )
    }

    pub fn request(&self, ca: &TestCa, message_type: MessageType, payload: Payload) -> Vec<u8> {
        self.codec
            .build_request(RequestParams {
                message_type,
                payload: &payload,
                signer_cert: &self.signer_cert,
                signer_key: &self.key,
                recipients: std::slice::from_ref(&ca.certificate),
            })
            .expect("Failed to build request")
    }

    pub fn open(&self, ca: &TestCa, raw: &[u8]) -> Reply {
        let envelope = self
            .codec
            .decode(raw, std::slice::from_ref(&ca.certificate))
            .expect("Failed to decode reply");
        let status = envelope.status.expect("Reply carries no status");
        let certificates = if status == PkiStatus::Success {
            match self
                .codec
                .decrypt(&envelope, &self.signer_cert, &self.key)
                .expect("Failed to decrypt reply")
            {
                Payload::Certificates(certs) => certs,
                other => panic!("Unexpected payload: {other:?}"),
            }
        } else {
            Vec::new()
        };
        Reply {
            status,
            fail_info: envelope.fail_info,
            certificates,
        }
    }
}
