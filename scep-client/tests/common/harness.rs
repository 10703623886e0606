//! Test harness: a real SCEP server on a loopback port backed by a
//! temporary depot, and a client workspace with a pre-generated key.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use scep_client::{EnrollConfig, EnrollmentClient, HttpTransport};
use scep_pki::selfsigned::{build_self_signed, SelfSignedParams};
use scep_pki::PrivateKey;
use scep_proto::{CaType, Capabilities, FramedCodec, DEFAULT_PATH};
use scep_server::http::build_router;
use scep_server::{FileDepot, ServerConfig};
use tokio::net::TcpListener;

pub const CA_COMMON_NAME: &str = "Loopback CA";

/// A running server. The depot lives as long as this value.
pub struct TestServer {
    _depot: tempfile::TempDir,
    pub ca_certificate: Vec<u8>,
    pub url: String,
}

impl TestServer {
    pub async fn start() -> Self {
        Self::start_with(|_| {}).await
    }

    /// Start with a configuration tweak applied on top of the defaults.
    pub async fn start_with(tweak: impl FnOnce(&mut ServerConfig)) -> Self {
        let depot = tempfile::tempdir().expect("Failed to create temp dir");
        let key = PrivateKey::generate_ecdsa().expect("Failed to generate CA key");
        let ca_certificate = build_self_signed(
            &key,
            &SelfSignedParams::certificate_authority(CA_COMMON_NAME, None, 3650),
        )
        .expect("Failed to build CA certificate");
        FileDepot::open(depot.path())
            .expect("Failed to open depot")
            .install_ca(CaType::Rsa, &ca_certificate, &key)
            .expect("Failed to install CA");

        let mut config = ServerConfig {
            depot_dir: depot.path().to_path_buf(),
            ..Default::default()
        };
        tweak(&mut config);
        let dispatcher = config
            .build_dispatcher()
            .expect("Failed to build dispatcher");

        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind loopback");
        let addr = listener.local_addr().expect("No local address");
        tokio::spawn(async move {
            axum::serve(listener, build_router(Arc::new(dispatcher)))
                .await
                .ok();
        });

        Self {
            _depot: depot,
            ca_certificate,
            url: format!("http://{addr}{DEFAULT_PATH}"),
        }
    }

    /// A server that only advertises GET for PKIOperation.
    pub async fn start_get_only() -> Self {
        Self::start_with(|config| {
            config.capabilities = Capabilities::new(["SHA-256", "AES"]);
        })
        .await
    }
}

/// A device directory holding `client.key`.
pub struct Device {
    dir: tempfile::TempDir,
}

impl Device {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        // ECDSA keeps key generation out of the test's time budget.
        let key = PrivateKey::generate_ecdsa().expect("Failed to generate device key");
        std::fs::write(dir.path().join("client.key"), key.to_pem().as_bytes())
            .expect("Failed to write device key");
        Self { dir }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn file(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    pub fn config(&self, server: &TestServer, common_name: &str) -> EnrollConfig {
        let mut config = EnrollConfig::new(&server.url, self.file("client.key"))
            .expect("Failed to build enroll config");
        config.subject.common_name = common_name.to_string();
        config.subject.organization = "Loopback".to_string();
        config.subject.country = "us".to_string();
        config
    }

    pub fn client(&self, config: EnrollConfig) -> EnrollmentClient {
        let transport =
            HttpTransport::new(config.server_url.clone()).expect("Failed to build transport");
        EnrollmentClient::new(config, Arc::new(transport), Arc::new(FramedCodec::new()))
    }
}
