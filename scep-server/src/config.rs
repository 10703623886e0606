//! Server configuration, assembled once at startup.

use std::fs;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;

use scep_pki::cert::parse_pem_certificates;
use scep_pki::CertError;
use scep_proto::{Capabilities, FramedCodec};

use crate::depot::FileDepot;
use crate::dispatcher::Dispatcher;
use crate::error::StorageError;
use crate::signer::SigningConfig;

pub const DEFAULT_PORT: u16 = 8000;

/// Upper bound on `validity_days`, roughly a century.
pub const MAX_VALIDITY_DAYS: u32 = 36_500;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("validity days must not exceed {MAX_VALIDITY_DAYS}, got {0}")]
    ValidityTooLong(u32),

    #[error("capability list is empty")]
    NoCapabilities,

    #[error("additional CA {}: {source}", path.display())]
    AdditionalCaIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("additional CA {}: {source}", path.display())]
    AdditionalCa {
        path: PathBuf,
        #[source]
        source: CertError,
    },

    #[error("depot: {0}")]
    Depot(#[from] StorageError),
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub listen: SocketAddr,
    pub depot_dir: PathBuf,
    /// PEM files whose certificates are appended to `GetCACert`.
    pub additional_ca_files: Vec<PathBuf>,
    pub signing: SigningConfig,
    pub capabilities: Capabilities,
    pub log_format: LogFormat,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from((Ipv4Addr::UNSPECIFIED, DEFAULT_PORT)),
            depot_dir: PathBuf::from("depot"),
            additional_ca_files: Vec::new(),
            signing: SigningConfig::default(),
            capabilities: Capabilities::default(),
            log_format: LogFormat::default(),
        }
    }
}

impl ServerConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.signing.validity_days > MAX_VALIDITY_DAYS {
            return Err(ConfigError::ValidityTooLong(self.signing.validity_days));
        }
        if self.capabilities.iter().next().is_none() {
            return Err(ConfigError::NoCapabilities);
        }
        Ok(())
    }

    /// Read every certificate from the additional CA files, in order.
    pub fn load_additional_cas(&self) -> Result<Vec<Vec<u8>>, ConfigError> {
        let mut certs = Vec::new();
        for path in &self.additional_ca_files {
            let pem = fs::read(path).map_err(|source| ConfigError::AdditionalCaIo {
                path: path.clone(),
                source,
            })?;
            let found = parse_pem_certificates(&pem).map_err(|source| ConfigError::AdditionalCa {
                path: path.clone(),
                source,
            })?;
            certs.extend(found);
        }
        Ok(certs)
    }

    /// Validate, open the depot and wire up a dispatcher with the bundled
    /// codec.
    pub fn build_dispatcher(&self) -> Result<Dispatcher, ConfigError> {
        self.validate()?;
        let additional_cas = self.load_additional_cas()?;
        let depot = FileDepot::open(&self.depot_dir)?;
        tracing::info!(
            path = %depot.dir().display(),
            ca_type = %self.signing.ca_type,
            additional_cas = additional_cas.len(),
            "Depot opened"
        );
        Ok(Dispatcher::new(
            Arc::new(depot),
            Arc::new(FramedCodec::new()),
            self.signing.clone(),
            self.capabilities.clone(),
            additional_cas,
        ))
    }
}
