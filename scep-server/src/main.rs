//! SCEP Server - certificate enrollment front-end for a file-backed CA
//!
//! Serves GetCACaps, GetCACert, PKIOperation and GetNextCACert over HTTP and
//! can bootstrap a CA into an empty depot.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand};
use scep_pki::selfsigned::{build_self_signed, SelfSignedParams};
use scep_pki::{CertificateInfo, PrivateKey};
use scep_proto::{CaType, Capabilities};
use scep_server::config::{LogFormat, ServerConfig};
use scep_server::http::build_router;
use scep_server::{FileDepot, SigningConfig};
use tokio::net::TcpListener;
use tokio::signal;
use tracing_subscriber::EnvFilter;
use zeroize::Zeroizing;

// ============================================================================
// CLI Definition
// ============================================================================

/// SCEP Server - certificate enrollment service
#[derive(Parser)]
#[command(name = "scep-server", version, about)]
struct Cli {
    /// Depot directory holding the CA, serial counter and ledger
    #[arg(long, env = "SCEP_DEPOT", default_value = "depot", global = true)]
    depot: PathBuf,

    /// Log output format
    #[arg(long, env = "SCEP_LOG_FORMAT", value_enum, default_value_t = LogFormat::Text, global = true)]
    log_format: LogFormat,

    /// Enable debug logging (overridden by RUST_LOG)
    #[arg(long, env = "SCEP_DEBUG", global = true)]
    debug: bool,

    #[command(flatten)]
    serve: ServeArgs,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the server (default if no command given)
    Serve,

    /// CA management
    Ca {
        #[command(subcommand)]
        action: CaAction,
    },
}

#[derive(Args)]
struct ServeArgs {
    /// Address to listen on
    #[arg(long, env = "SCEP_LISTEN", default_value = "0.0.0.0:8000")]
    listen: SocketAddr,

    /// Passphrase of an encrypted CA key
    #[arg(long, env = "SCEP_CA_PASS", hide_env_values = true)]
    ca_pass: Option<String>,

    /// CA used to sign PKIOperation requests (RSA, ECC, SM2)
    #[arg(long, env = "SCEP_CA_TYPE", default_value = "RSA")]
    ca_type: CaType,

    /// Days before expiry within which a subject may be re-issued (0 disables the check)
    #[arg(long, env = "SCEP_ALLOW_RENEWAL", default_value_t = 14)]
    allow_renewal: u32,

    /// Days added on top of the ten-year base validity
    #[arg(long, env = "SCEP_CERT_VALID", default_value_t = 0)]
    validity_days: u32,

    /// Issue certificates with server-auth and encipherment usage
    #[arg(long, env = "SCEP_SERVER_ATTRS")]
    server_attrs: bool,

    /// Additional CA certificate files (PEM) returned by GetCACert
    #[arg(long = "additional-ca", env = "SCEP_ADDITIONAL_CA", value_delimiter = ',')]
    additional_ca: Vec<PathBuf>,

    /// Capabilities advertised by GetCACaps
    #[arg(long = "capability", env = "SCEP_CAPABILITIES", value_delimiter = ',')]
    capabilities: Vec<String>,
}

#[derive(Subcommand)]
enum CaAction {
    /// Create a self-signed CA in the depot
    Init {
        /// CA common name
        #[arg(long, default_value = "SCEP CA")]
        common_name: String,

        /// CA organization
        #[arg(long)]
        organization: Option<String>,

        /// Key family; RSA and ECC can be generated
        #[arg(long, default_value = "RSA")]
        ca_type: CaType,

        /// RSA key size in bits
        #[arg(long, default_value_t = 2048)]
        key_size: usize,

        /// CA certificate lifetime in days
        #[arg(long, default_value_t = 3650)]
        validity_days: u32,
    },
}

impl ServeArgs {
    fn into_config(self, depot_dir: PathBuf, log_format: LogFormat) -> ServerConfig {
        let capabilities = if self.capabilities.is_empty() {
            Capabilities::default()
        } else {
            Capabilities::new(self.capabilities)
        };
        ServerConfig {
            listen: self.listen,
            depot_dir,
            additional_ca_files: self.additional_ca,
            signing: SigningConfig {
                ca_passphrase: Zeroizing::new(self.ca_pass.unwrap_or_default().into_bytes()),
                ca_type: self.ca_type,
                allow_renewal_days: self.allow_renewal,
                validity_days: self.validity_days,
                server_attributes: self.server_attrs,
            },
            capabilities,
            log_format,
        }
    }
}

fn init_tracing(debug: bool, format: LogFormat) {
    let default = if debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_tracing(cli.debug, cli.log_format);

    let result = match cli.command {
        None | Some(Commands::Serve) => {
            cmd_serve(cli.serve.into_config(cli.depot, cli.log_format)).await
        }
        Some(Commands::Ca { action }) => match action {
            CaAction::Init {
                common_name,
                organization,
                ca_type,
                key_size,
                validity_days,
            } => cmd_ca_init(
                cli.depot,
                &common_name,
                organization,
                ca_type,
                key_size,
                validity_days,
            ),
        },
    };

    if let Err(e) = result {
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}

/// Start the HTTP server.
async fn cmd_serve(config: ServerConfig) -> anyhow::Result<()> {
    let dispatcher = config
        .build_dispatcher()
        .context("failed to initialize server")?;
    let app = build_router(Arc::new(dispatcher));

    let listener = TcpListener::bind(config.listen)
        .await
        .with_context(|| format!("failed to bind {}", config.listen))?;
    tracing::info!(addr = %config.listen, "SCEP server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    tracing::info!("Server shutdown complete");
    Ok(())
}

/// Write a new self-signed CA into the depot.
fn cmd_ca_init(
    depot_dir: PathBuf,
    common_name: &str,
    organization: Option<String>,
    ca_type: CaType,
    key_size: usize,
    validity_days: u32,
) -> anyhow::Result<()> {
    let key = match ca_type {
        CaType::Rsa => PrivateKey::generate_rsa(key_size)?,
        CaType::Ecc => PrivateKey::generate_ecdsa()?,
        CaType::Sm2 => bail!("SM2 keys cannot be generated; install one manually"),
    };
    let params = SelfSignedParams::certificate_authority(common_name, organization, validity_days);
    let certificate = build_self_signed(&key, &params)?;

    let depot = FileDepot::open(&depot_dir)
        .with_context(|| format!("failed to open depot {}", depot_dir.display()))?;
    depot
        .install_ca(ca_type, &certificate, &key)
        .context("failed to install CA")?;

    let info = CertificateInfo::from_der(&certificate)?;
    println!("CA Created");
    println!("==========");
    println!();
    println!("Type:    {ca_type}");
    println!("Subject: {}", info.distinguished_name());
    println!("Expires: {}", info.not_after);
    println!("Depot:   {}", depot.dir().display());
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl+C), initiating shutdown");
        }
        _ = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }
}
