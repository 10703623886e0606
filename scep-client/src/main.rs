//! SCEP Client - enroll for a certificate or fetch one by serial

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use scep_pki::CsrSubject;
use scep_proto::FramedCodec;
use scep_client::config::{selector_from_flags, DEFAULT_KEY_SIZE, DEFAULT_SERVER_URL};
use scep_client::{Canceller, EnrollConfig, EnrollmentClient, HttpTransport};
use tracing_subscriber::EnvFilter;

// ============================================================================
// CLI Definition
// ============================================================================

/// SCEP Client - certificate enrollment
#[derive(Parser)]
#[command(name = "scep-client", version, about)]
struct Cli {
    /// SCEP server URL
    #[arg(long, env = "SCEP_SERVER_URL", default_value = DEFAULT_SERVER_URL, global = true)]
    server_url: String,

    /// Private key file; created when missing
    #[arg(long, env = "SCEP_PRIVATE_KEY", global = true)]
    private_key: Option<PathBuf>,

    /// Where the issued certificate is written (default: client.pem next to the key)
    #[arg(long, env = "SCEP_CERTIFICATE", global = true)]
    certificate: Option<PathBuf>,

    /// RSA key size for a new key
    #[arg(long, env = "SCEP_KEY_SIZE", default_value_t = DEFAULT_KEY_SIZE, global = true)]
    key_size: usize,

    #[arg(long, env = "SCEP_ORGANIZATION", default_value = "scep-client", global = true)]
    organization: String,

    #[arg(long, env = "SCEP_COMMON_NAME", default_value = "", global = true)]
    common_name: String,

    #[arg(long, env = "SCEP_OU", default_value = "MDM", global = true)]
    organizational_unit: String,

    #[arg(long, env = "SCEP_LOCALITY", default_value = "", global = true)]
    locality: String,

    #[arg(long, env = "SCEP_PROVINCE", default_value = "", global = true)]
    province: String,

    #[arg(long, env = "SCEP_COUNTRY", default_value = "US", global = true)]
    country: String,

    /// DNS subject alternative name
    #[arg(long, env = "SCEP_DNS_NAME", default_value = "", global = true)]
    dns_name: String,

    /// GetCACert message naming the CA type (RSA, ECC, SM2)
    #[arg(long, env = "SCEP_CA_MESSAGE", default_value = "", global = true)]
    ca_cert_message: String,

    /// SHA-256 fingerprint of the CA certificate to encrypt to
    #[arg(
        long,
        env = "SCEP_CA_FINGERPRINT",
        conflicts_with = "key_encipherment_selector",
        global = true
    )]
    ca_fingerprint: Option<String>,

    /// Encrypt only to CA certificates allowing key encipherment
    #[arg(long, env = "SCEP_KEY_ENCIPHERMENT_SELECTOR", global = true)]
    key_encipherment_selector: bool,

    /// Give up after this many pending answers
    #[arg(long, env = "SCEP_MAX_ATTEMPTS", global = true)]
    max_attempts: Option<u32>,

    /// Enable debug logging (overridden by RUST_LOG)
    #[arg(long, env = "SCEP_DEBUG", global = true)]
    debug: bool,

    #[arg(long, env = "SCEP_LOG_FORMAT", value_enum, default_value_t = LogFormat::Text, global = true)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Enroll or renew (default if no command given)
    Enroll,

    /// Fetch an issued certificate by issuer and serial
    Get {
        /// Issuer common name
        #[arg(long)]
        issuer: String,

        /// Serial as recorded in the ledger (upper-case, even-length hex, e.g. 02)
        #[arg(long)]
        serial: String,
    },
}

impl Cli {
    fn enroll_config(&self) -> anyhow::Result<EnrollConfig> {
        let key_path = self
            .private_key
            .clone()
            .context("--private-key is required")?;
        let mut config = EnrollConfig::new(&self.server_url, key_path)?;
        if let Some(cert_path) = &self.certificate {
            config.cert_path.clone_from(cert_path);
        }
        config.key_size = self.key_size;
        config.subject = CsrSubject {
            common_name: self.common_name.clone(),
            organization: self.organization.clone(),
            organizational_unit: self.organizational_unit.clone(),
            country: self.country.clone(),
            province: self.province.clone(),
            locality: self.locality.clone(),
            dns_name: self.dns_name.clone(),
        };
        config.ca_message.clone_from(&self.ca_cert_message);
        config.selector = selector_from_flags(
            self.ca_fingerprint.as_deref(),
            self.key_encipherment_selector,
        )?;
        config.retry.max_attempts = self.max_attempts;
        Ok(config)
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

    if let Err(e) = run(cli).await {
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = cli.enroll_config()?;
    let transport = HttpTransport::new(config.server_url.clone())?;

    let canceller = Canceller::new();
    let client = EnrollmentClient::new(config, Arc::new(transport), Arc::new(FramedCodec::new()))
        .with_cancel(canceller.signal());
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Received SIGINT (Ctrl+C), cancelling");
            canceller.cancel();
        }
    });

    match cli.command {
        None | Some(Commands::Enroll) => {
            client.enroll().await.context("enrollment failed")?;
        }
        Some(Commands::Get { issuer, serial }) => {
            client
                .get_cert(&issuer, &serial)
                .await
                .with_context(|| format!("GetCert {issuer}/{serial} failed"))?;
        }
    }

    println!("{}", client.config().cert_path.display());
    Ok(())
}
