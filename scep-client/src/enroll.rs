//! Enrollment flow.
//!
//! 1. Load or create the private key, certificate request and (without an
//!    existing certificate) a bootstrap self-signed signer
//! 2. Fetch the CA certificates and build one request envelope
//! 3. Submit it, resubmitting the identical bytes while the server answers
//!    `Pending`
//! 4. Store the issued certificate and drop the bootstrap signer

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use scep_pki::cert::{encode_pem_certificate, parse_pem_certificate};
use scep_pki::request::{self, build_csr};
use scep_pki::selfsigned::{build_self_signed, SelfSignedParams};
use scep_pki::{CertificateInfo, CsrInfo, PrivateKey};
use scep_proto::{
    EnvelopeCodec, FailInfo, IssuerAndSerial, MessageType, Payload, PkiStatus, RequestParams,
};

use crate::cancel::CancelSignal;
use crate::config::EnrollConfig;
use crate::error::EnrollError;
use crate::transport::ScepTransport;

const KEY_MODE: u32 = 0o600;
const PUBLIC_MODE: u32 = 0o644;

/// Read `path`, or create it exclusively from `make` when absent.
///
/// Returns the contents and whether the file was created.
fn load_or_create(
    path: &Path,
    mode: u32,
    make: impl FnOnce() -> Result<Vec<u8>, EnrollError>,
) -> Result<(Vec<u8>, bool), EnrollError> {
    match fs::read(path) {
        Ok(contents) => return Ok((contents, false)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(EnrollError::io(path, e)),
    }

    let contents = make()?;
    let mut options = OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(mode);
    }
    #[cfg(not(unix))]
    let _ = mode;

    match options.open(path) {
        Ok(mut file) => {
            file.write_all(&contents)
                .and_then(|()| file.sync_all())
                .map_err(|e| EnrollError::io(path, e))?;
            Ok((contents, true))
        }
        // Lost a race with another writer; theirs wins.
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => fs::read(path)
            .map(|contents| (contents, false))
            .map_err(|e| EnrollError::io(path, e)),
        Err(e) => Err(EnrollError::io(path, e)),
    }
}

/// Key, request and signer material for one run.
struct Identity {
    key: PrivateKey,
    /// Existing certificate; its presence makes the request a renewal.
    certificate: Option<Vec<u8>>,
    /// Bootstrap signer, when there is no certificate.
    bootstrap: Option<Vec<u8>>,
}

impl Identity {
    fn signer_cert(&self) -> Result<&[u8], EnrollError> {
        self.certificate
            .as_deref()
            .or(self.bootstrap.as_deref())
            .ok_or_else(|| EnrollError::Config("no signer certificate".to_string()))
    }
}

/// Client side of the SCEP enrollment.
pub struct EnrollmentClient {
    config: EnrollConfig,
    transport: Arc<dyn ScepTransport>,
    codec: Arc<dyn EnvelopeCodec>,
    cancel: CancelSignal,
}

impl EnrollmentClient {
    pub fn new(
        config: EnrollConfig,
        transport: Arc<dyn ScepTransport>,
        codec: Arc<dyn EnvelopeCodec>,
    ) -> Self {
        Self {
            config,
            transport,
            codec,
            cancel: CancelSignal::never(),
        }
    }

    /// Abort the pending wait when `signal` fires.
    #[must_use]
    pub fn with_cancel(mut self, signal: CancelSignal) -> Self {
        self.cancel = signal;
        self
    }

    #[must_use]
    pub fn config(&self) -> &EnrollConfig {
        &self.config
    }

    /// Enroll (or renew) and store the issued certificate. Returns its DER.
    pub async fn enroll(&self) -> Result<Vec<u8>, EnrollError> {
        let key = self.load_or_make_key()?;
        let csr = self.load_or_make_csr(&key)?;
        let certificate = self.load_certificate()?;
        let bootstrap = match certificate {
            Some(_) => None,
            None => {
                let organization = CsrInfo::from_der(&csr)?.subject.organization;
                Some(self.load_or_make_bootstrap(&key, organization)?)
            }
        };
        let identity = Identity {
            key,
            certificate,
            bootstrap,
        };

        let ca_certs = self.fetch_ca_certs().await?;
        let message_type = if identity.certificate.is_some() {
            MessageType::RenewalReq
        } else {
            MessageType::PkcsReq
        };
        let raw = self.build_request(
            &identity,
            &ca_certs,
            message_type,
            Payload::CertificateRequest(csr),
        )?;

        let issued = self.submit(&identity, &ca_certs, message_type, &raw).await?;
        self.finish(&identity, &issued)?;
        Ok(issued)
    }

    /// Fetch an issued certificate by issuer common name and hex serial.
    ///
    /// Always signs with a bootstrap certificate and never retries.
    pub async fn get_cert(&self, issuer: &str, serial: &str) -> Result<Vec<u8>, EnrollError> {
        let key = self.load_or_make_key()?;
        let organization = Some(self.config.subject.organization.clone()).filter(|o| !o.is_empty());
        let bootstrap = self.load_or_make_bootstrap(&key, organization)?;
        let identity = Identity {
            key,
            certificate: None,
            bootstrap: Some(bootstrap),
        };

        let ca_certs = self.fetch_ca_certs().await?;
        let payload = Payload::IssuerAndSerial(IssuerAndSerial {
            issuer: issuer.to_string(),
            serial: serial.to_string(),
        });
        let raw = self.build_request(&identity, &ca_certs, MessageType::GetCert, payload)?;

        let response = self.transport.pki_operation(&raw).await?;
        let reply = self.codec.decode(&response, &ca_certs)?;
        match reply.status {
            Some(PkiStatus::Success) => {}
            Some(PkiStatus::Failure) => {
                return Err(EnrollError::Failure {
                    message_type: MessageType::GetCert,
                    fail_info: reply.fail_info.unwrap_or(FailInfo::BadRequest),
                })
            }
            Some(PkiStatus::Pending) => {
                return Err(EnrollError::UnexpectedReply(
                    "GetCert answered with pending".to_string(),
                ))
            }
            None => return Err(EnrollError::UnexpectedReply("missing pkiStatus".to_string())),
        }

        let issued = self.open_certificate(&identity, &reply)?;
        self.finish(&identity, &issued)?;
        Ok(issued)
    }

    // ------------------------------------------------------------------
    // Init
    // ------------------------------------------------------------------

    fn load_or_make_key(&self) -> Result<PrivateKey, EnrollError> {
        let path = &self.config.key_path;
        let (pem, created) = load_or_create(path, KEY_MODE, || {
            let key = PrivateKey::generate_rsa(self.config.key_size)?;
            Ok(key.to_pem().as_bytes().to_vec())
        })?;
        if created {
            tracing::info!(path = %path.display(), bits = self.config.key_size, "Generated private key");
        }
        Ok(PrivateKey::from_pem(&pem, None)?)
    }

    fn load_or_make_csr(&self, key: &PrivateKey) -> Result<Vec<u8>, EnrollError> {
        let path = self.config.csr_path();
        let (pem, created) = load_or_create(&path, PUBLIC_MODE, || {
            let mut subject = self.config.subject.clone();
            subject.country = subject.country.to_uppercase();
            let der = build_csr(key, &subject)?;
            Ok(request::encode_pem(&der).into_bytes())
        })?;
        if created {
            tracing::info!(path = %path.display(), "Created certificate request");
        }
        Ok(request::decode_pem(&pem)?)
    }

    fn load_certificate(&self) -> Result<Option<Vec<u8>>, EnrollError> {
        let path = &self.config.cert_path;
        match fs::read(path) {
            Ok(pem) => Ok(Some(parse_pem_certificate(&pem)?)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(EnrollError::io(path, e)),
        }
    }

    fn load_or_make_bootstrap(
        &self,
        key: &PrivateKey,
        organization: Option<String>,
    ) -> Result<Vec<u8>, EnrollError> {
        let path = self.config.bootstrap_path();
        let (pem, created) = load_or_create(&path, PUBLIC_MODE, || {
            let der = build_self_signed(key, &SelfSignedParams::bootstrap(organization))?;
            Ok(encode_pem_certificate(&der).into_bytes())
        })?;
        if created {
            tracing::debug!(path = %path.display(), "Created bootstrap certificate");
        }
        Ok(parse_pem_certificate(&pem)?)
    }

    // ------------------------------------------------------------------
    // BuildRequest
    // ------------------------------------------------------------------

    async fn fetch_ca_certs(&self) -> Result<Vec<Vec<u8>>, EnrollError> {
        let response = self.transport.get_ca_certs(&self.config.ca_message).await?;
        let certs = if response.bundle {
            self.codec.parse_degenerate(&response.body)?
        } else {
            CertificateInfo::from_der(&response.body)?;
            vec![response.body]
        };
        tracing::debug!(count = certs.len(), "Fetched CA certificates");
        Ok(certs)
    }

    fn build_request(
        &self,
        identity: &Identity,
        ca_certs: &[Vec<u8>],
        message_type: MessageType,
        payload: Payload,
    ) -> Result<Vec<u8>, EnrollError> {
        let recipients = self.config.selector.select(ca_certs);
        if recipients.is_empty() {
            return Err(EnrollError::NoRecipients);
        }
        Ok(self.codec.build_request(RequestParams {
            message_type,
            payload: &payload,
            signer_cert: identity.signer_cert()?,
            signer_key: &identity.key,
            recipients: &recipients,
        })?)
    }

    // ------------------------------------------------------------------
    // Submit / PendingWait
    // ------------------------------------------------------------------

    async fn submit(
        &self,
        identity: &Identity,
        ca_certs: &[Vec<u8>],
        message_type: MessageType,
        raw: &[u8],
    ) -> Result<Vec<u8>, EnrollError> {
        let request = self.codec.decode(raw, &[])?;
        let retry = &self.config.retry;
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            let response = self.transport.pki_operation(raw).await?;
            let reply = self.codec.decode(&response, ca_certs)?;
            if reply.transaction_id != request.transaction_id {
                return Err(EnrollError::UnexpectedReply(
                    "transaction id mismatch".to_string(),
                ));
            }

            match reply.status {
                Some(PkiStatus::Success) => {
                    tracing::info!(status = "SUCCESS", attempt, "Server returned a certificate");
                    return self.open_certificate(identity, &reply);
                }
                Some(PkiStatus::Failure) => {
                    return Err(EnrollError::Failure {
                        message_type,
                        fail_info: reply.fail_info.unwrap_or(FailInfo::BadRequest),
                    });
                }
                Some(PkiStatus::Pending) => {
                    if retry.max_attempts.is_some_and(|max| attempt >= max) {
                        return Err(EnrollError::RetriesExhausted(attempt));
                    }
                    tracing::info!(
                        status = "PENDING",
                        attempt,
                        wait_secs = retry.interval.as_secs(),
                        "Request pending, waiting before resubmitting"
                    );
                    tokio::select! {
                        () = tokio::time::sleep(retry.interval) => {}
                        () = self.cancel.cancelled() => {
                            tracing::info!("Enrollment cancelled while pending");
                            return Err(EnrollError::Cancelled);
                        }
                    }
                }
                None => {
                    return Err(EnrollError::UnexpectedReply("missing pkiStatus".to_string()));
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Success
    // ------------------------------------------------------------------

    fn open_certificate(
        &self,
        identity: &Identity,
        reply: &scep_proto::Envelope,
    ) -> Result<Vec<u8>, EnrollError> {
        match self
            .codec
            .decrypt(reply, identity.signer_cert()?, &identity.key)?
        {
            Payload::Certificates(certs) => certs.into_iter().next().ok_or_else(|| {
                EnrollError::UnexpectedReply("reply carries no certificate".to_string())
            }),
            _ => Err(EnrollError::UnexpectedReply(
                "reply does not carry certificates".to_string(),
            )),
        }
    }

    /// Persist the issued certificate and remove a bootstrap signer.
    fn finish(&self, identity: &Identity, issued: &[u8]) -> Result<(), EnrollError> {
        let info = CertificateInfo::from_der(issued)?;
        let cert_path: &PathBuf = &self.config.cert_path;
        fs::write(cert_path, encode_pem_certificate(issued))
            .map_err(|e| EnrollError::io(cert_path, e))?;

        if identity.bootstrap.is_some() {
            let bootstrap = self.config.bootstrap_path();
            match fs::remove_file(&bootstrap) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(EnrollError::io(bootstrap, e)),
            }
        }

        tracing::info!(
            path = %cert_path.display(),
            subject = %info.distinguished_name(),
            serial = %info.serial_hex(),
            not_after = %info.not_after,
            "Stored certificate"
        );
        Ok(())
    }
}
