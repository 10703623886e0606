//! Protocol operations, independent of the HTTP layer.

use std::sync::Arc;

use scep_proto::{
    content_type, CaType, Capabilities, EnvelopeCodec, FailInfo, MessageType, Payload,
};

use crate::depot::{CaIdentity, CertificateDepot};
use crate::error::ScepError;
use crate::signer::{SigningConfig, SigningPolicy};

/// Body of a `GetCACert` answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaCertResponse {
    /// Raw DER for one certificate, a degenerate bundle otherwise.
    pub body: Vec<u8>,
    /// Number of certificates carried.
    pub count: usize,
}

impl CaCertResponse {
    #[must_use]
    pub fn content_type(&self) -> &'static str {
        content_type::for_ca_certs(self.count)
    }
}

/// Stateless router from protocol operations to the signer and depot.
pub struct Dispatcher {
    depot: Arc<dyn CertificateDepot>,
    codec: Arc<dyn EnvelopeCodec>,
    signer: SigningPolicy,
    capabilities: Capabilities,
    /// DER certificates appended to `GetCACert` answers.
    additional_cas: Vec<Vec<u8>>,
}

impl Dispatcher {
    pub fn new(
        depot: Arc<dyn CertificateDepot>,
        codec: Arc<dyn EnvelopeCodec>,
        signing: SigningConfig,
        capabilities: Capabilities,
        additional_cas: Vec<Vec<u8>>,
    ) -> Self {
        Self {
            signer: SigningPolicy::new(depot.clone(), signing),
            depot,
            codec,
            capabilities,
            additional_cas,
        }
    }

    /// `GetCACaps`.
    #[must_use]
    pub fn get_ca_caps(&self) -> String {
        self.capabilities.to_text()
    }

    /// `GetCACert`. `message` names the CA type; empty means RSA.
    pub fn get_ca_cert(&self, message: &str) -> Result<CaCertResponse, ScepError> {
        let ca_type = CaType::from_message(message)?;
        let ca = self
            .depot
            .load_ca(&self.signer.config().ca_passphrase, ca_type)?;

        if self.additional_cas.is_empty() {
            return Ok(CaCertResponse {
                body: ca.certificate,
                count: 1,
            });
        }

        let mut chain = Vec::with_capacity(1 + self.additional_cas.len());
        chain.push(ca.certificate);
        chain.extend(self.additional_cas.iter().cloned());
        Ok(CaCertResponse {
            body: self.codec.degenerate(&chain)?,
            count: chain.len(),
        })
    }

    /// `PKIOperation`.
    ///
    /// Decode and decrypt failures are returned as errors. Everything after
    /// that produces a reply envelope; signing failures become a generic
    /// `BadRequest` failure with the cause only logged.
    pub fn pki_operation(&self, raw: &[u8]) -> Result<Vec<u8>, ScepError> {
        let ca = self.signer.load_ca()?;
        let request = self.codec.decode(raw, &[])?;
        let payload = self.codec.decrypt(&request, &ca.certificate, &ca.key)?;

        tracing::info!(
            message_type = %request.message_type,
            transaction_id = %request.transaction_id,
            "PKIOperation"
        );

        let reply = match (request.message_type, payload) {
            (message_type, Payload::CertificateRequest(csr)) if message_type.carries_csr() => {
                match self.signer.sign(&ca, &csr) {
                    Ok(issued) => {
                        self.codec
                            .build_success(&request, &ca.certificate, &ca.key, &issued)?
                    }
                    Err(e) => {
                        tracing::warn!(
                            error = %e,
                            transaction_id = %request.transaction_id,
                            "Signing failed"
                        );
                        self.fail(&request, &ca, FailInfo::BadRequest)?
                    }
                }
            }
            (MessageType::GetCert, Payload::IssuerAndSerial(id)) => {
                match self.depot.find(&id.issuer, &id.serial) {
                    Ok(cert) => self
                        .codec
                        .build_success(&request, &ca.certificate, &ca.key, &cert)?,
                    Err(ScepError::NotFound) => {
                        tracing::info!(issuer = %id.issuer, serial = %id.serial, "GetCert: not found");
                        self.fail(&request, &ca, FailInfo::BadCertId)?
                    }
                    Err(e) => return Err(e),
                }
            }
            (message_type, _) => {
                tracing::warn!(message_type = %message_type, "Unsupported PKI message");
                self.fail(&request, &ca, FailInfo::BadRequest)?
            }
        };
        Ok(reply)
    }

    /// `GetNextCACert`.
    pub fn get_next_ca_cert(&self) -> Result<CaCertResponse, ScepError> {
        Err(ScepError::NotImplemented)
    }

    fn fail(
        &self,
        request: &scep_proto::Envelope,
        ca: &CaIdentity,
        reason: FailInfo,
    ) -> Result<Vec<u8>, ScepError> {
        Ok(self
            .codec
            .build_failure(request, &ca.certificate, &ca.key, reason)?)
    }
}
