//! JSON-framed envelope codec.
//!
//! Frames carry the same attributes as a CMS SCEP message (message type,
//! transaction id, nonces, status, signer certificate, recipients) with the
//! content as base64 JSON. There is no signature and no encryption: the
//! frame only enforces *who* may open it (recipient fingerprints plus a
//! private key matching the recipient certificate). Deployments that need
//! confidentiality on the wire plug a CMS implementation of
//! [`EnvelopeCodec`] in its place.

use rand::RngCore;
use scep_pki::cert::{encode_pem_certificate, parse_pem_certificates};
use scep_pki::identity::{Fingerprint, PrivateKey};
use scep_pki::CertificateInfo;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::codec::{CodecError, Envelope, EnvelopeCodec, Payload, RequestParams};
use crate::message::{FailInfo, MessageType, PkiStatus};

const FRAME_VERSION: u8 = 1;
const NONCE_LEN: usize = 16;

pub(crate) mod b64 {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let text = String::deserialize(d)?;
        STANDARD.decode(text).map_err(serde::de::Error::custom)
    }
}

pub(crate) mod b64_opt {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &Option<Vec<u8>>, s: S) -> Result<S::Ok, S::Error> {
        match bytes {
            Some(bytes) => s.serialize_some(&STANDARD.encode(bytes)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Vec<u8>>, D::Error> {
        Option::<String>::deserialize(d)?
            .map(|text| STANDARD.decode(text).map_err(serde::de::Error::custom))
            .transpose()
    }
}

pub(crate) mod b64_list {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(items: &[Vec<u8>], s: S) -> Result<S::Ok, S::Error> {
        s.collect_seq(items.iter().map(|item| STANDARD.encode(item)))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<Vec<u8>>, D::Error> {
        Vec::<String>::deserialize(d)?
            .into_iter()
            .map(|text| STANDARD.decode(text).map_err(serde::de::Error::custom))
            .collect()
    }
}

#[derive(Serialize, Deserialize)]
struct Frame {
    version: u8,
    message_type: MessageType,
    transaction_id: String,
    #[serde(with = "b64")]
    sender_nonce: Vec<u8>,
    #[serde(default, with = "b64_opt")]
    recipient_nonce: Option<Vec<u8>>,
    #[serde(default)]
    status: Option<PkiStatus>,
    #[serde(default)]
    fail_info: Option<FailInfo>,
    #[serde(with = "b64")]
    signer_cert: Vec<u8>,
    recipients: Vec<String>,
    #[serde(default, with = "b64")]
    content: Vec<u8>,
}

/// The bundled [`EnvelopeCodec`].
#[derive(Debug, Clone, Copy, Default)]
pub struct FramedCodec;

impl FramedCodec {
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    fn nonce() -> Vec<u8> {
        let mut nonce = vec![0u8; NONCE_LEN];
        rand::rngs::OsRng.fill_bytes(&mut nonce);
        nonce
    }

    /// Fail unless `key` is the private half of `cert_der`.
    fn check_key(cert_der: &[u8], key: &PrivateKey) -> Result<CertificateInfo, CodecError> {
        let info = CertificateInfo::from_der(cert_der)?;
        if key.public_key_der()? != info.public_key_der {
            return Err(CodecError::KeyMismatch);
        }
        Ok(info)
    }

    fn encode(frame: &Frame) -> Result<Vec<u8>, CodecError> {
        serde_json::to_vec(frame).map_err(|e| CodecError::Malformed(e.to_string()))
    }

    fn reply(
        request: &Envelope,
        ca_cert: &[u8],
        ca_key: &PrivateKey,
        status: PkiStatus,
        fail_info: Option<FailInfo>,
        payload: Option<&Payload>,
    ) -> Result<Vec<u8>, CodecError> {
        Self::check_key(ca_cert, ca_key)?;
        let content = match payload {
            Some(payload) => {
                serde_json::to_vec(payload).map_err(|e| CodecError::Malformed(e.to_string()))?
            }
            None => Vec::new(),
        };

        Self::encode(&Frame {
            version: FRAME_VERSION,
            message_type: MessageType::CertRep,
            transaction_id: request.transaction_id.clone(),
            sender_nonce: Self::nonce(),
            recipient_nonce: Some(request.sender_nonce.clone()),
            status: Some(status),
            fail_info,
            signer_cert: ca_cert.to_vec(),
            recipients: vec![Fingerprint::of_der(&request.signer_cert).to_string()],
            content,
        })
    }
}

impl EnvelopeCodec for FramedCodec {
    fn decode(&self, raw: &[u8], trusted: &[Vec<u8>]) -> Result<Envelope, CodecError> {
        let frame: Frame =
            serde_json::from_slice(raw).map_err(|e| CodecError::Malformed(e.to_string()))?;
        if frame.version != FRAME_VERSION {
            return Err(CodecError::UnsupportedVersion(frame.version));
        }
        CertificateInfo::from_der(&frame.signer_cert)?;
        if !trusted.is_empty() && !trusted.iter().any(|t| *t == frame.signer_cert) {
            return Err(CodecError::UntrustedSigner);
        }
        let recipients = frame
            .recipients
            .iter()
            .map(|r| Fingerprint::parse(r))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|_| CodecError::Malformed("bad recipient fingerprint".to_string()))?;

        Ok(Envelope {
            message_type: frame.message_type,
            transaction_id: frame.transaction_id,
            sender_nonce: frame.sender_nonce,
            recipient_nonce: frame.recipient_nonce,
            status: frame.status,
            fail_info: frame.fail_info,
            signer_cert: frame.signer_cert,
            recipients,
            sealed: frame.content,
            raw: raw.to_vec(),
        })
    }

    fn decrypt(
        &self,
        envelope: &Envelope,
        cert_der: &[u8],
        key: &PrivateKey,
    ) -> Result<Payload, CodecError> {
        if !envelope.recipients.contains(&Fingerprint::of_der(cert_der)) {
            return Err(CodecError::NotRecipient);
        }
        Self::check_key(cert_der, key)?;
        if envelope.sealed.is_empty() {
            return Err(CodecError::MissingContent);
        }
        serde_json::from_slice(&envelope.sealed).map_err(|e| CodecError::Malformed(e.to_string()))
    }

    fn build_request(&self, params: RequestParams<'_>) -> Result<Vec<u8>, CodecError> {
        let payload_fits = match params.payload {
            Payload::CertificateRequest(_) => params.message_type.carries_csr(),
            Payload::IssuerAndSerial(_) => params.message_type == MessageType::GetCert,
            Payload::Certificates(_) => false,
        };
        if !payload_fits {
            return Err(CodecError::UnexpectedPayload(params.message_type));
        }
        if params.recipients.is_empty() {
            return Err(CodecError::NoRecipients);
        }
        let signer = Self::check_key(params.signer_cert, params.signer_key)?;
        let content = serde_json::to_vec(params.payload)
            .map_err(|e| CodecError::Malformed(e.to_string()))?;

        Self::encode(&Frame {
            version: FRAME_VERSION,
            message_type: params.message_type,
            transaction_id: hex::encode(Sha256::digest(&signer.public_key_der)),
            sender_nonce: Self::nonce(),
            recipient_nonce: None,
            status: None,
            fail_info: None,
            signer_cert: params.signer_cert.to_vec(),
            recipients: params
                .recipients
                .iter()
                .map(|r| Fingerprint::of_der(r).to_string())
                .collect(),
            content,
        })
    }

    fn build_success(
        &self,
        request: &Envelope,
        ca_cert: &[u8],
        ca_key: &PrivateKey,
        issued: &[u8],
    ) -> Result<Vec<u8>, CodecError> {
        let payload = Payload::Certificates(vec![issued.to_vec()]);
        Self::reply(request, ca_cert, ca_key, PkiStatus::Success, None, Some(&payload))
    }

    fn build_failure(
        &self,
        request: &Envelope,
        ca_cert: &[u8],
        ca_key: &PrivateKey,
        reason: FailInfo,
    ) -> Result<Vec<u8>, CodecError> {
        Self::reply(request, ca_cert, ca_key, PkiStatus::Failure, Some(reason), None)
    }

    fn build_pending(
        &self,
        request: &Envelope,
        ca_cert: &[u8],
        ca_key: &PrivateKey,
    ) -> Result<Vec<u8>, CodecError> {
        Self::reply(request, ca_cert, ca_key, PkiStatus::Pending, None, None)
    }

    fn degenerate(&self, certs: &[Vec<u8>]) -> Result<Vec<u8>, CodecError> {
        if certs.is_empty() {
            return Err(CodecError::MissingContent);
        }
        Ok(certs
            .iter()
            .map(|der| encode_pem_certificate(der))
            .collect::<String>()
            .into_bytes())
    }

    fn parse_degenerate(&self, raw: &[u8]) -> Result<Vec<Vec<u8>>, CodecError> {
        Ok(parse_pem_certificates(raw)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::IssuerAndSerial;
    use scep_pki::selfsigned::{build_self_signed, SelfSignedParams};

    struct Party {
        cert: Vec<u8>,
        key: PrivateKey,
    }

    fn party(ca: bool) -> Party {
        let key = PrivateKey::generate_ecdsa().unwrap();
        let params = if ca {
            SelfSignedParams::certificate_authority("Test CA", None, 30)
        } else {
            SelfSignedParams::bootstrap(None)
        };
        Party {
            cert: build_self_signed(&key, &params).unwrap(),
            key,
        }
    }

    fn request(codec: &FramedCodec, client: &Party, ca: &Party) -> Vec<u8> {
        codec
            .build_request(RequestParams {
                message_type: MessageType::PkcsReq,
                payload: &Payload::CertificateRequest(b"csr".to_vec()),
                signer_cert: &client.cert,
                signer_key: &client.key,
                recipients: std::slice::from_ref(&ca.cert),
            })
            .unwrap()
    }

    #[test]
    fn test_request_decode_and_decrypt() {
        let codec = FramedCodec::new();
        let (client, ca) = (party(false), party(true));
        let raw = request(&codec, &client, &ca);

        let env = codec.decode(&raw, &[]).unwrap();
        assert_eq!(env.message_type, MessageType::PkcsReq);
        assert_eq!(env.signer_cert, client.cert);
        assert_eq!(env.raw, raw);
        assert_eq!(env.transaction_id.len(), 64);

        let payload = codec.decrypt(&env, &ca.cert, &ca.key).unwrap();
        assert_eq!(payload, Payload::CertificateRequest(b"csr".to_vec()));
    }

    #[test]
    fn test_decrypt_rejects_non_recipient_and_wrong_key() {
        let codec = FramedCodec::new();
        let (client, ca, other) = (party(false), party(true), party(true));
        let env = codec.decode(&request(&codec, &client, &ca), &[]).unwrap();

        assert!(matches!(
            codec.decrypt(&env, &other.cert, &other.key),
            Err(CodecError::NotRecipient)
        ));
        assert!(matches!(
            codec.decrypt(&env, &ca.cert, &other.key),
            Err(CodecError::KeyMismatch)
        ));
    }

    #[test]
    fn test_payload_must_match_message_type() {
        let codec = FramedCodec::new();
        let (client, ca) = (party(false), party(true));
        let payload = Payload::IssuerAndSerial(IssuerAndSerial {
            issuer: "Test CA".into(),
            serial: "02".into(),
        });
        let result = codec.build_request(RequestParams {
            message_type: MessageType::PkcsReq,
            payload: &payload,
            signer_cert: &client.cert,
            signer_key: &client.key,
            recipients: std::slice::from_ref(&ca.cert),
        });
        assert!(matches!(result, Err(CodecError::UnexpectedPayload(_))));

        let result = codec.build_request(RequestParams {
            message_type: MessageType::GetCert,
            payload: &payload,
            signer_cert: &client.cert,
            signer_key: &client.key,
            recipients: &[],
        });
        assert!(matches!(result, Err(CodecError::NoRecipients)));
    }

    #[test]
    fn test_success_reply_is_trusted_and_sealed_to_client() {
        let codec = FramedCodec::new();
        let (client, ca) = (party(false), party(true));
        let req = codec.decode(&request(&codec, &client, &ca), &[]).unwrap();

        let reply = codec.build_success(&req, &ca.cert, &ca.key, b"issued").unwrap();
        let env = codec.decode(&reply, std::slice::from_ref(&ca.cert)).unwrap();
        assert_eq!(env.status, Some(PkiStatus::Success));
        assert_eq!(env.transaction_id, req.transaction_id);
        assert_eq!(env.recipient_nonce.as_deref(), Some(req.sender_nonce.as_slice()));
        assert_eq!(
            codec.decrypt(&env, &client.cert, &client.key).unwrap(),
            Payload::Certificates(vec![b"issued".to_vec()])
        );

        assert!(matches!(
            codec.decode(&reply, std::slice::from_ref(&client.cert)),
            Err(CodecError::UntrustedSigner)
        ));
    }

    #[test]
    fn test_failure_and_pending_replies() {
        let codec = FramedCodec::new();
        let (client, ca) = (party(false), party(true));
        let req = codec.decode(&request(&codec, &client, &ca), &[]).unwrap();

        let failure = codec
            .build_failure(&req, &ca.cert, &ca.key, FailInfo::BadRequest)
            .unwrap();
        let env = codec.decode(&failure, &[]).unwrap();
        assert_eq!(env.status, Some(PkiStatus::Failure));
        assert_eq!(env.fail_info, Some(FailInfo::BadRequest));

        let pending = codec.build_pending(&req, &ca.cert, &ca.key).unwrap();
        let env = codec.decode(&pending, &[]).unwrap();
        assert_eq!(env.status, Some(PkiStatus::Pending));
        assert!(matches!(
            codec.decrypt(&env, &client.cert, &client.key),
            Err(CodecError::MissingContent)
        ));
    }

    #[test]
    fn test_degenerate_bundle() {
        let codec = FramedCodec::new();
        let certs = vec![party(true).cert, party(true).cert];
        let bundle = codec.degenerate(&certs).unwrap();
        assert_eq!(codec.parse_degenerate(&bundle).unwrap(), certs);
        assert!(codec.degenerate(&[]).is_err());
    }

    #[test]
    fn test_garbage_is_malformed() {
        let codec = FramedCodec::new();
        assert!(matches!(
            codec.decode(b"\x30\x82garbage", &[]),
            Err(CodecError::Malformed(_))
        ));
    }
}
