//! SCEP transport trait and `reqwest`-backed implementation.

use std::future::Future;
use std::pin::Pin;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use reqwest::header::CONTENT_TYPE;
use scep_proto::{content_type, Capabilities, Operation, MAX_PAYLOAD_SIZE};
use tokio::sync::OnceCell;
use url::Url;

use crate::error::TransportError;

/// Boxed future returned by dyn-compatible async trait methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Bytes of an HTTP error body kept for the error message.
pub const ERROR_BODY_LIMIT: usize = 4096;

/// A `GetCACert` answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaCertsResponse {
    pub body: Vec<u8>,
    /// The body is a degenerate bundle rather than one DER certificate.
    pub bundle: bool,
}

/// The HTTP operations an enrollment needs.
pub trait ScepTransport: Send + Sync {
    fn get_ca_caps<'a>(&'a self) -> BoxFuture<'a, Result<Capabilities, TransportError>>;

    fn get_ca_certs<'a>(
        &'a self,
        message: &'a str,
    ) -> BoxFuture<'a, Result<CaCertsResponse, TransportError>>;

    /// Send a raw envelope; returns the raw reply.
    fn pki_operation<'a>(&'a self, raw: &'a [u8])
        -> BoxFuture<'a, Result<Vec<u8>, TransportError>>;
}

/// HTTP transport. Capabilities are fetched once and decide whether
/// `PKIOperation` goes out as a POST body or a base64 GET parameter.
#[derive(Debug)]
pub struct HttpTransport {
    url: Url,
    http: reqwest::Client,
    caps: OnceCell<Capabilities>,
}

impl HttpTransport {
    pub fn new(url: Url) -> Result<Self, TransportError> {
        if !matches!(url.scheme(), "http" | "https") {
            return Err(TransportError::Url(format!(
                "unsupported scheme {:?}",
                url.scheme()
            )));
        }
        Ok(Self {
            url,
            http: reqwest::Client::new(),
            caps: OnceCell::new(),
        })
    }

    async fn capabilities(&self) -> Result<&Capabilities, TransportError> {
        self.caps
            .get_or_try_init(|| async {
                let body = self.get(Operation::GetCaCaps, None).await?.0;
                let caps = Capabilities::parse(&String::from_utf8_lossy(&body));
                tracing::debug!(caps = ?caps.iter().collect::<Vec<_>>(), "Server capabilities");
                Ok::<_, TransportError>(caps)
            })
            .await
    }

    /// GET with `operation` and optional `message`; returns body and
    /// content type.
    async fn get(
        &self,
        operation: Operation,
        message: Option<&str>,
    ) -> Result<(Vec<u8>, Option<String>), TransportError> {
        let mut request = self
            .http
            .get(self.url.clone())
            .query(&[("operation", operation.as_str())]);
        if let Some(message) = message {
            request = request.query(&[("message", message)]);
        }
        tracing::debug!(operation = %operation, "GET");
        read_response(request.send().await?).await
    }

    async fn post(&self, operation: Operation, body: &[u8]) -> Result<Vec<u8>, TransportError> {
        tracing::debug!(operation = %operation, bytes = body.len(), "POST");
        let response = self
            .http
            .post(self.url.clone())
            .query(&[("operation", operation.as_str())])
            .header(CONTENT_TYPE, content_type::PKI_MESSAGE)
            .body(body.to_vec())
            .send()
            .await?;
        Ok(read_response(response).await?.0)
    }
}

/// Read at most `MAX_PAYLOAD_SIZE` bytes; map HTTP errors to
/// `TransportError::Status` with the start of the body.
async fn read_response(
    mut response: reqwest::Response,
) -> Result<(Vec<u8>, Option<String>), TransportError> {
    let status = response.status();
    let mime = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let limit = if status.is_client_error() || status.is_server_error() {
        ERROR_BODY_LIMIT
    } else {
        MAX_PAYLOAD_SIZE
    };

    let mut body = Vec::new();
    while let Some(chunk) = response.chunk().await? {
        if body.len() + chunk.len() > limit {
            if limit == ERROR_BODY_LIMIT {
                body.extend_from_slice(&chunk[..limit - body.len()]);
                break;
            }
            return Err(TransportError::TooLarge { limit });
        }
        body.extend_from_slice(&chunk);
    }

    if limit == ERROR_BODY_LIMIT {
        return Err(TransportError::Status {
            status: status.as_u16(),
            body: String::from_utf8_lossy(&body).into_owned(),
        });
    }
    Ok((body, mime))
}

impl ScepTransport for HttpTransport {
    fn get_ca_caps<'a>(&'a self) -> BoxFuture<'a, Result<Capabilities, TransportError>> {
        Box::pin(async move { self.capabilities().await.cloned() })
    }

    fn get_ca_certs<'a>(
        &'a self,
        message: &'a str,
    ) -> BoxFuture<'a, Result<CaCertsResponse, TransportError>> {
        Box::pin(async move {
            let message = (!message.is_empty()).then_some(message);
            let (body, mime) = self.get(Operation::GetCaCert, message).await?;
            let bundle = mime
                .as_deref()
                .is_some_and(|ct| ct.starts_with(content_type::CA_RA_CERT));
            Ok(CaCertsResponse { body, bundle })
        })
    }

    fn pki_operation<'a>(
        &'a self,
        raw: &'a [u8],
    ) -> BoxFuture<'a, Result<Vec<u8>, TransportError>> {
        Box::pin(async move {
            if self.capabilities().await?.supports_post() {
                self.post(Operation::PkiOperation, raw).await
            } else {
                let message = STANDARD.encode(raw);
                Ok(self.get(Operation::PkiOperation, Some(&message)).await?.0)
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_non_http_scheme() {
        let url = Url::parse("ftp://example.com/scep").unwrap();
        assert!(matches!(HttpTransport::new(url), Err(TransportError::Url(_))));
    }

    #[test]
    fn test_accepts_https() {
        let url = Url::parse("https://ca.example.com/api/v1/scep").unwrap();
        assert!(HttpTransport::new(url).is_ok());
    }
}
