//! axum routes for the SCEP endpoint.
//!
//! `GET ?operation=..&message=..` serves every operation; `POST
//! ?operation=PKIOperation` carries the raw envelope as the body.

use std::sync::Arc;
use std::time::Instant;

use axum::body::Bytes;
use axum::extract::{DefaultBodyLimit, Query, State};
use axum::http::{header, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use base64::engine::general_purpose::{STANDARD, URL_SAFE, URL_SAFE_NO_PAD};
use base64::Engine;
use scep_proto::{content_type, Operation, DEFAULT_PATH, MAX_PAYLOAD_SIZE};
use serde::Deserialize;

use crate::dispatcher::{CaCertResponse, Dispatcher};
use crate::error::ScepError;

/// Short alias for the endpoint.
pub const ALIAS_PATH: &str = "/scep";

#[derive(Debug, Default, Deserialize)]
pub struct ScepQuery {
    pub operation: Option<String>,
    pub message: Option<String>,
}

/// A successful answer.
struct Reply {
    content_type: &'static str,
    body: Vec<u8>,
}

impl From<CaCertResponse> for Reply {
    fn from(resp: CaCertResponse) -> Self {
        Self {
            content_type: resp.content_type(),
            body: resp.body,
        }
    }
}

impl IntoResponse for Reply {
    fn into_response(self) -> Response {
        ([(header::CONTENT_TYPE, self.content_type)], self.body).into_response()
    }
}

/// HTTP status for a dispatcher error.
#[must_use]
pub fn status_for(error: &ScepError) -> StatusCode {
    match error {
        ScepError::Policy(_)
        | ScepError::Protocol(_)
        | ScepError::InvalidInput(_)
        | ScepError::NotFound => StatusCode::BAD_REQUEST,
        ScepError::NotImplemented => StatusCode::NOT_IMPLEMENTED,
        ScepError::Storage(_) | ScepError::Config(_) | ScepError::Crypto(_) | ScepError::Internal(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

pub fn build_router(dispatcher: Arc<Dispatcher>) -> Router {
    Router::new()
        .route(DEFAULT_PATH, get(handle_get).post(handle_post))
        .route(ALIAS_PATH, get(handle_get).post(handle_post))
        .layer(DefaultBodyLimit::max(MAX_PAYLOAD_SIZE))
        .with_state(dispatcher)
}

async fn handle_get(
    State(dispatcher): State<Arc<Dispatcher>>,
    uri: Uri,
    Query(query): Query<ScepQuery>,
) -> Response {
    let started = Instant::now();
    let operation = query.operation.clone().unwrap_or_default();
    let result = serve_get(dispatcher, query).await;
    finish(Method::GET, &uri, &operation, started, result)
}

async fn handle_post(
    State(dispatcher): State<Arc<Dispatcher>>,
    uri: Uri,
    Query(query): Query<ScepQuery>,
    body: Bytes,
) -> Response {
    let started = Instant::now();
    let operation = query.operation.clone().unwrap_or_default();
    let result = serve_post(dispatcher, query, body).await;
    finish(Method::POST, &uri, &operation, started, result)
}

fn parse_operation(query: &ScepQuery) -> Result<Operation, ScepError> {
    let operation = query
        .operation
        .as_deref()
        .filter(|op| !op.is_empty())
        .ok_or_else(|| ScepError::Protocol("missing operation".to_string()))?;
    Ok(operation.parse()?)
}

async fn serve_get(dispatcher: Arc<Dispatcher>, query: ScepQuery) -> Result<Reply, ScepError> {
    let operation = parse_operation(&query)?;
    let message = match query.message {
        Some(message) => message,
        None if operation.message_optional() => String::new(),
        None => return Err(ScepError::Protocol("missing message".to_string())),
    };

    match operation {
        Operation::GetCaCaps => Ok(Reply {
            content_type: content_type::TEXT_PLAIN,
            body: dispatcher.get_ca_caps().into_bytes(),
        }),
        Operation::GetCaCert => {
            let resp = blocking(dispatcher, move |d| d.get_ca_cert(&message)).await?;
            Ok(resp.into())
        }
        Operation::PkiOperation => {
            let raw = decode_message(&message)?;
            pki_operation(dispatcher, raw).await
        }
        Operation::GetNextCaCert => Ok(dispatcher.get_next_ca_cert()?.into()),
    }
}

async fn serve_post(
    dispatcher: Arc<Dispatcher>,
    query: ScepQuery,
    body: Bytes,
) -> Result<Reply, ScepError> {
    match parse_operation(&query)? {
        Operation::PkiOperation => pki_operation(dispatcher, body.to_vec()).await,
        other => Err(ScepError::Protocol(format!("{other} is not allowed over POST"))),
    }
}

async fn pki_operation(dispatcher: Arc<Dispatcher>, raw: Vec<u8>) -> Result<Reply, ScepError> {
    if raw.is_empty() {
        return Err(ScepError::Protocol("missing message".to_string()));
    }
    let body = blocking(dispatcher, move |d| d.pki_operation(&raw)).await?;
    Ok(Reply {
        content_type: content_type::PKI_MESSAGE,
        body,
    })
}

/// Base64 `message` of a GET `PKIOperation`, standard or URL-safe alphabet.
pub fn decode_message(message: &str) -> Result<Vec<u8>, ScepError> {
    let message = message.trim();
    STANDARD
        .decode(message)
        .or_else(|_| URL_SAFE.decode(message))
        .or_else(|_| URL_SAFE_NO_PAD.decode(message))
        .map_err(|_| ScepError::InvalidInput("message is not valid base64".to_string()))
}

/// Depot and signing work touches the filesystem; keep it off the runtime.
async fn blocking<T, F>(dispatcher: Arc<Dispatcher>, f: F) -> Result<T, ScepError>
where
    T: Send + 'static,
    F: FnOnce(&Dispatcher) -> Result<T, ScepError> + Send + 'static,
{
    tokio::task::spawn_blocking(move || f(&dispatcher))
        .await
        .map_err(|e| ScepError::Internal(e.to_string()))?
}

fn finish(
    method: Method,
    uri: &Uri,
    operation: &str,
    started: Instant,
    result: Result<Reply, ScepError>,
) -> Response {
    let elapsed_ms = started.elapsed().as_millis() as u64;
    match result {
        Ok(reply) => {
            tracing::info!(
                method = %method,
                path = %uri.path(),
                operation = %operation,
                status = 200,
                elapsed_ms,
                "SCEP request"
            );
            reply.into_response()
        }
        Err(e) => {
            let status = status_for(&e);
            if status.is_server_error() {
                tracing::error!(
                    method = %method,
                    path = %uri.path(),
                    operation = %operation,
                    status = status.as_u16(),
                    elapsed_ms,
                    error = %e,
                    "SCEP request failed"
                );
            } else {
                tracing::info!(
                    method = %method,
                    path = %uri.path(),
                    operation = %operation,
                    status = status.as_u16(),
                    elapsed_ms,
                    error = %e,
                    "SCEP request rejected"
                );
            }
            (
                status,
                [(header::CONTENT_TYPE, content_type::TEXT_PLAIN)],
                e.to_string(),
            )
                .into_response()
        }
    }
}
