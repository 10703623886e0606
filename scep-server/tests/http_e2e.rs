//! End-to-end tests for the HTTP surface.
//!
//! Routes are driven in-process through `axum_test::TestServer` against a
//! real file depot in a temp directory.

mod common;

use axum::body::Bytes;
use axum::http::StatusCode;
use axum_test::TestServer;
use base64::engine::general_purpose::URL_SAFE;
use base64::Engine;
use common::{TestCa, TestClient, CA_COMMON_NAME};
use scep_pki::cert::encode_pem_certificate;
use scep_pki::CertificateInfo;
use scep_proto::{content_type, EnvelopeCodec, FailInfo, FramedCodec, PkiStatus, DEFAULT_PATH};
use scep_server::http::build_router;

fn server(ca: &TestCa) -> TestServer {
    TestServer::new(build_router(ca.dispatcher())).unwrap()
}

// ============================================================================
// GetCACaps / GetCACert / GetNextCACert
// ============================================================================

#[tokio::test]
async fn test_get_ca_caps() {
    let ca = TestCa::new();
    let response = server(&ca)
        .get(DEFAULT_PATH)
        .add_query_param("operation", "GetCACaps")
        .await;

    assert_eq!(response.status_code(), StatusCode::OK);
    assert_eq!(response.header("content-type"), content_type::TEXT_PLAIN);
    let caps: Vec<String> = response.text().lines().map(str::to_string).collect();
    assert!(caps.contains(&"POSTPKIOperation".to_string()));
    assert!(caps.contains(&"SCEPStandard".to_string()));
}

#[tokio::test]
async fn test_get_ca_cert_single() {
    let ca = TestCa::new();
    let response = server(&ca)
        .get(DEFAULT_PATH)
        .add_query_param("operation", "GetCACert")
        .await;

    assert_eq!(response.status_code(), StatusCode::OK);
    assert_eq!(response.header("content-type"), content_type::CA_CERT);
    assert_eq!(response.as_bytes().to_vec(), ca.certificate);
}

#[tokio::test]
async fn test_get_ca_cert_with_additional_ca() {
    let ca = TestCa::new();
    let other = TestCa::new();
    let extra = ca.depot_dir().join("extra.pem");
    std::fs::write(&extra, encode_pem_certificate(&other.certificate)).unwrap();

    let mut config = ca.config();
    config.additional_ca_files = vec![extra];
    let server = TestServer::new(build_router(ca.dispatcher_with(config))).unwrap();

    let response = server
        .get(DEFAULT_PATH)
        .add_query_param("operation", "GetCACert")
        .add_query_param("message", "RSA")
        .await;

    assert_eq!(response.status_code(), StatusCode::OK);
    assert_eq!(response.header("content-type"), content_type::CA_RA_CERT);
    let certs = FramedCodec::new()
        .parse_degenerate(response.as_bytes())
        .unwrap();
    assert_eq!(certs, vec![ca.certificate.clone(), other.certificate.clone()]);
}

#[tokio::test]
async fn test_alias_route() {
    let ca = TestCa::new();
    let response = server(&ca)
        .get("/scep")
        .add_query_param("operation", "GetCACert")
        .await;
    assert_eq!(response.status_code(), StatusCode::OK);
}

#[tokio::test]
async fn test_get_ca_cert_unknown_type() {
    let ca = TestCa::new();
    let response = server(&ca)
        .get(DEFAULT_PATH)
        .add_query_param("operation", "GetCACert")
        .add_query_param("message", "DSA")
        .await;
    assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);
    assert_eq!(response.text(), "unsupported CA type");
}

#[tokio::test]
async fn test_get_ca_cert_missing_ca_is_server_error() {
    let ca = TestCa::new();
    let response = server(&ca)
        .get(DEFAULT_PATH)
        .add_query_param("operation", "GetCACert")
        .add_query_param("message", "ECC")
        .await;
    assert_eq!(response.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    assert!(response.text().starts_with("missing CA certificate"));
}

#[tokio::test]
async fn test_get_next_ca_cert_not_implemented() {
    let ca = TestCa::new();
    let response = server(&ca)
        .get(DEFAULT_PATH)
        .add_query_param("operation", "GetNextCACert")
        .add_query_param("message", "x")
        .await;
    assert_eq!(response.status_code(), StatusCode::NOT_IMPLEMENTED);
}

// ============================================================================
// Request validation
// ============================================================================

#[tokio::test]
async fn test_missing_and_unknown_operation() {
    let ca = TestCa::new();
    let server = server(&ca);

    let response = server.get(DEFAULT_PATH).await;
    assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);
    assert_eq!(response.text(), "missing operation");

    let response = server
        .get(DEFAULT_PATH)
        .add_query_param("operation", "GetCRL")
        .await;
    assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);
    assert_eq!(response.text(), "unsupported operation");
}

#[tokio::test]
async fn test_pki_operation_get_requires_message() {
    let ca = TestCa::new();
    let response = server(&ca)
        .get(DEFAULT_PATH)
        .add_query_param("operation", "PKIOperation")
        .await;
    assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);
    assert_eq!(response.text(), "missing message");
}

#[tokio::test]
async fn test_post_only_allows_pki_operation() {
    let ca = TestCa::new();
    let response = server(&ca)
        .post(DEFAULT_PATH)
        .add_query_param("operation", "GetCACaps")
        .bytes(Bytes::from_static(b"ignored"))
        .await;
    assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_post_garbage_envelope() {
    let ca = TestCa::new();
    let response = server(&ca)
        .post(DEFAULT_PATH)
        .add_query_param("operation", "PKIOperation")
        .bytes(Bytes::from_static(b"not an envelope"))
        .await;
    assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);
}

// ============================================================================
// PKIOperation
// ============================================================================

#[tokio::test]
async fn test_enroll_over_post() {
    let ca = TestCa::new();
    let client = TestClient::new();
    let raw = client.enrollment_request(&ca, "device-post");

    let response = server(&ca)
        .post(DEFAULT_PATH)
        .add_query_param("operation", "PKIOperation")
        .bytes(Bytes::from(raw))
        .await;

    assert_eq!(response.status_code(), StatusCode::OK);
    assert_eq!(response.header("content-type"), content_type::PKI_MESSAGE);

    let reply = client.open(&ca, response.as_bytes());
    assert_eq!(reply.status, PkiStatus::Success);
    let info = CertificateInfo::from_der(&reply.certificates[0]).unwrap();
    assert_eq!(info.issuer_common_name, CA_COMMON_NAME);
    assert_eq!(info.common_name(), Some("device-post"));
    assert_eq!(info.serial_hex(), "02");
}

#[tokio::test]
async fn test_enroll_over_get_with_url_safe_base64() {
    let ca = TestCa::new();
    let client = TestClient::new();
    let raw = client.enrollment_request(&ca, "device-get");

    let response = server(&ca)
        .get(DEFAULT_PATH)
        .add_query_param("operation", "PKIOperation")
        .add_query_param("message", URL_SAFE.encode(&raw))
        .await;

    assert_eq!(response.status_code(), StatusCode::OK);
    let reply = client.open(&ca, response.as_bytes());
    assert_eq!(reply.status, PkiStatus::Success);
    assert_eq!(reply.certificates.len(), 1);
}

#[tokio::test]
async fn test_duplicate_subject_gets_failure_envelope() {
    let ca = TestCa::new();
    let client = TestClient::new();
    let mut config = ca.config();
    config.signing.allow_renewal_days = 14;
    let server = TestServer::new(build_router(ca.dispatcher_with(config))).unwrap();

    for expected in [PkiStatus::Success, PkiStatus::Failure] {
        let response = server
            .post(DEFAULT_PATH)
            .add_query_param("operation", "PKIOperation")
            .bytes(Bytes::from(client.enrollment_request(&ca, "device-dup")))
            .await;
        assert_eq!(response.status_code(), StatusCode::OK);
        let reply = client.open(&ca, response.as_bytes());
        assert_eq!(reply.status, expected);
        if expected == PkiStatus::Failure {
            assert_eq!(reply.fail_info, Some(FailInfo::BadRequest));
        }
    }
}
