//! Dynamic client registration integration tests using wiremock

mod common;

use serde_json::json;
use url::Url;
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use gettokens::error::{RegistrationError, SessionError};
use gettokens::oidc::discovery::DiscoveryClient;
use gettokens::oidc::registration::{RegistrationClient, RegistrationRequest};
use gettokens::oidc::session::{Session, SessionSettings};

fn redirect_uris() -> Vec<Url> {
    vec![Url::parse(common::REDIRECT_URI).unwrap()]
}

#[tokio::test]
async fn test_register_posts_native_client_metadata() {
    let server = MockServer::start().await;
    common::mount_discovery(&server).await;
    Mock::given(method("POST"))
        .and(path("/register"))
        .and(header("Content-Type", "application/json"))
        .and(body_json(json!({
            "redirect_uris": [common::REDIRECT_URI],
            "application_type": "native",
            "response_types": ["code"],
            "grant_types": ["authorization_code", "refresh_token"],
            "token_endpoint_auth_method": "none",
            "client_name": "integration"
        })))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "client_id": "client-1",
            "client_id_issued_at": 1_700_000_000,
            "client_secret_expires_at": 0,
            "software_id": "gettokens"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let http = common::http_client();
    let configuration = DiscoveryClient::new(http.clone())
        .discover(&server.uri())
        .await
        .unwrap();
    let result = RegistrationClient::new(http)
        .register(&configuration, redirect_uris(), "integration")
        .await
        .unwrap();

    assert_eq!(result.client_id, "client-1");
    assert_eq!(result.client_id_issued_at.unwrap().timestamp(), 1_700_000_000);
    assert!(result.client_secret.is_none());
    assert!(result.client_secret_expires_at.is_none());
    assert_eq!(result.extra.get("software_id"), Some(&json!("gettokens")));
}

#[tokio::test]
async fn test_register_sends_initial_access_token() {
    let server = MockServer::start().await;
    common::mount_discovery(&server).await;
    Mock::given(method("POST"))
        .and(path("/register"))
        .and(header("Authorization", "Bearer iat-secret"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({"client_id": "client-1"})))
        .expect(1)
        .mount(&server)
        .await;

    let http = common::http_client();
    let configuration = DiscoveryClient::new(http.clone())
        .discover(&server.uri())
        .await
        .unwrap();
    let request =
        RegistrationRequest::new(redirect_uris(), "integration").with_initial_access_token("iat-secret");
    let result = RegistrationClient::new(http)
        .register_with(&configuration, request)
        .await
        .unwrap();
    assert_eq!(result.client_id, "client-1");
}

#[tokio::test]
async fn test_register_surfaces_rejection() {
    let server = MockServer::start().await;
    common::mount_discovery(&server).await;
    Mock::given(method("POST"))
        .and(path("/register"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": "invalid_redirect_uri"
        })))
        .mount(&server)
        .await;

    let session = common::session();
    session.discover(&server.uri()).await.unwrap();
    let err = session.register().await.unwrap_err();
    match err {
        SessionError::Registration(RegistrationError::HttpStatus { status, body, .. }) => {
            assert_eq!(status, 400);
            assert!(body.contains("invalid_redirect_uri"));
        }
        other => panic!("expected registration HttpStatus, got {other:?}"),
    }
    assert!(session.snapshot().await.registration().is_none());
}

#[tokio::test]
async fn test_register_rejects_unpaired_management_fields() {
    let server = MockServer::start().await;
    common::mount_discovery(&server).await;
    Mock::given(method("POST"))
        .and(path("/register"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "client_id": "client-1",
            "registration_access_token": "rat"
        })))
        .mount(&server)
        .await;

    let session = common::session();
    session.discover(&server.uri()).await.unwrap();
    let err = session.register().await.unwrap_err();
    assert!(matches!(
        err,
        SessionError::Registration(RegistrationError::Invariant {
            has_client_uri: false,
            has_access_token: true
        })
    ));
}

#[tokio::test]
async fn test_session_register_uses_configured_initial_access_token() {
    let server = MockServer::start().await;
    common::mount_discovery(&server).await;
    Mock::given(method("POST"))
        .and(path("/register"))
        .and(header("Authorization", "Bearer from-settings"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({"client_id": "client-1"})))
        .expect(1)
        .mount(&server)
        .await;

    let mut settings = SessionSettings::new("integration", redirect_uris().remove(0));
    settings.initial_access_token = Some("from-settings".to_string());
    let session = Session::new(common::http_client(), settings);
    session.discover(&server.uri()).await.unwrap();
    let registration = session.register().await.unwrap();
    assert_eq!(registration.client_id, "client-1");
}

#[tokio::test]
async fn test_register_without_endpoint_sends_nothing() {
    let server = MockServer::start().await;
    let mut document = common::provider_document(&server.uri());
    document
        .as_object_mut()
        .unwrap()
        .remove("registration_endpoint");
    Mock::given(method("GET"))
        .and(path("/.well-known/openid-configuration"))
        .respond_with(ResponseTemplate::new(200).set_body_json(document))
        .mount(&server)
        .await;

    let session = common::session();
    session.discover(&server.uri()).await.unwrap();
    let err = session.register().await.unwrap_err();
    assert!(matches!(
        err,
        SessionError::Registration(RegistrationError::MissingEndpoint { .. })
    ));
    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 1);
}
