//! Shared fixtures for the wiremock-backed integration tests.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde_json::{json, Value};
use url::Url;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

use gettokens::error::AuthorizationError;
use gettokens::oidc::authorizer::AuthorizationRequest;
use gettokens::oidc::session::{Session, SessionSettings};
use gettokens::oidc::transport::{HttpClient, ReqwestHttpClient};
use gettokens::oidc::user_agent::{UserAgent, UserAgentOutcome};

#[allow(dead_code)]
pub const CLIENT_ID: &str = "client-1";
#[allow(dead_code)]
pub const REDIRECT_URI: &str = "com.example.app:/callback";

/// A complete provider document rooted at `base`.
#[allow(dead_code)]
pub fn provider_document(base: &str) -> Value {
    json!({
        "issuer": base,
        "authorization_endpoint": format!("{base}/authorize"),
        "token_endpoint": format!("{base}/token"),
        "registration_endpoint": format!("{base}/register"),
        "userinfo_endpoint": format!("{base}/userinfo"),
        "jwks_uri": format!("{base}/jwks"),
        "response_types_supported": ["code", "code id_token"],
        "subject_types_supported": ["public"],
        "id_token_signing_alg_values_supported": ["RS256"],
        "code_challenge_methods_supported": ["S256"],
        "dpop_signing_alg_values_supported": ["RS256"]
    })
}

#[allow(dead_code)]
pub async fn mount_discovery(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/.well-known/openid-configuration"))
        .respond_with(ResponseTemplate::new(200).set_body_json(provider_document(&server.uri())))
        .mount(server)
        .await;
}

#[allow(dead_code)]
pub async fn mount_registration(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/register"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "client_id": CLIENT_ID,
            "client_id_issued_at": 1_700_000_000,
            "token_endpoint_auth_method": "none"
        })))
        .mount(server)
        .await;
}

#[allow(dead_code)]
pub fn http_client() -> Arc<dyn HttpClient> {
    Arc::new(ReqwestHttpClient::new(Duration::from_secs(5)).expect("build http client"))
}

#[allow(dead_code)]
pub fn session() -> Session {
    let settings = SessionSettings::new("integration", Url::parse(REDIRECT_URI).unwrap());
    Session::new(http_client(), settings)
}

/// Unsigned compact JWT; signatures are never checked client-side.
#[allow(dead_code)]
pub fn unsigned_jwt(claims: &Value) -> String {
    format!(
        "{}.{}.",
        URL_SAFE_NO_PAD.encode(br#"{"alg":"RS256","typ":"JWT"}"#),
        URL_SAFE_NO_PAD.encode(claims.to_string())
    )
}

/// The nonce of the most recent authorization request.
pub type NonceSlot = Arc<Mutex<Option<String>>>;

/// Approves every authorization with code `the-code`, remembering the nonce.
#[derive(Debug, Default)]
pub struct ApprovingAgent {
    pub nonce: NonceSlot,
}

#[async_trait]
impl UserAgent for ApprovingAgent {
    async fn present(
        &self,
        _authorization_url: &Url,
        request: &AuthorizationRequest,
    ) -> Result<UserAgentOutcome, AuthorizationError> {
        *self.nonce.lock().unwrap() = Some(request.nonce().to_string());
        let mut callback = request.redirect_uri().clone();
        callback
            .query_pairs_mut()
            .append_pair("code", "the-code")
            .append_pair("state", request.state());
        Ok(UserAgentOutcome::Callback(callback))
    }
}

/// Token endpoint double.
///
/// Answers the code grant with `at-1` plus an ID Token echoing the captured
/// nonce, and the refresh grant with `at-2` and no refresh token.
#[allow(dead_code)]
pub struct TokenEndpoint {
    pub issuer: String,
    pub nonce: NonceSlot,
    pub expires_in: i64,
    pub nonce_override: Option<String>,
}

#[allow(dead_code)]
impl TokenEndpoint {
    pub fn new(issuer: &str, nonce: NonceSlot) -> Self {
        Self {
            issuer: issuer.to_string(),
            nonce,
            expires_in: 3600,
            nonce_override: None,
        }
    }
}

impl Respond for TokenEndpoint {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let body = String::from_utf8_lossy(&request.body);
        if body.contains("grant_type=refresh_token") {
            return ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "at-2",
                "token_type": "DPoP",
                "expires_in": 3600
            }));
        }

        let nonce = self
            .nonce_override
            .clone()
            .or_else(|| self.nonce.lock().unwrap().clone());
        let now = chrono::Utc::now().timestamp();
        let id_token = unsigned_jwt(&json!({
            "iss": self.issuer,
            "sub": "user-1",
            "aud": CLIENT_ID,
            "exp": now + 300,
            "iat": now,
            "nonce": nonce,
        }));
        ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "at-1",
            "token_type": "DPoP",
            "expires_in": self.expires_in,
            "refresh_token": "rt-1",
            "id_token": id_token
        }))
    }
}
