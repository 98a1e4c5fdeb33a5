//! Protected resource access
//!
//! [`ProtectedResourceClient`] presents a DPoP-bound access token to a
//! resource server, refreshing it first when it is stale.  The same key
//! pair signs the refresh proof and the resource proof, so the refreshed
//! token stays bound to the key the caller already holds.

use std::sync::Arc;

use chrono::{Duration, Utc};
use serde_json::Value;
use url::Url;

use crate::error::ResourceError;
use crate::oidc::discovery::ProviderConfiguration;
use crate::oidc::dpop::{DpopKeyPair, DpopProofFactory};
use crate::oidc::redact;
use crate::oidc::token::{TokenExchanger, TokenRequest, TokenResponse};
use crate::oidc::transport::{HttpClient, HttpMethod, HttpRequest};

/// Default margin before `expires_at` at which a token counts as expired.
pub const DEFAULT_REFRESH_LEEWAY_SECONDS: i64 = 60;

/// The client identity and refresh policy for one resource call.
#[derive(Debug, Clone, Copy)]
pub struct RefreshPolicy<'a> {
    pub client_id: &'a str,
    pub client_secret: Option<&'a str>,
    /// Refresh even if the token has not expired.
    pub force: bool,
}

/// Calls protected endpoints with DPoP-bound access tokens.
///
/// Refreshing and calling are separate steps so the caller can store
/// refreshed tokens before the resource answers.
#[derive(Debug, Clone)]
pub struct ProtectedResourceClient {
    http: Arc<dyn HttpClient>,
    dpop: DpopProofFactory,
    exchanger: TokenExchanger,
    refresh_leeway: Duration,
}

impl ProtectedResourceClient {
    pub fn new(http: Arc<dyn HttpClient>, dpop: DpopProofFactory, exchanger: TokenExchanger) -> Self {
        Self {
            http,
            dpop,
            exchanger,
            refresh_leeway: Duration::seconds(DEFAULT_REFRESH_LEEWAY_SECONDS),
        }
    }

    /// Sets how long before expiry a token is refreshed.
    pub fn with_refresh_leeway(mut self, leeway: Duration) -> Self {
        self.refresh_leeway = leeway;
        self
    }

    pub fn refresh_leeway(&self) -> Duration {
        self.refresh_leeway
    }

    /// Redeems the refresh token when `tokens` are expired or
    /// `policy.force` is set, signing the proof with `key_pair`.
    ///
    /// Returns `None` when the current tokens are still usable.  A response
    /// without a `refresh_token` keeps the previous one.
    ///
    /// # Errors
    ///
    /// - [`ResourceError::RefreshUnavailable`] if a refresh is needed but no
    ///   refresh token exists
    /// - [`ResourceError::Refresh`] if the token endpoint rejects the refresh
    ///   or returns an ID Token that fails validation
    pub async fn refresh_if_needed(
        &self,
        configuration: &Arc<ProviderConfiguration>,
        tokens: &TokenResponse,
        key_pair: &DpopKeyPair,
        policy: RefreshPolicy<'_>,
    ) -> Result<Option<TokenResponse>, ResourceError> {
        if !policy.force && !tokens.is_expired(Utc::now(), self.refresh_leeway) {
            return Ok(None);
        }
        self.refresh(configuration, tokens, key_pair, policy)
            .await
            .map(Some)
    }

    /// The provider's userinfo endpoint.
    ///
    /// # Errors
    ///
    /// Returns [`ResourceError::MissingEndpoint`] if the provider has none.
    pub fn userinfo_endpoint(configuration: &ProviderConfiguration) -> Result<Url, ResourceError> {
        configuration
            .userinfo_endpoint()
            .cloned()
            .ok_or_else(|| ResourceError::MissingEndpoint {
                issuer: configuration.issuer().to_string(),
            })
    }

    /// Fetches the provider's UserInfo claims with `access_token`.
    ///
    /// # Errors
    ///
    /// Returns [`ResourceError::MissingEndpoint`] if the provider has no
    /// userinfo endpoint, otherwise see [`ProtectedResourceClient::get_json`].
    pub async fn fetch_user_info(
        &self,
        configuration: &ProviderConfiguration,
        access_token: &str,
        key_pair: &DpopKeyPair,
    ) -> Result<Value, ResourceError> {
        let endpoint = Self::userinfo_endpoint(configuration)?;
        self.get_json(&endpoint, access_token, key_pair).await
    }

    /// Issues an authenticated `GET` to `url` and parses the JSON body.
    ///
    /// # Errors
    ///
    /// - [`ResourceError::Dpop`] / [`ResourceError::Network`] for proof or
    ///   transport failures
    /// - [`ResourceError::HttpStatus`] for any status other than `200`
    /// - [`ResourceError::Json`] for a non-JSON body
    pub async fn get_json(
        &self,
        url: &Url,
        access_token: &str,
        key_pair: &DpopKeyPair,
    ) -> Result<Value, ResourceError> {
        let (proof, _) = self.dpop.mint(HttpMethod::Get, url, Some(key_pair))?;
        let request = HttpRequest::get(url.clone())
            .with_header("Accept", "application/json")
            .with_header("Authorization", format!("DPoP {access_token}"))
            .with_header("DPoP", proof);

        tracing::debug!(url = %url, access_token = %redact(access_token), "calling protected resource");
        let response = self.http.send(request).await?;

        if response.status != 200 {
            tracing::warn!(url = %url, status = response.status, "protected resource rejected request");
            return Err(ResourceError::HttpStatus {
                url: url.to_string(),
                status: response.status,
                body: response.text(),
            });
        }

        let body = serde_json::from_slice(&response.body).map_err(|e| ResourceError::Json {
            url: url.to_string(),
            message: e.to_string(),
        })?;
        tracing::info!(url = %url, "fetched protected resource");
        Ok(body)
    }

    async fn refresh(
        &self,
        configuration: &Arc<ProviderConfiguration>,
        tokens: &TokenResponse,
        key_pair: &DpopKeyPair,
        policy: RefreshPolicy<'_>,
    ) -> Result<TokenResponse, ResourceError> {
        let refresh_token = tokens
            .refresh_token
            .as_deref()
            .ok_or(ResourceError::RefreshUnavailable)?;
        tracing::info!("access token stale; refreshing");

        let request = TokenRequest::refresh(
            Arc::clone(configuration),
            refresh_token,
            policy.client_id,
            policy.client_secret.map(str::to_string),
            None,
        )
        .with_key_pair(key_pair.clone());

        let (mut refreshed, _) = self
            .exchanger
            .exchange(&request)
            .await
            .map_err(ResourceError::Refresh)?;
        if refreshed.refresh_token.is_none() {
            refreshed.refresh_token = Some(refresh_token.to_string());
        }
        Ok(refreshed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{IdTokenRule, TokenError};
    use crate::oidc::id_token::unsigned_jwt;
    use crate::oidc::transport::fake::FakeHttpClient;
    use crate::oidc::transport::HttpResponse;
    use serde_json::json;
    use std::sync::OnceLock;

    fn key() -> DpopKeyPair {
        static KEY: OnceLock<DpopKeyPair> = OnceLock::new();
        KEY.get_or_init(|| DpopKeyPair::generate().unwrap()).clone()
    }

    fn configuration(with_userinfo: bool) -> Arc<ProviderConfiguration> {
        let mut document = json!({
            "issuer": "https://op.example",
            "authorization_endpoint": "https://op.example/auth",
            "token_endpoint": "https://op.example/token",
            "jwks_uri": "https://op.example/jwks",
            "response_types_supported": ["code"],
            "subject_types_supported": ["public"],
            "id_token_signing_alg_values_supported": ["RS256"]
        });
        if with_userinfo {
            document["userinfo_endpoint"] = json!("https://op.example/userinfo");
        }
        Arc::new(ProviderConfiguration::from_json("t", document.to_string().as_bytes()).unwrap())
    }

    fn tokens(body: Value) -> TokenResponse {
        TokenResponse::from_json(body.to_string().as_bytes(), Utc::now()).unwrap()
    }

    fn client(fake: &FakeHttpClient) -> ProtectedResourceClient {
        let http: Arc<dyn HttpClient> = Arc::new(fake.clone());
        let dpop = DpopProofFactory::default();
        ProtectedResourceClient::new(Arc::clone(&http), dpop.clone(), TokenExchanger::new(http, dpop))
    }

    fn policy(force: bool) -> RefreshPolicy<'static> {
        RefreshPolicy {
            client_id: "client-1",
            client_secret: None,
            force,
        }
    }

    #[tokio::test]
    async fn test_fresh_token_goes_straight_to_userinfo() {
        let fake = FakeHttpClient::new();
        fake.push_json(200, json!({"sub": "user-1"}));
        let current = tokens(json!({"access_token": "AT", "token_type": "DPoP", "expires_in": 3600}));
        let client = client(&fake);

        let refreshed = client
            .refresh_if_needed(&configuration(true), &current, &key(), policy(false))
            .await
            .unwrap();
        assert!(refreshed.is_none());

        let body = client
            .fetch_user_info(&configuration(true), &current.access_token, &key())
            .await
            .unwrap();
        assert_eq!(body["sub"], "user-1");

        let requests = fake.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].header("Authorization"), Some("DPoP AT"));
        let header = jsonwebtoken::decode_header(requests[0].header("DPoP").unwrap()).unwrap();
        assert_eq!(header.jwk.as_ref(), Some(key().public_jwk()));
    }

    #[tokio::test]
    async fn test_expired_token_refreshes_with_same_key() {
        let fake = FakeHttpClient::new();
        fake.push_json(200, json!({"access_token": "AT2", "token_type": "DPoP", "expires_in": 3600}));
        fake.push_json(200, json!({"sub": "user-1"}));
        let current = tokens(json!({"access_token": "AT", "token_type": "DPoP", "expires_in": 10, "refresh_token": "RT"}));
        let client = client(&fake);

        let refreshed = client
            .refresh_if_needed(&configuration(true), &current, &key(), policy(false))
            .await
            .unwrap()
            .expect("stale token must be refreshed");
        assert_eq!(refreshed.access_token, "AT2");
        assert_eq!(refreshed.refresh_token.as_deref(), Some("RT"), "refresh token carried over");

        client
            .fetch_user_info(&configuration(true), &refreshed.access_token, &key())
            .await
            .unwrap();

        let requests = fake.requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].url.as_str(), "https://op.example/token");
        assert_eq!(requests[1].header("Authorization"), Some("DPoP AT2"));
        let refresh_jwk = jsonwebtoken::decode_header(requests[0].header("DPoP").unwrap()).unwrap().jwk;
        let resource_jwk = jsonwebtoken::decode_header(requests[1].header("DPoP").unwrap()).unwrap().jwk;
        assert_eq!(refresh_jwk, resource_jwk);
    }

    #[tokio::test]
    async fn test_forced_refresh_without_refresh_token() {
        let fake = FakeHttpClient::new();
        let current = tokens(json!({"access_token": "AT", "token_type": "DPoP", "expires_in": 3600}));
        let err = client(&fake)
            .refresh_if_needed(&configuration(true), &current, &key(), policy(true))
            .await
            .unwrap_err();
        assert!(matches!(err, ResourceError::RefreshUnavailable));
        assert!(fake.requests().is_empty());
    }

    #[tokio::test]
    async fn test_rejected_refresh_is_reported() {
        let fake = FakeHttpClient::new();
        fake.push_json(400, json!({"error": "invalid_grant"}));
        let current = tokens(json!({"access_token": "AT", "token_type": "DPoP", "expires_in": 0, "refresh_token": "RT"}));
        let err = client(&fake)
            .refresh_if_needed(&configuration(true), &current, &key(), policy(false))
            .await
            .unwrap_err();
        assert!(matches!(err, ResourceError::Refresh(TokenError::OAuth { .. })));
        assert_eq!(fake.requests().len(), 1);
    }

    #[tokio::test]
    async fn test_refresh_with_invalid_id_token_is_reported() {
        let fake = FakeHttpClient::new();
        let now = Utc::now().timestamp();
        fake.push_json(
            200,
            json!({
                "access_token": "AT2",
                "token_type": "DPoP",
                "id_token": unsigned_jwt(&json!({
                    "iss": "https://op.example",
                    "sub": "user-1",
                    "aud": "another-client",
                    "exp": now + 300,
                    "iat": now
                }))
            }),
        );
        let current = tokens(json!({"access_token": "AT", "token_type": "DPoP", "refresh_token": "RT"}));
        let err = client(&fake)
            .refresh_if_needed(&configuration(true), &current, &key(), policy(true))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ResourceError::Refresh(TokenError::IdTokenValidation(IdTokenRule::Audience { .. }))
        ));
    }

    #[tokio::test]
    async fn test_non_200_is_error() {
        let fake = FakeHttpClient::new();
        fake.push_response(HttpResponse::new(401, "invalid_token"));
        let err = client(&fake)
            .fetch_user_info(&configuration(true), "AT", &key())
            .await
            .unwrap_err();
        assert!(matches!(err, ResourceError::HttpStatus { status: 401, .. }));
    }

    #[tokio::test]
    async fn test_missing_userinfo_endpoint() {
        let fake = FakeHttpClient::new();
        let err = client(&fake)
            .fetch_user_info(&configuration(false), "AT", &key())
            .await
            .unwrap_err();
        assert!(matches!(err, ResourceError::MissingEndpoint { .. }));
        assert!(fake.requests().is_empty());
    }
}
