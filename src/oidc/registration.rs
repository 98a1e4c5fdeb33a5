//! Dynamic client registration
//!
//! Registers this relying party as a native public client (RFC 7591) and
//! parses the returned client information into a [`RegistrationResult`].
//!
//! # References
//!
//! - RFC 7591 <https://www.rfc-editor.org/rfc/rfc7591>
//! - OpenID Connect Dynamic Client Registration 1.0
//!   <https://openid.net/specs/openid-connect-registration-1_0.html>

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use url::Url;

use crate::error::RegistrationError;
use crate::oidc::discovery::ProviderConfiguration;
use crate::oidc::redact;
use crate::oidc::transport::{HttpClient, HttpRequest};

// ---------------------------------------------------------------------------
// Request
// ---------------------------------------------------------------------------

/// Client metadata posted to the registration endpoint.
///
/// The fixed fields describe a native public client using the
/// authorization-code grant with refresh tokens.
#[derive(Clone, Serialize)]
pub struct RegistrationRequest {
    pub redirect_uris: Vec<Url>,
    pub application_type: &'static str,
    pub response_types: Vec<&'static str>,
    pub grant_types: Vec<&'static str>,
    pub token_endpoint_auth_method: &'static str,
    pub client_name: String,
    /// Sent as `Authorization: Bearer` when the provider requires an
    /// initial access token. Never part of the body.
    #[serde(skip)]
    pub initial_access_token: Option<String>,
}

impl RegistrationRequest {
    /// Creates the request for a native public client.
    pub fn new(redirect_uris: Vec<Url>, client_name: impl Into<String>) -> Self {
        Self {
            redirect_uris,
            application_type: "native",
            response_types: vec!["code"],
            grant_types: vec!["authorization_code", "refresh_token"],
            token_endpoint_auth_method: "none",
            client_name: client_name.into(),
            initial_access_token: None,
        }
    }

    /// Attaches an initial access token.
    pub fn with_initial_access_token(mut self, token: impl Into<String>) -> Self {
        self.initial_access_token = Some(token.into());
        self
    }
}

impl fmt::Debug for RegistrationRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegistrationRequest")
            .field("redirect_uris", &self.redirect_uris)
            .field("client_name", &self.client_name)
            .field(
                "initial_access_token",
                &self.initial_access_token.as_deref().map(redact),
            )
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Result
// ---------------------------------------------------------------------------

/// Client information returned by a successful registration.
///
/// `registration_client_uri` and `registration_access_token` are either both
/// present or both absent; [`RegistrationResult::from_json`] rejects anything
/// else.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistrationResult {
    pub client_id: String,

    #[serde(
        default,
        deserialize_with = "epoch_seconds",
        skip_serializing_if = "Option::is_none",
        serialize_with = "chrono::serde::ts_seconds_option::serialize"
    )]
    pub client_id_issued_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,

    /// `None` when the secret never expires (`0` on the wire) or no secret
    /// was issued.
    #[serde(
        default,
        deserialize_with = "epoch_seconds",
        skip_serializing_if = "Option::is_none",
        serialize_with = "chrono::serde::ts_seconds_option::serialize"
    )]
    pub client_secret_expires_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub registration_access_token: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub registration_client_uri: Option<Url>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_endpoint_auth_method: Option<String>,

    /// Every other top-level member, in response order.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn epoch_seconds<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let seconds = Option::<i64>::deserialize(deserializer)?;
    match seconds {
        None | Some(0) => Ok(None),
        Some(s) => Utc
            .timestamp_opt(s, 0)
            .single()
            .map(Some)
            .ok_or_else(|| serde::de::Error::custom(format!("timestamp {s} out of range"))),
    }
}

impl RegistrationResult {
    /// Parses a registration response body and checks the
    /// `registration_client_uri`/`registration_access_token` pairing.
    ///
    /// # Errors
    ///
    /// Returns [`RegistrationError::Json`] for a body of the wrong shape and
    /// [`RegistrationError::Invariant`] when only one of the pair is present.
    pub fn from_json(body: &[u8]) -> Result<Self, RegistrationError> {
        let result: Self =
            serde_json::from_slice(body).map_err(|e| RegistrationError::Json(e.to_string()))?;
        let has_client_uri = result.registration_client_uri.is_some();
        let has_access_token = result.registration_access_token.is_some();
        if has_client_uri != has_access_token {
            return Err(RegistrationError::Invariant {
                has_client_uri,
                has_access_token,
            });
        }
        Ok(result)
    }
}

impl fmt::Debug for RegistrationResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegistrationResult")
            .field("client_id", &self.client_id)
            .field("client_id_issued_at", &self.client_id_issued_at)
            .field("client_secret", &self.client_secret.as_deref().map(redact))
            .field("client_secret_expires_at", &self.client_secret_expires_at)
            .field(
                "registration_access_token",
                &self.registration_access_token.as_deref().map(redact),
            )
            .field("registration_client_uri", &self.registration_client_uri)
            .field("token_endpoint_auth_method", &self.token_endpoint_auth_method)
            .field("extra", &self.extra)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// RegistrationClient
// ---------------------------------------------------------------------------

/// Posts client metadata to a provider's registration endpoint.
#[derive(Debug, Clone)]
pub struct RegistrationClient {
    http: Arc<dyn HttpClient>,
}

impl RegistrationClient {
    pub fn new(http: Arc<dyn HttpClient>) -> Self {
        Self { http }
    }

    /// Registers a native public client with the default metadata.
    ///
    /// # Arguments
    ///
    /// * `configuration` - Provider configuration carrying the registration endpoint
    /// * `redirect_uris` - Redirect URIs to register
    /// * `client_name` - Human-readable client name
    ///
    /// # Errors
    ///
    /// See [`RegistrationClient::register_with`].
    pub async fn register(
        &self,
        configuration: &ProviderConfiguration,
        redirect_uris: Vec<Url>,
        client_name: &str,
    ) -> Result<RegistrationResult, RegistrationError> {
        self.register_with(configuration, RegistrationRequest::new(redirect_uris, client_name))
            .await
    }

    /// Sends `request` to the registration endpoint.
    ///
    /// Any 2xx status is success.
    ///
    /// # Errors
    ///
    /// - [`RegistrationError::MissingEndpoint`] if the provider advertises no
    ///   registration endpoint
    /// - [`RegistrationError::Serialize`] if the body cannot be encoded
    /// - [`RegistrationError::Network`] on transport failure
    /// - [`RegistrationError::HttpStatus`] on a non-2xx status
    /// - [`RegistrationError::Json`] / [`RegistrationError::Invariant`] for
    ///   an unusable response
    pub async fn register_with(
        &self,
        configuration: &ProviderConfiguration,
        request: RegistrationRequest,
    ) -> Result<RegistrationResult, RegistrationError> {
        let endpoint = configuration
            .registration_endpoint()
            .ok_or_else(|| RegistrationError::MissingEndpoint {
                issuer: configuration.issuer().to_string(),
            })?
            .clone();

        let body = serde_json::to_vec(&request).map_err(RegistrationError::Serialize)?;
        let url = endpoint.to_string();

        let mut http_request = HttpRequest::post(endpoint, "application/json", body)
            .with_header("Accept", "application/json");
        if let Some(token) = &request.initial_access_token {
            http_request = http_request.with_header("Authorization", format!("Bearer {token}"));
        }

        tracing::debug!(url = %url, client_name = %request.client_name, "registering client");
        let response = self.http.send(http_request).await?;

        if !response.is_success() {
            tracing::warn!(url = %url, status = response.status, "registration rejected");
            return Err(RegistrationError::HttpStatus {
                url,
                status: response.status,
                body: response.text(),
            });
        }

        let result = RegistrationResult::from_json(&response.body)?;
        tracing::info!(
            client_id = %result.client_id,
            confidential = result.client_secret.is_some(),
            "registered client"
        );
        Ok(result)
    }
}
