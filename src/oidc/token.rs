//! Token endpoint exchange
//!
//! [`TokenExchanger`] redeems an authorization code, or a refresh token, at
//! the provider's token endpoint.  Every request carries a DPoP proof for
//! `POST` and the token endpoint URL, and the returned ID Token (if any) is
//! parsed and validated before the response is handed back.
//!
//! # References
//!
//! - RFC 6749 sections 4.1.3, 5.1, 5.2 and 6
//! - RFC 7636 section 4.5
//! - RFC 9449 section 5

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use serde_json::{Map, Value};
use url::Url;

use crate::error::TokenError;
use crate::oidc::authorizer::AuthorizationResponse;
use crate::oidc::discovery::ProviderConfiguration;
use crate::oidc::dpop::{DpopKeyPair, DpopProofFactory};
use crate::oidc::id_token::{IdTokenClaims, ValidationContext};
use crate::oidc::redact;
use crate::oidc::transport::{HttpClient, HttpMethod, HttpRequest};

/// Content type of token requests.
pub const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded; charset=UTF-8";

// ---------------------------------------------------------------------------
// TokenRequest
// ---------------------------------------------------------------------------

/// Grant-specific fields of a token request.
#[derive(Clone)]
pub enum Grant {
    AuthorizationCode {
        code: String,
        code_verifier: String,
        redirect_uri: Url,
        /// Nonce of the authorization request; checked against the ID Token.
        nonce: Option<String>,
    },
    RefreshToken {
        refresh_token: String,
        /// Optional narrower scope
        scope: Option<String>,
    },
}

impl Grant {
    /// The `grant_type` parameter value.
    pub fn grant_type(&self) -> &'static str {
        match self {
            Grant::AuthorizationCode { .. } => "authorization_code",
            Grant::RefreshToken { .. } => "refresh_token",
        }
    }
}

impl fmt::Debug for Grant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Grant::AuthorizationCode {
                code, redirect_uri, ..
            } => f
                .debug_struct("AuthorizationCode")
                .field("code", &redact(code))
                .field("redirect_uri", &redirect_uri.as_str())
                .finish_non_exhaustive(),
            Grant::RefreshToken {
                refresh_token,
                scope,
            } => f
                .debug_struct("RefreshToken")
                .field("refresh_token", &redact(refresh_token))
                .field("scope", scope)
                .finish(),
        }
    }
}

/// A request to the token endpoint.
#[derive(Clone)]
pub struct TokenRequest {
    configuration: Arc<ProviderConfiguration>,
    grant: Grant,
    client_id: String,
    client_secret: Option<String>,
    key_pair: Option<DpopKeyPair>,
}

impl TokenRequest {
    /// Redeems the code of `response`.
    ///
    /// Client credentials, redirect URI, verifier and nonce all come from the
    /// originating authorization request.
    pub fn authorization_code(response: &AuthorizationResponse) -> Self {
        let request = response.request();
        Self {
            configuration: Arc::clone(request.configuration()),
            grant: Grant::AuthorizationCode {
                code: response.authorization_code().to_string(),
                code_verifier: request.code_verifier().to_string(),
                redirect_uri: request.redirect_uri().clone(),
                nonce: Some(request.nonce().to_string()).filter(|n| !n.is_empty()),
            },
            client_id: request.client_id().to_string(),
            client_secret: request.client_secret().map(str::to_string),
            key_pair: None,
        }
    }

    /// Refreshes an access token.
    pub fn refresh(
        configuration: Arc<ProviderConfiguration>,
        refresh_token: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: Option<String>,
        scope: Option<String>,
    ) -> Self {
        Self {
            configuration,
            grant: Grant::RefreshToken {
                refresh_token: refresh_token.into(),
                scope,
            },
            client_id: client_id.into(),
            client_secret,
            key_pair: None,
        }
    }

    /// Signs the DPoP proof with `key_pair` instead of a fresh key.
    pub fn with_key_pair(mut self, key_pair: DpopKeyPair) -> Self {
        self.key_pair = Some(key_pair);
        self
    }

    pub fn configuration(&self) -> &Arc<ProviderConfiguration> {
        &self.configuration
    }

    pub fn grant(&self) -> &Grant {
        &self.grant
    }

    pub fn grant_type(&self) -> &'static str {
        self.grant.grant_type()
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn key_pair(&self) -> Option<&DpopKeyPair> {
        self.key_pair.as_ref()
    }

    /// Encodes the request body.
    ///
    /// # Errors
    ///
    /// Returns [`TokenError::MissingParameter`] when a security-relevant
    /// field is empty.
    pub fn form_body(&self) -> Result<String, TokenError> {
        let mut form = url::form_urlencoded::Serializer::new(String::new());
        form.append_pair("grant_type", self.grant_type());
        match &self.grant {
            Grant::AuthorizationCode {
                code,
                code_verifier,
                redirect_uri,
                ..
            } => {
                form.append_pair("code", non_empty(code, "code")?)
                    .append_pair("redirect_uri", redirect_uri.as_str())
                    .append_pair("code_verifier", non_empty(code_verifier, "code_verifier")?);
            }
            Grant::RefreshToken {
                refresh_token,
                scope,
            } => {
                form.append_pair("refresh_token", non_empty(refresh_token, "refresh_token")?);
                if let Some(scope) = scope {
                    form.append_pair("scope", scope);
                }
            }
        }
        form.append_pair("client_id", non_empty(&self.client_id, "client_id")?);
        if let Some(secret) = &self.client_secret {
            form.append_pair("client_secret", secret);
        }
        Ok(form.finish())
    }
}

fn non_empty<'a>(value: &'a str, name: &'static str) -> Result<&'a str, TokenError> {
    if value.is_empty() {
        Err(TokenError::MissingParameter(name))
    } else {
        Ok(value)
    }
}

impl fmt::Debug for TokenRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenRequest")
            .field("token_endpoint", &self.configuration.token_endpoint().as_str())
            .field("grant", &self.grant)
            .field("client_id", &self.client_id)
            .field("client_secret", &self.client_secret.as_deref().map(redact))
            .field("key_pair", &self.key_pair)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// TokenResponse
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct RawTokenResponse {
    access_token: String,
    token_type: String,
    #[serde(default)]
    expires_in: Option<Value>,
    #[serde(default)]
    id_token: Option<String>,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    scope: Option<String>,
    #[serde(flatten)]
    extra: Map<String, Value>,
}

/// Tokens issued by the token endpoint.
#[derive(Clone)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: String,
    /// `received_at + expires_in`; `None` when the server gave no lifetime.
    pub expires_at: Option<DateTime<Utc>>,
    pub id_token: Option<String>,
    pub refresh_token: Option<String>,
    pub scope: Option<String>,
    /// Parsed claims of `id_token`, present whenever `id_token` is.
    pub id_token_claims: Option<IdTokenClaims>,
    /// Members not modelled above, in response order.
    pub extra: Map<String, Value>,
}

impl TokenResponse {
    /// Parses a successful token response body.
    ///
    /// The ID Token, if present, is parsed structurally but not validated.
    ///
    /// # Errors
    ///
    /// Returns [`TokenError::Json`] for a body without `access_token` or
    /// `token_type`, or with a non-numeric or out-of-range `expires_in`, and
    /// [`TokenError::IdTokenStructural`] for an unparseable ID Token.
    pub fn from_json(body: &[u8], received_at: DateTime<Utc>) -> Result<Self, TokenError> {
        let raw: RawTokenResponse =
            serde_json::from_slice(body).map_err(|e| TokenError::Json(e.to_string()))?;

        let expires_in = match &raw.expires_in {
            None | Some(Value::Null) => None,
            Some(Value::Number(n)) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
            Some(Value::String(s)) => Some(
                s.parse::<i64>()
                    .map_err(|_| TokenError::Json(format!("expires_in is not a number: {s}")))?,
            ),
            Some(other) => {
                return Err(TokenError::Json(format!("expires_in is not a number: {other}")))
            }
        };

        let expires_at = expires_in
            .map(|seconds| {
                Duration::try_seconds(seconds)
                    .and_then(|lifetime| received_at.checked_add_signed(lifetime))
                    .ok_or_else(|| TokenError::Json(format!("expires_in out of range: {seconds}")))
            })
            .transpose()?;

        let id_token_claims = raw.id_token.as_deref().map(IdTokenClaims::parse).transpose()?;

        Ok(Self {
            access_token: raw.access_token,
            token_type: raw.token_type,
            expires_at,
            id_token: raw.id_token,
            refresh_token: raw.refresh_token,
            scope: raw.scope,
            id_token_claims,
            extra: raw.extra,
        })
    }

    /// Returns `true` once `now` is within `leeway` of `expires_at`.
    ///
    /// A response without a lifetime never expires by itself.
    pub fn is_expired(&self, now: DateTime<Utc>, leeway: Duration) -> bool {
        self.expires_at.is_some_and(|at| now >= at - leeway)
    }

    /// Whether the server reported a DPoP-bound token.
    pub fn is_dpop_bound(&self) -> bool {
        self.token_type.eq_ignore_ascii_case("DPoP")
    }
}

impl fmt::Debug for TokenResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenResponse")
            .field("access_token", &redact(&self.access_token))
            .field("token_type", &self.token_type)
            .field("expires_at", &self.expires_at)
            .field("id_token", &self.id_token.as_deref().map(redact))
            .field("refresh_token", &self.refresh_token.as_deref().map(redact))
            .field("scope", &self.scope)
            .field("extra", &self.extra)
            .finish_non_exhaustive()
    }
}

#[derive(Deserialize)]
struct OAuthErrorBody {
    error: String,
    #[serde(default)]
    error_description: Option<String>,
}

// ---------------------------------------------------------------------------
// TokenExchanger
// ---------------------------------------------------------------------------

/// Calls the token endpoint with DPoP proofs.
#[derive(Debug, Clone)]
pub struct TokenExchanger {
    http: Arc<dyn HttpClient>,
    dpop: DpopProofFactory,
}

impl TokenExchanger {
    pub fn new(http: Arc<dyn HttpClient>, dpop: DpopProofFactory) -> Self {
        Self { http, dpop }
    }

    /// Performs the token request.
    ///
    /// The DPoP proof is signed with the request's key pair, or with a newly
    /// generated one when the request carries none.  The key that signed
    /// the proof is returned next to the tokens: the access token is bound
    /// to it.
    ///
    /// # Errors
    ///
    /// - [`TokenError::MissingParameter`] for an incomplete request
    /// - [`TokenError::Dpop`] if no proof could be produced
    /// - [`TokenError::Network`] on transport failure
    /// - [`TokenError::OAuth`] for a non-200 RFC 6749 error body,
    ///   [`TokenError::Server`] for any other non-200 response
    /// - [`TokenError::Json`] for an unusable 200 body
    /// - [`TokenError::IdTokenStructural`] / [`TokenError::IdTokenValidation`]
    ///   when the returned ID Token is malformed or fails a rule
    pub async fn exchange(
        &self,
        request: &TokenRequest,
    ) -> Result<(TokenResponse, DpopKeyPair), TokenError> {
        let body = request.form_body()?;
        let endpoint = request.configuration().token_endpoint().clone();
        let url = endpoint.to_string();

        let key_pair = match request.key_pair() {
            Some(existing) => existing.clone(),
            None => DpopKeyPair::generate_blocking().await?,
        };
        let (proof, key_pair) = self.dpop.mint(HttpMethod::Post, &endpoint, Some(&key_pair))?;

        tracing::debug!(
            url = %url,
            grant_type = request.grant_type(),
            proof = %redact(&proof),
            "requesting tokens"
        );

        let http_request = HttpRequest::post(endpoint, FORM_CONTENT_TYPE, body)
            .with_header("Accept", "application/json")
            .with_header("DPoP", proof);
        let response = self.http.send(http_request).await?;

        if response.status != 200 {
            let error = match serde_json::from_slice::<OAuthErrorBody>(&response.body) {
                Ok(body) => TokenError::OAuth {
                    status: response.status,
                    error: body.error,
                    description: body.error_description,
                },
                Err(_) => TokenError::Server {
                    status: response.status,
                    body: response.text(),
                },
            };
            tracing::warn!(url = %url, grant_type = request.grant_type(), error = %error, "token request rejected");
            return Err(error);
        }

        let now = Utc::now();
        let tokens = TokenResponse::from_json(&response.body, now)?;

        if let Some(claims) = &tokens.id_token_claims {
            let expected_nonce = match request.grant() {
                Grant::AuthorizationCode { nonce, .. } => nonce.as_deref(),
                Grant::RefreshToken { .. } => None,
            };
            let context = ValidationContext {
                issuer: Some(request.configuration().issuer()),
                client_id: request.client_id(),
                now: now.timestamp(),
                expected_nonce,
            };
            claims.validate(&context).map_err(|rule| {
                tracing::warn!(rule = %rule, "ID Token rejected");
                TokenError::IdTokenValidation(rule)
            })?;
        }

        if !tokens.is_dpop_bound() {
            tracing::warn!(token_type = %tokens.token_type, "token endpoint did not issue a DPoP-bound token");
        }

        tracing::info!(
            grant_type = request.grant_type(),
            access_token = %redact(&tokens.access_token),
            expires_at = ?tokens.expires_at,
            id_token = tokens.id_token.is_some(),
            refresh_token = tokens.refresh_token.is_some(),
            "received tokens"
        );
        Ok((tokens, key_pair))
    }
}
