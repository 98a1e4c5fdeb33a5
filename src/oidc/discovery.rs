//! OpenID Provider discovery
//!
//! Fetches `{issuer}/.well-known/openid-configuration` and turns it into an
//! immutable [`ProviderConfiguration`].  Validation is all-or-nothing: a
//! document missing any required field produces
//! [`DiscoveryError::InvalidDocument`] and no configuration at all.
//!
//! # References
//!
//! - OpenID Connect Discovery 1.0 section 3 and 4
//!   <https://openid.net/specs/openid-connect-discovery-1_0.html>

use std::sync::Arc;

use serde_json::{Map, Value};
use url::Url;

use crate::error::DiscoveryError;
use crate::oidc::transport::{HttpClient, HttpRequest};

/// Path appended to the issuer to locate the discovery document.
pub const WELL_KNOWN_PATH: &str = ".well-known/openid-configuration";

const REQUIRED_STRING_ARRAYS: [&str; 3] = [
    "response_types_supported",
    "subject_types_supported",
    "id_token_signing_alg_values_supported",
];

// ---------------------------------------------------------------------------
// ProviderConfiguration
// ---------------------------------------------------------------------------

/// Validated snapshot of a provider's discovery document.
///
/// Required endpoints are typed; every top-level key of the document,
/// including the required ones, stays available verbatim through
/// [`ProviderConfiguration::document`] in its original order.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderConfiguration {
    issuer: String,
    authorization_endpoint: Url,
    token_endpoint: Url,
    jwks_uri: Url,
    registration_endpoint: Option<Url>,
    userinfo_endpoint: Option<Url>,
    document: Map<String, Value>,
}

impl ProviderConfiguration {
    /// Parses and validates a discovery document body.
    ///
    /// # Errors
    ///
    /// Returns [`DiscoveryError::Json`] when `body` is not a JSON object and
    /// [`DiscoveryError::InvalidDocument`] when a required field is absent,
    /// has the wrong type or is not an absolute URL.
    pub fn from_json(url: &str, body: &[u8]) -> Result<Self, DiscoveryError> {
        let value: Value = serde_json::from_slice(body).map_err(|e| DiscoveryError::Json {
            url: url.to_string(),
            message: e.to_string(),
        })?;
        match value {
            Value::Object(document) => Self::from_document(document),
            other => Err(DiscoveryError::Json {
                url: url.to_string(),
                message: format!("expected a JSON object, found {}", json_kind(&other)),
            }),
        }
    }

    /// Validates an already-parsed discovery document.
    ///
    /// # Errors
    ///
    /// Returns [`DiscoveryError::InvalidDocument`] naming the first offending
    /// field.
    pub fn from_document(document: Map<String, Value>) -> Result<Self, DiscoveryError> {
        let issuer = required_str(&document, "issuer")?.to_string();
        absolute_url("issuer", &issuer)?;

        let authorization_endpoint = required_url(&document, "authorization_endpoint")?;
        let token_endpoint = required_url(&document, "token_endpoint")?;
        let jwks_uri = required_url(&document, "jwks_uri")?;

        for key in REQUIRED_STRING_ARRAYS {
            match document.get(key) {
                None => return Err(missing(key)),
                Some(value) if as_string_array(value).is_none() => {
                    return Err(DiscoveryError::InvalidDocument(format!(
                        "Field {key} must be an array of strings"
                    )))
                }
                Some(_) => {}
            }
        }

        let registration_endpoint = optional_url(&document, "registration_endpoint")?;
        let userinfo_endpoint = optional_url(&document, "userinfo_endpoint")?;

        Ok(Self {
            issuer,
            authorization_endpoint,
            token_endpoint,
            jwks_uri,
            registration_endpoint,
            userinfo_endpoint,
            document,
        })
    }

    /// The issuer identifier exactly as published.
    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    /// Authorization endpoint.
    pub fn authorization_endpoint(&self) -> &Url {
        &self.authorization_endpoint
    }

    /// Token endpoint.
    pub fn token_endpoint(&self) -> &Url {
        &self.token_endpoint
    }

    /// JWK Set document location.
    pub fn jwks_uri(&self) -> &Url {
        &self.jwks_uri
    }

    /// Dynamic client registration endpoint, if advertised.
    pub fn registration_endpoint(&self) -> Option<&Url> {
        self.registration_endpoint.as_ref()
    }

    /// UserInfo endpoint, if advertised.
    pub fn userinfo_endpoint(&self) -> Option<&Url> {
        self.userinfo_endpoint.as_ref()
    }

    /// The full document in its original key order.
    pub fn document(&self) -> &Map<String, Value> {
        &self.document
    }

    /// Looks up any top-level claim of the document.
    pub fn claim(&self, key: &str) -> Option<&Value> {
        self.document.get(key)
    }

    pub fn response_types_supported(&self) -> Vec<String> {
        self.string_array("response_types_supported")
    }

    pub fn subject_types_supported(&self) -> Vec<String> {
        self.string_array("subject_types_supported")
    }

    pub fn id_token_signing_alg_values_supported(&self) -> Vec<String> {
        self.string_array("id_token_signing_alg_values_supported")
    }

    pub fn scopes_supported(&self) -> Vec<String> {
        self.string_array("scopes_supported")
    }

    pub fn grant_types_supported(&self) -> Vec<String> {
        self.string_array("grant_types_supported")
    }

    pub fn claims_supported(&self) -> Vec<String> {
        self.string_array("claims_supported")
    }

    pub fn token_endpoint_auth_methods_supported(&self) -> Vec<String> {
        self.string_array("token_endpoint_auth_methods_supported")
    }

    pub fn code_challenge_methods_supported(&self) -> Vec<String> {
        self.string_array("code_challenge_methods_supported")
    }

    pub fn dpop_signing_alg_values_supported(&self) -> Vec<String> {
        self.string_array("dpop_signing_alg_values_supported")
    }

    /// Returns the string array stored under `key`, or an empty vector when
    /// the key is absent or not an array of strings.
    pub fn string_array(&self, key: &str) -> Vec<String> {
        self.document
            .get(key)
            .and_then(as_string_array)
            .unwrap_or_default()
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

fn missing(key: &str) -> DiscoveryError {
    DiscoveryError::InvalidDocument(format!("Missing field: {key}"))
}

fn required_str<'a>(document: &'a Map<String, Value>, key: &str) -> Result<&'a str, DiscoveryError> {
    match document.get(key) {
        None => Err(missing(key)),
        Some(Value::String(s)) => Ok(s),
        Some(_) => Err(DiscoveryError::InvalidDocument(format!(
            "Field {key} must be a string"
        ))),
    }
}

fn absolute_url(key: &str, value: &str) -> Result<Url, DiscoveryError> {
    let url = Url::parse(value).map_err(|e| {
        DiscoveryError::InvalidDocument(format!("Field {key} is not a valid URL ({value}): {e}"))
    })?;
    if url.cannot_be_a_base() {
        return Err(DiscoveryError::InvalidDocument(format!(
            "Field {key} is not an absolute URL: {value}"
        )));
    }
    Ok(url)
}

fn required_url(document: &Map<String, Value>, key: &str) -> Result<Url, DiscoveryError> {
    absolute_url(key, required_str(document, key)?)
}

fn optional_url(document: &Map<String, Value>, key: &str) -> Result<Option<Url>, DiscoveryError> {
    match document.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(_) => required_url(document, key).map(Some),
    }
}

fn as_string_array(value: &Value) -> Option<Vec<String>> {
    value
        .as_array()?
        .iter()
        .map(|v| v.as_str().map(str::to_string))
        .collect()
}

// ---------------------------------------------------------------------------
// DiscoveryClient
// ---------------------------------------------------------------------------

/// Builds the discovery document URL for `issuer`.
///
/// A trailing `/` on the issuer is not duplicated.
///
/// # Errors
///
/// Returns [`DiscoveryError::InvalidIssuer`] when `issuer` is not an
/// absolute `http` or `https` URL.
///
/// # Examples
///
/// ```
/// use gettokens::oidc::discovery::discovery_url;
///
/// assert_eq!(
///     discovery_url("https://op.example/").unwrap().as_str(),
///     "https://op.example/.well-known/openid-configuration"
/// );
/// assert_eq!(
///     discovery_url("https://op.example/tenant").unwrap().as_str(),
///     "https://op.example/tenant/.well-known/openid-configuration"
/// );
/// ```
pub fn discovery_url(issuer: &str) -> Result<Url, DiscoveryError> {
    let invalid = |reason: String| DiscoveryError::InvalidIssuer {
        url: issuer.to_string(),
        reason,
    };
    let base = Url::parse(issuer.trim()).map_err(|e| invalid(e.to_string()))?;
    if base.scheme() != "https" && base.scheme() != "http" {
        return Err(invalid(format!("unsupported scheme '{}'", base.scheme())));
    }
    if base.query().is_some() || base.fragment().is_some() {
        return Err(invalid("issuer must not carry a query or fragment".to_string()));
    }
    let joined = format!("{}/{}", base.as_str().trim_end_matches('/'), WELL_KNOWN_PATH);
    Url::parse(&joined).map_err(|e| invalid(e.to_string()))
}

/// Fetches and validates provider configurations.
#[derive(Debug, Clone)]
pub struct DiscoveryClient {
    http: Arc<dyn HttpClient>,
}

impl DiscoveryClient {
    pub fn new(http: Arc<dyn HttpClient>) -> Self {
        Self { http }
    }

    /// Discovers the provider configuration for `issuer`.
    ///
    /// # Arguments
    ///
    /// * `issuer` - Issuer base URL, with or without a trailing `/`.
    ///
    /// # Errors
    ///
    /// Returns a [`DiscoveryError`] for an invalid issuer, a transport
    /// failure, any status other than `200` (redirects included), a body that
    /// is not a JSON object, or a document failing validation.
    pub async fn discover(&self, issuer: &str) -> Result<ProviderConfiguration, DiscoveryError> {
        let url = discovery_url(issuer)?;
        let url_string = url.to_string();
        tracing::debug!(url = %url_string, "fetching discovery document");

        let response = self
            .http
            .send(HttpRequest::get(url).with_header("Accept", "application/json"))
            .await?;

        if response.status != 200 {
            tracing::warn!(url = %url_string, status = response.status, "discovery request rejected");
            return Err(DiscoveryError::HttpStatus {
                url: url_string,
                status: response.status,
                body: response.text(),
            });
        }

        let configuration =
            ProviderConfiguration::from_json(&url_string, &response.body).map_err(|e| {
                tracing::warn!(url = %url_string, error = %e, "discovery document rejected");
                e
            })?;

        if configuration.issuer().trim_end_matches('/') != issuer.trim().trim_end_matches('/') {
            tracing::warn!(
                requested = issuer,
                published = configuration.issuer(),
                "published issuer differs from requested issuer"
            );
        }

        tracing::info!(
            issuer = configuration.issuer(),
            registration = configuration.registration_endpoint().is_some(),
            userinfo = configuration.userinfo_endpoint().is_some(),
            "discovered provider configuration"
        );
        Ok(configuration)
    }
}
