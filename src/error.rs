//! Error types for GetTokens
//!
//! This module defines the crate-wide error type used by configuration,
//! the CLI and command handlers, plus one discriminated error enum per
//! protocol stage.  Stage errors are propagated upward unmodified; the
//! session driver wraps them in [`SessionError`] without rewriting them.
//!
//! All types use `thiserror` for ergonomic error handling.

use thiserror::Error;

/// Main error type for GetTokens application-level operations
///
/// Protocol failures travel as their stage-specific types; this enum covers
/// the ambient concerns around them (configuration, I/O, serialization).
#[derive(Error, Debug)]
pub enum GetTokensError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// A protocol pipeline failure
    #[error(transparent)]
    Session(#[from] SessionError),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// YAML parsing errors
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// URL parsing errors
    #[error("URL error: {0}")]
    Url(#[from] url::ParseError),
}

/// Result type alias for GetTokens application operations
///
/// This is a convenience alias that uses `anyhow::Error` as the error type,
/// allowing for rich error context and easy error propagation.
pub type Result<T> = anyhow::Result<T>;

// ---------------------------------------------------------------------------
// Transport
// ---------------------------------------------------------------------------

/// Failure of the HTTP transport collaborator before any status was received.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The request did not complete within the configured timeout.
    #[error("request to {url} timed out")]
    Timeout {
        /// Target URL of the request
        url: String,
    },

    /// Connection, TLS or protocol-level failure.
    #[error("network error contacting {url}: {message}")]
    Network {
        /// Target URL of the request
        url: String,
        /// Description of the underlying failure
        message: String,
    },
}

// ---------------------------------------------------------------------------
// Discovery
// ---------------------------------------------------------------------------

/// Failure to obtain a valid provider configuration.
#[derive(Error, Debug)]
pub enum DiscoveryError {
    /// The issuer base URL could not be turned into a discovery URL.
    #[error("invalid issuer URL {url}: {reason}")]
    InvalidIssuer {
        /// The offending issuer string
        url: String,
        /// Why it was rejected
        reason: String,
    },

    /// Transport failure fetching the discovery document.
    #[error(transparent)]
    Network(#[from] TransportError),

    /// The server answered with anything other than `200 OK`.
    #[error("discovery document at {url} returned HTTP {status}")]
    HttpStatus {
        /// Discovery document URL
        url: String,
        /// Status code received
        status: u16,
        /// Response body, lossily decoded
        body: String,
    },

    /// The body was not a JSON object.
    #[error("discovery document at {url} is not valid JSON: {message}")]
    Json {
        /// Discovery document URL
        url: String,
        /// Parser message
        message: String,
    },

    /// A required field is missing or malformed.
    #[error("invalid discovery document: {0}")]
    InvalidDocument(String),
}

// ---------------------------------------------------------------------------
// Registration
// ---------------------------------------------------------------------------

/// Failure to register the client dynamically.
#[derive(Error, Debug)]
pub enum RegistrationError {
    /// The provider does not advertise a registration endpoint.
    #[error("provider {issuer} does not advertise a registration endpoint")]
    MissingEndpoint {
        /// Issuer of the provider configuration
        issuer: String,
    },

    /// The registration request body could not be serialized.
    #[error("failed to serialize registration request: {0}")]
    Serialize(#[source] serde_json::Error),

    /// Transport failure posting the registration request.
    #[error(transparent)]
    Network(#[from] TransportError),

    /// The registration endpoint answered with a non-2xx status.
    #[error("registration endpoint {url} returned HTTP {status}: {body}")]
    HttpStatus {
        /// Registration endpoint URL
        url: String,
        /// Status code received
        status: u16,
        /// Response body, lossily decoded
        body: String,
    },

    /// The response body was not the expected JSON shape.
    #[error("invalid registration response: {0}")]
    Json(String),

    /// `registration_client_uri` and `registration_access_token` must appear
    /// together or not at all.
    #[error(
        "registration response must carry both or neither of registration_client_uri \
         (present: {has_client_uri}) and registration_access_token (present: {has_access_token})"
    )]
    Invariant {
        /// Whether `registration_client_uri` was present
        has_client_uri: bool,
        /// Whether `registration_access_token` was present
        has_access_token: bool,
    },
}

// ---------------------------------------------------------------------------
// Authorization
// ---------------------------------------------------------------------------

/// Failure of the authorization (front-channel) step.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthorizationError {
    /// The provider redirected back with an OAuth error (RFC 6749 section 4.1.2.1).
    #[error("authorization server returned error '{error}'{}", description.as_ref().map(|d| format!(": {d}")).unwrap_or_default())]
    OAuth {
        /// The `error` code
        error: String,
        /// The `error_description`, if any
        description: Option<String>,
        /// Every parameter of the callback query, in order
        parameters: Vec<(String, String)>,
    },

    /// The callback `state` does not equal the request `state`.
    #[error("state mismatch: expected '{expected}' but callback carried {}", actual.as_deref().map(|a| format!("'{a}'")).unwrap_or_else(|| "no state".to_string()))]
    StateMismatch {
        /// State sent in the authorization request
        expected: String,
        /// State received in the callback
        actual: Option<String>,
    },

    /// The callback carried a matching state but no `code`.
    #[error("authorization code missing from callback {callback}")]
    MissingCode {
        /// The callback URL
        callback: String,
    },

    /// The user cancelled the external user agent. A normal terminal outcome.
    #[error("authorization cancelled by the user")]
    Cancelled,

    /// The external user agent failed to present the request.
    #[error("external user agent failed: {0}")]
    UserAgent(String),

    /// An operation was attempted in the wrong authorizer state.
    #[error("authorizer cannot {operation} while {state}")]
    InvalidState {
        /// Operation attempted
        operation: &'static str,
        /// Current state name
        state: &'static str,
    },
}

// ---------------------------------------------------------------------------
// DPoP
// ---------------------------------------------------------------------------

/// Failure to create or sign a DPoP proof.
#[derive(Error, Debug)]
pub enum DpopError {
    /// Key pair generation failed.
    #[error("failed to generate DPoP key pair: {0}")]
    KeyGeneration(String),

    /// Encoding or signing the proof failed.
    #[error("failed to sign DPoP proof: {0}")]
    Signing(String),

    /// The target URL cannot be used as `htu`.
    #[error("invalid DPoP target URL {url}: {reason}")]
    InvalidTarget {
        /// Target URL string
        url: String,
        /// Why it was rejected
        reason: String,
    },
}

// ---------------------------------------------------------------------------
// Token exchange
// ---------------------------------------------------------------------------

/// Which ID Token semantic validation rule failed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IdTokenRule {
    /// `iss` differs from the provider issuer.
    #[error("issuer mismatch: expected '{expected}', got '{actual}'")]
    Issuer {
        /// Provider issuer
        expected: String,
        /// Token `iss`
        actual: String,
    },

    /// `aud` does not contain the client identifier.
    #[error("audience {audience:?} does not contain client '{client_id}'")]
    Audience {
        /// Our client identifier
        client_id: String,
        /// Token `aud`
        audience: Vec<String>,
    },

    /// `exp` is not in the future.
    #[error("ID Token expired at {expires_at} (now {now})")]
    Expired {
        /// Token `exp`, unix seconds
        expires_at: i64,
        /// Validation time, unix seconds
        now: i64,
    },

    /// `iat` is more than the allowed skew away from now.
    #[error("ID Token issued at {issued_at} is more than {max_skew_seconds}s from now ({now})")]
    IssuedAt {
        /// Token `iat`, unix seconds
        issued_at: i64,
        /// Validation time, unix seconds
        now: i64,
        /// Allowed absolute skew
        max_skew_seconds: i64,
    },

    /// `nonce` differs from the authorization request nonce.
    #[error("nonce mismatch: expected '{expected}', got {}", actual.as_deref().map(|a| format!("'{a}'")).unwrap_or_else(|| "no nonce".to_string()))]
    Nonce {
        /// Nonce sent in the authorization request
        expected: String,
        /// Nonce carried in the token
        actual: Option<String>,
    },
}

/// Failure of a token endpoint call or of the returned ID Token.
#[derive(Error, Debug)]
pub enum TokenError {
    /// A grant-specific field needed to build the request is absent.
    #[error("token request is missing {0}")]
    MissingParameter(&'static str),

    /// The DPoP proof could not be produced.
    #[error(transparent)]
    Dpop(#[from] DpopError),

    /// Transport failure posting to the token endpoint.
    #[error(transparent)]
    Network(#[from] TransportError),

    /// Structured RFC 6749 section 5.2 error body.
    #[error("token endpoint returned OAuth error '{error}' (HTTP {status}){}", description.as_ref().map(|d| format!(": {d}")).unwrap_or_default())]
    OAuth {
        /// HTTP status
        status: u16,
        /// The `error` code
        error: String,
        /// The `error_description`, if any
        description: Option<String>,
    },

    /// Non-200 status whose body is not an OAuth error object.
    #[error("token endpoint returned HTTP {status}: {body}")]
    Server {
        /// HTTP status
        status: u16,
        /// Response body, lossily decoded
        body: String,
    },

    /// The 200 body was not a valid token response.
    #[error("invalid token response: {0}")]
    Json(String),

    /// The ID Token could not be parsed as a JWT with the required claims.
    #[error("malformed ID Token: {0}")]
    IdTokenStructural(String),

    /// The ID Token parsed but failed a semantic rule.
    #[error("ID Token validation failed: {0}")]
    IdTokenValidation(#[from] IdTokenRule),
}

// ---------------------------------------------------------------------------
// Protected resource
// ---------------------------------------------------------------------------

/// Failure to call a protected resource.
#[derive(Error, Debug)]
pub enum ResourceError {
    /// The provider does not advertise a userinfo endpoint.
    #[error("provider {issuer} does not advertise a userinfo endpoint")]
    MissingEndpoint {
        /// Provider issuer
        issuer: String,
    },

    /// The access token is stale and no refresh token is available.
    #[error("access token expired and no refresh token is available")]
    RefreshUnavailable,

    /// Refreshing the access token failed.
    #[error("token refresh failed: {0}")]
    Refresh(#[source] TokenError),

    /// The DPoP proof could not be produced.
    #[error(transparent)]
    Dpop(#[from] DpopError),

    /// Transport failure calling the resource.
    #[error(transparent)]
    Network(#[from] TransportError),

    /// The resource answered with a non-200 status.
    #[error("resource {url} returned HTTP {status}: {body}")]
    HttpStatus {
        /// Resource URL
        url: String,
        /// Status code received
        status: u16,
        /// Response body, lossily decoded
        body: String,
    },

    /// The resource body was not JSON.
    #[error("resource {url} returned invalid JSON: {message}")]
    Json {
        /// Resource URL
        url: String,
        /// Parser message
        message: String,
    },
}

// ---------------------------------------------------------------------------
// Session orchestration
// ---------------------------------------------------------------------------

/// Failure surfaced by the session driver.
#[derive(Error, Debug)]
pub enum SessionError {
    /// A stage was invoked before the stage it depends on completed.
    #[error("cannot {operation}: {missing} has not completed")]
    MissingStage {
        /// Operation requested
        operation: &'static str,
        /// Prerequisite stage that is absent
        missing: &'static str,
    },

    /// A stage output refers to an upstream stage that has since been
    /// replaced.
    #[error("{stage} belongs to a superseded {upstream}; rerun {stage}")]
    Stale {
        /// Stage whose input is stale
        stage: &'static str,
        /// Upstream stage that changed
        upstream: &'static str,
    },

    /// The authorization code and verifier were already spent on an exchange.
    #[error("authorization code already used; start a new authorization")]
    AuthorizationConsumed,

    /// Discovery failed.
    #[error(transparent)]
    Discovery(#[from] DiscoveryError),

    /// Registration failed.
    #[error(transparent)]
    Registration(#[from] RegistrationError),

    /// Authorization failed or was cancelled.
    #[error(transparent)]
    Authorization(#[from] AuthorizationError),

    /// Token exchange failed.
    #[error(transparent)]
    Token(#[from] TokenError),

    /// Protected resource access failed.
    #[error(transparent)]
    Resource(#[from] ResourceError),
}

impl SessionError {
    /// Returns `true` when the pipeline stopped because the user cancelled.
    pub fn is_cancelled(&self) -> bool {
        matches!(
            self,
            SessionError::Authorization(AuthorizationError::Cancelled)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error_display() {
        let error = GetTokensError::Config("invalid format".to_string());
        assert_eq!(error.to_string(), "Configuration error: invalid format");
    }

    #[test]
    fn test_timeout_is_distinct_from_network() {
        let timeout = TransportError::Timeout {
            url: "https://op.example/token".to_string(),
        };
        let network = TransportError::Network {
            url: "https://op.example/token".to_string(),
            message: "connection refused".to_string(),
        };
        assert_ne!(timeout, network);
        assert_eq!(timeout.to_string(), "request to https://op.example/token timed out");
        assert!(network.to_string().contains("connection refused"));
    }

    #[test]
    fn test_state_mismatch_display_carries_both_values() {
        let error = AuthorizationError::StateMismatch {
            expected: "S1".to_string(),
            actual: Some("S2".to_string()),
        };
        let s = error.to_string();
        assert!(s.contains("'S1'"));
        assert!(s.contains("'S2'"));

        let missing = AuthorizationError::StateMismatch {
            expected: "S1".to_string(),
            actual: None,
        };
        assert!(missing.to_string().contains("no state"));
    }

    #[test]
    fn test_oauth_authorization_error_display() {
        let error = AuthorizationError::OAuth {
            error: "access_denied".to_string(),
            description: Some("user said no".to_string()),
            parameters: vec![],
        };
        assert_eq!(
            error.to_string(),
            "authorization server returned error 'access_denied': user said no"
        );
    }

    #[test]
    fn test_registration_invariant_display() {
        let error = RegistrationError::Invariant {
            has_client_uri: true,
            has_access_token: false,
        };
        let s = error.to_string();
        assert!(s.contains("present: true"));
        assert!(s.contains("present: false"));
    }

    #[test]
    fn test_id_token_rule_wraps_into_token_error() {
        let rule = IdTokenRule::Expired {
            expires_at: 10,
            now: 20,
        };
        let error: TokenError = rule.clone().into();
        assert!(matches!(error, TokenError::IdTokenValidation(r) if r == rule));
    }

    #[test]
    fn test_session_error_preserves_stage_error() {
        let error: SessionError = AuthorizationError::Cancelled.into();
        assert!(error.is_cancelled());
        assert_eq!(error.to_string(), "authorization cancelled by the user");

        let error: SessionError = DiscoveryError::InvalidDocument("Missing field: issuer".into()).into();
        assert!(!error.is_cancelled());
        assert!(matches!(
            error,
            SessionError::Discovery(DiscoveryError::InvalidDocument(_))
        ));
    }

    #[test]
    fn test_token_oauth_error_display() {
        let error = TokenError::OAuth {
            status: 400,
            error: "invalid_grant".to_string(),
            description: None,
        };
        assert_eq!(
            error.to_string(),
            "token endpoint returned OAuth error 'invalid_grant' (HTTP 400)"
        );
    }

    #[test]
    fn test_json_error_conversion() {
        let json_error = serde_json::from_str::<serde_json::Value>("{invalid json}").unwrap_err();
        let error: GetTokensError = json_error.into();
        assert!(matches!(error, GetTokensError::Serialization(_)));
    }

    #[test]
    fn test_error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<GetTokensError>();
        assert_send_sync::<SessionError>();
    }
}
