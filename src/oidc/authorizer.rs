//! Authorization request construction and callback handling
//!
//! [`PkceAuthorizer`] drives one authorization attempt through the states
//!
//! ```text
//! Idle -> Requested -> AwaitingCallback -> Completed | Failed | Cancelled
//! ```
//!
//! It prepares an [`AuthorizationRequest`] (fresh `state`, `nonce` and PKCE
//! pair), renders the authorization URL, hands that URL to an external
//! [`UserAgent`] and parses the single callback URL it returns into an
//! [`AuthorizationResponse`].
//!
//! # References
//!
//! - RFC 6749 section 4.1 <https://www.rfc-editor.org/rfc/rfc6749#section-4.1>
//! - RFC 8252 OAuth 2.0 for Native Apps <https://www.rfc-editor.org/rfc/rfc8252>
//! - OpenID Connect Core 1.0 section 3.1.2

use std::fmt;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use url::Url;

use crate::error::AuthorizationError;
use crate::oidc::discovery::ProviderConfiguration;
use crate::oidc::pkce::{
    join_scopes, random_value, OsRandom, PkcePair, RandomSource, CODE_CHALLENGE_METHOD,
    RANDOM_VALUE_BYTES,
};
use crate::oidc::redact;
use crate::oidc::user_agent::{UserAgent, UserAgentOutcome};

/// Response types this client can complete.
pub const SUPPORTED_RESPONSE_TYPES: [&str; 3] = ["code", "code id_token", "id_token code"];

/// Returns `true` if `response_type` is one of [`SUPPORTED_RESPONSE_TYPES`].
pub fn is_supported_response_type(response_type: &str) -> bool {
    SUPPORTED_RESPONSE_TYPES.contains(&response_type)
}

// ---------------------------------------------------------------------------
// AuthorizationRequest
// ---------------------------------------------------------------------------

/// One authorization attempt.
///
/// Immutable once built.  The code verifier never leaves process memory
/// except in the single token request that redeems the code.
#[derive(Clone)]
pub struct AuthorizationRequest {
    configuration: Arc<ProviderConfiguration>,
    client_id: String,
    client_secret: Option<String>,
    scope: String,
    redirect_uri: Url,
    response_type: String,
    state: String,
    nonce: String,
    pkce: PkcePair,
}

impl AuthorizationRequest {
    /// Builds a request with fresh `state`, `nonce` and PKCE values drawn
    /// from `random`.
    ///
    /// # Panics
    ///
    /// Panics if a scope token is malformed or `response_type` is not one of
    /// [`SUPPORTED_RESPONSE_TYPES`].
    #[allow(clippy::too_many_arguments)]
    pub fn new<S: AsRef<str>>(
        configuration: Arc<ProviderConfiguration>,
        client_id: impl Into<String>,
        client_secret: Option<String>,
        scopes: &[S],
        redirect_uri: Url,
        response_type: &str,
        random: &dyn RandomSource,
    ) -> Self {
        assert!(
            is_supported_response_type(response_type),
            "unsupported response type {response_type:?}"
        );
        let scope = join_scopes(scopes);
        let state = random_value(random, RANDOM_VALUE_BYTES);
        let nonce = random_value(random, RANDOM_VALUE_BYTES);
        let pkce = PkcePair::generate(random);
        Self {
            configuration,
            client_id: client_id.into(),
            client_secret,
            scope,
            redirect_uri,
            response_type: response_type.to_string(),
            state,
            nonce,
            pkce,
        }
    }

    pub fn configuration(&self) -> &Arc<ProviderConfiguration> {
        &self.configuration
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn client_secret(&self) -> Option<&str> {
        self.client_secret.as_deref()
    }

    /// Space-joined scope string.
    pub fn scope(&self) -> &str {
        &self.scope
    }

    pub fn redirect_uri(&self) -> &Url {
        &self.redirect_uri
    }

    pub fn response_type(&self) -> &str {
        &self.response_type
    }

    pub fn state(&self) -> &str {
        &self.state
    }

    pub fn nonce(&self) -> &str {
        &self.nonce
    }

    pub fn code_verifier(&self) -> &str {
        &self.pkce.verifier
    }

    pub fn code_challenge(&self) -> &str {
        &self.pkce.challenge
    }

    pub fn code_challenge_method(&self) -> &'static str {
        CODE_CHALLENGE_METHOD
    }

    /// Renders the authorization endpoint URL for this request.
    ///
    /// Parameters are appended to any query the endpoint already carries and
    /// encoded as `application/x-www-form-urlencoded`, so a literal `+`
    /// becomes `%2B` and a space becomes `+`.
    pub fn authorization_url(&self) -> Url {
        let mut url = self.configuration.authorization_endpoint().clone();
        url.query_pairs_mut()
            .append_pair("response_type", &self.response_type)
            .append_pair("client_id", &self.client_id)
            .append_pair("redirect_uri", self.redirect_uri.as_str())
            .append_pair("scope", &self.scope)
            .append_pair("state", &self.state)
            .append_pair("nonce", &self.nonce)
            .append_pair("code_challenge", &self.pkce.challenge)
            .append_pair("code_challenge_method", CODE_CHALLENGE_METHOD);
        url
    }

    /// Returns `true` if `url` is addressed to this request's redirect URI.
    ///
    /// Scheme, authority and path must match; query and fragment are
    /// ignored.  User agents use this to pick the callback out of any other
    /// navigation.
    pub fn is_callback(&self, url: &Url) -> bool {
        url.scheme() == self.redirect_uri.scheme()
            && url.host_str() == self.redirect_uri.host_str()
            && url.port_or_known_default() == self.redirect_uri.port_or_known_default()
            && url.path() == self.redirect_uri.path()
    }
}

impl fmt::Debug for AuthorizationRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthorizationRequest")
            .field("issuer", &self.configuration.issuer())
            .field("client_id", &self.client_id)
            .field("client_secret", &self.client_secret.as_deref().map(redact))
            .field("scope", &self.scope)
            .field("redirect_uri", &self.redirect_uri.as_str())
            .field("response_type", &self.response_type)
            .field("state", &self.state)
            .field("nonce", &self.nonce)
            .field("pkce", &self.pkce)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// AuthorizationResponse
// ---------------------------------------------------------------------------

/// A successful authorization callback.
///
/// Holds a shared reference to the request it answers; requests never point
/// back at responses.
#[derive(Clone)]
pub struct AuthorizationResponse {
    request: Arc<AuthorizationRequest>,
    code: String,
    state: String,
    id_token: Option<String>,
    parameters: Vec<(String, String)>,
}

impl AuthorizationResponse {
    /// Parses `callback` as the answer to `request`.
    ///
    /// Parameters are read from the query, or from the fragment when the
    /// query carries none (hybrid responses default to fragment encoding).
    ///
    /// # Errors
    ///
    /// - [`AuthorizationError::OAuth`] when an `error` parameter is present
    /// - [`AuthorizationError::StateMismatch`] when `state` is absent or not
    ///   byte-equal to the request's `state`, whether or not a code is present
    /// - [`AuthorizationError::MissingCode`] when `code` is absent
    pub fn from_callback(
        request: Arc<AuthorizationRequest>,
        callback: &Url,
    ) -> Result<Self, AuthorizationError> {
        let parameters = callback_parameters(callback);
        let get = |name: &str| {
            parameters
                .iter()
                .find(|(k, _)| k == name)
                .map(|(_, v)| v.clone())
        };

        if let Some(error) = get("error") {
            return Err(AuthorizationError::OAuth {
                error,
                description: get("error_description"),
                parameters,
            });
        }

        let state = get("state");
        if state.as_deref() != Some(request.state()) {
            return Err(AuthorizationError::StateMismatch {
                expected: request.state().to_string(),
                actual: state,
            });
        }

        let code = get("code").ok_or_else(|| AuthorizationError::MissingCode {
            callback: strip_parameters(callback),
        })?;

        Ok(Self {
            code,
            state: request.state().to_string(),
            id_token: get("id_token"),
            parameters,
            request,
        })
    }

    /// The originating request.
    pub fn request(&self) -> &Arc<AuthorizationRequest> {
        &self.request
    }

    pub fn authorization_code(&self) -> &str {
        &self.code
    }

    pub fn state(&self) -> &str {
        &self.state
    }

    /// Front-channel ID Token of a hybrid response, if any.
    pub fn id_token(&self) -> Option<&str> {
        self.id_token.as_deref()
    }

    /// Every callback parameter in received order.
    pub fn parameters(&self) -> &[(String, String)] {
        &self.parameters
    }
}

impl fmt::Debug for AuthorizationResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthorizationResponse")
            .field("authorization_code", &redact(&self.code))
            .field("state", &self.state)
            .field("id_token", &self.id_token.as_deref().map(redact))
            .finish_non_exhaustive()
    }
}

fn callback_parameters(callback: &Url) -> Vec<(String, String)> {
    let from_query: Vec<(String, String)> = callback.query_pairs().into_owned().collect();
    if !from_query.is_empty() {
        return from_query;
    }
    callback
        .fragment()
        .map(|f| {
            url::form_urlencoded::parse(f.as_bytes())
                .into_owned()
                .collect()
        })
        .unwrap_or_default()
}

fn strip_parameters(url: &Url) -> String {
    let mut url = url.clone();
    url.set_query(None);
    url.set_fragment(None);
    url.to_string()
}

// ---------------------------------------------------------------------------
// PkceAuthorizer
// ---------------------------------------------------------------------------

/// Lifecycle of one authorization attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthorizerState {
    Idle,
    Requested,
    AwaitingCallback,
    Completed,
    Failed,
    Cancelled,
}

impl AuthorizerState {
    pub fn name(&self) -> &'static str {
        match self {
            AuthorizerState::Idle => "idle",
            AuthorizerState::Requested => "requested",
            AuthorizerState::AwaitingCallback => "awaiting callback",
            AuthorizerState::Completed => "completed",
            AuthorizerState::Failed => "failed",
            AuthorizerState::Cancelled => "cancelled",
        }
    }

    /// `true` for `Completed`, `Failed` and `Cancelled`.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            AuthorizerState::Completed | AuthorizerState::Failed | AuthorizerState::Cancelled
        )
    }
}

/// Drives a single authorization attempt.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use gettokens::oidc::authorizer::{AuthorizerState, PkceAuthorizer};
/// use gettokens::oidc::ProviderConfiguration;
///
/// let document = serde_json::json!({
///     "issuer": "https://op.example",
///     "authorization_endpoint": "https://op.example/auth",
///     "token_endpoint": "https://op.example/token",
///     "jwks_uri": "https://op.example/jwks",
///     "response_types_supported": ["code"],
///     "subject_types_supported": ["public"],
///     "id_token_signing_alg_values_supported": ["RS256"]
/// });
/// let configuration = Arc::new(
///     ProviderConfiguration::from_json("https://op.example", document.to_string().as_bytes()).unwrap(),
/// );
///
/// let mut authorizer = PkceAuthorizer::new();
/// let request = authorizer
///     .build_request(
///         configuration,
///         "client-1",
///         None,
///         &["openid"],
///         url::Url::parse("com.example.app:/callback").unwrap(),
///     )
///     .unwrap();
/// assert_eq!(authorizer.state(), AuthorizerState::Requested);
///
/// let callback = url::Url::parse(&format!(
///     "com.example.app:/callback?code=xyz&state={}",
///     request.state()
/// ))
/// .unwrap();
/// let response = authorizer.handle_callback(&callback).unwrap();
/// assert_eq!(response.authorization_code(), "xyz");
/// assert_eq!(authorizer.state(), AuthorizerState::Completed);
/// ```
#[derive(Debug)]
pub struct PkceAuthorizer {
    random: Arc<dyn RandomSource>,
    response_type: String,
    state: AuthorizerState,
    request: Option<Arc<AuthorizationRequest>>,
}

impl Default for PkceAuthorizer {
    fn default() -> Self {
        Self::new()
    }
}

impl PkceAuthorizer {
    /// Creates an idle authorizer using the OS CSPRNG and `response_type=code`.
    pub fn new() -> Self {
        Self::with_random(Arc::new(OsRandom))
    }

    /// Creates an idle authorizer drawing randomness from `random`.
    pub fn with_random(random: Arc<dyn RandomSource>) -> Self {
        Self {
            random,
            response_type: "code".to_string(),
            state: AuthorizerState::Idle,
            request: None,
        }
    }

    /// Sets the response type for subsequent requests.
    ///
    /// # Panics
    ///
    /// Panics if `response_type` is not one of [`SUPPORTED_RESPONSE_TYPES`].
    pub fn with_response_type(mut self, response_type: &str) -> Self {
        assert!(
            is_supported_response_type(response_type),
            "unsupported response type {response_type:?}"
        );
        self.response_type = response_type.to_string();
        self
    }

    pub fn state(&self) -> AuthorizerState {
        self.state
    }

    /// The request of the current attempt, if one was built.
    pub fn request(&self) -> Option<&Arc<AuthorizationRequest>> {
        self.request.as_ref()
    }

    /// Starts a new attempt and moves to `Requested`.
    ///
    /// Any earlier request is discarded.
    ///
    /// # Errors
    ///
    /// Returns [`AuthorizationError::InvalidState`] while a callback is
    /// still awaited.
    ///
    /// # Panics
    ///
    /// Panics on malformed scope tokens.
    pub fn build_request<S: AsRef<str>>(
        &mut self,
        configuration: Arc<ProviderConfiguration>,
        client_id: &str,
        client_secret: Option<&str>,
        scopes: &[S],
        redirect_uri: Url,
    ) -> Result<Arc<AuthorizationRequest>, AuthorizationError> {
        if self.state == AuthorizerState::AwaitingCallback {
            return Err(self.invalid("build a request"));
        }
        let request = Arc::new(AuthorizationRequest::new(
            configuration,
            client_id,
            client_secret.map(str::to_string),
            scopes,
            redirect_uri,
            &self.response_type,
            self.random.as_ref(),
        ));
        tracing::debug!(
            client_id,
            scope = request.scope(),
            response_type = request.response_type(),
            "built authorization request"
        );
        self.request = Some(Arc::clone(&request));
        self.state = AuthorizerState::Requested;
        Ok(request)
    }

    /// Authorization URL of the current request.
    ///
    /// # Errors
    ///
    /// Returns [`AuthorizationError::InvalidState`] if no request exists.
    pub fn authorization_url(&self) -> Result<Url, AuthorizationError> {
        self.request
            .as_ref()
            .map(|r| r.authorization_url())
            .ok_or_else(|| self.invalid("render an authorization URL"))
    }

    /// Presents the authorization URL through `user_agent` and processes the
    /// callback it delivers.
    ///
    /// The wait is unbounded except for `cancel`; triggering it, or the user
    /// agent reporting cancellation, ends in `Cancelled`.
    ///
    /// # Errors
    ///
    /// Returns [`AuthorizationError::Cancelled`] on cancellation, any error
    /// of [`PkceAuthorizer::handle_callback`], or
    /// [`AuthorizationError::UserAgent`] if the agent itself fails.
    pub async fn authorize(
        &mut self,
        user_agent: &dyn UserAgent,
        cancel: &CancellationToken,
    ) -> Result<AuthorizationResponse, AuthorizationError> {
        if self.state != AuthorizerState::Requested {
            return Err(self.invalid("start authorization"));
        }
        let request = match &self.request {
            Some(request) => Arc::clone(request),
            None => return Err(self.invalid("start authorization")),
        };
        let url = request.authorization_url();
        self.state = AuthorizerState::AwaitingCallback;
        tracing::info!(endpoint = %request.configuration().authorization_endpoint(), "awaiting authorization callback");

        let outcome = tokio::select! {
            _ = cancel.cancelled() => Ok(UserAgentOutcome::Cancelled),
            outcome = user_agent.present(&url, &request) => outcome,
        };

        match outcome {
            Ok(UserAgentOutcome::Callback(callback)) => self.handle_callback(&callback),
            Ok(UserAgentOutcome::Cancelled) => {
                tracing::info!("authorization cancelled by user");
                self.state = AuthorizerState::Cancelled;
                Err(AuthorizationError::Cancelled)
            }
            Err(e) => {
                tracing::warn!(error = %e, "user agent failed");
                self.state = AuthorizerState::Failed;
                Err(e)
            }
        }
    }

    /// Parses the callback for the current request and moves to
    /// `Completed` or `Failed`.
    ///
    /// # Errors
    ///
    /// See [`AuthorizationResponse::from_callback`]; additionally
    /// [`AuthorizationError::InvalidState`] if no attempt is in progress.
    pub fn handle_callback(
        &mut self,
        callback: &Url,
    ) -> Result<AuthorizationResponse, AuthorizationError> {
        if !matches!(
            self.state,
            AuthorizerState::Requested | AuthorizerState::AwaitingCallback
        ) {
            return Err(self.invalid("handle a callback"));
        }
        let request = match &self.request {
            Some(request) => Arc::clone(request),
            None => return Err(self.invalid("handle a callback")),
        };
        match AuthorizationResponse::from_callback(request, callback) {
            Ok(response) => {
                tracing::info!(code = %redact(response.authorization_code()), "authorization completed");
                self.state = AuthorizerState::Completed;
                Ok(response)
            }
            Err(e) => {
                tracing::warn!(error = %e, "authorization callback rejected");
                self.state = AuthorizerState::Failed;
                Err(e)
            }
        }
    }

    fn invalid(&self, operation: &'static str) -> AuthorizationError {
        AuthorizationError::InvalidState {
            operation,
            state: self.state.name(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oidc::pkce::{code_challenge, SequenceRandom};
    use serde_json::json;

    fn configuration(authorization_endpoint: &str) -> Arc<ProviderConfiguration> {
        let document = json!({
            "issuer": "https://op.example",
            "authorization_endpoint": authorization_endpoint,
            "token_endpoint": "https://op.example/token",
            "jwks_uri": "https://op.example/jwks",
            "response_types_supported": ["code"],
            "subject_types_supported": ["public"],
            "id_token_signing_alg_values_supported": ["RS256"]
        });
        Arc::new(ProviderConfiguration::from_json("test", document.to_string().as_bytes()).unwrap())
    }

    fn redirect() -> Url {
        Url::parse("com.example.app:/callback").unwrap()
    }

    fn request() -> Arc<AuthorizationRequest> {
        Arc::new(AuthorizationRequest::new(
            configuration("https://op.example/auth"),
            "client-1",
            None,
            &["openid", "profile"],
            redirect(),
            "code",
            &OsRandom,
        ))
    }

    fn callback(query: &str) -> Url {
        Url::parse(&format!("com.example.app:/callback?{query}")).unwrap()
    }

    #[test]
    fn test_request_values_are_well_formed() {
        let request = request();
        assert_eq!(request.state().len(), 43);
        assert_eq!(request.nonce().len(), 43);
        assert_ne!(request.state(), request.nonce());
        assert_eq!(code_challenge(request.code_verifier()), request.code_challenge());
        assert_eq!(request.code_challenge_method(), "S256");
        assert_eq!(request.scope(), "openid profile");
    }

    #[test]
    fn test_same_random_source_seed_gives_same_request() {
        let build = || {
            AuthorizationRequest::new(
                configuration("https://op.example/auth"),
                "c",
                None,
                &["openid"],
                redirect(),
                "code",
                &SequenceRandom::new(42),
            )
        };
        let (a, b) = (build(), build());
        assert_eq!(a.state(), b.state());
        assert_eq!(a.nonce(), b.nonce());
        assert_eq!(a.code_verifier(), b.code_verifier());
        assert_eq!(a.authorization_url(), b.authorization_url());
    }

    #[test]
    fn test_authorization_url_parameters() {
        let request = request();
        let url = request.authorization_url();
        let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        let names: Vec<&str> = pairs.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "response_type",
                "client_id",
                "redirect_uri",
                "scope",
                "state",
                "nonce",
                "code_challenge",
                "code_challenge_method"
            ]
        );
        let get = |k: &str| pairs.iter().find(|(n, _)| n == k).map(|(_, v)| v.as_str());
        assert_eq!(get("response_type"), Some("code"));
        assert_eq!(get("redirect_uri"), Some("com.example.app:/callback"));
        assert_eq!(get("scope"), Some("openid profile"));
        assert_eq!(get("code_challenge"), Some(request.code_challenge()));
        assert!(url.as_str().contains("scope=openid+profile"));
    }

    #[test]
    fn test_authorization_url_encodes_plus_and_keeps_existing_query() {
        let request = AuthorizationRequest::new(
            configuration("https://op.example/auth?tenant=a"),
            "client+1",
            None,
            &["openid"],
            redirect(),
            "code",
            &OsRandom,
        );
        let url = request.authorization_url();
        assert!(url.as_str().starts_with("https://op.example/auth?tenant=a&response_type=code"));
        assert!(url.as_str().contains("client_id=client%2B1"));
    }

    #[test]
    #[should_panic(expected = "unsupported response type")]
    fn test_implicit_response_type_panics() {
        AuthorizationRequest::new(
            configuration("https://op.example/auth"),
            "c",
            None,
            &["openid"],
            redirect(),
            "token",
            &OsRandom,
        );
    }

    #[test]
    fn test_callback_with_matching_state() {
        let request = Arc::new(AuthorizationRequest::new(
            configuration("https://op.example/auth"),
            "c",
            None,
            &["openid"],
            redirect(),
            "code",
            &OsRandom,
        ));
        let url = callback(&format!("code=xyz&state={}", request.state()));
        let response = AuthorizationResponse::from_callback(Arc::clone(&request), &url).unwrap();
        assert_eq!(response.authorization_code(), "xyz");
        assert_eq!(response.state(), request.state());
        assert!(Arc::ptr_eq(response.request(), &request));
    }

    #[test]
    fn test_state_mismatch_regardless_of_code() {
        let request = request();
        for query in ["code=xyz&state=S2", "state=S2", "code=xyz"] {
            let err = AuthorizationResponse::from_callback(Arc::clone(&request), &callback(query))
                .unwrap_err();
            match err {
                AuthorizationError::StateMismatch { expected, .. } => {
                    assert_eq!(expected, request.state())
                }
                other => panic!("expected StateMismatch for {query}, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_error_callback_carries_parameters() {
        let err = AuthorizationResponse::from_callback(
            request(),
            &callback("error=access_denied&error_description=nope&state=whatever"),
        )
        .unwrap_err();
        match err {
            AuthorizationError::OAuth {
                error,
                description,
                parameters,
            } => {
                assert_eq!(error, "access_denied");
                assert_eq!(description.as_deref(), Some("nope"));
                assert_eq!(parameters.len(), 3);
            }
            other => panic!("expected OAuth error, got {other:?}"),
        }
    }

    #[test]
    fn test_missing_code() {
        let request = request();
        let err = AuthorizationResponse::from_callback(
            Arc::clone(&request),
            &callback(&format!("state={}", request.state())),
        )
        .unwrap_err();
        assert!(matches!(err, AuthorizationError::MissingCode { .. }));
    }

    #[test]
    fn test_fragment_parameters_for_hybrid_response() {
        let request = request();
        let url = Url::parse(&format!(
            "com.example.app:/callback#code=abc&id_token=h.p.s&state={}",
            request.state()
        ))
        .unwrap();
        let response = AuthorizationResponse::from_callback(request, &url).unwrap();
        assert_eq!(response.authorization_code(), "abc");
        assert_eq!(response.id_token(), Some("h.p.s"));
    }

    #[test]
    fn test_is_callback_predicate() {
        let request = request();
        assert!(request.is_callback(&callback("code=1")));
        assert!(!request.is_callback(&Url::parse("com.example.app:/other?code=1").unwrap()));
        assert!(!request.is_callback(&Url::parse("https://op.example/callback").unwrap()));
    }

    #[test]
    fn test_state_machine_transitions() {
        let mut authorizer = PkceAuthorizer::new();
        assert_eq!(authorizer.state(), AuthorizerState::Idle);
        assert!(matches!(
            authorizer.handle_callback(&callback("code=1")),
            Err(AuthorizationError::InvalidState { .. })
        ));

        authorizer
            .build_request(configuration("https://op.example/auth"), "c", None, &["openid"], redirect())
            .unwrap();
        assert_eq!(authorizer.state(), AuthorizerState::Requested);

        let err = authorizer.handle_callback(&callback("code=1&state=wrong")).unwrap_err();
        assert!(matches!(err, AuthorizationError::StateMismatch { .. }));
        assert_eq!(authorizer.state(), AuthorizerState::Failed);
        assert!(authorizer.state().is_terminal());

        // A failed attempt cannot be resumed with a different callback.
        assert!(matches!(
            authorizer.handle_callback(&callback("code=1")),
            Err(AuthorizationError::InvalidState { .. })
        ));
    }

    #[test]
    fn test_debug_redacts_verifier() {
        let request = request();
        assert!(!format!("{request:?}").contains(request.code_verifier()));
    }
}
