//! Session state and pipeline driver
//!
//! [`SessionState`] is an immutable snapshot of everything a session has
//! accumulated: provider configuration, client registration, the latest
//! authorization response, and the tokens with the DPoP key they are bound
//! to.  Each stage produces a *new* snapshot.  Replacing an upstream stage
//! clears everything downstream of it:
//!
//! ```text
//! configuration -> registration -> authorization -> tokens
//! ```
//!
//! [`Session`] owns the current snapshot behind a mutex and runs the stages.
//! Token exchanges hold the lock for their whole round trip, so a refresh and
//! a code exchange can never interleave.

use std::sync::Arc;

use chrono::Duration;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::error::SessionError;
use crate::oidc::authorizer::{AuthorizationResponse, PkceAuthorizer};
use crate::oidc::discovery::{DiscoveryClient, ProviderConfiguration};
use crate::oidc::dpop::{DpopKeyPair, DpopProofFactory};
use crate::oidc::pkce::{OsRandom, RandomSource};
use crate::oidc::registration::{RegistrationClient, RegistrationRequest, RegistrationResult};
use crate::oidc::resource::{ProtectedResourceClient, RefreshPolicy, DEFAULT_REFRESH_LEEWAY_SECONDS};
use crate::oidc::token::{TokenExchanger, TokenRequest, TokenResponse};
use crate::oidc::transport::HttpClient;
use crate::oidc::user_agent::UserAgent;

// ---------------------------------------------------------------------------
// SessionState
// ---------------------------------------------------------------------------

/// The authorization stage output and whether its code was already redeemed.
#[derive(Debug, Clone)]
pub struct AuthorizationStage {
    pub response: AuthorizationResponse,
    pub consumed: bool,
}

/// Tokens together with the key their access token is bound to.
#[derive(Debug, Clone)]
pub struct BoundTokens {
    pub tokens: TokenResponse,
    pub key_pair: DpopKeyPair,
}

/// Immutable snapshot of one session.
#[derive(Debug, Clone, Default)]
pub struct SessionState {
    configuration: Option<Arc<ProviderConfiguration>>,
    registration: Option<Arc<RegistrationResult>>,
    authorization: Option<AuthorizationStage>,
    tokens: Option<Arc<BoundTokens>>,
    needs_token_refresh: bool,
}

impl SessionState {
    /// An empty session.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn configuration(&self) -> Option<&Arc<ProviderConfiguration>> {
        self.configuration.as_ref()
    }

    pub fn registration(&self) -> Option<&Arc<RegistrationResult>> {
        self.registration.as_ref()
    }

    pub fn authorization(&self) -> Option<&AuthorizationStage> {
        self.authorization.as_ref()
    }

    pub fn tokens(&self) -> Option<&Arc<BoundTokens>> {
        self.tokens.as_ref()
    }

    pub fn needs_token_refresh(&self) -> bool {
        self.needs_token_refresh
    }

    /// Starts over from a new provider configuration.
    pub fn with_configuration(&self, configuration: Arc<ProviderConfiguration>) -> Self {
        Self {
            configuration: Some(configuration),
            ..Self::default()
        }
    }

    /// Records a registration, clearing authorization and tokens.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::MissingStage`] without a configuration.
    pub fn with_registration(&self, registration: RegistrationResult) -> Result<Self, SessionError> {
        let configuration = self.require_configuration("record a registration")?;
        Ok(Self {
            configuration: Some(Arc::clone(configuration)),
            registration: Some(Arc::new(registration)),
            ..Self::default()
        })
    }

    /// Records an authorization response, clearing tokens.
    ///
    /// `issued_for` is the registration the request was built from.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::MissingStage`] without a registration and
    /// [`SessionError::Stale`] if the response answers a request made for a
    /// different configuration or registration.
    pub fn with_authorization(
        &self,
        issued_for: &Arc<RegistrationResult>,
        response: AuthorizationResponse,
    ) -> Result<Self, SessionError> {
        let configuration = self.require_configuration("record an authorization")?;
        let registration = self.require_registration("record an authorization")?;
        let request = response.request();
        if !Arc::ptr_eq(request.configuration(), configuration) {
            return Err(SessionError::Stale {
                stage: "authorization",
                upstream: "provider configuration",
            });
        }
        if !Arc::ptr_eq(issued_for, registration) || request.client_id() != registration.client_id {
            return Err(SessionError::Stale {
                stage: "authorization",
                upstream: "registration",
            });
        }
        Ok(Self {
            configuration: Some(Arc::clone(configuration)),
            registration: Some(Arc::clone(registration)),
            authorization: Some(AuthorizationStage {
                response,
                consumed: false,
            }),
            tokens: None,
            needs_token_refresh: false,
        })
    }

    /// Marks the authorization code as redeemed.
    pub fn with_authorization_consumed(&self) -> Self {
        let mut next = self.clone();
        if let Some(stage) = &mut next.authorization {
            stage.consumed = true;
        }
        next
    }

    /// Records tokens and the key they are bound to.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::MissingStage`] without a registration.
    pub fn with_tokens(&self, tokens: TokenResponse, key_pair: DpopKeyPair) -> Result<Self, SessionError> {
        self.require_registration("record tokens")?;
        Ok(Self {
            tokens: Some(Arc::new(BoundTokens { tokens, key_pair })),
            needs_token_refresh: false,
            ..self.clone()
        })
    }

    /// Sets or clears the forced-refresh flag.
    pub fn with_needs_token_refresh(&self, needs_token_refresh: bool) -> Self {
        Self {
            needs_token_refresh,
            ..self.clone()
        }
    }

    fn require_configuration(&self, operation: &'static str) -> Result<&Arc<ProviderConfiguration>, SessionError> {
        self.configuration.as_ref().ok_or(SessionError::MissingStage {
            operation,
            missing: "discovery",
        })
    }

    fn require_registration(&self, operation: &'static str) -> Result<&Arc<RegistrationResult>, SessionError> {
        self.registration.as_ref().ok_or(SessionError::MissingStage {
            operation,
            missing: "registration",
        })
    }

    fn require_tokens(&self, operation: &'static str) -> Result<&Arc<BoundTokens>, SessionError> {
        self.tokens.as_ref().ok_or(SessionError::MissingStage {
            operation,
            missing: "token exchange",
        })
    }
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// Client settings a session registers and authorizes with.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub client_name: String,
    pub redirect_uri: Url,
    pub scopes: Vec<String>,
    pub response_type: String,
    pub refresh_leeway: Duration,
    pub initial_access_token: Option<String>,
}

impl SessionSettings {
    /// Settings with the default scopes, `response_type=code` and a 60 second
    /// refresh leeway.
    pub fn new(client_name: impl Into<String>, redirect_uri: Url) -> Self {
        Self {
            client_name: client_name.into(),
            redirect_uri,
            scopes: ["openid", "profile", "offline_access"]
                .into_iter()
                .map(str::to_string)
                .collect(),
            response_type: "code".to_string(),
            refresh_leeway: Duration::seconds(DEFAULT_REFRESH_LEEWAY_SECONDS),
            initial_access_token: None,
        }
    }
}

/// Single-owner driver of one relying-party session.
///
/// # Examples
///
/// ```no_run
/// use std::sync::Arc;
/// use std::time::Duration;
/// use gettokens::oidc::session::{Session, SessionSettings};
/// use gettokens::oidc::transport::ReqwestHttpClient;
/// use gettokens::oidc::user_agent::ConsoleUserAgent;
/// use tokio_util::sync::CancellationToken;
///
/// # async fn example() -> anyhow::Result<()> {
/// let http = Arc::new(ReqwestHttpClient::new(Duration::from_secs(30))?);
/// let settings = SessionSettings::new("gettokens", url::Url::parse("com.example.app:/callback")?);
/// let session = Session::new(http, settings);
///
/// let state = session
///     .login("https://op.example", &ConsoleUserAgent::stdin(), &CancellationToken::new())
///     .await?;
/// assert!(state.tokens().is_some());
/// let userinfo = session.fetch_user_info().await?;
/// println!("{userinfo}");
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct Session {
    settings: SessionSettings,
    random: Arc<dyn RandomSource>,
    discovery: DiscoveryClient,
    registration: RegistrationClient,
    exchanger: TokenExchanger,
    resource: ProtectedResourceClient,
    state: Mutex<SessionState>,
}

impl Session {
    /// Creates an empty session using the OS CSPRNG.
    pub fn new(http: Arc<dyn HttpClient>, settings: SessionSettings) -> Self {
        Self::with_random(http, settings, Arc::new(OsRandom))
    }

    /// Creates an empty session drawing protocol randomness from `random`.
    pub fn with_random(
        http: Arc<dyn HttpClient>,
        settings: SessionSettings,
        random: Arc<dyn RandomSource>,
    ) -> Self {
        let dpop = DpopProofFactory::new(Arc::clone(&random));
        let exchanger = TokenExchanger::new(Arc::clone(&http), dpop.clone());
        let resource = ProtectedResourceClient::new(Arc::clone(&http), dpop, exchanger.clone())
            .with_refresh_leeway(settings.refresh_leeway);
        Self {
            discovery: DiscoveryClient::new(Arc::clone(&http)),
            registration: RegistrationClient::new(http),
            exchanger,
            resource,
            random,
            settings,
            state: Mutex::new(SessionState::new()),
        }
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    /// A copy of the current snapshot.
    pub async fn snapshot(&self) -> SessionState {
        self.state.lock().await.clone()
    }

    /// Discovers `issuer`, replacing the whole session on success.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Discovery`]; the previous state is kept.
    pub async fn discover(&self, issuer: &str) -> Result<Arc<ProviderConfiguration>, SessionError> {
        let mut state = self.state.lock().await;
        let configuration = Arc::new(self.discovery.discover(issuer).await?);
        *state = state.with_configuration(Arc::clone(&configuration));
        Ok(configuration)
    }

    /// Registers a client with the discovered provider.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::MissingStage`] before discovery, or
    /// [`SessionError::Registration`].
    pub async fn register(&self) -> Result<Arc<RegistrationResult>, SessionError> {
        let mut state = self.state.lock().await;
        let configuration = Arc::clone(state.require_configuration("register")?);

        let mut request = RegistrationRequest::new(
            vec![self.settings.redirect_uri.clone()],
            self.settings.client_name.clone(),
        );
        if let Some(token) = &self.settings.initial_access_token {
            request = request.with_initial_access_token(token.clone());
        }

        let result = self.registration.register_with(&configuration, request).await?;
        *state = state.with_registration(result)?;
        state
            .registration()
            .cloned()
            .ok_or(SessionError::MissingStage {
                operation: "register",
                missing: "registration",
            })
    }

    /// Runs the authorization step through `user_agent`.
    ///
    /// The state lock is released while waiting for the user; if discovery
    /// or registration is rerun meanwhile, the late callback is rejected as
    /// stale.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::MissingStage`] before registration,
    /// [`SessionError::Authorization`] (including cancellation), or
    /// [`SessionError::Stale`].
    pub async fn authorize(
        &self,
        user_agent: &dyn UserAgent,
        cancel: &CancellationToken,
    ) -> Result<AuthorizationResponse, SessionError> {
        let mut authorizer = PkceAuthorizer::with_random(Arc::clone(&self.random))
            .with_response_type(&self.settings.response_type);
        let registration = {
            let state = self.state.lock().await;
            let configuration = Arc::clone(state.require_configuration("authorize")?);
            let registration = Arc::clone(state.require_registration("authorize")?);
            authorizer.build_request(
                configuration,
                &registration.client_id,
                registration.client_secret.as_deref(),
                &self.settings.scopes,
                self.settings.redirect_uri.clone(),
            )?;
            registration
        };

        let response = authorizer.authorize(user_agent, cancel).await?;

        let mut state = self.state.lock().await;
        *state = state.with_authorization(&registration, response.clone())?;
        Ok(response)
    }

    /// Redeems the stored authorization code.
    ///
    /// A fresh DPoP key pair is generated for the new tokens.  The code is
    /// marked used whatever the outcome, so a failed exchange needs a new
    /// authorization.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::MissingStage`] without an authorization,
    /// [`SessionError::AuthorizationConsumed`] if the code was already
    /// redeemed, or [`SessionError::Token`].
    pub async fn exchange_code(&self) -> Result<Arc<BoundTokens>, SessionError> {
        let mut state = self.state.lock().await;
        let stage = state.authorization().cloned().ok_or(SessionError::MissingStage {
            operation: "exchange the authorization code",
            missing: "authorization",
        })?;
        if stage.consumed {
            return Err(SessionError::AuthorizationConsumed);
        }
        *state = state.with_authorization_consumed();

        let key_pair = DpopKeyPair::generate_blocking()
            .await
            .map_err(|e| SessionError::Token(e.into()))?;
        let request = TokenRequest::authorization_code(&stage.response).with_key_pair(key_pair);
        let (tokens, key_pair) = self.exchanger.exchange(&request).await?;

        *state = state.with_tokens(tokens, key_pair)?;
        state.require_tokens("exchange the authorization code").cloned()
    }

    /// Redeems the refresh token, keeping the current DPoP key.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::MissingStage`] without tokens or without a
    /// refresh token, or [`SessionError::Token`].
    pub async fn refresh(&self, scope: Option<String>) -> Result<Arc<BoundTokens>, SessionError> {
        let mut state = self.state.lock().await;
        let configuration = Arc::clone(state.require_configuration("refresh")?);
        let registration = Arc::clone(state.require_registration("refresh")?);
        let current = Arc::clone(state.require_tokens("refresh")?);
        let refresh_token = current
            .tokens
            .refresh_token
            .clone()
            .ok_or(SessionError::MissingStage {
                operation: "refresh",
                missing: "refresh token",
            })?;

        let request = TokenRequest::refresh(
            configuration,
            refresh_token.clone(),
            registration.client_id.clone(),
            registration.client_secret.clone(),
            scope,
        )
        .with_key_pair(current.key_pair.clone());
        let (mut tokens, key_pair) = self.exchanger.exchange(&request).await?;
        if tokens.refresh_token.is_none() {
            tokens.refresh_token = Some(refresh_token);
        }

        *state = state.with_tokens(tokens, key_pair)?;
        state.require_tokens("refresh").cloned()
    }

    /// Forces the next resource call to refresh first.
    pub async fn mark_needs_token_refresh(&self) {
        let mut state = self.state.lock().await;
        *state = state.with_needs_token_refresh(true);
    }

    /// Fetches UserInfo claims, refreshing the access token first if needed.
    ///
    /// A successful refresh is recorded before the userinfo request is
    /// sent, so it survives a failing resource call.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::MissingStage`] before a token exchange or
    /// [`SessionError::Resource`].
    pub async fn fetch_user_info(&self) -> Result<serde_json::Value, SessionError> {
        let mut state = self.state.lock().await;
        let configuration = Arc::clone(state.require_configuration("fetch userinfo")?);
        let registration = Arc::clone(state.require_registration("fetch userinfo")?);
        let current = Arc::clone(state.require_tokens("fetch userinfo")?);
        let endpoint = ProtectedResourceClient::userinfo_endpoint(&configuration)?;

        let policy = RefreshPolicy {
            client_id: &registration.client_id,
            client_secret: registration.client_secret.as_deref(),
            force: state.needs_token_refresh(),
        };
        let refreshed = self
            .resource
            .refresh_if_needed(&configuration, &current.tokens, &current.key_pair, policy)
            .await?;
        let current = match refreshed {
            Some(tokens) => {
                *state = state.with_tokens(tokens, current.key_pair.clone())?;
                Arc::clone(state.require_tokens("fetch userinfo")?)
            }
            None => current,
        };

        let claims = self
            .resource
            .get_json(&endpoint, &current.tokens.access_token, &current.key_pair)
            .await?;
        Ok(claims)
    }

    /// Runs discovery, registration, authorization and code exchange.
    ///
    /// # Errors
    ///
    /// Returns the first stage error; later stages do not run.
    pub async fn login(
        &self,
        issuer: &str,
        user_agent: &dyn UserAgent,
        cancel: &CancellationToken,
    ) -> Result<SessionState, SessionError> {
        self.discover(issuer).await?;
        self.register().await?;
        self.authorize(user_agent, cancel).await?;
        self.exchange_code().await?;
        Ok(self.snapshot().await)
    }
}
