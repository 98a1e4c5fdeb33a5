//! Configuration management for GetTokens
//!
//! This module handles loading, parsing, validating, and managing
//! configuration from files, environment variables, and CLI overrides.

use crate::error::{GetTokensError, Result};
use crate::oidc::authorizer::is_supported_response_type;
use crate::oidc::pkce::is_valid_scope_token;
use crate::oidc::session::SessionSettings;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use url::Url;

/// Upper bound for `http.timeout_seconds`.
pub const MAX_TIMEOUT_SECONDS: u64 = 600;

/// Upper bound for `session.refresh_leeway_seconds`.
pub const MAX_REFRESH_LEEWAY_SECONDS: u64 = 3600;

/// Main configuration structure for GetTokens
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Client metadata used for registration and authorization
    #[serde(default)]
    pub client: ClientConfig,
    /// HTTP transport settings
    #[serde(default)]
    pub http: HttpConfig,
    /// Session behavior
    #[serde(default)]
    pub session: SessionConfig,
}

/// Client metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Name sent as `client_name` during registration
    #[serde(default = "default_client_name")]
    pub client_name: String,

    /// Private-scheme redirect URI registered with the provider
    #[serde(default = "default_redirect_uri")]
    pub redirect_uri: String,

    /// Scopes requested during authorization
    #[serde(default = "default_scopes")]
    pub scopes: Vec<String>,

    /// `code`, `code id_token` or `id_token code`
    #[serde(default = "default_response_type")]
    pub response_type: String,
}

fn default_client_name() -> String {
    "gettokens".to_string()
}

fn default_redirect_uri() -> String {
    "com.example.gettokens:/callback".to_string()
}

fn default_scopes() -> Vec<String> {
    ["openid", "profile", "webid", "offline_access"]
        .into_iter()
        .map(str::to_string)
        .collect()
}

fn default_response_type() -> String {
    "code".to_string()
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            client_name: default_client_name(),
            redirect_uri: default_redirect_uri(),
            scopes: default_scopes(),
            response_type: default_response_type(),
        }
    }
}

/// HTTP transport settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HttpConfig {
    /// Per-request timeout for every non-interactive call
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
}

fn default_timeout_seconds() -> u64 {
    30
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: default_timeout_seconds(),
        }
    }
}

/// Session behavior
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Seconds before `expires_at` at which the access token is refreshed
    #[serde(default = "default_refresh_leeway_seconds")]
    pub refresh_leeway_seconds: u64,
}

fn default_refresh_leeway_seconds() -> u64 {
    60
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            refresh_leeway_seconds: default_refresh_leeway_seconds(),
        }
    }
}

impl Config {
    /// Load configuration from file with environment and CLI overrides
    ///
    /// A missing file is not an error; defaults are used instead.
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the YAML configuration file
    /// * `cli` - Parsed command line, for overrides
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load(path: &str, cli: &crate::cli::Cli) -> Result<Self> {
        let mut config = if Path::new(path).exists() {
            Self::from_file(path)?
        } else {
            tracing::warn!("Config file not found at {}, using defaults", path);
            Self::default()
        };

        config.apply_env_vars();
        config.apply_cli_overrides(cli);

        Ok(config)
    }

    fn from_file(path: &str) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| GetTokensError::Config(format!("Failed to read config file: {}", e)))?;
        serde_yaml::from_str(&contents)
            .map_err(|e| GetTokensError::Config(format!("Failed to parse config: {}", e)).into())
    }

    fn apply_env_vars(&mut self) {
        if let Ok(name) = std::env::var("GETTOKENS_CLIENT_NAME") {
            self.client.client_name = name;
        }

        if let Ok(redirect_uri) = std::env::var("GETTOKENS_REDIRECT_URI") {
            self.client.redirect_uri = redirect_uri;
        }

        if let Ok(scopes) = std::env::var("GETTOKENS_SCOPES") {
            self.client.scopes = scopes.split_whitespace().map(str::to_string).collect();
        }

        if let Ok(timeout) = std::env::var("GETTOKENS_TIMEOUT_SECONDS") {
            if let Ok(value) = timeout.parse() {
                self.http.timeout_seconds = value;
            } else {
                tracing::warn!("Invalid GETTOKENS_TIMEOUT_SECONDS: {}", timeout);
            }
        }

        if let Ok(leeway) = std::env::var("GETTOKENS_REFRESH_LEEWAY_SECONDS") {
            if let Ok(value) = leeway.parse() {
                self.session.refresh_leeway_seconds = value;
            } else {
                tracing::warn!("Invalid GETTOKENS_REFRESH_LEEWAY_SECONDS: {}", leeway);
            }
        }
    }

    fn apply_cli_overrides(&mut self, cli: &crate::cli::Cli) {
        if let Some(timeout) = cli.timeout {
            tracing::debug!("Using timeout override: {}s", timeout);
            self.http.timeout_seconds = timeout;
        }
    }

    /// Validate the configuration
    ///
    /// # Errors
    ///
    /// Returns [`GetTokensError::Config`] describing the first invalid value.
    pub fn validate(&self) -> Result<()> {
        if self.client.client_name.trim().is_empty() {
            return Err(GetTokensError::Config("client_name cannot be empty".to_string()).into());
        }

        Url::parse(&self.client.redirect_uri).map_err(|e| {
            GetTokensError::Config(format!(
                "Invalid redirect_uri '{}': {}",
                self.client.redirect_uri, e
            ))
        })?;

        if self.client.scopes.is_empty() {
            return Err(GetTokensError::Config("scopes cannot be empty".to_string()).into());
        }

        if let Some(bad) = self.client.scopes.iter().find(|s| !is_valid_scope_token(s)) {
            return Err(GetTokensError::Config(format!("Invalid scope: {:?}", bad)).into());
        }

        if !is_supported_response_type(&self.client.response_type) {
            return Err(GetTokensError::Config(format!(
                "Invalid response_type: {}. Must be one of: code, code id_token, id_token code",
                self.client.response_type
            ))
            .into());
        }

        if self.http.timeout_seconds == 0 {
            return Err(
                GetTokensError::Config("timeout_seconds must be greater than 0".to_string()).into(),
            );
        }

        if self.http.timeout_seconds > MAX_TIMEOUT_SECONDS {
            return Err(GetTokensError::Config(format!(
                "timeout_seconds must be less than or equal to {}",
                MAX_TIMEOUT_SECONDS
            ))
            .into());
        }

        if self.session.refresh_leeway_seconds > MAX_REFRESH_LEEWAY_SECONDS {
            return Err(GetTokensError::Config(format!(
                "refresh_leeway_seconds must be less than or equal to {}",
                MAX_REFRESH_LEEWAY_SECONDS
            ))
            .into());
        }

        Ok(())
    }

    /// Per-request HTTP timeout
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.http.timeout_seconds)
    }

    /// Builds session settings from a validated configuration.
    ///
    /// # Errors
    ///
    /// Returns [`GetTokensError::Url`] if the redirect URI does not parse.
    pub fn session_settings(&self) -> Result<SessionSettings> {
        let redirect_uri = Url::parse(&self.client.redirect_uri).map_err(GetTokensError::from)?;
        let mut settings = SessionSettings::new(self.client.client_name.clone(), redirect_uri);
        settings.scopes = self.client.scopes.clone();
        settings.response_type = self.client.response_type.clone();
        settings.refresh_leeway = i64::try_from(self.session.refresh_leeway_seconds)
            .ok()
            .and_then(chrono::Duration::try_seconds)
            .ok_or_else(|| {
                GetTokensError::Config("refresh_leeway_seconds is out of range".to_string())
            })?;
        Ok(settings)
    }
}
