/*!
Command handlers for the CLI

This module provides command handlers invoked by the CLI entrypoint:

- `discover` - Fetch and print a provider configuration
- `register` - Discover and register a native client
- `login`    - Full sign-in with PKCE and DPoP, then userinfo

Each handler builds a [`Session`] over the reqwest transport and prints
JSON to stdout; diagnostics go to stderr through `tracing`.
*/

use crate::config::Config;
use crate::error::Result;
use crate::oidc::redact;
use crate::oidc::registration::RegistrationResult;
use crate::oidc::session::{BoundTokens, Session};
use crate::oidc::transport::{HttpClient, ReqwestHttpClient};
use serde_json::{json, Value};
use std::sync::Arc;

fn build_session(config: &Config, initial_access_token: Option<String>) -> Result<Session> {
    let http: Arc<dyn HttpClient> = Arc::new(ReqwestHttpClient::new(config.timeout())?);
    let mut settings = config.session_settings()?;
    settings.initial_access_token = initial_access_token;
    Ok(Session::new(http, settings))
}

fn print_json(value: &Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Redacted, printable view of a token set.
pub fn token_summary(bound: &BoundTokens) -> Value {
    let tokens = &bound.tokens;
    json!({
        "token_type": tokens.token_type,
        "access_token": redact(&tokens.access_token),
        "expires_at": tokens.expires_at.map(|t| t.to_rfc3339()),
        "refresh_token": tokens.refresh_token.as_deref().map(redact),
        "scope": tokens.scope,
        "dpop_jkt": bound.key_pair.thumbprint(),
        "id_token": tokens.id_token_claims.as_ref().map(|c| json!({
            "iss": c.issuer,
            "sub": c.subject,
            "aud": c.audience,
            "exp": c.expires_at,
            "iat": c.issued_at,
        })),
    })
}

/// Printable view of a registration with its credentials redacted.
pub fn registration_summary(registration: &RegistrationResult) -> Result<Value> {
    let mut value = serde_json::to_value(registration)?;
    if let Some(object) = value.as_object_mut() {
        for key in ["client_secret", "registration_access_token"] {
            if let Some(Value::String(secret)) = object.get(key) {
                let redacted = redact(secret);
                object.insert(key.to_string(), Value::String(redacted));
            }
        }
    }
    Ok(value)
}

pub mod discover {
    use super::*;

    /// Discover `issuer` and print its configuration document.
    ///
    /// # Arguments
    ///
    /// * `config` - Global configuration (consumed)
    /// * `issuer` - Issuer base URL
    pub async fn run_discover(config: Config, issuer: String) -> Result<()> {
        let session = build_session(&config, None)?;
        let configuration = session.discover(&issuer).await?;
        print_json(&Value::Object(configuration.document().clone()))
    }
}

pub mod register {
    use super::*;

    /// Discover `issuer`, register a client and print the registration with
    /// its credentials redacted.
    ///
    /// # Arguments
    ///
    /// * `config` - Global configuration (consumed)
    /// * `issuer` - Issuer base URL
    /// * `client_name` - Overrides `client.client_name`
    /// * `initial_access_token` - Bearer token for protected registration endpoints
    pub async fn run_register(
        mut config: Config,
        issuer: String,
        client_name: Option<String>,
        initial_access_token: Option<String>,
    ) -> Result<()> {
        if let Some(name) = client_name {
            config.client.client_name = name;
            config.validate()?;
        }
        let session = build_session(&config, initial_access_token)?;
        session.discover(&issuer).await?;
        let registration = session.register().await?;
        print_json(&registration_summary(&registration)?)
    }
}

pub mod login {
    use super::*;
    use crate::oidc::user_agent::ConsoleUserAgent;
    use tokio_util::sync::CancellationToken;

    /// Run the whole pipeline interactively and print the results.
    ///
    /// Ctrl-C while waiting for the browser cancels the sign-in.
    ///
    /// # Arguments
    ///
    /// * `config` - Global configuration (consumed)
    /// * `issuer` - Issuer base URL
    /// * `fetch_userinfo` - Whether to call the userinfo endpoint afterwards
    /// * `initial_access_token` - Bearer token for protected registration endpoints
    pub async fn run_login(
        config: Config,
        issuer: String,
        fetch_userinfo: bool,
        initial_access_token: Option<String>,
    ) -> Result<()> {
        let session = build_session(&config, initial_access_token)?;
        let cancel = CancellationToken::new();
        let interrupt = {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    cancel.cancel();
                }
            })
        };

        let result = session
            .login(&issuer, &ConsoleUserAgent::stdin(), &cancel)
            .await;
        interrupt.abort();

        let state = match result {
            Ok(state) => state,
            Err(e) if e.is_cancelled() => {
                eprintln!("Sign-in cancelled.");
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };

        let mut output = json!({});
        if let Some(bound) = state.tokens() {
            output["tokens"] = token_summary(bound);
        }
        if fetch_userinfo {
            output["userinfo"] = session.fetch_user_info().await?;
        }
        print_json(&output)
    }
}
