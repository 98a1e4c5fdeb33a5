//! GetTokens - OpenID Connect relying-party library
//!
//! This library signs a native client in to an OpenID Connect provider:
//! it discovers the provider, registers itself dynamically, runs an
//! authorization-code flow with PKCE, exchanges the code for DPoP-bound
//! tokens and calls the userinfo endpoint with them.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//!
//! - `oidc`: Protocol engine (discovery, registration, authorization, tokens, DPoP, session)
//! - `config`: Configuration management and validation
//! - `error`: Error types and result aliases
//! - `cli`: Command-line interface definition
//! - `commands`: Handlers behind each CLI subcommand
//!
//! # Example
//!
//! ```no_run
//! use gettokens::Config;
//! use gettokens::oidc::transport::{HttpClient, ReqwestHttpClient};
//! use gettokens::oidc::Session;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("config/config.yaml", &Default::default())?;
//!     config.validate()?;
//!
//!     let http: Arc<dyn HttpClient> = Arc::new(ReqwestHttpClient::new(config.timeout())?);
//!     let session = Session::new(http, config.session_settings()?);
//!     let provider = session.discover("https://login.example.com").await?;
//!     println!("token endpoint: {}", provider.token_endpoint());
//!     Ok(())
//! }
//! ```

pub mod cli;
pub mod commands;
pub mod config;
pub mod error;
pub mod oidc;

// Re-export commonly used types
pub use config::Config;
pub use error::{GetTokensError, Result, SessionError};
pub use oidc::{Session, SessionState};
