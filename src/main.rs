//! GetTokens - OpenID Connect sign-in CLI
//!
#![doc = "GetTokens - OpenID Connect sign-in CLI"]
#![doc = "Main entry point for the gettokens application."]

use anyhow::Result;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use gettokens::cli::{Cli, Commands};
use gettokens::commands;
use gettokens::config::Config;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments
    let cli = Cli::parse_args();

    init_tracing(cli.verbose, cli.json_logs);

    // Load configuration
    let config_path = cli.config.as_deref().unwrap_or("config/config.yaml");
    let config = Config::load(config_path, &cli)?;

    // Validate configuration
    config.validate()?;

    match cli.command {
        Commands::Discover { issuer } => {
            tracing::info!("Discovering provider configuration for {}", issuer);
            commands::discover::run_discover(config, issuer).await?;
            Ok(())
        }
        Commands::Register {
            issuer,
            client_name,
            initial_access_token,
        } => {
            tracing::info!("Registering client with {}", issuer);
            if let Some(name) = &client_name {
                tracing::debug!("Using client name override: {}", name);
            }
            commands::register::run_register(config, issuer, client_name, initial_access_token)
                .await?;
            Ok(())
        }
        Commands::Login {
            issuer,
            no_userinfo,
            initial_access_token,
        } => {
            tracing::info!("Starting sign-in with {}", issuer);
            commands::login::run_login(config, issuer, !no_userinfo, initial_access_token).await?;
            Ok(())
        }
    }
}

/// Initialize tracing subscriber with environment filter
///
/// Logs go to stderr so stdout stays machine-readable.
fn init_tracing(verbose: bool, json_logs: bool) {
    let default_directive = if verbose {
        "gettokens=debug"
    } else {
        "gettokens=info"
    };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));

    let registry = tracing_subscriber::registry().with(env_filter);
    if json_logs {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}
