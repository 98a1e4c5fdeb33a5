//! Command-line interface definition for GetTokens
//!
//! This module defines the CLI structure using clap's derive API,
//! providing commands for discovery, registration and a full login.

use clap::{Parser, Subcommand};

/// GetTokens - OpenID Connect relying party
///
/// Discover a provider, register a native client, sign in with PKCE and
/// obtain DPoP-bound tokens.
#[derive(Parser, Debug, Clone)]
#[command(name = "gettokens")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config/config.yaml")]
    pub config: Option<String>,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long)]
    pub json_logs: bool,

    /// Per-request HTTP timeout in seconds (overrides config)
    #[arg(long, value_name = "SECS")]
    pub timeout: Option<u64>,

    /// Command to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands for GetTokens
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Fetch and validate a provider's discovery document
    Discover {
        /// Issuer base URL, e.g. https://login.example.com
        issuer: String,
    },

    /// Discover the provider and dynamically register a client
    Register {
        /// Issuer base URL
        issuer: String,

        /// Client name to register (overrides config)
        #[arg(long)]
        client_name: Option<String>,

        /// Initial access token required by some registration endpoints
        #[arg(long, env = "GETTOKENS_INITIAL_ACCESS_TOKEN", hide_env_values = true)]
        initial_access_token: Option<String>,
    },

    /// Run the full sign-in flow and fetch userinfo
    Login {
        /// Issuer base URL
        issuer: String,

        /// Stop after the token exchange
        #[arg(long)]
        no_userinfo: bool,

        /// Initial access token required by some registration endpoints
        #[arg(long, env = "GETTOKENS_INITIAL_ACCESS_TOKEN", hide_env_values = true)]
        initial_access_token: Option<String>,
    },
}

impl Cli {
    /// Parse command line arguments
    ///
    /// # Returns
    ///
    /// Returns the parsed CLI structure
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

impl Default for Cli {
    fn default() -> Self {
        Self {
            config: Some("config/config.yaml".to_string()),
            verbose: false,
            json_logs: false,
            timeout: None,
            command: Commands::Discover {
                issuer: "https://localhost".to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_default() {
        let cli = Cli::default();
        assert_eq!(cli.config, Some("config/config.yaml".to_string()));
        assert!(!cli.verbose);
        assert!(cli.timeout.is_none());
    }

    #[test]
    fn test_cli_parse_discover() {
        let cli = Cli::try_parse_from(["gettokens", "discover", "https://op.example"]).unwrap();
        match cli.command {
            Commands::Discover { issuer } => assert_eq!(issuer, "https://op.example"),
            other => panic!("expected Discover, got {other:?}"),
        }
    }

    #[test]
    fn test_cli_parse_register_with_name() {
        let cli = Cli::try_parse_from([
            "gettokens",
            "register",
            "https://op.example",
            "--client-name",
            "My App",
        ])
        .unwrap();
        if let Commands::Register { client_name, .. } = cli.command {
            assert_eq!(client_name.as_deref(), Some("My App"));
        } else {
            panic!("expected Register");
        }
    }

    #[test]
    fn test_cli_parse_login_with_globals() {
        let cli = Cli::try_parse_from([
            "gettokens",
            "--timeout",
            "5",
            "-v",
            "--json-logs",
            "login",
            "https://op.example",
            "--no-userinfo",
        ])
        .unwrap();
        assert_eq!(cli.timeout, Some(5));
        assert!(cli.verbose);
        assert!(cli.json_logs);
        assert!(matches!(cli.command, Commands::Login { no_userinfo: true, .. }));
    }

    #[test]
    fn test_cli_requires_issuer() {
        assert!(Cli::try_parse_from(["gettokens", "discover"]).is_err());
    }
}
