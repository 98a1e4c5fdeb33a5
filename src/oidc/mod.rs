//! OpenID Connect relying-party engine
//!
//! The engine runs a five-stage pipeline, each stage consuming the typed
//! output of the one before it:
//!
//! 1. [`discovery`] -- fetch and validate the provider configuration.
//! 2. [`registration`] -- dynamically register a native public client.
//! 3. [`authorizer`] -- build a PKCE authorization request, hand it to an
//!    external [`user_agent`] and parse the single callback.
//! 4. [`token`] -- exchange the code (or a refresh token) for DPoP-bound
//!    tokens and validate the ID Token ([`id_token`]).
//! 5. [`resource`] -- call `userinfo` with the bound access token.
//!
//! [`session`] holds the accumulated snapshot and serialises mutation.
//! All network I/O goes through the [`transport::HttpClient`] collaborator.
//!
//! # References
//!
//! - OpenID Connect Discovery 1.0 <https://openid.net/specs/openid-connect-discovery-1_0.html>
//! - RFC 7591 Dynamic Client Registration <https://www.rfc-editor.org/rfc/rfc7591>
//! - RFC 7636 PKCE <https://www.rfc-editor.org/rfc/rfc7636>
//! - RFC 9449 DPoP <https://www.rfc-editor.org/rfc/rfc9449>
//! - OpenID Connect Core 1.0 <https://openid.net/specs/openid-connect-core-1_0.html>

pub mod authorizer;
pub mod discovery;
pub mod dpop;
pub mod id_token;
pub mod pkce;
pub mod registration;
pub mod resource;
pub mod session;
pub mod token;
pub mod transport;
pub mod user_agent;

pub use authorizer::{AuthorizationRequest, AuthorizationResponse, PkceAuthorizer};
pub use discovery::{DiscoveryClient, ProviderConfiguration};
pub use dpop::{DpopKeyPair, DpopProofFactory};
pub use registration::{RegistrationClient, RegistrationResult};
pub use resource::ProtectedResourceClient;
pub use session::{Session, SessionState};
pub use token::{TokenExchanger, TokenRequest, TokenResponse};

/// Shortens a secret for logging.
///
/// Empty input stays empty, values of up to eight characters are fully
/// hidden, and longer values keep their first six characters.
///
/// # Examples
///
/// ```
/// use gettokens::oidc::redact;
///
/// assert_eq!(redact(""), "");
/// assert_eq!(redact("short"), "[redacted]");
/// assert_eq!(redact("eyJhbGciOiJSUzI1NiJ9"), "eyJhbG...[redacted]");
/// ```
pub fn redact(secret: &str) -> String {
    match secret.chars().count() {
        0 => String::new(),
        1..=8 => "[redacted]".to_string(),
        _ => {
            let prefix: String = secret.chars().take(6).collect();
            format!("{prefix}...[redacted]")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_redact_boundaries() {
        assert_eq!(redact(""), "");
        assert_eq!(redact("a"), "[redacted]");
        assert_eq!(redact("12345678"), "[redacted]");
        assert_eq!(redact("123456789"), "123456...[redacted]");
    }

    #[test]
    fn test_redact_multibyte_does_not_panic() {
        assert_eq!(redact("ééééééééé"), "éééééé...[redacted]");
    }
}
