//! Random values, PKCE S256 pairs and scope joining
//!
//! All protocol randomness (`state`, `nonce`, the PKCE verifier and DPoP
//! `jti`) flows through the [`RandomSource`] trait so that request
//! construction is reproducible in tests.  Production code uses
//! [`OsRandom`], which draws from the operating system CSPRNG.
//!
//! # References
//!
//! - RFC 7636 <https://www.rfc-editor.org/rfc/rfc7636>
//! - RFC 6749 section 3.3 (scope syntax) <https://www.rfc-editor.org/rfc/rfc6749#section-3.3>

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use sha2::{Digest, Sha256};

/// Number of random bytes behind `state`, `nonce` and the code verifier.
pub const RANDOM_VALUE_BYTES: usize = 32;

/// The only PKCE challenge method this client emits.
pub const CODE_CHALLENGE_METHOD: &str = "S256";

// ---------------------------------------------------------------------------
// RandomSource
// ---------------------------------------------------------------------------

/// Source of random bytes for protocol values.
pub trait RandomSource: Send + Sync + fmt::Debug {
    /// Fills `dest` with random bytes.
    fn fill_bytes(&self, dest: &mut [u8]);
}

/// Operating-system CSPRNG.
#[derive(Debug, Clone, Copy, Default)]
pub struct OsRandom;

impl RandomSource for OsRandom {
    fn fill_bytes(&self, dest: &mut [u8]) {
        use rand::RngCore as _;
        rand::rng().fill_bytes(dest);
    }
}

/// Deterministic byte counter for tests.
///
/// Each call continues the sequence `seed, seed+1, ...` (wrapping), so two
/// sources built from the same seed produce identical values and
/// consecutive draws from one source differ.
#[derive(Debug)]
pub struct SequenceRandom {
    next: AtomicU8,
}

impl SequenceRandom {
    /// Creates a source starting at `seed`.
    pub fn new(seed: u8) -> Self {
        Self {
            next: AtomicU8::new(seed),
        }
    }
}

impl RandomSource for SequenceRandom {
    fn fill_bytes(&self, dest: &mut [u8]) {
        for byte in dest.iter_mut() {
            *byte = self.next.fetch_add(1, Ordering::Relaxed);
        }
    }
}

/// Draws `len` random bytes and encodes them as unpadded base64url.
///
/// # Examples
///
/// ```
/// use gettokens::oidc::pkce::{random_value, OsRandom};
///
/// let value = random_value(&OsRandom, 32);
/// assert_eq!(value.len(), 43);
/// assert!(!value.contains('='));
/// ```
pub fn random_value(source: &dyn RandomSource, len: usize) -> String {
    let mut bytes = vec![0u8; len];
    source.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

// ---------------------------------------------------------------------------
// PKCE
// ---------------------------------------------------------------------------

/// A PKCE verifier with its derived S256 challenge.
#[derive(Clone)]
pub struct PkcePair {
    /// Code verifier. Kept in memory only and sent once, to the token endpoint.
    pub verifier: String,
    /// `BASE64URL(SHA256(verifier))`
    pub challenge: String,
}

impl fmt::Debug for PkcePair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PkcePair")
            .field("verifier", &crate::oidc::redact(&self.verifier))
            .field("challenge", &self.challenge)
            .finish()
    }
}

impl PkcePair {
    /// Generates a fresh pair from 32 random bytes.
    pub fn generate(source: &dyn RandomSource) -> Self {
        let verifier = random_value(source, RANDOM_VALUE_BYTES);
        let challenge = code_challenge(&verifier);
        Self {
            verifier,
            challenge,
        }
    }
}

/// Computes the S256 code challenge for `verifier`.
///
/// # Examples
///
/// ```
/// use gettokens::oidc::pkce::code_challenge;
///
/// // RFC 7636 Appendix B
/// assert_eq!(
///     code_challenge("dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk"),
///     "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM"
/// );
/// ```
pub fn code_challenge(verifier: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()))
}

// ---------------------------------------------------------------------------
// Scopes
// ---------------------------------------------------------------------------

/// Returns `true` if `scope` is a non-empty RFC 6749 scope token.
///
/// Allowed characters are `%x21 / %x23-5B / %x5D-7E`, which excludes
/// control characters, space, `"` and `\`.
pub fn is_valid_scope_token(scope: &str) -> bool {
    !scope.is_empty()
        && scope
            .bytes()
            .all(|b| b == 0x21 || (0x23..=0x5B).contains(&b) || (0x5D..=0x7E).contains(&b))
}

/// Joins scope tokens with single spaces.
///
/// # Panics
///
/// Panics if any token is empty or contains a character outside the scope
/// syntax.  Scopes come from configuration that has already been validated,
/// so a bad token here is a programming error.
pub fn join_scopes<S: AsRef<str>>(scopes: &[S]) -> String {
    for scope in scopes {
        assert!(
            is_valid_scope_token(scope.as_ref()),
            "invalid scope token {:?}",
            scope.as_ref()
        );
    }
    scopes
        .iter()
        .map(AsRef::as_ref)
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pkce_pair_challenge_matches_verifier() {
        for _ in 0..16 {
            let pair = PkcePair::generate(&OsRandom);
            assert_eq!(pair.verifier.len(), 43);
            assert_eq!(code_challenge(&pair.verifier), pair.challenge);
        }
    }

    #[test]
    fn test_verifier_uses_url_safe_alphabet() {
        let pair = PkcePair::generate(&OsRandom);
        assert!(pair
            .verifier
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }

    #[test]
    fn test_sequence_random_is_deterministic() {
        let a = SequenceRandom::new(7);
        let b = SequenceRandom::new(7);
        assert_eq!(random_value(&a, 32), random_value(&b, 32));

        let first = random_value(&a, 32);
        let second = random_value(&a, 32);
        assert_ne!(first, second, "consecutive draws must differ");
    }

    #[test]
    fn test_os_random_values_differ() {
        assert_ne!(random_value(&OsRandom, 32), random_value(&OsRandom, 32));
    }

    #[test]
    fn test_debug_hides_verifier() {
        let pair = PkcePair::generate(&SequenceRandom::new(0));
        let debug = format!("{pair:?}");
        assert!(!debug.contains(&pair.verifier));
        assert!(debug.contains(&pair.challenge));
    }

    #[test]
    fn test_join_scopes() {
        assert_eq!(join_scopes(&["openid", "profile", "offline_access"]), "openid profile offline_access");
        assert_eq!(join_scopes::<&str>(&[]), "");
    }

    #[test]
    fn test_scope_token_validation() {
        assert!(is_valid_scope_token("openid"));
        assert!(is_valid_scope_token("https://www.w3.org/ns/solid/terms#webid"));
        assert!(!is_valid_scope_token(""));
        assert!(!is_valid_scope_token("open id"));
        assert!(!is_valid_scope_token("quo\"te"));
        assert!(!is_valid_scope_token("back\\slash"));
        assert!(!is_valid_scope_token("tab\t"));
    }

    #[test]
    #[should_panic(expected = "invalid scope token")]
    fn test_join_scopes_panics_on_space() {
        join_scopes(&["openid", "bad scope"]);
    }
}
