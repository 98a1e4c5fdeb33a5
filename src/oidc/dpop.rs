//! DPoP proof-of-possession
//!
//! A [`DpopKeyPair`] is an RSA-2048 signing key whose public half travels in
//! every proof header.  [`DpopProofFactory`] mints one compact JWS per HTTP
//! request, bound to the request method and target URL:
//!
//! ```text
//! header:  {"typ":"dpop+jwt","alg":"RS256","jwk":{"kty":"RSA","n":..,"e":..}}
//! payload: {"htu":"https://op.example/token","htm":"POST","jti":"..","iat":1700000000}
//! ```
//!
//! The access token issued against a proof is bound to that key, so the same
//! key pair must sign every later request presenting the token.
//!
//! # References
//!
//! - RFC 9449 <https://www.rfc-editor.org/rfc/rfc9449>
//! - RFC 7638 JWK Thumbprint <https://www.rfc-editor.org/rfc/rfc7638>

use std::fmt;
use std::sync::Arc;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use jsonwebtoken::jwk::{AlgorithmParameters, CommonParameters, Jwk, RSAKeyParameters, RSAKeyType};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use rsa::pkcs8::{EncodePrivateKey, LineEnding};
use rsa::traits::PublicKeyParts;
use rsa::RsaPrivateKey;
use serde::Serialize;
use sha2::{Digest, Sha256};
use url::Url;

use crate::error::DpopError;
use crate::oidc::pkce::{random_value, OsRandom, RandomSource};
use crate::oidc::transport::HttpMethod;

/// RSA modulus size for generated keys.
pub const KEY_SIZE_BITS: usize = 2048;

/// Random bytes behind each `jti` (96 bits).
pub const JTI_BYTES: usize = 12;

/// `typ` header value of a DPoP proof.
pub const PROOF_TYPE: &str = "dpop+jwt";

// ---------------------------------------------------------------------------
// DpopKeyPair
// ---------------------------------------------------------------------------

/// Exposes the thread-local CSPRNG through the `rand_core` 0.6 traits that
/// `rsa` expects.
struct ThreadRngAdapter;

impl rsa::rand_core::RngCore for ThreadRngAdapter {
    fn next_u32(&mut self) -> u32 {
        rand::RngCore::next_u32(&mut rand::rng())
    }

    fn next_u64(&mut self) -> u64 {
        rand::RngCore::next_u64(&mut rand::rng())
    }

    fn fill_bytes(&mut self, dest: &mut [u8]) {
        rand::RngCore::fill_bytes(&mut rand::rng(), dest)
    }

    fn try_fill_bytes(&mut self, dest: &mut [u8]) -> Result<(), rsa::rand_core::Error> {
        self.fill_bytes(dest);
        Ok(())
    }
}

impl rsa::rand_core::CryptoRng for ThreadRngAdapter {}

struct KeyMaterial {
    encoding_key: EncodingKey,
    jwk: Jwk,
    modulus: String,
    exponent: String,
}

/// RSA key pair bound to an access token.
///
/// Cloning is cheap and yields a handle to the same key.  The private key
/// is never exposed.
#[derive(Clone)]
pub struct DpopKeyPair {
    inner: Arc<KeyMaterial>,
}

impl DpopKeyPair {
    /// Generates a fresh RSA-2048 key pair.
    ///
    /// This is CPU-bound and can take a noticeable fraction of a second; use
    /// [`DpopKeyPair::generate_blocking`] from async code.
    ///
    /// # Errors
    ///
    /// Returns [`DpopError::KeyGeneration`] if key generation or PEM
    /// encoding fails.
    pub fn generate() -> Result<Self, DpopError> {
        let mut rng = ThreadRngAdapter;
        let private_key = RsaPrivateKey::new(&mut rng, KEY_SIZE_BITS)
            .map_err(|e| DpopError::KeyGeneration(e.to_string()))?;
        Self::from_private_key(&private_key)
    }

    /// Generates a key pair on the blocking thread pool.
    ///
    /// # Errors
    ///
    /// Same as [`DpopKeyPair::generate`], plus a join failure of the
    /// blocking task.
    pub async fn generate_blocking() -> Result<Self, DpopError> {
        tokio::task::spawn_blocking(Self::generate)
            .await
            .map_err(|e| DpopError::KeyGeneration(e.to_string()))?
    }

    /// Wraps an existing RSA private key.
    ///
    /// # Errors
    ///
    /// Returns [`DpopError::KeyGeneration`] if the key cannot be encoded for
    /// signing.
    pub fn from_private_key(private_key: &RsaPrivateKey) -> Result<Self, DpopError> {
        let pem = private_key
            .to_pkcs8_pem(LineEnding::LF)
            .map_err(|e| DpopError::KeyGeneration(e.to_string()))?;
        let encoding_key = EncodingKey::from_rsa_pem(pem.as_bytes())
            .map_err(|e| DpopError::KeyGeneration(e.to_string()))?;

        let modulus = URL_SAFE_NO_PAD.encode(private_key.n().to_bytes_be());
        let exponent = URL_SAFE_NO_PAD.encode(private_key.e().to_bytes_be());
        let jwk = Jwk {
            common: CommonParameters::default(),
            algorithm: AlgorithmParameters::RSA(RSAKeyParameters {
                key_type: RSAKeyType::RSA,
                n: modulus.clone(),
                e: exponent.clone(),
            }),
        };

        Ok(Self {
            inner: Arc::new(KeyMaterial {
                encoding_key,
                jwk,
                modulus,
                exponent,
            }),
        })
    }

    /// Public key as a JWK, as embedded in proof headers.
    pub fn public_jwk(&self) -> &Jwk {
        &self.inner.jwk
    }

    /// RFC 7638 SHA-256 thumbprint of the public key, base64url encoded.
    ///
    /// This is the `jkt` value an authorization server binds the access
    /// token to.
    pub fn thumbprint(&self) -> String {
        let canonical = format!(
            r#"{{"e":"{}","kty":"RSA","n":"{}"}}"#,
            self.inner.exponent, self.inner.modulus
        );
        URL_SAFE_NO_PAD.encode(Sha256::digest(canonical.as_bytes()))
    }

    /// Returns `true` if both handles refer to the same key.
    pub fn same_key(&self, other: &DpopKeyPair) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner) || self.thumbprint() == other.thumbprint()
    }
}

impl fmt::Debug for DpopKeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DpopKeyPair")
            .field("thumbprint", &self.thumbprint())
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// DpopProofFactory
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct ProofClaims<'a> {
    htu: &'a str,
    htm: &'a str,
    jti: String,
    iat: i64,
}

/// Mints DPoP proofs.
#[derive(Debug, Clone)]
pub struct DpopProofFactory {
    random: Arc<dyn RandomSource>,
}

impl Default for DpopProofFactory {
    fn default() -> Self {
        Self::new(Arc::new(OsRandom))
    }
}

impl DpopProofFactory {
    /// Creates a factory drawing `jti` values from `random`.
    pub fn new(random: Arc<dyn RandomSource>) -> Self {
        Self { random }
    }

    /// Mints a proof for `method` and `url`.
    ///
    /// When `key_pair` is `None` a new key pair is generated and returned;
    /// otherwise the supplied key signs the proof and is returned unchanged.
    ///
    /// # Arguments
    ///
    /// * `method` - HTTP method of the request the proof accompanies
    /// * `url` - Target URL; query and fragment are dropped for `htu`
    /// * `key_pair` - Key bound to the access token, if one exists
    ///
    /// # Returns
    ///
    /// The compact JWS and the key pair that signed it.
    ///
    /// # Errors
    ///
    /// Returns [`DpopError`] if key generation or signing fails, or if `url`
    /// cannot serve as `htu`.
    pub fn mint(
        &self,
        method: HttpMethod,
        url: &Url,
        key_pair: Option<&DpopKeyPair>,
    ) -> Result<(String, DpopKeyPair), DpopError> {
        let key_pair = match key_pair {
            Some(existing) => existing.clone(),
            None => DpopKeyPair::generate()?,
        };
        let proof = self.sign(method, url, &key_pair, chrono::Utc::now().timestamp())?;
        Ok((proof, key_pair))
    }

    /// Mints a proof with an explicit issued-at time.
    ///
    /// # Errors
    ///
    /// See [`DpopProofFactory::mint`].
    pub fn sign(
        &self,
        method: HttpMethod,
        url: &Url,
        key_pair: &DpopKeyPair,
        issued_at: i64,
    ) -> Result<String, DpopError> {
        let htu = target_uri(url)?;
        let claims = ProofClaims {
            htu: htu.as_str(),
            htm: method.as_str(),
            jti: random_value(self.random.as_ref(), JTI_BYTES),
            iat: issued_at,
        };

        let mut header = Header::new(Algorithm::RS256);
        header.typ = Some(PROOF_TYPE.to_string());
        header.jwk = Some(key_pair.public_jwk().clone());

        let proof = jsonwebtoken::encode(&header, &claims, &key_pair.inner.encoding_key)
            .map_err(|e| DpopError::Signing(e.to_string()))?;

        tracing::debug!(htm = claims.htm, htu = claims.htu, "minted DPoP proof");
        Ok(proof)
    }
}

/// Returns `url` without query and fragment, as used for `htu`.
///
/// # Errors
///
/// Returns [`DpopError::InvalidTarget`] for URLs that are not `http` or
/// `https`.
pub fn target_uri(url: &Url) -> Result<Url, DpopError> {
    if url.scheme() != "https" && url.scheme() != "http" {
        return Err(DpopError::InvalidTarget {
            url: url.to_string(),
            reason: format!("unsupported scheme '{}'", url.scheme()),
        });
    }
    let mut htu = url.clone();
    htu.set_query(None);
    htu.set_fragment(None);
    Ok(htu)
}
