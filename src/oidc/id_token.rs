//! ID Token structural parsing and claim validation
//!
//! The ID Token is read, not verified: its signature is not checked, and
//! trust rests on the TLS connection to the token endpoint.  Encryption,
//! `acr` and `max_age` are likewise not evaluated.  What is enforced, in
//! order and stopping at the first failure:
//!
//! 1. the JWT has a decodable payload with `iss`, `sub`, `aud`, `exp`, `iat`
//! 2. `iss` equals the provider issuer, when known
//! 3. `aud` contains the client identifier
//! 4. now is strictly before `exp`
//! 5. `iat` is within [`MAX_ISSUED_AT_SKEW_SECONDS`] of now, in either direction
//! 6. for the authorization-code grant, `nonce` equals the request nonce
//!
//! # References
//!
//! - OpenID Connect Core 1.0 section 3.1.3.7
//!   <https://openid.net/specs/openid-connect-core-1_0.html#IDTokenValidation>

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use serde_json::{Map, Value};

use crate::error::{IdTokenRule, TokenError};

/// Largest accepted distance between `iat` and now.
pub const MAX_ISSUED_AT_SKEW_SECONDS: i64 = 600;

/// Claims read from an ID Token payload.
#[derive(Debug, Clone, PartialEq)]
pub struct IdTokenClaims {
    pub issuer: String,
    pub subject: String,
    pub audience: Vec<String>,
    /// `exp`, unix seconds
    pub expires_at: i64,
    /// `iat`, unix seconds
    pub issued_at: i64,
    pub nonce: Option<String>,
    /// Every claim of the payload, including the ones above.
    pub claims: Map<String, Value>,
}

/// Inputs to semantic validation.
#[derive(Debug, Clone, Copy)]
pub struct ValidationContext<'a> {
    /// Provider issuer; `None` skips the issuer rule.
    pub issuer: Option<&'a str>,
    pub client_id: &'a str,
    /// Validation time, unix seconds
    pub now: i64,
    /// Nonce of the originating authorization request; `None` skips the
    /// nonce rule (refresh grants, or a request that never set one).
    pub expected_nonce: Option<&'a str>,
}

impl IdTokenClaims {
    /// Decodes the payload segment of a compact JWT.
    ///
    /// # Errors
    ///
    /// Returns [`TokenError::IdTokenStructural`] if the token has fewer than
    /// two segments, the payload is not base64url JSON, or a required claim
    /// is absent or of the wrong type.
    pub fn parse(id_token: &str) -> Result<Self, TokenError> {
        let structural = |m: String| TokenError::IdTokenStructural(m);

        let segments: Vec<&str> = id_token.split('.').collect();
        if segments.len() < 2 {
            return Err(structural(format!(
                "expected at least 2 segments, found {}",
                segments.len()
            )));
        }
        let payload = URL_SAFE_NO_PAD
            .decode(segments[1].trim_end_matches('='))
            .map_err(|e| structural(format!("payload is not base64url: {e}")))?;
        let claims: Map<String, Value> = serde_json::from_slice(&payload)
            .map_err(|e| structural(format!("payload is not a JSON object: {e}")))?;

        let string = |key: &str| -> Result<String, TokenError> {
            claims
                .get(key)
                .and_then(Value::as_str)
                .map(str::to_string)
                .ok_or_else(|| structural(format!("missing or non-string claim '{key}'")))
        };
        let seconds = |key: &str| -> Result<i64, TokenError> {
            let value = claims
                .get(key)
                .ok_or_else(|| structural(format!("missing claim '{key}'")))?;
            value
                .as_i64()
                .or_else(|| value.as_f64().map(|f| f as i64))
                .ok_or_else(|| structural(format!("claim '{key}' is not a number")))
        };

        let issuer = string("iss")?;
        let subject = string("sub")?;
        let audience = match claims.get("aud") {
            Some(Value::String(s)) => vec![s.clone()],
            Some(Value::Array(items)) if !items.is_empty() => items
                .iter()
                .map(|v| v.as_str().map(str::to_string))
                .collect::<Option<Vec<_>>>()
                .ok_or_else(|| structural("claim 'aud' must contain only strings".to_string()))?,
            _ => return Err(structural("missing or malformed claim 'aud'".to_string())),
        };
        let expires_at = seconds("exp")?;
        let issued_at = seconds("iat")?;
        let nonce = match claims.get("nonce") {
            None | Some(Value::Null) => None,
            Some(Value::String(s)) => Some(s.clone()),
            Some(_) => return Err(structural("claim 'nonce' is not a string".to_string())),
        };

        Ok(Self {
            issuer,
            subject,
            audience,
            expires_at,
            issued_at,
            nonce,
            claims,
        })
    }

    /// Applies the issuer, audience, expiry, issued-at and nonce rules in
    /// that order.
    ///
    /// # Errors
    ///
    /// Returns the first [`IdTokenRule`] that fails.
    pub fn validate(&self, context: &ValidationContext<'_>) -> Result<(), IdTokenRule> {
        if let Some(expected) = context.issuer {
            if self.issuer != expected {
                return Err(IdTokenRule::Issuer {
                    expected: expected.to_string(),
                    actual: self.issuer.clone(),
                });
            }
        }

        if !self.audience.iter().any(|a| a == context.client_id) {
            return Err(IdTokenRule::Audience {
                client_id: context.client_id.to_string(),
                audience: self.audience.clone(),
            });
        }

        if context.now >= self.expires_at {
            return Err(IdTokenRule::Expired {
                expires_at: self.expires_at,
                now: context.now,
            });
        }

        let skew = context.now.checked_sub(self.issued_at).map(i64::unsigned_abs);
        if skew.map_or(true, |skew| skew > MAX_ISSUED_AT_SKEW_SECONDS.unsigned_abs()) {
            return Err(IdTokenRule::IssuedAt {
                issued_at: self.issued_at,
                now: context.now,
                max_skew_seconds: MAX_ISSUED_AT_SKEW_SECONDS,
            });
        }

        if let Some(expected) = context.expected_nonce {
            if self.nonce.as_deref() != Some(expected) {
                return Err(IdTokenRule::Nonce {
                    expected: expected.to_string(),
                    actual: self.nonce.clone(),
                });
            }
        }

        Ok(())
    }
}

/// Builds an unsigned compact JWT carrying `claims`, for tests.
#[cfg(test)]
pub(crate) fn unsigned_jwt(claims: &Value) -> String {
    format!(
        "{}.{}.",
        URL_SAFE_NO_PAD.encode(br#"{"alg":"RS256","typ":"JWT"}"#),
        URL_SAFE_NO_PAD.encode(claims.to_string())
    )
}
