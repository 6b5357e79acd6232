//! DPoP (Demonstrating Proof-of-Possession) proof validation, RFC 9449.
//!
//! A proof is a JWT with `typ=dpop+jwt` whose header embeds the public JWK
//! that signed it. A successful validation yields the key's RFC 7638
//! thumbprint (JKT), which is then bound into issued tokens.

use std::time::Duration;

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use jsonwebtoken::jwk::Jwk;
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode, decode_header};
use serde::Deserialize;
use serde_json::Value;
use sha2::{Digest, Sha256};
use time::OffsetDateTime;
use url::Url;

use crate::error::AuthError;

/// The `typ` header every proof must carry.
pub const DPOP_JWT_TYPE: &str = "dpop+jwt";

/// Signing algorithms accepted in proofs.
pub const SUPPORTED_DPOP_ALGORITHMS: &[&str] = &["ES256", "ES384", "RS256", "RS384", "PS256", "EdDSA"];

/// Errors that can occur while validating a DPoP proof.
#[derive(Debug, thiserror::Error)]
pub enum DpopError {
    /// The proof is not a well-formed JWT.
    #[error("malformed DPoP proof: {0}")]
    Malformed(String),

    /// The `typ` header is not `dpop+jwt`.
    #[error("invalid DPoP proof type")]
    InvalidType,

    /// The header has no `jwk`.
    #[error("DPoP proof has no public key")]
    MissingKey,

    /// The embedded key contains private material.
    #[error("DPoP proof key must not be private")]
    PrivateKey,

    /// Symmetric or unknown algorithm.
    #[error("unsupported DPoP algorithm: {0}")]
    UnsupportedAlgorithm(String),

    /// Key type the thumbprint cannot be computed for.
    #[error("unsupported DPoP key type")]
    UnsupportedKeyType,

    /// The signature does not verify with the embedded key.
    #[error("invalid DPoP proof signature")]
    InvalidSignature,

    /// `htm` does not match the request method.
    #[error("DPoP proof method mismatch")]
    MethodMismatch,

    /// `htu` does not match the request URI.
    #[error("DPoP proof URI mismatch")]
    UriMismatch,

    /// `iat` is outside the accepted window.
    #[error("DPoP proof is stale")]
    Stale,

    /// The `jti` was seen before.
    #[error("DPoP proof was replayed")]
    Replayed,
}

impl From<DpopError> for AuthError {
    fn from(err: DpopError) -> Self {
        AuthError::invalid_dpop_proof(err.to_string())
    }
}

/// A validated proof.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DpopProof {
    /// RFC 7638 thumbprint of the proof key.
    pub jkt: String,
    /// Unique proof ID.
    pub jti: String,
    /// HTTP method the proof was made for.
    pub htm: String,
    /// HTTP URI the proof was made for.
    pub htu: String,
    /// Proof creation time.
    pub iat: OffsetDateTime,
}

#[derive(Debug, Deserialize)]
struct DpopClaims {
    jti: String,
    htm: String,
    htu: String,
    iat: i64,
}

/// Validates proofs and remembers recently seen `jti` values.
pub struct DpopValidator {
    max_age: Duration,
    leeway: Duration,
    seen: DashMap<String, OffsetDateTime>,
}

impl DpopValidator {
    /// Creates a validator accepting proofs up to `max_age` old, with
    /// `leeway` of clock skew in either direction.
    #[must_use]
    pub fn new(max_age: Duration, leeway: Duration) -> Self {
        Self {
            max_age,
            leeway,
            seen: DashMap::new(),
        }
    }

    /// Validates a proof presented for `method` on `uri`.
    ///
    /// # Errors
    ///
    /// Returns a [`DpopError`] describing the first failed check.
    pub fn validate(&self, proof: &str, method: &str, uri: &str) -> Result<DpopProof, DpopError> {
        let header = decode_header(proof).map_err(|e| DpopError::Malformed(e.to_string()))?;

        if header.typ.as_deref() != Some(DPOP_JWT_TYPE) {
            return Err(DpopError::InvalidType);
        }
        if matches!(
            header.alg,
            Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512
        ) {
            return Err(DpopError::UnsupportedAlgorithm(format!("{:?}", header.alg)));
        }

        let jwk = header.jwk.as_ref().ok_or(DpopError::MissingKey)?;
        let jwk_value =
            serde_json::to_value(jwk).map_err(|e| DpopError::Malformed(e.to_string()))?;
        if jwk_value.get("d").is_some() {
            return Err(DpopError::PrivateKey);
        }

        let key = DecodingKey::from_jwk(jwk).map_err(|e| DpopError::Malformed(e.to_string()))?;
        let mut validation = Validation::new(header.alg);
        validation.required_spec_claims.clear();
        validation.validate_exp = false;
        validation.validate_aud = false;

        let data = decode::<DpopClaims>(proof, &key, &validation).map_err(|e| {
            match e.kind() {
                jsonwebtoken::errors::ErrorKind::InvalidSignature => DpopError::InvalidSignature,
                _ => DpopError::Malformed(e.to_string()),
            }
        })?;
        let claims = data.claims;

        if claims.htm != method {
            return Err(DpopError::MethodMismatch);
        }
        if !same_target_uri(&claims.htu, uri) {
            return Err(DpopError::UriMismatch);
        }

        let now = OffsetDateTime::now_utc();
        let iat = OffsetDateTime::from_unix_timestamp(claims.iat).map_err(|_| DpopError::Stale)?;
        let oldest = now - self.max_age - self.leeway;
        let newest = now + self.leeway;
        if iat < oldest || iat > newest {
            return Err(DpopError::Stale);
        }

        self.remember_jti(&claims.jti, iat, now)?;

        Ok(DpopProof {
            jkt: jwk_thumbprint_value(&jwk_value)?,
            jti: claims.jti,
            htm: claims.htm,
            htu: claims.htu,
            iat,
        })
    }

    fn remember_jti(
        &self,
        jti: &str,
        iat: OffsetDateTime,
        now: OffsetDateTime,
    ) -> Result<(), DpopError> {
        let horizon = now - self.max_age - self.leeway * 2;
        self.seen.retain(|_, seen_at| *seen_at >= horizon);

        match self.seen.entry(jti.to_string()) {
            Entry::Occupied(_) => Err(DpopError::Replayed),
            Entry::Vacant(slot) => {
                slot.insert(iat);
                Ok(())
            }
        }
    }
}

/// Compares two URIs ignoring query and fragment.
fn same_target_uri(presented: &str, expected: &str) -> bool {
    let normalize = |raw: &str| {
        Url::parse(raw).ok().map(|mut url| {
            url.set_query(None);
            url.set_fragment(None);
            url
        })
    };
    match (normalize(presented), normalize(expected)) {
        (Some(a), Some(b)) => a == b,
        _ => false,
    }
}

/// Computes the RFC 7638 thumbprint of a public JWK.
///
/// # Errors
///
/// Fails for key types other than EC, RSA and OKP, or when a required
/// member is missing.
pub fn jwk_thumbprint(jwk: &Jwk) -> Result<String, DpopError> {
    let value = serde_json::to_value(jwk).map_err(|e| DpopError::Malformed(e.to_string()))?;
    jwk_thumbprint_value(&value)
}

fn jwk_thumbprint_value(jwk: &Value) -> Result<String, DpopError> {
    let member = |name: &str| -> Result<String, DpopError> {
        jwk.get(name)
            .and_then(Value::as_str)
            .map(|s| Value::String(s.to_string()).to_string())
            .ok_or_else(|| DpopError::Malformed(format!("jwk is missing '{name}'")))
    };

    // Required members only, lexicographic order, no whitespace.
    let canonical = match jwk.get("kty").and_then(Value::as_str) {
        Some("EC") => format!(
            r#"{{"crv":{},"kty":"EC","x":{},"y":{}}}"#,
            member("crv")?,
            member("x")?,
            member("y")?
        ),
        Some("RSA") => format!(
            r#"{{"e":{},"kty":"RSA","n":{}}}"#,
            member("e")?,
            member("n")?
        ),
        Some("OKP") => format!(
            r#"{{"crv":{},"kty":"OKP","x":{}}}"#,
            member("crv")?,
            member("x")?
        ),
        _ => return Err(DpopError::UnsupportedKeyType),
    };

    Ok(URL_SAFE_NO_PAD.encode(Sha256::digest(canonical.as_bytes())))
}
