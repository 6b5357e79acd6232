//! Opaque token generation, hashing and refresh token composition.
//!
//! Raw secrets never reach the store: every lookup key is the SHA-256 hex
//! digest of the raw token string.

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use rand::Rng;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use crate::error::AuthError;

/// Generates a 256-bit URL-safe random token.
#[must_use]
pub fn generate_token() -> String {
    let mut rng = rand::thread_rng();
    let bytes: [u8; 32] = rng.r#gen();
    URL_SAFE_NO_PAD.encode(bytes)
}

/// SHA-256 of the raw token, hex encoded.
#[must_use]
pub fn hash_token(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

/// Compares two strings without early exit on the first differing byte.
#[must_use]
pub fn constant_time_eq(a: &str, b: &str) -> bool {
    a.as_bytes().ct_eq(b.as_bytes()).into()
}

/// Composes the refresh token handed to clients: `<grantID>.<secret>`.
#[must_use]
pub fn encode_refresh_token(grant_id: &str, secret: &str) -> String {
    format!("{grant_id}.{secret}")
}

/// A refresh token split into its grant ID and secret.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedRefreshToken {
    /// Offline grant ID.
    pub grant_id: String,
    /// Opaque secret whose hash identifies the refresh token entry.
    pub secret: String,
}

impl DecodedRefreshToken {
    /// Hash of the secret, used to match the refresh token entry.
    #[must_use]
    pub fn token_hash(&self) -> String {
        hash_token(&self.secret)
    }
}

/// Splits a `<grantID>.<secret>` refresh token.
///
/// # Errors
///
/// Returns `invalid_grant` when the token is not exactly two non-empty parts.
pub fn decode_refresh_token(token: &str) -> Result<DecodedRefreshToken, AuthError> {
    let mut parts = token.split('.');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(grant_id), Some(secret), None) if !grant_id.is_empty() && !secret.is_empty() => {
            Ok(DecodedRefreshToken {
                grant_id: grant_id.to_string(),
                secret: secret.to_string(),
            })
        }
        _ => Err(AuthError::invalid_grant("invalid refresh token")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_token_is_url_safe_and_unique() {
        let a = generate_token();
        let b = generate_token();
        assert_eq!(a.len(), 43);
        assert_ne!(a, b);
        assert!(
            a.chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        );
    }

    #[test]
    fn test_hash_token_known_vector() {
        assert_eq!(
            hash_token("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_decode_refresh_token() {
        let decoded = decode_refresh_token("grant-id.secret").unwrap();
        assert_eq!(decoded.grant_id, "grant-id");
        assert_eq!(decoded.secret, "secret");
        assert_eq!(decoded.token_hash(), hash_token("secret"));
    }

    #[test]
    fn test_decode_refresh_token_malformed() {
        for token in ["", "nodot", ".secret", "grant.", "a.b.c"] {
            let err = decode_refresh_token(token).unwrap_err();
            assert_eq!(err.oauth_error_code(), "invalid_grant");
            assert_eq!(err.description(), "invalid refresh token");
        }
    }

    #[test]
    fn test_constant_time_eq() {
        assert!(constant_time_eq("same", "same"));
        assert!(!constant_time_eq("same", "diff"));
        assert!(!constant_time_eq("short", "longer"));
    }

    #[test]
    fn test_encode_refresh_token() {
        assert_eq!(encode_refresh_token("g", "s"), "g.s");
    }
}
