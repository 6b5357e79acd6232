//! PKCE (Proof Key for Code Exchange), RFC 7636, `S256` only.
//!
//! ```
//! use keygate_auth::oauth::pkce::{PkceChallenge, generate_verifier};
//!
//! let verifier = generate_verifier();
//! let challenge = PkceChallenge::from_verifier(&verifier);
//! assert!(challenge.verify(&verifier).is_ok());
//! ```

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use rand::Rng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::AuthError;
use crate::token::codec::constant_time_eq;

/// Errors that can occur during PKCE operations.
#[derive(Debug, thiserror::Error)]
pub enum PkceError {
    /// The authorization request carried no challenge.
    #[error("PKCE code challenge is required")]
    MissingChallenge,

    /// Challenge format is invalid.
    #[error("Invalid challenge format: must be valid base64url")]
    InvalidChallengeFormat,

    /// Unsupported challenge method (only S256 is supported).
    #[error("only 'S256' PKCE transform is supported")]
    UnsupportedMethod(String),

    /// The verifier does not hash to the stored challenge.
    #[error("PKCE verification failed")]
    VerificationFailed,
}

impl PkceError {
    /// OAuth 2.0 error code for this error.
    #[must_use]
    pub fn oauth_error_code(&self) -> &'static str {
        match self {
            Self::MissingChallenge | Self::InvalidChallengeFormat | Self::UnsupportedMethod(_) => {
                "invalid_request"
            }
            Self::VerificationFailed => "invalid_grant",
        }
    }
}

impl From<PkceError> for AuthError {
    fn from(err: PkceError) -> Self {
        match err {
            PkceError::VerificationFailed => AuthError::invalid_grant(err.to_string()),
            _ => AuthError::invalid_request(err.to_string()),
        }
    }
}

/// PKCE challenge method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum PkceChallengeMethod {
    /// SHA-256 transform.
    #[default]
    S256,
}

impl PkceChallengeMethod {
    /// Parses a `code_challenge_method` value. Anything but `S256` fails.
    ///
    /// # Errors
    ///
    /// Returns `PkceError::UnsupportedMethod` for `plain` and unknown values.
    pub fn parse(method: &str) -> Result<Self, PkceError> {
        match method {
            "S256" => Ok(Self::S256),
            other => Err(PkceError::UnsupportedMethod(other.to_string())),
        }
    }

    /// The method as sent on the wire.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::S256 => "S256",
        }
    }
}

/// A stored PKCE challenge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PkceChallenge {
    /// `BASE64URL(SHA256(verifier))`.
    pub challenge: String,
    /// Transform method.
    #[serde(default)]
    pub method: PkceChallengeMethod,
}

impl PkceChallenge {
    /// Validates the challenge parameters of an authorization request.
    ///
    /// # Errors
    ///
    /// Fails when the challenge is absent, the method is not `S256`, or the
    /// challenge is not base64url.
    pub fn from_request(challenge: Option<&str>, method: Option<&str>) -> Result<Self, PkceError> {
        let challenge = match challenge {
            Some(c) if !c.is_empty() => c,
            _ => return Err(PkceError::MissingChallenge),
        };
        let method = PkceChallengeMethod::parse(method.unwrap_or_default())?;
        if URL_SAFE_NO_PAD.decode(challenge).is_err() {
            return Err(PkceError::InvalidChallengeFormat);
        }
        Ok(Self {
            challenge: challenge.to_string(),
            method,
        })
    }

    /// Computes the S256 challenge of a verifier.
    #[must_use]
    pub fn from_verifier(verifier: &str) -> Self {
        Self {
            challenge: URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes())),
            method: PkceChallengeMethod::S256,
        }
    }

    /// Verifies a `code_verifier` against this challenge in constant time.
    ///
    /// # Errors
    ///
    /// Returns `PkceError::VerificationFailed` on mismatch.
    pub fn verify(&self, verifier: &str) -> Result<(), PkceError> {
        let expected = Self::from_verifier(verifier);
        if constant_time_eq(&self.challenge, &expected.challenge) {
            Ok(())
        } else {
            Err(PkceError::VerificationFailed)
        }
    }
}

/// Generates a 43-character verifier from 32 random bytes.
#[must_use]
pub fn generate_verifier() -> String {
    let mut rng = rand::thread_rng();
    let bytes: [u8; 32] = rng.r#gen();
    URL_SAFE_NO_PAD.encode(bytes)
}
