//! JWT signing and verification.
//!
//! One signing key backs ID tokens, JWT access tokens and the published
//! JWKS. RS256, RS384 and ES384 keys are supported; keys are either
//! generated at startup or loaded from a PKCS#8 PEM.
//!
//! ```ignore
//! let key = SigningKeyPair::generate_rsa(SigningAlgorithm::RS256)?;
//! let jwt = JwtService::new(key, "https://auth.example.com");
//! let token = jwt.encode(&claims)?;
//! let data = jwt.decode::<IdTokenClaims>(&token)?;
//! ```

use std::fmt;

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use jsonwebtoken::{
    Algorithm, DecodingKey, EncodingKey, Header, TokenData, Validation, decode, encode,
};
use p384::SecretKey as EcSecretKey;
use p384::ecdsa::SigningKey as EcSigningKey;
use p384::pkcs8::{DecodePrivateKey as EcDecodePrivateKey, EncodePrivateKey as EcEncodePrivateKey};
use rand::rngs::OsRng;
use rsa::pkcs8::{DecodePrivateKey, EncodePrivateKey, EncodePublicKey, LineEnding};
use rsa::traits::PublicKeyParts;
use rsa::RsaPrivateKey;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::AuthError;

// ============================================================================
// Error Types
// ============================================================================

/// Errors that can occur during JWT operations.
#[derive(Debug, thiserror::Error)]
pub enum JwtError {
    /// Failed to encode a token.
    #[error("Failed to encode token: {0}")]
    Encoding(String),

    /// Failed to decode a token.
    #[error("Failed to decode token: {0}")]
    Decoding(String),

    /// The token has expired.
    #[error("Token expired")]
    Expired,

    /// The token signature is invalid.
    #[error("Invalid signature")]
    InvalidSignature,

    /// The token claims are invalid.
    #[error("Invalid claims: {0}")]
    InvalidClaims(String),

    /// Invalid or unusable key material.
    #[error("Invalid key: {0}")]
    InvalidKey(String),
}

impl JwtError {
    /// Returns `true` if the token itself failed validation.
    #[must_use]
    pub fn is_validation_error(&self) -> bool {
        matches!(
            self,
            Self::Expired | Self::InvalidSignature | Self::InvalidClaims(_) | Self::Decoding(_)
        )
    }
}

impl From<jsonwebtoken::errors::Error> for JwtError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        use jsonwebtoken::errors::ErrorKind;

        match err.kind() {
            ErrorKind::ExpiredSignature => Self::Expired,
            ErrorKind::InvalidSignature => Self::InvalidSignature,
            ErrorKind::InvalidAudience
            | ErrorKind::InvalidIssuer
            | ErrorKind::InvalidSubject
            | ErrorKind::MissingRequiredClaim(_) => Self::InvalidClaims(err.to_string()),
            ErrorKind::InvalidRsaKey(_) | ErrorKind::InvalidEcdsaKey | ErrorKind::InvalidKeyFormat => {
                Self::InvalidKey(err.to_string())
            }
            _ => Self::Decoding(err.to_string()),
        }
    }
}

impl From<JwtError> for AuthError {
    fn from(err: JwtError) -> Self {
        match err {
            JwtError::Encoding(_) | JwtError::InvalidKey(_) => AuthError::internal(err.to_string()),
            _ => AuthError::invalid_grant(err.to_string()),
        }
    }
}

// ============================================================================
// Signing Algorithm
// ============================================================================

/// Supported signing algorithms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SigningAlgorithm {
    /// RSA with SHA-256.
    RS256,
    /// RSA with SHA-384.
    RS384,
    /// ECDSA with P-384.
    ES384,
}

impl SigningAlgorithm {
    /// Converts to the `jsonwebtoken` Algorithm type.
    #[must_use]
    pub fn to_jwt_algorithm(self) -> Algorithm {
        match self {
            Self::RS256 => Algorithm::RS256,
            Self::RS384 => Algorithm::RS384,
            Self::ES384 => Algorithm::ES384,
        }
    }

    /// Name as used in JWK and JWT headers.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RS256 => "RS256",
            Self::RS384 => "RS384",
            Self::ES384 => "ES384",
        }
    }

    /// Parses an algorithm name.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "RS256" => Some(Self::RS256),
            "RS384" => Some(Self::RS384),
            "ES384" => Some(Self::ES384),
            _ => None,
        }
    }

    /// Returns `true` for RSA based algorithms.
    #[must_use]
    pub fn is_rsa(&self) -> bool {
        matches!(self, Self::RS256 | Self::RS384)
    }
}

impl fmt::Display for SigningAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// Token Claims
// ============================================================================

/// Proof-of-possession confirmation (RFC 9449 section 6).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Confirmation {
    /// JWK thumbprint of the DPoP key.
    pub jkt: String,
}

/// Claims of a JWT access token.
///
/// `jti` carries the hash of the underlying opaque token, so a JWT access
/// token resolves to the same access grant as its opaque form.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AccessTokenClaims {
    /// Issuer.
    pub iss: String,
    /// Subject (user ID).
    pub sub: String,
    /// Audience.
    pub aud: Vec<String>,
    /// Expiration time (Unix timestamp).
    pub exp: i64,
    /// Issued at (Unix timestamp).
    pub iat: i64,
    /// Access grant token hash.
    pub jti: String,
    /// OAuth client ID.
    pub client_id: String,
    /// Space-separated scopes.
    pub scope: String,
    /// Session ID claim.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sid: Option<String>,
    /// DPoP binding.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cnf: Option<Confirmation>,
}

/// Claims of an OpenID Connect ID token.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IdTokenClaims {
    /// Issuer.
    pub iss: String,
    /// Subject (user ID).
    pub sub: String,
    /// Audience (client ID).
    pub aud: String,
    /// Expiration time (Unix timestamp).
    pub exp: i64,
    /// Issued at (Unix timestamp).
    pub iat: i64,
    /// Time of the end-user authentication (Unix timestamp).
    pub auth_time: i64,
    /// Session ID.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sid: Option<String>,
    /// Authentication method references.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub amr: Vec<String>,
    /// Nonce from the authorization request.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,
}

// ============================================================================
// JWKS Types
// ============================================================================

/// JSON Web Key Set.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Jwks {
    /// The keys in this set.
    pub keys: Vec<Jwk>,
}

/// Public JSON Web Key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Jwk {
    /// Key type ("RSA" or "EC").
    pub kty: String,
    /// Key ID.
    pub kid: String,
    /// Key use.
    #[serde(rename = "use")]
    pub use_: String,
    /// Algorithm.
    pub alg: String,
    /// RSA modulus.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub n: Option<String>,
    /// RSA exponent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub e: Option<String>,
    /// EC curve name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub crv: Option<String>,
    /// EC x coordinate.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub x: Option<String>,
    /// EC y coordinate.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub y: Option<String>,
}

// ============================================================================
// Signing Key Pair
// ============================================================================

enum PublicKeyData {
    Rsa { n: Vec<u8>, e: Vec<u8> },
    Ec { x: Vec<u8>, y: Vec<u8> },
}

/// A signing key pair.
pub struct SigningKeyPair {
    /// Key ID.
    pub kid: String,
    /// Signing algorithm.
    pub algorithm: SigningAlgorithm,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    public_key_data: PublicKeyData,
}

impl SigningKeyPair {
    /// Generates a 2048-bit RSA key pair.
    ///
    /// # Errors
    ///
    /// Returns an error if generation fails or `algorithm` is not RSA.
    pub fn generate_rsa(algorithm: SigningAlgorithm) -> Result<Self, JwtError> {
        if !algorithm.is_rsa() {
            return Err(JwtError::InvalidKey(format!(
                "algorithm {algorithm} is not RSA-based"
            )));
        }
        let private_key = RsaPrivateKey::new(&mut OsRng, 2048)
            .map_err(|e| JwtError::InvalidKey(e.to_string()))?;
        let pem = private_key
            .to_pkcs8_pem(LineEnding::LF)
            .map_err(|e| JwtError::InvalidKey(e.to_string()))?;
        Self::from_rsa_key(uuid::Uuid::new_v4().to_string(), algorithm, &private_key, &pem)
    }

    /// Generates a P-384 key pair for ES384.
    ///
    /// # Errors
    ///
    /// Returns an error if the key cannot be exported.
    pub fn generate_ec() -> Result<Self, JwtError> {
        let secret_key = EcSecretKey::random(&mut OsRng);
        let pem = secret_key
            .to_pkcs8_pem(LineEnding::LF)
            .map_err(|e| JwtError::InvalidKey(e.to_string()))?;
        Self::from_ec_key(uuid::Uuid::new_v4().to_string(), &secret_key, &pem)
    }

    /// Loads a key pair from a PKCS#8 private key PEM.
    ///
    /// # Errors
    ///
    /// Returns an error if the PEM does not hold a key of `algorithm`.
    pub fn from_pem(
        kid: impl Into<String>,
        algorithm: SigningAlgorithm,
        private_pem: &str,
    ) -> Result<Self, JwtError> {
        if algorithm.is_rsa() {
            let private_key = RsaPrivateKey::from_pkcs8_pem(private_pem)
                .map_err(|e| JwtError::InvalidKey(e.to_string()))?;
            Self::from_rsa_key(kid.into(), algorithm, &private_key, private_pem)
        } else {
            let secret_key = EcSecretKey::from_pkcs8_pem(private_pem)
                .map_err(|e| JwtError::InvalidKey(e.to_string()))?;
            Self::from_ec_key(kid.into(), &secret_key, private_pem)
        }
    }

    fn from_rsa_key(
        kid: String,
        algorithm: SigningAlgorithm,
        private_key: &RsaPrivateKey,
        private_pem: &str,
    ) -> Result<Self, JwtError> {
        let public_key = private_key.to_public_key();
        let public_pem = public_key
            .to_public_key_pem(LineEnding::LF)
            .map_err(|e| JwtError::InvalidKey(e.to_string()))?;

        Ok(Self {
            kid,
            algorithm,
            encoding_key: EncodingKey::from_rsa_pem(private_pem.as_bytes())?,
            decoding_key: DecodingKey::from_rsa_pem(public_pem.as_bytes())?,
            public_key_data: PublicKeyData::Rsa {
                n: public_key.n().to_bytes_be(),
                e: public_key.e().to_bytes_be(),
            },
        })
    }

    fn from_ec_key(kid: String, secret_key: &EcSecretKey, private_pem: &str) -> Result<Self, JwtError> {
        let point = EcSigningKey::from(secret_key)
            .verifying_key()
            .to_encoded_point(false);
        let x = point
            .x()
            .ok_or_else(|| JwtError::InvalidKey("missing x coordinate".to_string()))?;
        let y = point
            .y()
            .ok_or_else(|| JwtError::InvalidKey("missing y coordinate".to_string()))?;

        let decoding_key = DecodingKey::from_ec_components(
            &URL_SAFE_NO_PAD.encode(x.as_slice()),
            &URL_SAFE_NO_PAD.encode(y.as_slice()),
        )?;

        Ok(Self {
            kid,
            algorithm: SigningAlgorithm::ES384,
            encoding_key: EncodingKey::from_ec_pem(private_pem.as_bytes())?,
            decoding_key,
            public_key_data: PublicKeyData::Ec {
                x: x.to_vec(),
                y: y.to_vec(),
            },
        })
    }

    /// Signs claims under a caller-built header.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding fails.
    pub fn sign<T: Serialize>(&self, header: &Header, claims: &T) -> Result<String, JwtError> {
        encode(header, claims, &self.encoding_key).map_err(|e| JwtError::Encoding(e.to_string()))
    }

    /// Exports the public key as a JWK.
    #[must_use]
    pub fn to_jwk(&self) -> Jwk {
        let (kty, n, e, crv, x, y) = match &self.public_key_data {
            PublicKeyData::Rsa { n, e } => (
                "RSA",
                Some(URL_SAFE_NO_PAD.encode(n)),
                Some(URL_SAFE_NO_PAD.encode(e)),
                None,
                None,
                None,
            ),
            PublicKeyData::Ec { x, y } => (
                "EC",
                None,
                None,
                Some("P-384".to_string()),
                Some(URL_SAFE_NO_PAD.encode(x)),
                Some(URL_SAFE_NO_PAD.encode(y)),
            ),
        };
        Jwk {
            kty: kty.to_string(),
            kid: self.kid.clone(),
            use_: "sig".to_string(),
            alg: self.algorithm.as_str().to_string(),
            n,
            e,
            crv,
            x,
            y,
        }
    }
}

// ============================================================================
// JWT Service
// ============================================================================

/// Encodes and verifies JWTs with the server signing key.
pub struct JwtService {
    signing_key: SigningKeyPair,
    issuer: String,
}

impl JwtService {
    /// Creates a new JWT service.
    #[must_use]
    pub fn new(signing_key: SigningKeyPair, issuer: impl Into<String>) -> Self {
        Self {
            signing_key,
            issuer: issuer.into(),
        }
    }

    /// Encodes claims into a JWT, with `kid` set in the header.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding fails.
    pub fn encode<T: Serialize>(&self, claims: &T) -> Result<String, JwtError> {
        let mut header = Header::new(self.signing_key.algorithm.to_jwt_algorithm());
        header.kid = Some(self.signing_key.kid.clone());
        self.signing_key.sign(&header, claims)
    }

    /// Decodes and validates a JWT issued by this service.
    ///
    /// # Errors
    ///
    /// Returns an error if the signature, issuer or expiry is invalid.
    pub fn decode<T: DeserializeOwned>(&self, token: &str) -> Result<TokenData<T>, JwtError> {
        decode(token, &self.signing_key.decoding_key, &self.validation(true)).map_err(JwtError::from)
    }

    /// Decodes a JWT issued by this service, accepting expired ones.
    ///
    /// Used for `id_token_hint`, which is routinely expired.
    ///
    /// # Errors
    ///
    /// Returns an error if the signature or issuer is invalid.
    pub fn decode_allow_expired<T: DeserializeOwned>(
        &self,
        token: &str,
    ) -> Result<TokenData<T>, JwtError> {
        decode(token, &self.signing_key.decoding_key, &self.validation(false))
            .map_err(JwtError::from)
    }

    fn validation(&self, validate_exp: bool) -> Validation {
        let mut validation = Validation::new(self.signing_key.algorithm.to_jwt_algorithm());
        validation.set_issuer(&[&self.issuer]);
        validation.validate_exp = validate_exp;
        validation.validate_aud = false;
        if !validate_exp {
            validation.required_spec_claims.remove("exp");
        }
        validation
    }

    /// The issuer URL.
    #[must_use]
    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    /// The signing algorithm.
    #[must_use]
    pub fn algorithm(&self) -> SigningAlgorithm {
        self.signing_key.algorithm
    }

    /// The public key set.
    #[must_use]
    pub fn jwks(&self) -> Jwks {
        Jwks {
            keys: vec![self.signing_key.to_jwk()],
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
