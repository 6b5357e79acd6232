//! Token generation, encoding and verification.
//!
//! - [`codec`] - opaque secrets, hashing and `<grantID>.<secret>` refresh tokens
//! - [`jwt`] - signing keys, JWKS and the JWT service
//! - [`issuer`] - access token and ID token encoding

pub mod codec;
pub mod issuer;
pub mod jwt;

pub use codec::{
    DecodedRefreshToken, constant_time_eq, decode_refresh_token, encode_refresh_token,
    generate_token, hash_token,
};
pub use issuer::{AccessTokenEncoding, IdTokenIssuer, IssueIdTokenOptions};
pub use jwt::{
    AccessTokenClaims, Confirmation, IdTokenClaims, Jwk, Jwks, JwtError, JwtService,
    SigningAlgorithm, SigningKeyPair,
};
