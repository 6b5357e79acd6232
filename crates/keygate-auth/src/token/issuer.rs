//! Access token and ID token encoding.

use std::sync::Arc;
use std::time::Duration;

use time::OffsetDateTime;

use crate::AuthResult;
use crate::error::AuthError;
use crate::token::codec::hash_token;
use crate::token::jwt::{AccessTokenClaims, Confirmation, IdTokenClaims, JwtService};
use crate::types::{AccessGrant, AuthenticationInfo, ClientConfig, SessionRef};

/// Encodes access tokens and recovers their store key.
///
/// An access token is either the raw opaque secret or, for clients that
/// ask for it, a signed JWT whose `jti` is the hash of that secret. Both
/// forms resolve to the same [`AccessGrant`].
#[derive(Clone)]
pub struct AccessTokenEncoding {
    jwt: Arc<JwtService>,
}

impl AccessTokenEncoding {
    /// Creates the encoder.
    #[must_use]
    pub fn new(jwt: Arc<JwtService>) -> Self {
        Self { jwt }
    }

    /// Renders the token handed to `client` for `grant`.
    ///
    /// # Errors
    ///
    /// `Internal` when JWT signing fails.
    pub fn encode_access_token(
        &self,
        client: &ClientConfig,
        grant: &AccessGrant,
        user_id: &str,
        opaque: String,
    ) -> AuthResult<String> {
        if !client.issue_jwt_access_token {
            return Ok(opaque);
        }
        let claims = AccessTokenClaims {
            iss: self.jwt.issuer().to_string(),
            sub: user_id.to_string(),
            aud: vec![self.jwt.issuer().to_string()],
            exp: grant.expire_at.unix_timestamp(),
            iat: grant.created_at.unix_timestamp(),
            jti: grant.token_hash.clone(),
            client_id: grant.client_id.clone(),
            scope: grant.scopes.join(" "),
            sid: Some(grant.session_ref().encode_sid()),
            cnf: grant.dpop_jkt.clone().map(|jkt| Confirmation { jkt }),
        };
        Ok(self.jwt.encode(&claims)?)
    }

    /// Store key of a presented access token.
    ///
    /// # Errors
    ///
    /// `InvalidSession` for a JWT that does not verify.
    pub fn decode_access_token_hash(&self, token: &str) -> AuthResult<String> {
        if token.matches('.').count() != 2 {
            return Ok(hash_token(token));
        }
        let data = self
            .jwt
            .decode::<AccessTokenClaims>(token)
            .map_err(|e| {
                tracing::debug!(error = %e, "rejected JWT access token");
                AuthError::InvalidSession
            })?;
        Ok(data.claims.jti)
    }
}

/// Options of [`IdTokenIssuer::issue_id_token`].
#[derive(Debug, Clone)]
pub struct IssueIdTokenOptions<'a> {
    /// Audience.
    pub client_id: &'a str,
    /// Session the token speaks for.
    pub session: Option<&'a SessionRef>,
    /// Nonce from the authorization request.
    pub nonce: Option<&'a str>,
    /// The authentication being asserted.
    pub authentication_info: &'a AuthenticationInfo,
}

/// Issues and verifies ID tokens.
#[derive(Clone)]
pub struct IdTokenIssuer {
    jwt: Arc<JwtService>,
    lifetime: Duration,
}

impl IdTokenIssuer {
    /// Creates the issuer.
    #[must_use]
    pub fn new(jwt: Arc<JwtService>, lifetime: Duration) -> Self {
        Self { jwt, lifetime }
    }

    /// ID token lifetime.
    #[must_use]
    pub fn lifetime(&self) -> Duration {
        self.lifetime
    }

    /// Signs an ID token.
    ///
    /// # Errors
    ///
    /// `Internal` when signing fails.
    pub fn issue_id_token(&self, options: IssueIdTokenOptions<'_>) -> AuthResult<String> {
        let now = OffsetDateTime::now_utc();
        let claims = IdTokenClaims {
            iss: self.jwt.issuer().to_string(),
            sub: options.authentication_info.user_id.clone(),
            aud: options.client_id.to_string(),
            exp: (now + self.lifetime).unix_timestamp(),
            iat: now.unix_timestamp(),
            auth_time: options.authentication_info.authenticated_at.unix_timestamp(),
            sid: options.session.map(SessionRef::encode_sid),
            amr: options.authentication_info.amr.clone(),
            nonce: options.nonce.map(str::to_string),
        };
        Ok(self.jwt.encode(&claims)?)
    }

    /// Verifies an `id_token_hint`. Expired hints are accepted.
    ///
    /// # Errors
    ///
    /// `invalid_request` for a hint not signed by this server.
    pub fn verify_id_token_hint(&self, hint: &str) -> AuthResult<IdTokenClaims> {
        self.jwt
            .decode_allow_expired::<IdTokenClaims>(hint)
            .map(|data| data.claims)
            .map_err(|e| {
                tracing::debug!(error = %e, "rejected id_token_hint");
                AuthError::invalid_request("invalid id_token_hint")
            })
    }
}
