//! Access token resolution for resource requests.
//!
//! Every miss along the way (unknown token, expired grant, revoked consent,
//! vanished session) resolves to [`AuthError::InvalidSession`], which
//! callers treat as an unauthenticated request.

use std::sync::Arc;

use axum::http::{HeaderMap, header::AUTHORIZATION};
use time::OffsetDateTime;

use crate::AuthResult;
use crate::error::AuthError;
use crate::oauth::authorizations::AuthorizationService;
use crate::oauth::dpop::DpopProof;
use crate::oauth::offline_grant_service::OfflineGrantService;
use crate::storage::{AccessGrantStore, IdpSessionStore};
use crate::token::codec::constant_time_eq;
use crate::token::issuer::AccessTokenEncoding;
use crate::types::{AccessGrant, OfflineGrant, RequestMeta, Session, SessionKind};

/// Extracts the token from `Authorization: Bearer <token>` or
/// `Authorization: DPoP <token>`.
#[must_use]
pub fn extract_access_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    let token = token.trim();
    if token.is_empty() {
        return None;
    }
    (scheme.eq_ignore_ascii_case("bearer") || scheme.eq_ignore_ascii_case("dpop")).then_some(token)
}

/// Maps access tokens back to the live session they were issued for.
#[derive(Clone)]
pub struct AccessTokenResolver {
    access_grants: Arc<dyn AccessGrantStore>,
    authorizations: AuthorizationService,
    idp_sessions: Arc<dyn IdpSessionStore>,
    offline_grants: OfflineGrantService,
    encoding: AccessTokenEncoding,
}

impl AccessTokenResolver {
    /// Creates the resolver.
    #[must_use]
    pub fn new(
        access_grants: Arc<dyn AccessGrantStore>,
        authorizations: AuthorizationService,
        idp_sessions: Arc<dyn IdpSessionStore>,
        offline_grants: OfflineGrantService,
        encoding: AccessTokenEncoding,
    ) -> Self {
        Self {
            access_grants,
            authorizations,
            idp_sessions,
            offline_grants,
            encoding,
        }
    }

    /// Resolves the access token of a request.
    ///
    /// Returns `Ok(None)` when the request carries no access token.
    ///
    /// # Errors
    ///
    /// `InvalidSession` when the token does not resolve, infrastructure
    /// errors otherwise.
    pub async fn resolve(
        &self,
        headers: &HeaderMap,
        dpop_proof: Option<&DpopProof>,
        meta: &RequestMeta,
    ) -> AuthResult<Option<Session>> {
        match extract_access_token(headers) {
            Some(token) => self
                .resolve_access_token(token, dpop_proof, meta)
                .await
                .map(Some),
            None => Ok(None),
        }
    }

    /// Resolves an access token to its session and records the access.
    ///
    /// # Errors
    ///
    /// `InvalidSession` when the token does not resolve.
    pub async fn resolve_access_token(
        &self,
        token: &str,
        dpop_proof: Option<&DpopProof>,
        meta: &RequestMeta,
    ) -> AuthResult<Session> {
        let now = OffsetDateTime::now_utc();
        let token_hash = self.encoding.decode_access_token_hash(token)?;

        let grant = self
            .access_grants
            .get_access_grant(&token_hash)
            .await?
            .filter(|g| !g.is_expired(now))
            .ok_or(AuthError::InvalidSession)?;

        // Revoked consent invalidates derived tokens before their TTL.
        if self
            .authorizations
            .get_by_id(&grant.authorization_id)
            .await?
            .is_none()
        {
            tracing::debug!(authorization_id = %grant.authorization_id, "access grant outlived its authorization");
            return Err(AuthError::InvalidSession);
        }

        if let Some(expected) = grant.dpop_jkt.as_deref() {
            let matches = dpop_proof.is_some_and(|p| constant_time_eq(&p.jkt, expected));
            if !matches {
                return Err(AuthError::InvalidSession);
            }
        }

        let event = meta.access_event(now);
        match grant.session_kind {
            SessionKind::IdpSession => {
                let session = self
                    .idp_sessions
                    .get_idp_session(&grant.session_id)
                    .await?
                    .filter(|s| !s.is_expired(now))
                    .ok_or(AuthError::InvalidSession)?;
                let touched = self
                    .idp_sessions
                    .update_idp_session_access(&session.id, &event)
                    .await?
                    .ok_or(AuthError::InvalidSession)?;
                Ok(Session::Idp(touched))
            }
            SessionKind::OfflineGrant => {
                let offline = self
                    .offline_grants
                    .get_offline_grant(&grant.session_id)
                    .await
                    .map_err(into_invalid_session)?;
                let token_hash = session_token_hash(&grant, &offline)?;
                let touched = self
                    .offline_grants
                    .access_offline_grant(&offline.id, Some(&token_hash), &event)
                    .await
                    .map_err(into_invalid_session)?;
                let session = touched
                    .to_session_by_initial_hash(&token_hash)
                    .ok_or(AuthError::InvalidSession)?;
                Ok(Session::OfflineGrant(Box::new(session)))
            }
        }
    }
}

/// Initial hash of the refresh token an access grant derives from, or of
/// the grant's root token for access grants minted without one.
fn session_token_hash(grant: &AccessGrant, offline: &OfflineGrant) -> AuthResult<String> {
    let token = match grant.refresh_token_hash.as_deref() {
        Some(hash) => offline.token_by_initial_hash(hash),
        None => offline.refresh_tokens.first(),
    };
    token
        .map(|t| t.token_hash.clone())
        .ok_or(AuthError::InvalidSession)
}

fn into_invalid_session(err: AuthError) -> AuthError {
    if err.is_server_error() {
        err
    } else {
        AuthError::InvalidSession
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_str(value).unwrap());
        headers
    }

    #[test]
    fn test_extract_access_token() {
        assert_eq!(extract_access_token(&headers("Bearer abc")), Some("abc"));
        assert_eq!(extract_access_token(&headers("bearer abc")), Some("abc"));
        assert_eq!(extract_access_token(&headers("DPoP abc")), Some("abc"));
        assert_eq!(extract_access_token(&headers("Basic abc")), None);
        assert_eq!(extract_access_token(&headers("Bearer ")), None);
        assert_eq!(extract_access_token(&HeaderMap::new()), None);
    }
}
