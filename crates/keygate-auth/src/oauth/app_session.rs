//! App session tokens: short-lived tokens that let a native app open a web
//! session for the user behind one of its refresh tokens.

use std::sync::Arc;
use std::time::Duration;

use time::OffsetDateTime;

use crate::AuthResult;
use crate::error::AuthError;
use crate::oauth::offline_grant_service::OfflineGrantService;
use crate::oauth::token::TokenRequestContext;
use crate::oauth::token_handler::TokenHandler;
use crate::storage::AppSessionTokenStore;
use crate::token::codec::{generate_token, hash_token};
use crate::types::{AppSessionToken, FULL_ACCESS_SCOPE};

/// Issues and consumes [`AppSessionToken`]s.
#[derive(Clone)]
pub struct AppSessionTokenService {
    tokens: TokenHandler,
    offline_grants: OfflineGrantService,
    store: Arc<dyn AppSessionTokenStore>,
    lifetime: Duration,
}

impl AppSessionTokenService {
    /// Creates the service.
    #[must_use]
    pub fn new(
        tokens: TokenHandler,
        offline_grants: OfflineGrantService,
        store: Arc<dyn AppSessionTokenStore>,
        lifetime: Duration,
    ) -> Self {
        Self {
            tokens,
            offline_grants,
            store,
            lifetime,
        }
    }

    /// Mints an app session token from a refresh token.
    ///
    /// Only refresh tokens whose authorization carries the full-access scope
    /// qualify.
    ///
    /// # Errors
    ///
    /// `invalid_grant` for an unusable refresh token, `access_denied` for a
    /// client without full user access.
    pub async fn issue_app_session_token(
        &self,
        refresh_token: &str,
        ctx: &TokenRequestContext,
    ) -> AuthResult<(String, AppSessionToken)> {
        let (session, authorization) = self.tokens.parse_refresh_token(refresh_token, ctx).await?;

        if !authorization.is_authorized(&[FULL_ACCESS_SCOPE.to_string()]) {
            return Err(AuthError::access_denied(
                "the client is not authorized to have full user access",
            ));
        }

        let now = OffsetDateTime::now_utc();
        let token = generate_token();
        let record = AppSessionToken {
            app_id: session.grant.app_id.clone(),
            offline_grant_id: session.grant.id.clone(),
            created_at: now,
            expire_at: now + self.lifetime,
            token_hash: hash_token(&token),
            refresh_token_hash: session.token_hash.clone(),
        };
        self.store.create_app_session_token(&record).await?;
        tracing::debug!(grant_id = %record.offline_grant_id, "issued app session token");

        Ok((token, record))
    }

    /// Exchanges an app session token exactly once.
    ///
    /// The offline grant must still be live and still hold the refresh token
    /// the app session token was minted from.
    ///
    /// # Errors
    ///
    /// `invalid_grant` for unknown, expired or orphaned tokens.
    pub async fn consume_app_session_token(&self, token: &str) -> AuthResult<AppSessionToken> {
        let invalid = || AuthError::invalid_grant("invalid app session token");

        let record = self
            .store
            .get_app_session_token(&hash_token(token))
            .await?
            .ok_or_else(invalid)?;
        self.store.delete_app_session_token(&record).await?;

        if OffsetDateTime::now_utc() >= record.expire_at {
            return Err(invalid());
        }

        let grant = match self
            .offline_grants
            .get_offline_grant(&record.offline_grant_id)
            .await
        {
            Ok(grant) => grant,
            Err(e) if e.is_server_error() => return Err(e),
            Err(_) => return Err(invalid()),
        };
        if grant.token_by_initial_hash(&record.refresh_token_hash).is_none() {
            return Err(invalid());
        }

        Ok(record)
    }
}
