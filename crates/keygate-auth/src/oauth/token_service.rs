//! Issuance of offline grants and access grants.

use std::sync::Arc;

use time::OffsetDateTime;

use crate::AuthResult;
use crate::oauth::offline_grant_service::{NewRefreshToken, OfflineGrantService};
use crate::provider::{EventSink, SessionEvent};
use crate::storage::{AccessGrantStore, OfflineGrantStore};
use crate::token::codec::{generate_token, hash_token};
use crate::token::issuer::AccessTokenEncoding;
use crate::types::{
    AccessEvent, AccessGrant, AccessInfo, AuthenticationInfo, ClientConfig, OfflineGrant,
    OfflineGrantRefreshToken, SessionRef,
};

/// Parameters of a new offline grant.
#[derive(Debug, Clone)]
pub struct IssueOfflineGrantOptions {
    /// The authentication the grant starts from.
    pub authentication_info: AuthenticationInfo,
    /// IDP session the grant was derived from.
    pub idp_session_id: Option<String>,
    /// Identity used to sign in.
    pub identity_id: Option<String>,
    /// Scopes of the root token.
    pub scopes: Vec<String>,
    /// Authorization of the root token.
    pub authorization_id: String,
    /// Whether the grant follows its IDP session.
    pub sso_enabled: bool,
    /// DPoP binding of the root token.
    pub dpop_jkt: Option<String>,
    /// Device info reported by the client.
    pub device_info: Option<serde_json::Value>,
}

/// A newly created offline grant and its root refresh token.
#[derive(Debug, Clone)]
pub struct IssuedOfflineGrant {
    /// The stored grant.
    pub grant: OfflineGrant,
    /// The root refresh token.
    pub refresh_token: NewRefreshToken,
}

/// Parameters of a new access grant.
#[derive(Debug, Clone)]
pub struct IssueAccessGrantOptions<'a> {
    /// Client the token is for.
    pub client: &'a ClientConfig,
    /// Session the token is bound to.
    pub session: SessionRef,
    /// Token subject.
    pub user_id: &'a str,
    /// Authorization the token derives from.
    pub authorization_id: &'a str,
    /// Granted scopes.
    pub scopes: Vec<String>,
    /// Refresh token the access token was minted from.
    pub refresh_token_hash: Option<String>,
    /// DPoP binding.
    pub dpop_jkt: Option<String>,
}

/// A newly issued access token.
#[derive(Debug, Clone)]
pub struct IssuedAccessToken {
    /// The token handed to the client.
    pub token: String,
    /// The stored grant.
    pub grant: AccessGrant,
    /// Lifetime in seconds.
    pub expires_in: u64,
}

/// Creates offline grants and access grants.
#[derive(Clone)]
pub struct TokenService {
    app_id: String,
    access_grants: Arc<dyn AccessGrantStore>,
    offline_grant_store: Arc<dyn OfflineGrantStore>,
    offline_grants: OfflineGrantService,
    access_tokens: AccessTokenEncoding,
    events: Arc<dyn EventSink>,
}

impl TokenService {
    /// Creates the service.
    #[must_use]
    pub fn new(
        app_id: impl Into<String>,
        access_grants: Arc<dyn AccessGrantStore>,
        offline_grant_store: Arc<dyn OfflineGrantStore>,
        offline_grants: OfflineGrantService,
        access_tokens: AccessTokenEncoding,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            app_id: app_id.into(),
            access_grants,
            offline_grant_store,
            offline_grants,
            access_tokens,
            events,
        }
    }

    /// The offline grant service.
    #[must_use]
    pub fn offline_grants(&self) -> &OfflineGrantService {
        &self.offline_grants
    }

    /// Creates an offline grant with a fresh root refresh token.
    ///
    /// # Errors
    ///
    /// Store errors, or `GrantNotFound` when `client` is not resolvable.
    pub async fn issue_offline_grant(
        &self,
        client: &ClientConfig,
        options: IssueOfflineGrantOptions,
        event: AccessEvent,
    ) -> AuthResult<IssuedOfflineGrant> {
        let grant_id = uuid::Uuid::new_v4().to_string();
        let refresh_token = NewRefreshToken::for_grant(&grant_id);
        let now = event.timestamp;

        let root = OfflineGrantRefreshToken {
            token_hash: refresh_token.token_hash.clone(),
            rotated_token_hash: None,
            rotated_at: None,
            client_id: client.client_id.clone(),
            created_at: now,
            scopes: options.scopes.clone(),
            authorization_id: options.authorization_id.clone(),
            dpop_jkt: options.dpop_jkt,
            access_info: Some(AccessInfo::new(event.clone())),
            expire_at: None,
        };

        let mut grant = OfflineGrant {
            app_id: self.app_id.clone(),
            id: grant_id,
            initial_client_id: client.client_id.clone(),
            authorization_id: options.authorization_id,
            idp_session_id: options.idp_session_id,
            identity_id: options.identity_id,
            created_at: now,
            authenticated_at: options.authentication_info.authenticated_at,
            scopes: options.scopes,
            user_id: options.authentication_info.user_id,
            amr: options.authentication_info.amr,
            access_info: AccessInfo::new(event),
            device_info: options.device_info,
            sso_enabled: options.sso_enabled,
            app2app_device_key_jwk_json: None,
            participated_saml_service_provider_ids: Vec::new(),
            refresh_tokens: vec![root],
            expire_at: now,
        };
        let expire_at = self.offline_grants.compute_offline_grant_expiry(&grant)?;
        grant.expire_at = expire_at;

        self.offline_grant_store
            .create_offline_grant(&grant, expire_at)
            .await?;
        tracing::debug!(grant_id = %grant.id, client_id = %client.client_id, "issued offline grant");

        self.events
            .dispatch_on_commit(SessionEvent::OfflineGrantCreated {
                user_id: grant.user_id.clone(),
                session: grant.session_ref(),
                client_id: client.client_id.clone(),
            })
            .await?;

        Ok(IssuedOfflineGrant {
            grant,
            refresh_token,
        })
    }

    /// Deletes the user's offline grants involving the client, without
    /// session events. Used to enforce a single concurrent session.
    ///
    /// # Errors
    ///
    /// Store errors.
    pub async fn revoke_client_offline_grants(
        &self,
        client_id: &str,
        user_id: &str,
    ) -> AuthResult<()> {
        let grants = self
            .offline_grant_store
            .list_client_offline_grants(client_id, user_id)
            .await?;
        for grant in grants {
            tracing::debug!(grant_id = %grant.id, client_id = %client_id, "revoking concurrent offline grant");
            self.offline_grant_store.delete_offline_grant(&grant).await?;
        }
        Ok(())
    }

    /// Creates an access grant and renders its token.
    ///
    /// # Errors
    ///
    /// Store or signing errors.
    pub async fn issue_access_grant(
        &self,
        options: IssueAccessGrantOptions<'_>,
    ) -> AuthResult<IssuedAccessToken> {
        let opaque = generate_token();
        let now = OffsetDateTime::now_utc();
        let lifetime = options.client.access_token_lifetime;

        let grant = AccessGrant {
            app_id: self.app_id.clone(),
            authorization_id: options.authorization_id.to_string(),
            client_id: options.client.client_id.clone(),
            session_id: options.session.id,
            session_kind: options.session.kind,
            created_at: now,
            expire_at: now + lifetime,
            scopes: options.scopes,
            token_hash: hash_token(&opaque),
            refresh_token_hash: options.refresh_token_hash,
            dpop_jkt: options.dpop_jkt,
        };
        self.access_grants.create_access_grant(&grant).await?;

        let token = self.access_tokens.encode_access_token(
            options.client,
            &grant,
            options.user_id,
            opaque,
        )?;

        Ok(IssuedAccessToken {
            token,
            grant,
            expires_in: lifetime.as_secs(),
        })
    }
}
