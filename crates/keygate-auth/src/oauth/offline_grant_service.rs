//! Offline grant lifecycle: expiry, liveness, rotation and mutations.
//!
//! Expiry of a grant or of a single refresh token is
//! `min(created_at + lifetime, last_access + idle_timeout)`, the idle term
//! only applying when the client enables it. The grant uses its own last
//! access; a token uses [`OfflineGrantRefreshToken::last_access_or_created_at`].
//!
//! Every mutation runs through the store's locked read-modify-write, and
//! the expiry written back is computed from the mutated grant.

use std::sync::Arc;

use time::OffsetDateTime;

use crate::AuthResult;
use crate::error::AuthError;
use crate::storage::{IdpSessionStore, OfflineGrantStore};
use crate::token::codec::{encode_refresh_token, generate_token, hash_token};
use crate::types::{
    AccessEvent, AccessInfo, ClientConfig, ClientResolver, OfflineGrant, OfflineGrantRefreshToken,
};

/// Expiry of something created at `created_at` and last used at
/// `last_access`, under the client's refresh token policy.
#[must_use]
pub fn compute_expiry(
    created_at: OffsetDateTime,
    last_access: OffsetDateTime,
    client: &ClientConfig,
) -> OffsetDateTime {
    let lifetime_expiry = created_at + client.refresh_token_lifetime;
    if !client.refresh_token_idle_timeout_enabled {
        return lifetime_expiry;
    }
    let idle_expiry = last_access + client.refresh_token_idle_timeout;
    lifetime_expiry.min(idle_expiry)
}

/// Expiry of the whole grant, from its initial client's policy.
///
/// # Errors
///
/// `GrantNotFound` when the initial client no longer exists.
pub fn compute_grant_expiry(
    clients: &dyn ClientResolver,
    grant: &OfflineGrant,
) -> AuthResult<OffsetDateTime> {
    let client = clients
        .resolve_client(&grant.initial_client_id)
        .ok_or(AuthError::GrantNotFound)?;
    Ok(compute_expiry(
        grant.created_at,
        grant.access_info.last_access.timestamp,
        &client,
    ))
}

/// Initial hashes of the non-root tokens that housekeeping removes at `now`.
///
/// A token goes when its own hard expiry passed, when its client is gone,
/// or when its computed expiry passed.
#[must_use]
pub fn prunable_token_hashes(
    grant: &OfflineGrant,
    clients: &dyn ClientResolver,
    now: OffsetDateTime,
) -> Vec<String> {
    grant
        .refresh_tokens
        .iter()
        .skip(1)
        .filter(|token| is_token_prunable(token, clients, now))
        .map(|token| token.token_hash.clone())
        .collect()
}

fn is_token_prunable(
    token: &OfflineGrantRefreshToken,
    clients: &dyn ClientResolver,
    now: OffsetDateTime,
) -> bool {
    if token.expire_at.is_some_and(|expire_at| now > expire_at) {
        return true;
    }
    let Some(client) = clients.resolve_client(&token.client_id) else {
        return true;
    };
    let expiry = compute_expiry(token.created_at, token.last_access_or_created_at(), &client);
    now > expiry
}

fn housekeep(grant: &mut OfflineGrant, clients: &dyn ClientResolver, now: OffsetDateTime) {
    let prunable = prunable_token_hashes(grant, clients, now);
    if !prunable.is_empty() {
        tracing::debug!(grant_id = %grant.id, count = prunable.len(), "pruning expired refresh tokens");
        grant.remove_tokens(&prunable);
    }
}

/// A freshly minted refresh token.
#[derive(Debug, Clone)]
pub struct NewRefreshToken {
    /// Grant the token belongs to.
    pub grant_id: String,
    /// Raw secret. Only ever handed to the client.
    pub secret: String,
    /// Hash of the secret.
    pub token_hash: String,
}

impl NewRefreshToken {
    /// Generates a secret for `grant_id`.
    #[must_use]
    pub fn for_grant(grant_id: &str) -> Self {
        let secret = generate_token();
        Self {
            grant_id: grant_id.to_string(),
            token_hash: hash_token(&secret),
            secret,
        }
    }

    /// The `<grantID>.<secret>` wire form.
    #[must_use]
    pub fn encode(&self) -> String {
        encode_refresh_token(&self.grant_id, &self.secret)
    }
}

/// Parameters of [`OfflineGrantService::create_new_refresh_token`].
#[derive(Debug, Clone)]
pub struct CreateNewRefreshTokenOptions {
    /// Target grant.
    pub grant_id: String,
    /// Client the token is issued to.
    pub client_id: String,
    /// Scopes of the token.
    pub scopes: Vec<String>,
    /// Authorization of the token.
    pub authorization_id: String,
    /// DPoP binding.
    pub dpop_jkt: Option<String>,
    /// Access that issued the token.
    pub access_event: AccessEvent,
    /// Hard expiry for a short-lived token.
    pub expire_at: Option<OffsetDateTime>,
}

/// Offline grant operations on top of an [`OfflineGrantStore`].
#[derive(Clone)]
pub struct OfflineGrantService {
    offline_grants: Arc<dyn OfflineGrantStore>,
    idp_sessions: Arc<dyn IdpSessionStore>,
    clients: Arc<dyn ClientResolver>,
}

impl OfflineGrantService {
    /// Creates the service.
    #[must_use]
    pub fn new(
        offline_grants: Arc<dyn OfflineGrantStore>,
        idp_sessions: Arc<dyn IdpSessionStore>,
        clients: Arc<dyn ClientResolver>,
    ) -> Self {
        Self {
            offline_grants,
            idp_sessions,
            clients,
        }
    }

    /// Expiry of the grant under its initial client's policy.
    ///
    /// # Errors
    ///
    /// `GrantNotFound` when the initial client no longer exists.
    pub fn compute_offline_grant_expiry(&self, grant: &OfflineGrant) -> AuthResult<OffsetDateTime> {
        compute_grant_expiry(self.clients.as_ref(), grant)
    }

    /// Whether the grant is expired at `now`. Unknown clients count as
    /// expired.
    #[must_use]
    pub fn is_expired(&self, grant: &OfflineGrant, now: OffsetDateTime) -> bool {
        self.compute_offline_grant_expiry(grant)
            .map_or(true, |expiry| now > expiry)
    }

    /// Loads a live grant.
    ///
    /// # Errors
    ///
    /// `GrantNotFound` when the grant is absent or expired, or when it
    /// participates in SSO and its IDP session is gone or expired.
    pub async fn get_offline_grant(&self, id: &str) -> AuthResult<OfflineGrant> {
        let grant = self
            .offline_grants
            .get_offline_grant(id)
            .await?
            .ok_or(AuthError::GrantNotFound)?;

        let now = OffsetDateTime::now_utc();
        if now > self.compute_offline_grant_expiry(&grant)? {
            return Err(AuthError::GrantNotFound);
        }

        if grant.sso_enabled
            && let Some(idp_session_id) = grant.idp_session_id.as_deref()
        {
            let idp_session = self
                .idp_sessions
                .get_idp_session(idp_session_id)
                .await?
                .ok_or(AuthError::GrantNotFound)?;
            if idp_session.is_expired(now) {
                return Err(AuthError::GrantNotFound);
            }
        }

        Ok(grant)
    }

    /// Records an access on the grant, and on the token used if known.
    ///
    /// # Errors
    ///
    /// Store and lock errors.
    pub async fn access_offline_grant(
        &self,
        id: &str,
        refresh_token_hash: Option<&str>,
        event: &AccessEvent,
    ) -> AuthResult<OfflineGrant> {
        let event = event.clone();
        let refresh_token_hash = refresh_token_hash.map(str::to_string);
        self.mutate(id, move |grant| {
            grant.record_access(&event, refresh_token_hash.as_deref());
            Ok(())
        })
        .await
    }

    /// Adds a refresh token to a grant and prunes expired ones in the same
    /// locked update.
    ///
    /// Returns the new token and the grant after the update, `None` if the
    /// update left the grant without tokens and it was deleted.
    ///
    /// # Errors
    ///
    /// Store and lock errors, `GrantNotFound` for a vanished grant.
    pub async fn create_new_refresh_token(
        &self,
        options: CreateNewRefreshTokenOptions,
    ) -> AuthResult<(NewRefreshToken, Option<OfflineGrant>)> {
        let new_token = NewRefreshToken::for_grant(&options.grant_id);
        let token = OfflineGrantRefreshToken {
            token_hash: new_token.token_hash.clone(),
            rotated_token_hash: None,
            rotated_at: None,
            client_id: options.client_id,
            created_at: options.access_event.timestamp,
            scopes: options.scopes,
            authorization_id: options.authorization_id,
            dpop_jkt: options.dpop_jkt,
            access_info: Some(AccessInfo::new(options.access_event)),
            expire_at: options.expire_at,
        };

        let clients = self.clients.clone();
        let grant = self
            .offline_grants
            .update_offline_grant_with_mutator(
                &options.grant_id,
                Box::new(move |grant| {
                    grant.refresh_tokens.push(token);
                    housekeep(grant, clients.as_ref(), OffsetDateTime::now_utc());
                    compute_grant_expiry(clients.as_ref(), grant)
                }),
            )
            .await?;
        Ok((new_token, grant))
    }

    /// Rotates the secret of the token with initial hash `token_hash`,
    /// pruning expired tokens in the same locked update.
    ///
    /// # Errors
    ///
    /// `GrantNotFound` when the grant or the token is gone.
    pub async fn rotate_refresh_token(
        &self,
        grant_id: &str,
        token_hash: &str,
    ) -> AuthResult<(NewRefreshToken, OfflineGrant)> {
        let new_token = NewRefreshToken::for_grant(grant_id);
        let new_hash = new_token.token_hash.clone();
        let old_hash = token_hash.to_string();
        let clients = self.clients.clone();

        let grant = self
            .offline_grants
            .update_offline_grant_with_mutator(
                grant_id,
                Box::new(move |grant| {
                    let now = OffsetDateTime::now_utc();
                    grant.rotate_token(&old_hash, new_hash, now)?;
                    housekeep(grant, clients.as_ref(), now);
                    compute_grant_expiry(clients.as_ref(), grant)
                }),
            )
            .await?
            .ok_or(AuthError::GrantNotFound)?;

        if grant.find_token(&new_token.token_hash).is_none() {
            return Err(AuthError::GrantNotFound);
        }
        Ok((new_token, grant))
    }

    /// Removes tokens by initial hash. The grant is deleted if none remain.
    ///
    /// # Errors
    ///
    /// Store and lock errors.
    pub async fn remove_refresh_tokens(
        &self,
        grant_id: &str,
        token_hashes: Vec<String>,
    ) -> AuthResult<Option<OfflineGrant>> {
        let clients = self.clients.clone();
        self.offline_grants
            .update_offline_grant_with_mutator(
                grant_id,
                Box::new(move |grant| {
                    grant.remove_tokens(&token_hashes);
                    compute_grant_expiry(clients.as_ref(), grant)
                }),
            )
            .await
    }

    /// Replaces the device info reported by a native client.
    ///
    /// # Errors
    ///
    /// Store and lock errors.
    pub async fn update_offline_grant_device_info(
        &self,
        id: &str,
        device_info: serde_json::Value,
    ) -> AuthResult<OfflineGrant> {
        self.mutate(id, move |grant| {
            grant.device_info = Some(device_info);
            Ok(())
        })
        .await
    }

    /// Moves the authentication time forward after a re-authentication.
    ///
    /// # Errors
    ///
    /// Store and lock errors.
    pub async fn update_offline_grant_authenticated_at(
        &self,
        id: &str,
        authenticated_at: OffsetDateTime,
    ) -> AuthResult<OfflineGrant> {
        self.mutate(id, move |grant| {
            if authenticated_at > grant.authenticated_at {
                grant.authenticated_at = authenticated_at;
            }
            Ok(())
        })
        .await
    }

    /// Binds an App2App device key to the grant.
    ///
    /// # Errors
    ///
    /// `invalid_grant` when a different key is already bound.
    pub async fn update_offline_grant_app2app_device_key(
        &self,
        id: &str,
        jwk_json: String,
    ) -> AuthResult<OfflineGrant> {
        self.mutate(id, move |grant| {
            match grant.app2app_device_key_jwk_json.as_deref() {
                Some(existing) if existing != jwk_json => {
                    return Err(AuthError::invalid_grant(
                        "app2app device key cannot be changed",
                    ));
                }
                _ => grant.app2app_device_key_jwk_json = Some(jwk_json),
            }
            Ok(())
        })
        .await
    }

    /// Records a SAML service provider the session signed in to.
    ///
    /// # Errors
    ///
    /// Store and lock errors.
    pub async fn add_saml_service_provider_participant(
        &self,
        id: &str,
        service_provider_id: String,
    ) -> AuthResult<OfflineGrant> {
        self.mutate(id, move |grant| {
            if !grant
                .participated_saml_service_provider_ids
                .contains(&service_provider_id)
            {
                grant
                    .participated_saml_service_provider_ids
                    .push(service_provider_id);
            }
            Ok(())
        })
        .await
    }

    async fn mutate<F>(&self, id: &str, mutation: F) -> AuthResult<OfflineGrant>
    where
        F: FnOnce(&mut OfflineGrant) -> AuthResult<()> + Send + 'static,
    {
        let clients = self.clients.clone();
        self.offline_grants
            .update_offline_grant_with_mutator(
                id,
                Box::new(move |grant| {
                    mutation(grant)?;
                    compute_grant_expiry(clients.as_ref(), grant)
                }),
            )
            .await?
            .ok_or(AuthError::GrantNotFound)
    }
}
