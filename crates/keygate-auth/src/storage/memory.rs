//! In-process implementation of every store.
//!
//! Records live in `DashMap`s next to their expiry and are treated as absent
//! once expired. Offline grant updates are serialized by a per-grant
//! `tokio::sync::Mutex` acquired with the configured timeout, which gives
//! the same locking contract as the Redis backend within one process.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use time::OffsetDateTime;
use tokio::sync::Mutex;

use super::{
    AccessGrantStore, AppSessionTokenStore, AuthorizationStore, ChallengeStore, CodeGrantStore,
    IdpSessionStore, OfflineGrantMutator, OfflineGrantStore, SettingsActionGrantStore,
};
use crate::AuthResult;
use crate::error::AuthError;
use crate::types::{
    AccessEvent, AccessGrant, AppSessionToken, Authorization, Challenge, CodeGrant, IdpSession,
    OfflineGrant, SettingsActionGrant,
};

#[derive(Debug, Clone)]
struct Expiring<T> {
    value: T,
    expire_at: OffsetDateTime,
}

impl<T: Clone> Expiring<T> {
    fn live(&self, now: OffsetDateTime) -> Option<T> {
        (now < self.expire_at).then(|| self.value.clone())
    }
}

fn insert_new<T>(
    map: &DashMap<String, Expiring<T>>,
    key: String,
    value: T,
    expire_at: OffsetDateTime,
) -> AuthResult<()> {
    let now = OffsetDateTime::now_utc();
    match map.entry(key) {
        Entry::Occupied(mut entry) if entry.get().expire_at <= now => {
            entry.insert(Expiring { value, expire_at });
            Ok(())
        }
        Entry::Occupied(entry) => Err(AuthError::storage(format!(
            "record '{}' already exists",
            entry.key()
        ))),
        Entry::Vacant(entry) => {
            entry.insert(Expiring { value, expire_at });
            Ok(())
        }
    }
}

fn get_live<T: Clone>(map: &DashMap<String, Expiring<T>>, key: &str) -> Option<T> {
    let now = OffsetDateTime::now_utc();
    map.get(key).and_then(|entry| entry.live(now))
}

/// In-memory grant, consent and session store.
pub struct MemoryStore {
    lock_timeout: Duration,
    code_grants: DashMap<String, Expiring<CodeGrant>>,
    access_grants: DashMap<String, Expiring<AccessGrant>>,
    offline_grants: DashMap<String, Expiring<OfflineGrant>>,
    offline_grant_index: DashMap<String, HashMap<String, OffsetDateTime>>,
    offline_grant_locks: DashMap<String, Arc<Mutex<()>>>,
    settings_action_grants: DashMap<String, Expiring<SettingsActionGrant>>,
    app_session_tokens: DashMap<String, Expiring<AppSessionToken>>,
    challenges: DashMap<String, Expiring<Challenge>>,
    authorizations: DashMap<String, Authorization>,
    idp_sessions: DashMap<String, IdpSession>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(Duration::from_secs(5))
    }
}

impl MemoryStore {
    /// Creates an empty store whose grant mutex waits at most `lock_timeout`.
    #[must_use]
    pub fn new(lock_timeout: Duration) -> Self {
        Self {
            lock_timeout,
            code_grants: DashMap::new(),
            access_grants: DashMap::new(),
            offline_grants: DashMap::new(),
            offline_grant_index: DashMap::new(),
            offline_grant_locks: DashMap::new(),
            settings_action_grants: DashMap::new(),
            app_session_tokens: DashMap::new(),
            challenges: DashMap::new(),
            authorizations: DashMap::new(),
            idp_sessions: DashMap::new(),
        }
    }

    fn grant_lock(&self, id: &str) -> Arc<Mutex<()>> {
        self.offline_grant_locks
            .entry(id.to_string())
            .or_default()
            .clone()
    }

    fn index_grant(&self, grant: &OfflineGrant, expire_at: OffsetDateTime) {
        self.offline_grant_index
            .entry(grant.user_id.clone())
            .or_default()
            .insert(grant.id.clone(), expire_at);
    }

    fn unindex_grant(&self, user_id: &str, grant_id: &str) {
        if let Some(mut index) = self.offline_grant_index.get_mut(user_id) {
            index.remove(grant_id);
        }
    }
}

// ============================================================================
// Short-lived grants
// ============================================================================

#[async_trait]
impl CodeGrantStore for MemoryStore {
    async fn create_code_grant(&self, grant: &CodeGrant) -> AuthResult<()> {
        insert_new(
            &self.code_grants,
            grant.code_hash.clone(),
            grant.clone(),
            grant.expire_at,
        )
    }

    async fn get_code_grant(&self, code_hash: &str) -> AuthResult<Option<CodeGrant>> {
        Ok(get_live(&self.code_grants, code_hash))
    }

    async fn delete_code_grant(&self, grant: &CodeGrant) -> AuthResult<()> {
        self.code_grants.remove(&grant.code_hash);
        Ok(())
    }
}

#[async_trait]
impl AccessGrantStore for MemoryStore {
    async fn create_access_grant(&self, grant: &AccessGrant) -> AuthResult<()> {
        insert_new(
            &self.access_grants,
            grant.token_hash.clone(),
            grant.clone(),
            grant.expire_at,
        )
    }

    async fn get_access_grant(&self, token_hash: &str) -> AuthResult<Option<AccessGrant>> {
        Ok(get_live(&self.access_grants, token_hash))
    }

    async fn delete_access_grant(&self, grant: &AccessGrant) -> AuthResult<()> {
        self.access_grants.remove(&grant.token_hash);
        Ok(())
    }
}

#[async_trait]
impl SettingsActionGrantStore for MemoryStore {
    async fn create_settings_action_grant(&self, grant: &SettingsActionGrant) -> AuthResult<()> {
        insert_new(
            &self.settings_action_grants,
            grant.code_hash.clone(),
            grant.clone(),
            grant.expire_at,
        )
    }

    async fn get_settings_action_grant(
        &self,
        code_hash: &str,
    ) -> AuthResult<Option<SettingsActionGrant>> {
        Ok(get_live(&self.settings_action_grants, code_hash))
    }

    async fn delete_settings_action_grant(&self, grant: &SettingsActionGrant) -> AuthResult<()> {
        self.settings_action_grants.remove(&grant.code_hash);
        Ok(())
    }
}

#[async_trait]
impl AppSessionTokenStore for MemoryStore {
    async fn create_app_session_token(&self, token: &AppSessionToken) -> AuthResult<()> {
        insert_new(
            &self.app_session_tokens,
            token.token_hash.clone(),
            token.clone(),
            token.expire_at,
        )
    }

    async fn get_app_session_token(
        &self,
        token_hash: &str,
    ) -> AuthResult<Option<AppSessionToken>> {
        Ok(get_live(&self.app_session_tokens, token_hash))
    }

    async fn delete_app_session_token(&self, token: &AppSessionToken) -> AuthResult<()> {
        self.app_session_tokens.remove(&token.token_hash);
        Ok(())
    }
}

#[async_trait]
impl ChallengeStore for MemoryStore {
    async fn create_challenge(&self, challenge: &Challenge) -> AuthResult<()> {
        insert_new(
            &self.challenges,
            challenge.token.clone(),
            challenge.clone(),
            challenge.expire_at,
        )
    }

    async fn consume_challenge(&self, token: &str) -> AuthResult<Option<Challenge>> {
        let now = OffsetDateTime::now_utc();
        Ok(self
            .challenges
            .remove(token)
            .and_then(|(_, entry)| entry.live(now)))
    }
}

// ============================================================================
// Offline grants
// ============================================================================

#[async_trait]
impl OfflineGrantStore for MemoryStore {
    async fn create_offline_grant(
        &self,
        grant: &OfflineGrant,
        expire_at: OffsetDateTime,
    ) -> AuthResult<()> {
        insert_new(&self.offline_grants, grant.id.clone(), grant.clone(), expire_at)?;
        self.index_grant(grant, expire_at);
        Ok(())
    }

    async fn get_offline_grant(&self, id: &str) -> AuthResult<Option<OfflineGrant>> {
        Ok(get_live(&self.offline_grants, id))
    }

    async fn update_offline_grant_with_mutator(
        &self,
        id: &str,
        mutator: OfflineGrantMutator,
    ) -> AuthResult<Option<OfflineGrant>> {
        let lock = self.grant_lock(id);
        let _guard = tokio::time::timeout(self.lock_timeout, lock.lock())
            .await
            .map_err(|_| AuthError::lock_timeout(format!("offline-grant-mutex:{id}")))?;

        let Some(mut grant) = get_live(&self.offline_grants, id) else {
            self.offline_grants.remove(id);
            self.offline_grant_locks.remove(id);
            return Err(AuthError::GrantNotFound);
        };
        let expire_at = mutator(&mut grant)?;
        grant.expire_at = expire_at;

        if !grant.has_valid_tokens() {
            self.offline_grants.remove(id);
            self.offline_grant_locks.remove(id);
            self.unindex_grant(&grant.user_id, id);
            return Ok(None);
        }

        let now = OffsetDateTime::now_utc();
        match self.offline_grants.get_mut(id) {
            Some(mut entry) if entry.expire_at > now => {
                *entry = Expiring {
                    value: grant.clone(),
                    expire_at,
                };
            }
            _ => return Err(AuthError::GrantNotFound),
        }
        self.index_grant(&grant, expire_at);
        Ok(Some(grant))
    }

    async fn delete_offline_grant(&self, grant: &OfflineGrant) -> AuthResult<()> {
        self.offline_grants.remove(&grant.id);
        self.offline_grant_locks.remove(&grant.id);
        self.unindex_grant(&grant.user_id, &grant.id);
        Ok(())
    }

    async fn list_offline_grants(&self, user_id: &str) -> AuthResult<Vec<OfflineGrant>> {
        let grant_ids: Vec<String> = self
            .offline_grant_index
            .get(user_id)
            .map(|index| index.keys().cloned().collect())
            .unwrap_or_default();

        let mut grants = Vec::with_capacity(grant_ids.len());
        for grant_id in grant_ids {
            match get_live(&self.offline_grants, &grant_id) {
                Some(grant) => grants.push(grant),
                None => {
                    tracing::debug!(user_id = %user_id, grant_id = %grant_id, "pruning stale offline grant index entry");
                    self.unindex_grant(user_id, &grant_id);
                }
            }
        }
        Ok(grants)
    }

    async fn clean_up_for_deleting_user_id(&self, user_id: &str) -> AuthResult<()> {
        self.offline_grant_index.remove(user_id);
        Ok(())
    }
}

// ============================================================================
// Consent and IDP sessions
// ============================================================================

#[async_trait]
impl AuthorizationStore for MemoryStore {
    async fn get_authorization(
        &self,
        user_id: &str,
        client_id: &str,
    ) -> AuthResult<Option<Authorization>> {
        Ok(self
            .authorizations
            .iter()
            .find(|a| a.user_id == user_id && a.client_id == client_id)
            .map(|a| a.value().clone()))
    }

    async fn get_authorization_by_id(&self, id: &str) -> AuthResult<Option<Authorization>> {
        Ok(self.authorizations.get(id).map(|a| a.value().clone()))
    }

    async fn create_authorization(&self, authorization: &Authorization) -> AuthResult<()> {
        let duplicate = self.authorizations.iter().any(|a| {
            a.user_id == authorization.user_id && a.client_id == authorization.client_id
        });
        if duplicate {
            return Err(AuthError::AuthorizationExists);
        }
        self.authorizations
            .insert(authorization.id.clone(), authorization.clone());
        Ok(())
    }

    async fn update_authorization(&self, authorization: &Authorization) -> AuthResult<()> {
        match self.authorizations.get_mut(&authorization.id) {
            Some(mut existing) => {
                *existing = authorization.clone();
                Ok(())
            }
            None => Err(AuthError::AuthorizationNotFound),
        }
    }

    async fn delete_authorization(&self, id: &str) -> AuthResult<()> {
        self.authorizations.remove(id);
        Ok(())
    }

    async fn list_authorizations(&self, user_id: &str) -> AuthResult<Vec<Authorization>> {
        Ok(self
            .authorizations
            .iter()
            .filter(|a| a.user_id == user_id)
            .map(|a| a.value().clone())
            .collect())
    }
}

#[async_trait]
impl IdpSessionStore for MemoryStore {
    async fn create_idp_session(&self, session: &IdpSession) -> AuthResult<()> {
        self.idp_sessions.insert(session.id.clone(), session.clone());
        Ok(())
    }

    async fn get_idp_session(&self, id: &str) -> AuthResult<Option<IdpSession>> {
        let now = OffsetDateTime::now_utc();
        Ok(self
            .idp_sessions
            .get(id)
            .filter(|s| !s.is_expired(now))
            .map(|s| s.value().clone()))
    }

    async fn update_idp_session_access(
        &self,
        id: &str,
        event: &AccessEvent,
    ) -> AuthResult<Option<IdpSession>> {
        let now = OffsetDateTime::now_utc();
        Ok(self.idp_sessions.get_mut(id).and_then(|mut session| {
            if session.is_expired(now) {
                return None;
            }
            session.access_info.last_access = event.clone();
            Some(session.value().clone())
        }))
    }

    async fn list_idp_sessions(&self, user_id: &str) -> AuthResult<Vec<IdpSession>> {
        let now = OffsetDateTime::now_utc();
        Ok(self
            .idp_sessions
            .iter()
            .filter(|s| s.user_id == user_id && !s.is_expired(now))
            .map(|s| s.value().clone())
            .collect())
    }

    async fn delete_idp_session(&self, id: &str) -> AuthResult<()> {
        self.idp_sessions.remove(id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::offline_grant::fixtures::{grant, token};
    use time::Duration as TimeDuration;

    fn later() -> OffsetDateTime {
        OffsetDateTime::now_utc() + TimeDuration::days(1)
    }

    #[tokio::test]
    async fn test_create_offline_grant_rejects_duplicate() {
        let store = MemoryStore::default();
        let g = grant("g1", "spa", OffsetDateTime::now_utc());
        store.create_offline_grant(&g, later()).await.unwrap();
        assert!(store.create_offline_grant(&g, later()).await.is_err());
    }

    #[tokio::test]
    async fn test_expired_grant_is_absent() {
        let store = MemoryStore::default();
        let g = grant("g1", "spa", OffsetDateTime::now_utc());
        let past = OffsetDateTime::now_utc() - TimeDuration::seconds(1);
        store.create_offline_grant(&g, past).await.unwrap();
        assert!(store.get_offline_grant("g1").await.unwrap().is_none());
        assert!(store.list_offline_grants("user-1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_update_missing_grant_is_not_found() {
        let store = MemoryStore::default();
        let result = store
            .update_offline_grant_with_mutator("nope", Box::new(|_| Ok(later())))
            .await;
        assert!(matches!(result, Err(AuthError::GrantNotFound)));
    }

    #[tokio::test]
    async fn test_update_writes_mutation_with_new_expiry() {
        let store = MemoryStore::default();
        let now = OffsetDateTime::now_utc();
        store
            .create_offline_grant(&grant("g1", "spa", now), later())
            .await
            .unwrap();

        let updated = store
            .update_offline_grant_with_mutator(
                "g1",
                Box::new(|g| {
                    g.refresh_tokens.push(token("second", "spa", g.created_at));
                    Ok(g.created_at + TimeDuration::hours(2))
                }),
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.refresh_tokens.len(), 2);
        assert_eq!(updated.expire_at, now + TimeDuration::hours(2));

        let stored = store.get_offline_grant("g1").await.unwrap().unwrap();
        assert_eq!(stored.refresh_tokens.len(), 2);
        assert_eq!(stored.expire_at, updated.expire_at);
    }

    #[tokio::test]
    async fn test_mutator_error_leaves_grant_untouched() {
        let store = MemoryStore::default();
        let now = OffsetDateTime::now_utc();
        store
            .create_offline_grant(&grant("g1", "spa", now), later())
            .await
            .unwrap();

        let result = store
            .update_offline_grant_with_mutator(
                "g1",
                Box::new(|g| {
                    g.refresh_tokens.clear();
                    Err(AuthError::invalid_grant("nope"))
                }),
            )
            .await;
        assert!(result.is_err());
        assert!(store.get_offline_grant("g1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_update_emptying_tokens_deletes_grant() {
        let store = MemoryStore::default();
        let now = OffsetDateTime::now_utc();
        store
            .create_offline_grant(&grant("g1", "spa", now), later())
            .await
            .unwrap();

        let result = store
            .update_offline_grant_with_mutator(
                "g1",
                Box::new(|g| {
                    g.refresh_tokens.clear();
                    Ok(g.expire_at)
                }),
            )
            .await
            .unwrap();
        assert!(result.is_none());
        assert!(store.get_offline_grant("g1").await.unwrap().is_none());
        assert!(store.list_offline_grants("user-1").await.unwrap().is_empty());
        assert!(store.offline_grant_locks.is_empty());
    }

    #[tokio::test]
    async fn test_grant_locks_are_dropped_with_the_grant() {
        let store = MemoryStore::default();
        let now = OffsetDateTime::now_utc();
        let g = grant("g1", "spa", now);
        store.create_offline_grant(&g, later()).await.unwrap();
        store
            .update_offline_grant_with_mutator("g1", Box::new(|g| Ok(g.expire_at)))
            .await
            .unwrap();
        assert_eq!(store.offline_grant_locks.len(), 1);

        store.delete_offline_grant(&g).await.unwrap();
        assert!(store.offline_grant_locks.is_empty());

        let missing = store
            .update_offline_grant_with_mutator("g1", Box::new(|g| Ok(g.expire_at)))
            .await;
        assert!(matches!(missing, Err(AuthError::GrantNotFound)));
        assert!(store.offline_grant_locks.is_empty());
    }

    #[tokio::test]
    async fn test_lock_timeout_is_an_error() {
        let store = MemoryStore::new(Duration::from_millis(20));
        let now = OffsetDateTime::now_utc();
        store
            .create_offline_grant(&grant("g1", "spa", now), later())
            .await
            .unwrap();

        let lock = store.grant_lock("g1");
        let _held = lock.lock().await;
        let result = store
            .update_offline_grant_with_mutator("g1", Box::new(|g| Ok(g.expire_at)))
            .await;
        assert!(matches!(result, Err(AuthError::LockTimeout { .. })));
    }

    #[tokio::test]
    async fn test_concurrent_updates_do_not_lose_writes() {
        let store = Arc::new(MemoryStore::default());
        let now = OffsetDateTime::now_utc();
        store
            .create_offline_grant(&grant("g1", "spa", now), later())
            .await
            .unwrap();

        let mut handles = Vec::new();
        for i in 0..16 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store
                    .update_offline_grant_with_mutator(
                        "g1",
                        Box::new(move |g| {
                            g.refresh_tokens
                                .push(token(&format!("t{i}"), "spa", g.created_at));
                            Ok(g.expire_at)
                        }),
                    )
                    .await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let stored = store.get_offline_grant("g1").await.unwrap().unwrap();
        assert_eq!(stored.refresh_tokens.len(), 17);
    }

    #[tokio::test]
    async fn test_list_client_offline_grants_filters_by_client() {
        let store = MemoryStore::default();
        let now = OffsetDateTime::now_utc();
        store
            .create_offline_grant(&grant("g1", "spa", now), later())
            .await
            .unwrap();
        store
            .create_offline_grant(&grant("g2", "native", now), later())
            .await
            .unwrap();

        let grants = store
            .list_client_offline_grants("native", "user-1")
            .await
            .unwrap();
        assert_eq!(grants.len(), 1);
        assert_eq!(grants[0].id, "g2");
    }

    #[tokio::test]
    async fn test_consume_challenge_is_single_use() {
        let store = MemoryStore::default();
        let now = OffsetDateTime::now_utc();
        let challenge = Challenge {
            token: "c1".to_string(),
            purpose: crate::types::ChallengePurpose::AnonymousRequest,
            created_at: now,
            expire_at: later(),
        };
        store.create_challenge(&challenge).await.unwrap();
        assert!(store.consume_challenge("c1").await.unwrap().is_some());
        assert!(store.consume_challenge("c1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_authorization_unique_per_user_and_client() {
        let store = MemoryStore::default();
        let now = OffsetDateTime::now_utc();
        let scopes = vec!["openid".to_string()];
        let first = Authorization::new("app", "spa", "user-1", &scopes, now);
        store.create_authorization(&first).await.unwrap();

        let second = Authorization::new("app", "spa", "user-1", &scopes, now);
        assert!(matches!(
            store.create_authorization(&second).await,
            Err(AuthError::AuthorizationExists)
        ));

        let found = store.get_authorization("user-1", "spa").await.unwrap().unwrap();
        assert_eq!(found.id, first.id);
    }
}
