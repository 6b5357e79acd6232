//! List and revoke operations over IDP sessions and offline grants.

use std::sync::Arc;

use time::OffsetDateTime;

use crate::AuthResult;
use crate::error::AuthError;
use crate::oauth::authorizations::AuthorizationService;
use crate::oauth::offline_grant_service::OfflineGrantService;
use crate::provider::{EventSink, SessionEvent};
use crate::storage::{IdpSessionStore, OfflineGrantStore};
use crate::types::{Authorization, OfflineGrant, Session, SessionKind, SessionRef};

/// Result of a logout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogoutOutcome {
    /// The session cookie must be cleared.
    pub clear_session_cookie: bool,
}

/// Session management for one tenant.
#[derive(Clone)]
pub struct SessionManager {
    idp_sessions: Arc<dyn IdpSessionStore>,
    offline_grant_store: Arc<dyn OfflineGrantStore>,
    offline_grants: OfflineGrantService,
    authorizations: AuthorizationService,
    events: Arc<dyn EventSink>,
}

impl SessionManager {
    /// Creates the manager.
    #[must_use]
    pub fn new(
        idp_sessions: Arc<dyn IdpSessionStore>,
        offline_grant_store: Arc<dyn OfflineGrantStore>,
        offline_grants: OfflineGrantService,
        authorizations: AuthorizationService,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            idp_sessions,
            offline_grant_store,
            offline_grants,
            authorizations,
            events,
        }
    }

    /// Lists a user's live sessions, newest first.
    ///
    /// # Errors
    ///
    /// Store errors.
    pub async fn list(&self, user_id: &str) -> AuthResult<Vec<Session>> {
        let now = OffsetDateTime::now_utc();
        let mut sessions: Vec<Session> = self
            .idp_sessions
            .list_idp_sessions(user_id)
            .await?
            .into_iter()
            .filter(|s| !s.is_expired(now))
            .map(Session::Idp)
            .collect();

        for grant in self.offline_grant_store.list_offline_grants(user_id).await? {
            if self.offline_grants.is_expired(&grant, now) {
                continue;
            }
            if let Some(session) = root_session(&grant) {
                sessions.push(session);
            }
        }

        sessions.sort_by(|a, b| b.created_at().cmp(&a.created_at()));
        Ok(sessions)
    }

    /// Loads one of a user's sessions.
    ///
    /// # Errors
    ///
    /// `InvalidSession` when the session does not exist, is dead or belongs
    /// to someone else.
    pub async fn get(&self, user_id: &str, session_id: &str) -> AuthResult<Session> {
        let now = OffsetDateTime::now_utc();
        if let Some(session) = self.idp_sessions.get_idp_session(session_id).await?
            && !session.is_expired(now)
            && session.user_id == user_id
        {
            return Ok(Session::Idp(session));
        }

        match self.offline_grants.get_offline_grant(session_id).await {
            Ok(grant) if grant.user_id == user_id => {
                root_session(&grant).ok_or(AuthError::InvalidSession)
            }
            Ok(_) | Err(AuthError::GrantNotFound) => Err(AuthError::InvalidSession),
            Err(e) => Err(e),
        }
    }

    /// Revokes a session, announcing it first.
    ///
    /// Revoking an IDP session also revokes the SSO offline grants derived
    /// from it.
    ///
    /// # Errors
    ///
    /// Store and event delivery errors.
    pub async fn revoke(&self, session: &Session, is_termination: bool) -> AuthResult<()> {
        let session_ref = session.session_ref();
        self.events
            .dispatch_on_commit(SessionEvent::SessionDeleted {
                user_id: session.user_id().to_string(),
                session: session_ref.clone(),
                is_termination,
            })
            .await?;
        self.delete_session(session).await?;

        if session_ref.kind == SessionKind::IdpSession {
            let derived = self
                .offline_grant_store
                .list_offline_grants(session.user_id())
                .await?
                .into_iter()
                .filter(|g| g.sso_enabled && g.idp_session_id.as_deref() == Some(&session_ref.id));
            for grant in derived {
                tracing::debug!(grant_id = %grant.id, idp_session_id = %session_ref.id, "revoking SSO offline grant");
                self.revoke_offline_grant(&grant, is_termination).await?;
            }
        }

        tracing::info!(
            session_kind = session_ref.kind.as_str(),
            session_id = %session_ref.id,
            is_termination,
            "session revoked"
        );
        Ok(())
    }

    /// Logs the session holder out. Event delivery is best effort.
    ///
    /// # Errors
    ///
    /// Store errors.
    pub async fn logout(&self, session: &Session) -> AuthResult<LogoutOutcome> {
        if let Err(e) = self
            .events
            .dispatch_on_commit(SessionEvent::SessionDeleted {
                user_id: session.user_id().to_string(),
                session: session.session_ref(),
                is_termination: false,
            })
            .await
        {
            tracing::warn!(error = %e, "failed to dispatch logout event");
        }
        self.delete_session(session).await?;

        Ok(LogoutOutcome {
            clear_session_cookie: matches!(session, Session::Idp(_)),
        })
    }

    /// Deletes one of a user's sessions on their behalf.
    ///
    /// # Errors
    ///
    /// `InvalidSession` for an unknown session, store errors.
    pub async fn delete(&self, user_id: &str, session_id: &str) -> AuthResult<()> {
        let session = self.get(user_id, session_id).await?;
        self.revoke(&session, true).await
    }

    /// Revokes every session of the user except `current`.
    ///
    /// Returns how many sessions were revoked.
    ///
    /// # Errors
    ///
    /// Store and event delivery errors.
    pub async fn terminate_other_sessions(
        &self,
        user_id: &str,
        current: &SessionRef,
    ) -> AuthResult<usize> {
        let mut revoked = 0;
        for session in self.list(user_id).await? {
            if session.session_ref() == *current {
                continue;
            }
            match self.revoke(&session, true).await {
                Ok(()) => revoked += 1,
                // Already gone through the IDP session it followed.
                Err(AuthError::GrantNotFound) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(revoked)
    }

    /// Deletes a consent record and every refresh token issued under it.
    ///
    /// # Errors
    ///
    /// Store and event delivery errors.
    pub async fn revoke_authorization(&self, authorization: &Authorization) -> AuthResult<()> {
        for grant in self
            .offline_grant_store
            .list_offline_grants(&authorization.user_id)
            .await?
        {
            let hashes = grant.token_hashes_for_authorization(&authorization.id);
            if hashes.is_empty() {
                continue;
            }
            match self.offline_grants.remove_refresh_tokens(&grant.id, hashes).await {
                Ok(_) | Err(AuthError::GrantNotFound) => {}
                Err(e) => return Err(e),
            }
        }

        self.authorizations.delete(&authorization.id).await?;
        self.events
            .dispatch_on_commit(SessionEvent::AuthorizationDeleted {
                user_id: authorization.user_id.clone(),
                client_id: authorization.client_id.clone(),
            })
            .await
    }

    async fn revoke_offline_grant(&self, grant: &OfflineGrant, is_termination: bool) -> AuthResult<()> {
        self.events
            .dispatch_on_commit(SessionEvent::SessionDeleted {
                user_id: grant.user_id.clone(),
                session: grant.session_ref(),
                is_termination,
            })
            .await?;
        self.offline_grant_store.delete_offline_grant(grant).await
    }

    async fn delete_session(&self, session: &Session) -> AuthResult<()> {
        match session {
            Session::Idp(s) => self.idp_sessions.delete_idp_session(&s.id).await,
            Session::OfflineGrant(s) => self.offline_grant_store.delete_offline_grant(&s.grant).await,
        }
    }
}

fn root_session(grant: &OfflineGrant) -> Option<Session> {
    let root = grant.refresh_tokens.first()?;
    grant
        .to_session_by_initial_hash(&root.token_hash)
        .map(|s| Session::OfflineGrant(Box::new(s)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::RwLock;

    use async_trait::async_trait;
    use time::Duration;

    use crate::storage::{AuthorizationStore, MemoryStore};
    use crate::types::offline_grant::fixtures;
    use crate::types::{AccessInfo, ClientConfig, IdpSession, StaticClientResolver};

    #[derive(Default)]
    struct RecordingSink {
        events: RwLock<Vec<SessionEvent>>,
    }

    #[async_trait]
    impl EventSink for RecordingSink {
        async fn dispatch_on_commit(&self, event: SessionEvent) -> AuthResult<()> {
            self.events.write().unwrap().push(event);
            Ok(())
        }
    }

    struct Fixture {
        store: Arc<MemoryStore>,
        sink: Arc<RecordingSink>,
        manager: SessionManager,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::default());
        let sink = Arc::new(RecordingSink::default());
        let clients = Arc::new(StaticClientResolver::new([ClientConfig::new(
            "spa",
            vec!["https://spa.example.com/cb".to_string()],
        )]));
        let offline_grants = OfflineGrantService::new(store.clone(), store.clone(), clients);
        let manager = SessionManager::new(
            store.clone(),
            store.clone(),
            offline_grants,
            AuthorizationService::new("app", store.clone()),
            sink.clone(),
        );
        Fixture {
            store,
            sink,
            manager,
        }
    }

    fn idp_session(id: &str, created_at: OffsetDateTime) -> IdpSession {
        IdpSession {
            id: id.to_string(),
            app_id: "app".to_string(),
            user_id: "user-1".to_string(),
            created_at,
            authenticated_at: created_at,
            expire_at: created_at + Duration::days(1),
            amr: vec!["pwd".to_string()],
            access_info: AccessInfo::new(fixtures::access_at(created_at)),
        }
    }

    async fn stored_grant(store: &MemoryStore, id: &str, created_at: OffsetDateTime) -> OfflineGrant {
        let grant = fixtures::grant(id, "spa", created_at);
        store
            .create_offline_grant(&grant, created_at + Duration::days(1))
            .await
            .unwrap();
        grant
    }

    #[tokio::test]
    async fn test_list_sorted_newest_first() {
        let f = fixture();
        let now = OffsetDateTime::now_utc();
        f.store
            .create_idp_session(&idp_session("idp-old", now - Duration::hours(2)))
            .await
            .unwrap();
        stored_grant(&f.store, "grant-mid", now - Duration::hours(1)).await;
        f.store
            .create_idp_session(&idp_session("idp-new", now))
            .await
            .unwrap();

        let ids: Vec<String> = f
            .manager
            .list("user-1")
            .await
            .unwrap()
            .iter()
            .map(|s| s.session_ref().id)
            .collect();
        assert_eq!(ids, vec!["idp-new", "grant-mid", "idp-old"]);
    }

    #[tokio::test]
    async fn test_get_rejects_other_users() {
        let f = fixture();
        let now = OffsetDateTime::now_utc();
        stored_grant(&f.store, "grant-1", now).await;

        assert!(f.manager.get("user-1", "grant-1").await.is_ok());
        assert!(matches!(
            f.manager.get("user-2", "grant-1").await,
            Err(AuthError::InvalidSession)
        ));
        assert!(matches!(
            f.manager.get("user-1", "nope").await,
            Err(AuthError::InvalidSession)
        ));
    }

    #[tokio::test]
    async fn test_revoke_dispatches_before_delete() {
        let f = fixture();
        let now = OffsetDateTime::now_utc();
        stored_grant(&f.store, "grant-1", now).await;

        f.manager.delete("user-1", "grant-1").await.unwrap();

        assert!(f.store.get_offline_grant("grant-1").await.unwrap().is_none());
        let events = f.sink.events.read().unwrap();
        assert!(matches!(
            &events[0],
            SessionEvent::SessionDeleted { session, is_termination: true, .. } if session.id == "grant-1"
        ));
    }

    #[tokio::test]
    async fn test_revoking_idp_session_revokes_sso_grants() {
        let f = fixture();
        let now = OffsetDateTime::now_utc();
        let idp = idp_session("idp-1", now);
        f.store.create_idp_session(&idp).await.unwrap();

        let mut sso = fixtures::grant("sso-grant", "spa", now);
        sso.sso_enabled = true;
        sso.idp_session_id = Some("idp-1".to_string());
        f.store
            .create_offline_grant(&sso, now + Duration::days(1))
            .await
            .unwrap();
        stored_grant(&f.store, "plain-grant", now).await;

        f.manager.revoke(&Session::Idp(idp), false).await.unwrap();

        assert!(f.store.get_offline_grant("sso-grant").await.unwrap().is_none());
        assert!(f.store.get_offline_grant("plain-grant").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_logout_clears_cookie_only_for_idp_sessions() {
        let f = fixture();
        let now = OffsetDateTime::now_utc();
        let idp = idp_session("idp-1", now);
        f.store.create_idp_session(&idp).await.unwrap();
        stored_grant(&f.store, "grant-1", now).await;

        let outcome = f.manager.logout(&Session::Idp(idp)).await.unwrap();
        assert!(outcome.clear_session_cookie);

        let grant_session = f.manager.get("user-1", "grant-1").await.unwrap();
        let outcome = f.manager.logout(&grant_session).await.unwrap();
        assert!(!outcome.clear_session_cookie);
        assert!(f.store.get_offline_grant("grant-1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_terminate_other_sessions_keeps_current() {
        let f = fixture();
        let now = OffsetDateTime::now_utc();
        let current = idp_session("idp-1", now);
        f.store.create_idp_session(&current).await.unwrap();
        f.store
            .create_idp_session(&idp_session("idp-2", now))
            .await
            .unwrap();
        stored_grant(&f.store, "grant-1", now).await;

        let revoked = f
            .manager
            .terminate_other_sessions("user-1", &current.session_ref())
            .await
            .unwrap();
        assert_eq!(revoked, 2);
        assert_eq!(f.manager.list("user-1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_revoke_authorization_removes_its_tokens() {
        let f = fixture();
        let now = OffsetDateTime::now_utc();
        let grant = stored_grant(&f.store, "grant-1", now).await;

        let authorization = Authorization {
            id: grant.authorization_id.clone(),
            ..Authorization::new("app", "spa", "user-1", &grant.scopes, now)
        };
        f.store.create_authorization(&authorization).await.unwrap();

        f.manager.revoke_authorization(&authorization).await.unwrap();

        assert!(f.store.get_offline_grant("grant-1").await.unwrap().is_none());
        assert!(
            f.store
                .get_authorization_by_id(&authorization.id)
                .await
                .unwrap()
                .is_none()
        );
    }
}
