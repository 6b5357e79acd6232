//! IDP sessions with a per-user session set.

use async_trait::async_trait;
use keygate_auth::AuthResult;
use keygate_auth::storage::IdpSessionStore;
use keygate_auth::types::{AccessEvent, IdpSession};
use time::OffsetDateTime;

use super::{RedisStore, Write};
use crate::RedisStoreError;

impl RedisStore {
    async fn session_set(&self, command: &str, user_id: &str, id: &str) -> AuthResult<()> {
        let mut conn = self.conn().await?;
        let _: i64 = redis::cmd(command)
            .arg(self.keys.idp_session_list(user_id))
            .arg(id)
            .query_async(&mut conn)
            .await
            .map_err(RedisStoreError::from)?;
        Ok(())
    }
}

#[async_trait]
impl IdpSessionStore for RedisStore {
    async fn create_idp_session(&self, session: &IdpSession) -> AuthResult<()> {
        let key = self.keys.idp_session(&session.id);
        self.set_json(&key, session, Some(session.expire_at), Write::Upsert)
            .await?;
        self.session_set("SADD", &session.user_id, &session.id).await
    }

    async fn get_idp_session(&self, id: &str) -> AuthResult<Option<IdpSession>> {
        let now = OffsetDateTime::now_utc();
        let session: Option<IdpSession> = self.get_json(&self.keys.idp_session(id)).await?;
        Ok(session.filter(|s| !s.is_expired(now)))
    }

    async fn update_idp_session_access(
        &self,
        id: &str,
        event: &AccessEvent,
    ) -> AuthResult<Option<IdpSession>> {
        let Some(mut session) = self.get_idp_session(id).await? else {
            return Ok(None);
        };
        session.access_info.last_access = event.clone();

        let key = self.keys.idp_session(id);
        let written = self
            .set_json(&key, &session, Some(session.expire_at), Write::Update)
            .await?;
        Ok(written.then_some(session))
    }

    async fn list_idp_sessions(&self, user_id: &str) -> AuthResult<Vec<IdpSession>> {
        let ids: Vec<String> = {
            let mut conn = self.conn().await?;
            redis::cmd("SMEMBERS")
                .arg(self.keys.idp_session_list(user_id))
                .query_async(&mut conn)
                .await
                .map_err(RedisStoreError::from)?
        };

        let mut sessions = Vec::with_capacity(ids.len());
        for id in ids {
            match self.get_idp_session(&id).await? {
                Some(session) => sessions.push(session),
                None => {
                    if let Err(e) = self.session_set("SREM", user_id, &id).await {
                        tracing::warn!(user_id = %user_id, session_id = %id, error = %e, "failed to prune IDP session index");
                    }
                }
            }
        }
        Ok(sessions)
    }

    async fn delete_idp_session(&self, id: &str) -> AuthResult<()> {
        let key = self.keys.idp_session(id);
        let session: Option<IdpSession> = self.get_json(&key).await?;
        self.delete_key(&key).await?;
        if let Some(session) = session {
            self.session_set("SREM", &session.user_id, id).await?;
        }
        Ok(())
    }
}
