//! Consent records.
//!
//! Each user has a hash of client ID to authorization ID, which enforces
//! one authorization per `(user_id, client_id)`. Claiming the hash field and
//! writing the record happen in one script, so a claim never points at a
//! missing record.

use async_trait::async_trait;
use keygate_auth::AuthResult;
use keygate_auth::error::AuthError;
use keygate_auth::storage::AuthorizationStore;
use keygate_auth::types::Authorization;
use redis::Script;

use super::{RedisStore, Write};
use crate::RedisStoreError;

/// Claims `ARGV[1]` in the user's hash and stores the record. A claim held by
/// an authorization whose record is gone is taken over.
const CREATE_SCRIPT: &str = r#"
local current = redis.call('HGET', KEYS[1], ARGV[1])
if current and redis.call('EXISTS', ARGV[4] .. current) == 1 then
  return 0
end
redis.call('HSET', KEYS[1], ARGV[1], ARGV[2])
redis.call('SET', KEYS[2], ARGV[3])
return 1
"#;

#[async_trait]
impl AuthorizationStore for RedisStore {
    async fn get_authorization(
        &self,
        user_id: &str,
        client_id: &str,
    ) -> AuthResult<Option<Authorization>> {
        let id: Option<String> = {
            let mut conn = self.conn().await?;
            redis::cmd("HGET")
                .arg(self.keys.authorization_list(user_id))
                .arg(client_id)
                .query_async(&mut conn)
                .await
                .map_err(RedisStoreError::from)?
        };
        match id {
            Some(id) => self.get_authorization_by_id(&id).await,
            None => Ok(None),
        }
    }

    async fn get_authorization_by_id(&self, id: &str) -> AuthResult<Option<Authorization>> {
        self.get_json(&self.keys.authorization(id)).await
    }

    async fn create_authorization(&self, authorization: &Authorization) -> AuthResult<()> {
        let record = serde_json::to_string(authorization)?;
        let mut conn = self.conn().await?;
        let created: i32 = Script::new(CREATE_SCRIPT)
            .key(self.keys.authorization_list(&authorization.user_id))
            .key(self.keys.authorization(&authorization.id))
            .arg(&authorization.client_id)
            .arg(&authorization.id)
            .arg(record)
            .arg(self.keys.authorization(""))
            .invoke_async(&mut conn)
            .await
            .map_err(RedisStoreError::from)?;
        if created == 0 {
            return Err(AuthError::AuthorizationExists);
        }
        Ok(())
    }

    async fn update_authorization(&self, authorization: &Authorization) -> AuthResult<()> {
        let key = self.keys.authorization(&authorization.id);
        if !self.set_json(&key, authorization, None, Write::Update).await? {
            return Err(AuthError::AuthorizationNotFound);
        }
        Ok(())
    }

    async fn delete_authorization(&self, id: &str) -> AuthResult<()> {
        let Some(authorization) = self.get_authorization_by_id(id).await? else {
            return Ok(());
        };
        self.delete_key(&self.keys.authorization(id)).await?;

        let mut conn = self.conn().await?;
        let _: i64 = redis::cmd("HDEL")
            .arg(self.keys.authorization_list(&authorization.user_id))
            .arg(&authorization.client_id)
            .query_async(&mut conn)
            .await
            .map_err(RedisStoreError::from)?;
        Ok(())
    }

    async fn list_authorizations(&self, user_id: &str) -> AuthResult<Vec<Authorization>> {
        let ids: Vec<String> = {
            let mut conn = self.conn().await?;
            redis::cmd("HVALS")
                .arg(self.keys.authorization_list(user_id))
                .query_async(&mut conn)
                .await
                .map_err(RedisStoreError::from)?
        };

        let mut authorizations = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(authorization) = self.get_authorization_by_id(&id).await? {
                authorizations.push(authorization);
            }
        }
        Ok(authorizations)
    }
}
