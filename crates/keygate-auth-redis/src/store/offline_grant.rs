//! Offline grants, their per-user index and the locked update cycle.

use std::collections::HashMap;

use async_trait::async_trait;
use keygate_auth::AuthResult;
use keygate_auth::error::AuthError;
use keygate_auth::storage::{OfflineGrantMutator, OfflineGrantStore};
use keygate_auth::types::OfflineGrant;
use time::OffsetDateTime;

use super::{RedisStore, Write};
use crate::RedisStoreError;

impl RedisStore {
    async fn index_grant(&self, grant: &OfflineGrant, expire_at: OffsetDateTime) -> AuthResult<()> {
        let mut conn = self.conn().await?;
        let _: i64 = redis::cmd("HSET")
            .arg(self.keys.offline_grant_list(&grant.user_id))
            .arg(&grant.id)
            .arg(expire_at.unix_timestamp())
            .query_async(&mut conn)
            .await
            .map_err(RedisStoreError::from)?;
        Ok(())
    }

    /// Removes an index entry, logging failures.
    async fn unindex_grant(&self, user_id: &str, grant_id: &str) {
        let result: AuthResult<()> = async {
            let mut conn = self.conn().await?;
            let _: i64 = redis::cmd("HDEL")
                .arg(self.keys.offline_grant_list(user_id))
                .arg(grant_id)
                .query_async(&mut conn)
                .await
                .map_err(RedisStoreError::from)?;
            Ok(())
        }
        .await;
        if let Err(e) = result {
            tracing::warn!(user_id = %user_id, grant_id = %grant_id, error = %e, "failed to remove offline grant index entry");
        }
    }

    async fn mutate_offline_grant(
        &self,
        id: &str,
        mutator: OfflineGrantMutator,
    ) -> AuthResult<Option<OfflineGrant>> {
        let key = self.keys.offline_grant(id);
        let mut grant: OfflineGrant = self
            .get_json(&key)
            .await?
            .ok_or(AuthError::GrantNotFound)?;
        let expire_at = mutator(&mut grant)?;
        grant.expire_at = expire_at;

        if !grant.has_valid_tokens() {
            self.delete_key(&key).await?;
            self.unindex_grant(&grant.user_id, id).await;
            tracing::debug!(grant_id = %id, "deleted offline grant without refresh tokens");
            return Ok(None);
        }

        if !self
            .set_json(&key, &grant, Some(expire_at), Write::Update)
            .await?
        {
            return Err(AuthError::GrantNotFound);
        }
        if let Err(e) = self.index_grant(&grant, expire_at).await {
            tracing::warn!(grant_id = %id, error = %e, "failed to update offline grant index");
        }
        Ok(Some(grant))
    }
}

#[async_trait]
impl OfflineGrantStore for RedisStore {
    async fn create_offline_grant(
        &self,
        grant: &OfflineGrant,
        expire_at: OffsetDateTime,
    ) -> AuthResult<()> {
        let key = self.keys.offline_grant(&grant.id);
        if !self.set_json(&key, grant, Some(expire_at), Write::Create).await? {
            return Err(AuthError::storage(format!(
                "offline grant '{}' already exists",
                grant.id
            )));
        }
        if let Err(e) = self.index_grant(grant, expire_at).await {
            tracing::warn!(grant_id = %grant.id, user_id = %grant.user_id, error = %e, "failed to index offline grant");
        }
        Ok(())
    }

    async fn get_offline_grant(&self, id: &str) -> AuthResult<Option<OfflineGrant>> {
        self.get_json(&self.keys.offline_grant(id)).await
    }

    async fn update_offline_grant_with_mutator(
        &self,
        id: &str,
        mutator: OfflineGrantMutator,
    ) -> AuthResult<Option<OfflineGrant>> {
        let guard = self
            .mutex
            .acquire(&self.keys.offline_grant_mutex(id))
            .await?;
        let result = self.mutate_offline_grant(id, mutator).await;
        guard.release().await;
        result
    }

    async fn delete_offline_grant(&self, grant: &OfflineGrant) -> AuthResult<()> {
        self.delete_key(&self.keys.offline_grant(&grant.id)).await?;
        self.unindex_grant(&grant.user_id, &grant.id).await;
        Ok(())
    }

    async fn list_offline_grants(&self, user_id: &str) -> AuthResult<Vec<OfflineGrant>> {
        let index: HashMap<String, i64> = {
            let mut conn = self.conn().await?;
            redis::cmd("HGETALL")
                .arg(self.keys.offline_grant_list(user_id))
                .query_async(&mut conn)
                .await
                .map_err(RedisStoreError::from)?
        };

        let mut grants = Vec::with_capacity(index.len());
        for grant_id in index.keys() {
            match self.get_offline_grant(grant_id).await? {
                Some(grant) => grants.push(grant),
                None => {
                    tracing::debug!(user_id = %user_id, grant_id = %grant_id, "pruning stale offline grant index entry");
                    self.unindex_grant(user_id, grant_id).await;
                }
            }
        }
        Ok(grants)
    }

    async fn clean_up_for_deleting_user_id(&self, user_id: &str) -> AuthResult<()> {
        self.delete_key(&self.keys.offline_grant_list(user_id)).await
    }
}
