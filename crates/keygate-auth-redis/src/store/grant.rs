//! Short-lived grant stores.

use async_trait::async_trait;
use keygate_auth::AuthResult;
use keygate_auth::error::AuthError;
use keygate_auth::storage::{
    AccessGrantStore, AppSessionTokenStore, ChallengeStore, CodeGrantStore,
    SettingsActionGrantStore,
};
use keygate_auth::types::{
    AccessGrant, AppSessionToken, Challenge, CodeGrant, SettingsActionGrant,
};
use redis::Script;

use super::{RedisStore, Write};
use crate::RedisStoreError;

const CONSUME_SCRIPT: &str = r#"
local value = redis.call('GET', KEYS[1])
if value then
  redis.call('DEL', KEYS[1])
end
return value
"#;

fn already_exists(key: &str) -> AuthError {
    AuthError::storage(format!("record '{key}' already exists"))
}

#[async_trait]
impl CodeGrantStore for RedisStore {
    async fn create_code_grant(&self, grant: &CodeGrant) -> AuthResult<()> {
        let key = self.keys.code_grant(&grant.code_hash);
        if !self.set_json(&key, grant, Some(grant.expire_at), Write::Create).await? {
            return Err(already_exists(&key));
        }
        Ok(())
    }

    async fn get_code_grant(&self, code_hash: &str) -> AuthResult<Option<CodeGrant>> {
        self.get_json(&self.keys.code_grant(code_hash)).await
    }

    async fn delete_code_grant(&self, grant: &CodeGrant) -> AuthResult<()> {
        self.delete_key(&self.keys.code_grant(&grant.code_hash)).await
    }
}

#[async_trait]
impl AccessGrantStore for RedisStore {
    async fn create_access_grant(&self, grant: &AccessGrant) -> AuthResult<()> {
        let key = self.keys.access_grant(&grant.token_hash);
        if !self.set_json(&key, grant, Some(grant.expire_at), Write::Create).await? {
            return Err(already_exists(&key));
        }
        Ok(())
    }

    async fn get_access_grant(&self, token_hash: &str) -> AuthResult<Option<AccessGrant>> {
        self.get_json(&self.keys.access_grant(token_hash)).await
    }

    async fn delete_access_grant(&self, grant: &AccessGrant) -> AuthResult<()> {
        self.delete_key(&self.keys.access_grant(&grant.token_hash)).await
    }
}

#[async_trait]
impl SettingsActionGrantStore for RedisStore {
    async fn create_settings_action_grant(&self, grant: &SettingsActionGrant) -> AuthResult<()> {
        let key = self.keys.settings_action_grant(&grant.code_hash);
        if !self.set_json(&key, grant, Some(grant.expire_at), Write::Create).await? {
            return Err(already_exists(&key));
        }
        Ok(())
    }

    async fn get_settings_action_grant(
        &self,
        code_hash: &str,
    ) -> AuthResult<Option<SettingsActionGrant>> {
        self.get_json(&self.keys.settings_action_grant(code_hash)).await
    }

    async fn delete_settings_action_grant(&self, grant: &SettingsActionGrant) -> AuthResult<()> {
        self.delete_key(&self.keys.settings_action_grant(&grant.code_hash))
            .await
    }
}

#[async_trait]
impl AppSessionTokenStore for RedisStore {
    async fn create_app_session_token(&self, token: &AppSessionToken) -> AuthResult<()> {
        let key = self.keys.app_session_token(&token.token_hash);
        if !self.set_json(&key, token, Some(token.expire_at), Write::Create).await? {
            return Err(already_exists(&key));
        }
        Ok(())
    }

    async fn get_app_session_token(
        &self,
        token_hash: &str,
    ) -> AuthResult<Option<AppSessionToken>> {
        self.get_json(&self.keys.app_session_token(token_hash)).await
    }

    async fn delete_app_session_token(&self, token: &AppSessionToken) -> AuthResult<()> {
        self.delete_key(&self.keys.app_session_token(&token.token_hash))
            .await
    }
}

#[async_trait]
impl ChallengeStore for RedisStore {
    async fn create_challenge(&self, challenge: &Challenge) -> AuthResult<()> {
        let key = self.keys.challenge(&challenge.token);
        if !self
            .set_json(&key, challenge, Some(challenge.expire_at), Write::Create)
            .await?
        {
            return Err(already_exists(&key));
        }
        Ok(())
    }

    async fn consume_challenge(&self, token: &str) -> AuthResult<Option<Challenge>> {
        let mut conn = self.conn().await?;
        let raw: Option<String> = Script::new(CONSUME_SCRIPT)
            .key(self.keys.challenge(token))
            .invoke_async(&mut conn)
            .await
            .map_err(RedisStoreError::from)?;
        match raw {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }
}
