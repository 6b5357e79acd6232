//! Stores for short-lived, single-use grant records.
//!
//! Records are keyed by the hash of their token. Backends expire them at
//! the record's own `expire_at`.

use async_trait::async_trait;

use crate::AuthResult;
use crate::types::{AccessGrant, AppSessionToken, Challenge, CodeGrant, SettingsActionGrant};

/// Authorization code storage.
#[async_trait]
pub trait CodeGrantStore: Send + Sync {
    /// Stores a new code grant. Fails if the hash is already taken.
    async fn create_code_grant(&self, grant: &CodeGrant) -> AuthResult<()>;

    /// Looks up a code grant by code hash.
    ///
    /// Expired grants may still be returned; callers check `is_expired`.
    async fn get_code_grant(&self, code_hash: &str) -> AuthResult<Option<CodeGrant>>;

    /// Deletes a code grant.
    async fn delete_code_grant(&self, grant: &CodeGrant) -> AuthResult<()>;
}

/// Access token storage.
#[async_trait]
pub trait AccessGrantStore: Send + Sync {
    /// Stores a new access grant.
    async fn create_access_grant(&self, grant: &AccessGrant) -> AuthResult<()>;

    /// Looks up an access grant by token hash.
    async fn get_access_grant(&self, token_hash: &str) -> AuthResult<Option<AccessGrant>>;

    /// Deletes an access grant.
    async fn delete_access_grant(&self, grant: &AccessGrant) -> AuthResult<()>;
}

/// Settings action grant storage.
#[async_trait]
pub trait SettingsActionGrantStore: Send + Sync {
    /// Stores a new settings action grant.
    async fn create_settings_action_grant(&self, grant: &SettingsActionGrant) -> AuthResult<()>;

    /// Looks up a settings action grant by code hash.
    async fn get_settings_action_grant(
        &self,
        code_hash: &str,
    ) -> AuthResult<Option<SettingsActionGrant>>;

    /// Deletes a settings action grant.
    async fn delete_settings_action_grant(&self, grant: &SettingsActionGrant) -> AuthResult<()>;
}

/// App session token storage.
#[async_trait]
pub trait AppSessionTokenStore: Send + Sync {
    /// Stores a new app session token.
    async fn create_app_session_token(&self, token: &AppSessionToken) -> AuthResult<()>;

    /// Looks up an app session token by hash.
    async fn get_app_session_token(&self, token_hash: &str)
    -> AuthResult<Option<AppSessionToken>>;

    /// Deletes an app session token.
    async fn delete_app_session_token(&self, token: &AppSessionToken) -> AuthResult<()>;
}

/// Single-use device challenges.
#[async_trait]
pub trait ChallengeStore: Send + Sync {
    /// Stores a new challenge.
    async fn create_challenge(&self, challenge: &Challenge) -> AuthResult<()>;

    /// Removes and returns a live challenge.
    ///
    /// Returns `None` for unknown, already consumed or expired challenges.
    async fn consume_challenge(&self, token: &str) -> AuthResult<Option<Challenge>>;
}
