//! Consent record storage.

use async_trait::async_trait;

use crate::AuthResult;
use crate::types::Authorization;

/// Storage for [`Authorization`] records.
///
/// At most one authorization exists per `(user_id, client_id)`.
#[async_trait]
pub trait AuthorizationStore: Send + Sync {
    /// Finds the authorization of a user for a client.
    async fn get_authorization(
        &self,
        user_id: &str,
        client_id: &str,
    ) -> AuthResult<Option<Authorization>>;

    /// Finds an authorization by ID.
    async fn get_authorization_by_id(&self, id: &str) -> AuthResult<Option<Authorization>>;

    /// Stores a new authorization.
    async fn create_authorization(&self, authorization: &Authorization) -> AuthResult<()>;

    /// Replaces an existing authorization.
    async fn update_authorization(&self, authorization: &Authorization) -> AuthResult<()>;

    /// Deletes an authorization. Access grants derived from it stop
    /// resolving immediately.
    async fn delete_authorization(&self, id: &str) -> AuthResult<()>;

    /// Lists the authorizations of a user.
    async fn list_authorizations(&self, user_id: &str) -> AuthResult<Vec<Authorization>>;
}
