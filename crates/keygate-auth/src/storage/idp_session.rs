//! IDP session storage.
//!
//! IDP sessions are created by the login collaborator. The authorization
//! core reads them, touches their last access and deletes them on logout.

use async_trait::async_trait;

use crate::AuthResult;
use crate::types::{AccessEvent, IdpSession};

/// Storage for interactive IDP sessions.
#[async_trait]
pub trait IdpSessionStore: Send + Sync {
    /// Stores a new session.
    async fn create_idp_session(&self, session: &IdpSession) -> AuthResult<()>;

    /// Loads a live session by ID.
    async fn get_idp_session(&self, id: &str) -> AuthResult<Option<IdpSession>>;

    /// Records an access on a session and returns the updated session.
    async fn update_idp_session_access(
        &self,
        id: &str,
        event: &AccessEvent,
    ) -> AuthResult<Option<IdpSession>>;

    /// Lists live sessions of a user.
    async fn list_idp_sessions(&self, user_id: &str) -> AuthResult<Vec<IdpSession>>;

    /// Deletes a session.
    async fn delete_idp_session(&self, id: &str) -> AuthResult<()>;
}
