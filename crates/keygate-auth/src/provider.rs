//! Collaborators the authorization core consumes.
//!
//! User accounts, event delivery, the interactive login UI and scope policy
//! live outside this crate. Each is a trait with a small default
//! implementation good enough for a standalone server.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use url::Url;

use crate::AuthResult;
use crate::error::AuthError;
use crate::types::{ClientConfig, SessionRef};

// =============================================================================
// Users
// =============================================================================

/// The account state the token endpoint cares about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserRecord {
    /// User ID.
    pub id: String,
    /// Disabled accounts cannot use their sessions.
    pub is_disabled: bool,
}

/// Looks up user accounts.
#[async_trait]
pub trait UserProvider: Send + Sync {
    /// Loads a user regardless of status.
    async fn get_raw(&self, user_id: &str) -> AuthResult<Option<UserRecord>>;

    /// Loads a user that may currently sign in.
    ///
    /// # Errors
    ///
    /// `invalid_grant` when the user does not exist or is disabled.
    async fn check_status(&self, user_id: &str) -> AuthResult<UserRecord> {
        let user = self
            .get_raw(user_id)
            .await?
            .ok_or_else(|| AuthError::invalid_grant("user not found"))?;
        if user.is_disabled {
            return Err(AuthError::invalid_grant("user is disabled"));
        }
        Ok(user)
    }
}

/// Treats every user ID as an active account.
///
/// For deployments where accounts are owned entirely by the login UI.
#[derive(Debug, Clone, Copy, Default)]
pub struct OpenDirectory;

#[async_trait]
impl UserProvider for OpenDirectory {
    async fn get_raw(&self, user_id: &str) -> AuthResult<Option<UserRecord>> {
        Ok(Some(UserRecord {
            id: user_id.to_string(),
            is_disabled: false,
        }))
    }
}

/// User directory held in memory.
#[derive(Debug, Default)]
pub struct InMemoryUserDirectory {
    users: RwLock<HashMap<String, UserRecord>>,
}

impl InMemoryUserDirectory {
    /// Creates an empty directory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces a user.
    pub fn upsert(&self, user: UserRecord) {
        if let Ok(mut users) = self.users.write() {
            users.insert(user.id.clone(), user);
        }
    }

    /// Disables a user.
    pub fn disable(&self, user_id: &str) {
        if let Ok(mut users) = self.users.write()
            && let Some(user) = users.get_mut(user_id)
        {
            user.is_disabled = true;
        }
    }
}

#[async_trait]
impl UserProvider for InMemoryUserDirectory {
    async fn get_raw(&self, user_id: &str) -> AuthResult<Option<UserRecord>> {
        let users = self
            .users
            .read()
            .map_err(|_| AuthError::internal("user directory lock poisoned"))?;
        Ok(users.get(user_id).cloned())
    }
}

// =============================================================================
// Events
// =============================================================================

/// Session lifecycle events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// An offline grant was issued.
    OfflineGrantCreated {
        /// Owner of the grant.
        user_id: String,
        /// The grant.
        session: SessionRef,
        /// Client that obtained it.
        client_id: String,
    },
    /// A session is about to be deleted.
    SessionDeleted {
        /// Owner of the session.
        user_id: String,
        /// The session.
        session: SessionRef,
        /// Deleted by someone other than the session holder.
        is_termination: bool,
    },
    /// A consent record was deleted.
    AuthorizationDeleted {
        /// Owner of the consent.
        user_id: String,
        /// Client the consent was for.
        client_id: String,
    },
}

impl SessionEvent {
    /// Event type name.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::OfflineGrantCreated { .. } => "session.offline_grant.created",
            Self::SessionDeleted { .. } => "session.deleted",
            Self::AuthorizationDeleted { .. } => "authorization.deleted",
        }
    }
}

/// Delivers session events.
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Queues an event for delivery once the surrounding request commits.
    async fn dispatch_on_commit(&self, event: SessionEvent) -> AuthResult<()>;
}

/// Writes events to the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingEventSink;

#[async_trait]
impl EventSink for TracingEventSink {
    async fn dispatch_on_commit(&self, event: SessionEvent) -> AuthResult<()> {
        match &event {
            SessionEvent::OfflineGrantCreated {
                user_id,
                session,
                client_id,
            } => tracing::info!(
                event = event.kind(),
                user_id = %user_id,
                grant_id = %session.id,
                client_id = %client_id,
                "session event"
            ),
            SessionEvent::SessionDeleted {
                user_id,
                session,
                is_termination,
            } => tracing::info!(
                event = event.kind(),
                user_id = %user_id,
                session_kind = session.kind.as_str(),
                session_id = %session.id,
                is_termination,
                "session event"
            ),
            SessionEvent::AuthorizationDeleted { user_id, client_id } => tracing::info!(
                event = event.kind(),
                user_id = %user_id,
                client_id = %client_id,
                "session event"
            ),
        }
        Ok(())
    }
}

// =============================================================================
// Login UI
// =============================================================================

/// Entry point of the interactive login flow.
pub trait LoginUi: Send + Sync {
    /// URL to send the browser to. Once the user is signed in, the login UI
    /// returns to `authorize_url`.
    ///
    /// # Errors
    ///
    /// Fails when the URL cannot be built.
    fn login_redirect(&self, authorize_url: &str, login_hint: Option<&str>) -> AuthResult<Url>;
}

/// Login UI reachable at a fixed URL.
#[derive(Debug, Clone)]
pub struct UrlLoginUi {
    login_url: Url,
}

impl UrlLoginUi {
    /// Creates the login UI from its absolute URL.
    ///
    /// # Errors
    ///
    /// `Configuration` when the URL does not parse.
    pub fn new(login_url: &str) -> AuthResult<Self> {
        let login_url = Url::parse(login_url)
            .map_err(|e| AuthError::configuration(format!("invalid login_url: {e}")))?;
        Ok(Self { login_url })
    }
}

impl LoginUi for UrlLoginUi {
    fn login_redirect(&self, authorize_url: &str, login_hint: Option<&str>) -> AuthResult<Url> {
        let mut url = self.login_url.clone();
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("return_to", authorize_url);
            if let Some(hint) = login_hint {
                query.append_pair("login_hint", hint);
            }
        }
        Ok(url)
    }
}

// =============================================================================
// Scopes
// =============================================================================

/// Policy over requested scopes.
pub trait ScopeValidator: Send + Sync {
    /// Checks scopes requested by `client`.
    ///
    /// # Errors
    ///
    /// `invalid_scope` naming the first rejected scope.
    fn validate_scopes(&self, client: &ClientConfig, scopes: &[String]) -> AuthResult<()>;
}

/// Accepts scopes on the client's allow-list. The full-access scope is
/// reserved to first-party clients.
#[derive(Debug, Clone, Copy, Default)]
pub struct ClientScopeValidator;

impl ScopeValidator for ClientScopeValidator {
    fn validate_scopes(&self, client: &ClientConfig, scopes: &[String]) -> AuthResult<()> {
        match scopes.iter().find(|s| !client.is_scope_allowed(s)) {
            Some(scope) => Err(AuthError::invalid_scope(format!(
                "scope '{scope}' is not allowed for this client"
            ))),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ClientType, FULL_ACCESS_SCOPE};

    #[tokio::test]
    async fn test_check_status() {
        let users = InMemoryUserDirectory::new();
        users.upsert(UserRecord {
            id: "user-1".to_string(),
            is_disabled: false,
        });

        assert_eq!(users.check_status("user-1").await.unwrap().id, "user-1");

        users.disable("user-1");
        let err = users.check_status("user-1").await.unwrap_err();
        assert_eq!(err.oauth_error_code(), "invalid_grant");

        let err = users.check_status("ghost").await.unwrap_err();
        assert_eq!(err.oauth_error_code(), "invalid_grant");

        assert!(OpenDirectory.check_status("anyone").await.is_ok());
    }

    #[test]
    fn test_login_redirect_carries_authorize_url() {
        let ui = UrlLoginUi::new("https://login.example.com/signin").unwrap();
        let url = ui
            .login_redirect(
                "https://auth.example.com/oauth2/authorize?client_id=spa&state=a b",
                Some("alice"),
            )
            .unwrap();

        let pairs: HashMap<_, _> = url.query_pairs().into_owned().collect();
        assert_eq!(
            pairs["return_to"],
            "https://auth.example.com/oauth2/authorize?client_id=spa&state=a b"
        );
        assert_eq!(pairs["login_hint"], "alice");
    }

    #[test]
    fn test_login_ui_rejects_relative_url() {
        assert!(UrlLoginUi::new("/signin").is_err());
    }

    #[test]
    fn test_scope_validator() {
        let mut client = ClientConfig::new("portal", vec!["https://p.example.com/cb".to_string()]);
        client.client_type = ClientType::ThirdPartyApp;
        client.allowed_scopes = vec!["openid".to_string(), "offline_access".to_string()];

        let ok = vec!["openid".to_string()];
        assert!(ClientScopeValidator.validate_scopes(&client, &ok).is_ok());

        let wide = vec!["openid".to_string(), FULL_ACCESS_SCOPE.to_string()];
        let err = ClientScopeValidator
            .validate_scopes(&client, &wide)
            .unwrap_err();
        assert_eq!(err.oauth_error_code(), "invalid_scope");
    }
}
