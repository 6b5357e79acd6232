//! Storage traits for grants, consent and IDP sessions.
//!
//! - [`CodeGrantStore`], [`AccessGrantStore`] - single-use codes and access tokens
//! - [`OfflineGrantStore`] - refresh-token sessions and their per-user index
//! - [`SettingsActionGrantStore`], [`AppSessionTokenStore`], [`ChallengeStore`]
//! - [`AuthorizationStore`] - durable consent
//! - [`IdpSessionStore`] - interactive sessions owned by the login collaborator
//!
//! # Implementations
//!
//! - [`memory::MemoryStore`] - in-process, for tests and single-node setups
//! - `keygate-auth-redis` - Redis backend with a distributed grant mutex

pub mod authorization;
pub mod grant;
pub mod idp_session;
pub mod memory;
pub mod offline_grant;

use std::sync::Arc;

pub use authorization::AuthorizationStore;
pub use grant::{
    AccessGrantStore, AppSessionTokenStore, ChallengeStore, CodeGrantStore,
    SettingsActionGrantStore,
};
pub use idp_session::IdpSessionStore;
pub use memory::MemoryStore;
pub use offline_grant::{OfflineGrantMutator, OfflineGrantStore};

/// Every store the authorization core needs, as trait objects.
#[derive(Clone)]
pub struct Stores {
    /// Authorization codes.
    pub code_grants: Arc<dyn CodeGrantStore>,
    /// Access tokens.
    pub access_grants: Arc<dyn AccessGrantStore>,
    /// Offline grants.
    pub offline_grants: Arc<dyn OfflineGrantStore>,
    /// Settings action grants.
    pub settings_action_grants: Arc<dyn SettingsActionGrantStore>,
    /// App session tokens.
    pub app_session_tokens: Arc<dyn AppSessionTokenStore>,
    /// Device challenges.
    pub challenges: Arc<dyn ChallengeStore>,
    /// Consent records.
    pub authorizations: Arc<dyn AuthorizationStore>,
    /// IDP sessions.
    pub idp_sessions: Arc<dyn IdpSessionStore>,
}

impl Stores {
    /// Backs every store with one shared in-memory store.
    #[must_use]
    pub fn in_memory(store: Arc<MemoryStore>) -> Self {
        Self {
            code_grants: store.clone(),
            access_grants: store.clone(),
            offline_grants: store.clone(),
            settings_action_grants: store.clone(),
            app_session_tokens: store.clone(),
            challenges: store.clone(),
            authorizations: store.clone(),
            idp_sessions: store,
        }
    }
}
