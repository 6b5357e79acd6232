//! # keygate-auth
//!
//! OAuth 2.0 and OpenID Connect authorization core for Keygate.
//!
//! This crate provides:
//! - The authorization endpoint decision logic (consent, prompts, PKCE)
//! - The token endpoint with its grant types, refresh token rotation and
//!   DPoP binding
//! - Offline grants: long-lived, refresh-token-backed sessions
//! - Access token resolution and session management
//! - Axum handlers and extractors for every endpoint
//!
//! ## Modules
//!
//! - [`config`] - configuration of the authorization core
//! - [`types`] - clients, grants, sessions and consent records
//! - [`token`] - token codec, JWT signing and ID tokens
//! - [`storage`] - store traits and the in-memory store
//! - [`oauth`] - authorization and token endpoint logic
//! - [`session`] - access token resolution and session management
//! - [`provider`] - collaborator traits (users, events, login UI, scopes)
//! - [`ratelimit`] - token endpoint rate limits
//! - [`services`] - the wired service graph
//! - [`middleware`] - error responses and request extractors
//! - [`http`] - Axum HTTP handlers and router

pub mod config;
pub mod error;
pub mod http;
pub mod middleware;
pub mod oauth;
pub mod provider;
pub mod ratelimit;
pub mod services;
pub mod session;
pub mod storage;
pub mod token;
pub mod types;

pub use config::{AuthConfig, ConfigError};
pub use error::{AuthError, ErrorCategory};
pub use http::oauth_router;
pub use middleware::{BearerAuth, ClientMeta, OptionalBearerAuth};
pub use services::{AuthServices, Collaborators};
pub use session::{AccessTokenResolver, SessionManager};
pub use storage::{MemoryStore, Stores};
pub use types::{ClientConfig, ClientType, GrantType, Session};

/// Type alias for authorization results.
pub type AuthResult<T> = Result<T, AuthError>;

/// Prelude module for convenient imports.
///
/// ```ignore
/// use keygate_auth::prelude::*;
/// ```
pub mod prelude {
    pub use crate::AuthResult;
    pub use crate::config::{AuthConfig, ConfigError};
    pub use crate::error::{AuthError, ErrorCategory};
    pub use crate::http::oauth_router;
    pub use crate::middleware::{BearerAuth, ClientMeta, OptionalBearerAuth};
    pub use crate::oauth::{
        AuthorizationRequest, TokenRequest, TokenRequestContext, TokenResponse,
    };
    pub use crate::provider::{EventSink, LoginUi, ScopeValidator, SessionEvent, UserProvider};
    pub use crate::services::{AuthServices, Collaborators};
    pub use crate::session::{AccessTokenResolver, SessionManager};
    pub use crate::storage::{MemoryStore, Stores};
    pub use crate::types::{
        ClientConfig, ClientType, GrantType, IdpSession, OfflineGrant, Session, SessionRef,
    };
}
