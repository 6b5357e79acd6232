//! Domain types shared across the crate.
//!
//! - [`ClientConfig`] - client registrations and their policies
//! - [`CodeGrant`], [`AccessGrant`], [`OfflineGrant`] - grant records
//! - [`Authorization`] - durable consent
//! - [`Session`] - a resolved live session

pub mod access;
pub mod authorization;
pub mod client;
pub mod grant;
pub mod offline_grant;
pub mod session;

pub use access::{AccessEvent, AccessInfo, RequestMeta};
pub use authorization::Authorization;
pub use client::{
    ClientConfig, ClientResolver, ClientType, ClientValidationError, FULL_ACCESS_SCOPE, GrantType,
    OFFLINE_ACCESS_SCOPE, OPENID_SCOPE, ResponseType, StaticClientResolver,
};
pub use grant::{
    AccessGrant, AppSessionToken, Challenge, ChallengePurpose, CodeGrant, SettingsActionGrant,
};
pub use offline_grant::{OfflineGrant, OfflineGrantRefreshToken, OfflineGrantSession};
pub use session::{AuthenticationInfo, IdpSession, Session, SessionKind, SessionRef};
