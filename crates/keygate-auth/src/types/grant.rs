//! Short-lived grant records: authorization codes, access grants, settings
//! action grants, app session tokens and challenges.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::oauth::pkce::PkceChallenge;

use super::session::{AuthenticationInfo, SessionKind, SessionRef};

/// A single-use authorization code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeGrant {
    /// Tenant.
    pub app_id: String,
    /// Authorization the code was issued under.
    pub authorization_id: String,
    /// Client the code was issued to.
    pub client_id: String,
    /// IDP session behind the authentication, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idp_session_id: Option<String>,
    /// The authentication the code carries.
    pub authentication_info: AuthenticationInfo,
    /// `sid` of the `id_token_hint` of the authorization request.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id_token_hint_sid: Option<String>,
    /// Issue time.
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    /// Expiry.
    #[serde(with = "time::serde::rfc3339")]
    pub expire_at: OffsetDateTime,
    /// Granted scopes.
    pub scopes: Vec<String>,
    /// Hash of the code.
    pub code_hash: String,
    /// Redirect URI the code was delivered to.
    pub redirect_uri: String,
    /// OIDC nonce to echo in the ID token.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub oidc_nonce: Option<String>,
    /// PKCE challenge.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pkce_challenge: Option<PkceChallenge>,
    /// Whether the resulting offline grant participates in SSO.
    #[serde(default)]
    pub sso_enabled: bool,
    /// DPoP key thumbprint presented at the authorization endpoint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dpop_jkt: Option<String>,
}

impl CodeGrant {
    /// Whether the code is past its expiry at `now`.
    #[must_use]
    pub fn is_expired(&self, now: OffsetDateTime) -> bool {
        now >= self.expire_at
    }
}

/// An issued access token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessGrant {
    /// Tenant.
    pub app_id: String,
    /// Authorization the token was issued under.
    pub authorization_id: String,
    /// Client the token was issued to.
    pub client_id: String,
    /// Session ID the token is bound to.
    pub session_id: String,
    /// Kind of the bound session.
    pub session_kind: SessionKind,
    /// Issue time.
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    /// Expiry.
    #[serde(with = "time::serde::rfc3339")]
    pub expire_at: OffsetDateTime,
    /// Granted scopes.
    pub scopes: Vec<String>,
    /// Hash of the access token.
    pub token_hash: String,
    /// Current hash of the refresh token the access token was derived from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token_hash: Option<String>,
    /// DPoP key thumbprint the token is bound to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dpop_jkt: Option<String>,
}

impl AccessGrant {
    /// Reference to the bound session.
    #[must_use]
    pub fn session_ref(&self) -> SessionRef {
        SessionRef::new(self.session_kind, self.session_id.clone())
    }

    /// Whether the grant is past its expiry at `now`.
    #[must_use]
    pub fn is_expired(&self, now: OffsetDateTime) -> bool {
        now >= self.expire_at
    }
}

/// A single-use grant proving that a settings action completed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettingsActionGrant {
    /// Tenant.
    pub app_id: String,
    /// Hash of the code.
    pub code_hash: String,
    /// Client the action was started by.
    pub client_id: String,
    /// Redirect URI the code was delivered to.
    pub redirect_uri: String,
    /// PKCE challenge.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pkce_challenge: Option<PkceChallenge>,
    /// Issue time.
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    /// Expiry.
    #[serde(with = "time::serde::rfc3339")]
    pub expire_at: OffsetDateTime,
}

/// A short-lived token that lets a native app open a web session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppSessionToken {
    /// Tenant.
    pub app_id: String,
    /// Offline grant the token was minted from.
    pub offline_grant_id: String,
    /// Issue time.
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    /// Expiry.
    #[serde(with = "time::serde::rfc3339")]
    pub expire_at: OffsetDateTime,
    /// Hash of the app session token.
    pub token_hash: String,
    /// Current hash of the refresh token used to mint it.
    pub refresh_token_hash: String,
}

/// Purpose a challenge was created for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChallengePurpose {
    /// Anonymous user request.
    AnonymousRequest,
    /// Biometric authentication request.
    BiometricRequest,
    /// App2App authorization request.
    App2appRequest,
}

/// A single-use nonce signed by devices in assertion grants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Challenge {
    /// The challenge value.
    pub token: String,
    /// What the challenge may be used for.
    pub purpose: ChallengePurpose,
    /// Issue time.
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    /// Expiry.
    #[serde(with = "time::serde::rfc3339")]
    pub expire_at: OffsetDateTime,
}
