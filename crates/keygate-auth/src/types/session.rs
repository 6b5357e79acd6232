//! Session identity types shared by grants, ID tokens and the resolver.

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use super::access::AccessInfo;
use super::offline_grant::OfflineGrantSession;

/// Kind of session an access grant is bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionKind {
    /// Interactive browser session of the identity provider.
    IdpSession,
    /// Refresh-token backed offline grant.
    OfflineGrant,
}

impl SessionKind {
    /// Wire name of the kind.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::IdpSession => "idp_session",
            Self::OfflineGrant => "offline_grant",
        }
    }

    fn parse(value: &str) -> Option<Self> {
        match value {
            "idp_session" => Some(Self::IdpSession),
            "offline_grant" => Some(Self::OfflineGrant),
            _ => None,
        }
    }
}

/// Reference to a session by kind and ID.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionRef {
    /// Session kind.
    pub kind: SessionKind,
    /// Session ID.
    pub id: String,
}

impl SessionRef {
    /// Creates a reference.
    #[must_use]
    pub fn new(kind: SessionKind, id: impl Into<String>) -> Self {
        Self { kind, id: id.into() }
    }

    /// Encodes the `sid` claim: `base64url("<kind>:<id>")`.
    #[must_use]
    pub fn encode_sid(&self) -> String {
        URL_SAFE_NO_PAD.encode(format!("{}:{}", self.kind.as_str(), self.id))
    }

    /// Decodes a `sid` claim.
    #[must_use]
    pub fn decode_sid(sid: &str) -> Option<Self> {
        let bytes = URL_SAFE_NO_PAD.decode(sid).ok()?;
        let raw = String::from_utf8(bytes).ok()?;
        let (kind, id) = raw.split_once(':')?;
        if id.is_empty() {
            return None;
        }
        Some(Self::new(SessionKind::parse(kind)?, id))
    }
}

/// Outcome of an end-user authentication.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthenticationInfo {
    /// Authenticated user.
    pub user_id: String,
    /// When the user authenticated.
    #[serde(with = "time::serde::rfc3339")]
    pub authenticated_at: OffsetDateTime,
    /// Authentication method references.
    #[serde(default)]
    pub amr: Vec<String>,
    /// Session the authentication was carried by, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authenticated_by: Option<SessionRef>,
}

/// Interactive identity provider session.
///
/// Owned by the login collaborator; this crate only reads it and touches its
/// last access.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdpSession {
    /// Session ID.
    pub id: String,
    /// Tenant.
    pub app_id: String,
    /// Session owner.
    pub user_id: String,
    /// Creation time.
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    /// Latest authentication time.
    #[serde(with = "time::serde::rfc3339")]
    pub authenticated_at: OffsetDateTime,
    /// Hard expiry.
    #[serde(with = "time::serde::rfc3339")]
    pub expire_at: OffsetDateTime,
    /// Authentication method references.
    #[serde(default)]
    pub amr: Vec<String>,
    /// Access tracking.
    pub access_info: AccessInfo,
}

impl IdpSession {
    /// Reference to this session.
    #[must_use]
    pub fn session_ref(&self) -> SessionRef {
        SessionRef::new(SessionKind::IdpSession, self.id.clone())
    }

    /// Whether the session is past its expiry at `now`.
    #[must_use]
    pub fn is_expired(&self, now: OffsetDateTime) -> bool {
        now >= self.expire_at
    }

    /// The authentication carried by this session.
    #[must_use]
    pub fn authentication_info(&self) -> AuthenticationInfo {
        AuthenticationInfo {
            user_id: self.user_id.clone(),
            authenticated_at: self.authenticated_at,
            amr: self.amr.clone(),
            authenticated_by: Some(self.session_ref()),
        }
    }
}

/// A live session resolved from a token or a `sid`.
#[derive(Debug, Clone)]
pub enum Session {
    /// Interactive session.
    Idp(IdpSession),
    /// Offline grant, seen through one of its refresh tokens.
    OfflineGrant(Box<OfflineGrantSession>),
}

impl Session {
    /// Reference to this session.
    #[must_use]
    pub fn session_ref(&self) -> SessionRef {
        match self {
            Self::Idp(s) => s.session_ref(),
            Self::OfflineGrant(s) => s.grant.session_ref(),
        }
    }

    /// Session owner.
    #[must_use]
    pub fn user_id(&self) -> &str {
        match self {
            Self::Idp(s) => &s.user_id,
            Self::OfflineGrant(s) => &s.grant.user_id,
        }
    }

    /// Creation time.
    #[must_use]
    pub fn created_at(&self) -> OffsetDateTime {
        match self {
            Self::Idp(s) => s.created_at,
            Self::OfflineGrant(s) => s.grant.created_at,
        }
    }

    /// The authentication carried by this session.
    #[must_use]
    pub fn authentication_info(&self) -> AuthenticationInfo {
        match self {
            Self::Idp(s) => s.authentication_info(),
            Self::OfflineGrant(s) => s.grant.authentication_info(),
        }
    }

    /// Access tracking of the session.
    #[must_use]
    pub fn access_info(&self) -> &AccessInfo {
        match self {
            Self::Idp(s) => &s.access_info,
            Self::OfflineGrant(s) => &s.grant.access_info,
        }
    }
}
