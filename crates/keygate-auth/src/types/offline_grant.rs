//! The offline grant aggregate and its refresh tokens.
//!
//! An offline grant is a refresh-token backed session. It owns an ordered
//! list of refresh tokens; index 0 is the root token created together with
//! the grant and is never pruned by housekeeping.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::error::AuthError;
use crate::oauth::dpop::DpopProof;
use crate::token::codec::constant_time_eq;

use super::access::{AccessEvent, AccessInfo};
use super::session::{AuthenticationInfo, SessionKind, SessionRef};

/// One refresh token of an offline grant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OfflineGrantRefreshToken {
    /// Hash of the secret this token was issued with.
    pub token_hash: String,
    /// Hash of the latest rotated secret.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rotated_token_hash: Option<String>,
    /// When the token was last rotated.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "time::serde::rfc3339::option"
    )]
    pub rotated_at: Option<OffsetDateTime>,
    /// Client the token was issued to.
    pub client_id: String,
    /// Issue time.
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    /// Granted scopes.
    #[serde(default)]
    pub scopes: Vec<String>,
    /// Authorization the token was issued under.
    pub authorization_id: String,
    /// DPoP key thumbprint the token is bound to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dpop_jkt: Option<String>,
    /// Access tracking. Absent on tokens written before tracking existed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_info: Option<AccessInfo>,
    /// Hard expiry for short-lived tokens.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "time::serde::rfc3339::option"
    )]
    pub expire_at: Option<OffsetDateTime>,
}

impl OfflineGrantRefreshToken {
    /// Hash of the secret the client currently holds.
    #[must_use]
    pub fn current_hash(&self) -> &str {
        self.rotated_token_hash.as_deref().unwrap_or(&self.token_hash)
    }

    /// Constant-time comparison of a presented secret hash against the
    /// current hash.
    #[must_use]
    pub fn matches_hash(&self, token_hash: &str) -> bool {
        constant_time_eq(self.current_hash(), token_hash)
    }

    /// Whether `initial_hash` is this token's stable identity.
    ///
    /// Rotation never changes `token_hash`, so records keyed on it (access
    /// grants, app session tokens) keep pointing at the token.
    #[must_use]
    pub fn is_identified_by(&self, initial_hash: &str) -> bool {
        self.token_hash == initial_hash
    }

    /// Last access of this token for idle-timeout purposes.
    ///
    /// Tokens without access tracking fall back to their own creation time.
    #[must_use]
    pub fn last_access_or_created_at(&self) -> OffsetDateTime {
        self.access_info
            .as_ref()
            .map_or(self.created_at, |info| info.last_access.timestamp)
    }
}

/// The refresh-token session aggregate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OfflineGrant {
    /// Tenant.
    pub app_id: String,
    /// Grant ID, the first half of every refresh token.
    pub id: String,
    /// Client that created the grant.
    pub initial_client_id: String,
    /// Authorization of the root token.
    pub authorization_id: String,
    /// IDP session the grant was derived from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idp_session_id: Option<String>,
    /// Identity used to authenticate, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identity_id: Option<String>,
    /// Creation time.
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    /// Latest authentication time.
    #[serde(with = "time::serde::rfc3339")]
    pub authenticated_at: OffsetDateTime,
    /// Scopes of the root token.
    #[serde(default)]
    pub scopes: Vec<String>,
    /// Session owner.
    pub user_id: String,
    /// Authentication method references.
    #[serde(default)]
    pub amr: Vec<String>,
    /// Grant-level access tracking.
    pub access_info: AccessInfo,
    /// Opaque device information reported by native clients.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_info: Option<serde_json::Value>,
    /// Whether the grant participates in single sign-on.
    #[serde(default)]
    pub sso_enabled: bool,
    /// App2App device key, as a JWK JSON string.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app2app_device_key_jwk_json: Option<String>,
    /// SAML service providers this session has signed in to.
    #[serde(default)]
    pub participated_saml_service_provider_ids: Vec<String>,
    /// Refresh tokens, root first.
    pub refresh_tokens: Vec<OfflineGrantRefreshToken>,
    /// Expiry computed at the last write.
    #[serde(with = "time::serde::rfc3339")]
    pub expire_at: OffsetDateTime,
}

impl OfflineGrant {
    /// Reference to this grant as a session.
    #[must_use]
    pub fn session_ref(&self) -> SessionRef {
        SessionRef::new(SessionKind::OfflineGrant, self.id.clone())
    }

    /// The authentication carried by this grant.
    #[must_use]
    pub fn authentication_info(&self) -> AuthenticationInfo {
        AuthenticationInfo {
            user_id: self.user_id.clone(),
            authenticated_at: self.authenticated_at,
            amr: self.amr.clone(),
            authenticated_by: Some(self.session_ref()),
        }
    }

    /// Finds the token a client presented, by its current hash.
    #[must_use]
    pub fn find_token(&self, token_hash: &str) -> Option<&OfflineGrantRefreshToken> {
        let mut found = None;
        for token in &self.refresh_tokens {
            if token.matches_hash(token_hash) && found.is_none() {
                found = Some(token);
            }
        }
        found
    }

    /// Finds a token by its initial hash.
    #[must_use]
    pub fn token_by_initial_hash(&self, initial_hash: &str) -> Option<&OfflineGrantRefreshToken> {
        self.refresh_tokens
            .iter()
            .find(|t| t.is_identified_by(initial_hash))
    }

    /// Whether the grant or any of its tokens belongs to `client_id`.
    #[must_use]
    pub fn has_client_id(&self, client_id: &str) -> bool {
        self.initial_client_id == client_id
            || self.refresh_tokens.iter().any(|t| t.client_id == client_id)
    }

    /// A grant without refresh tokens is dead and must be deleted.
    #[must_use]
    pub fn has_valid_tokens(&self) -> bool {
        !self.refresh_tokens.is_empty()
    }

    /// Initial hashes of every token issued under an authorization.
    #[must_use]
    pub fn token_hashes_for_authorization(&self, authorization_id: &str) -> Vec<String> {
        self.refresh_tokens
            .iter()
            .filter(|t| t.authorization_id == authorization_id)
            .map(|t| t.token_hash.clone())
            .collect()
    }

    /// Views the grant through the token a client presented.
    #[must_use]
    pub fn to_session(&self, presented_hash: &str) -> Option<OfflineGrantSession> {
        self.find_token(presented_hash).map(|t| self.session_for(t))
    }

    /// Views the grant through the token with the given initial hash.
    #[must_use]
    pub fn to_session_by_initial_hash(&self, initial_hash: &str) -> Option<OfflineGrantSession> {
        self.token_by_initial_hash(initial_hash)
            .map(|t| self.session_for(t))
    }

    fn session_for(&self, token: &OfflineGrantRefreshToken) -> OfflineGrantSession {
        OfflineGrantSession {
            client_id: token.client_id.clone(),
            scopes: token.scopes.clone(),
            authorization_id: token.authorization_id.clone(),
            token_hash: token.token_hash.clone(),
            dpop_jkt: token.dpop_jkt.clone(),
            grant: self.clone(),
        }
    }

    /// Records an access on the grant, and on the token with the given
    /// initial hash if any.
    ///
    /// A token without access tracking inherits the grant's tracking before
    /// its last access is updated.
    pub fn record_access(&mut self, event: &AccessEvent, refresh_token_hash: Option<&str>) {
        self.access_info.last_access = event.clone();
        let Some(hash) = refresh_token_hash else {
            return;
        };
        let grant_access = self.access_info.clone();
        for token in &mut self.refresh_tokens {
            if token.is_identified_by(hash) {
                let info = token.access_info.get_or_insert_with(|| grant_access.clone());
                info.last_access = event.clone();
            }
        }
    }

    /// Replaces the current hash of the token with the given initial hash.
    ///
    /// # Errors
    ///
    /// Returns `GrantNotFound` when no token matches.
    pub fn rotate_token(
        &mut self,
        initial_hash: &str,
        new_token_hash: String,
        rotated_at: OffsetDateTime,
    ) -> Result<(), AuthError> {
        let token = self
            .refresh_tokens
            .iter_mut()
            .find(|t| t.is_identified_by(initial_hash))
            .ok_or(AuthError::GrantNotFound)?;
        token.rotated_token_hash = Some(new_token_hash);
        token.rotated_at = Some(rotated_at);
        Ok(())
    }

    /// Removes tokens by initial hash.
    pub fn remove_tokens(&mut self, initial_hashes: &[String]) {
        self.refresh_tokens
            .retain(|t| !initial_hashes.iter().any(|h| t.is_identified_by(h)));
    }
}

/// An offline grant seen through one of its refresh tokens.
#[derive(Debug, Clone)]
pub struct OfflineGrantSession {
    /// The grant.
    pub grant: OfflineGrant,
    /// Client of the token.
    pub client_id: String,
    /// Scopes of the token.
    pub scopes: Vec<String>,
    /// Authorization of the token.
    pub authorization_id: String,
    /// Initial hash of the token, stable across rotations.
    pub token_hash: String,
    /// DPoP binding of the token.
    pub dpop_jkt: Option<String>,
}

impl OfflineGrantSession {
    /// Checks the presented DPoP proof against the token binding.
    ///
    /// # Errors
    ///
    /// Returns `invalid_dpop_proof` when a bound token is used without a
    /// proof or with a proof of another key.
    pub fn match_dpop_jkt(&self, proof: Option<&DpopProof>) -> Result<(), AuthError> {
        let Some(expected) = self.dpop_jkt.as_deref() else {
            return Ok(());
        };
        match proof {
            Some(proof) if constant_time_eq(&proof.jkt, expected) => Ok(()),
            _ => Err(AuthError::invalid_dpop_proof("Invalid DPoP key binding")),
        }
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;
    use time::Duration;

    pub(crate) fn access_at(at: OffsetDateTime) -> AccessEvent {
        AccessEvent {
            timestamp: at,
            remote_ip: Some("127.0.0.1".to_string()),
            user_agent: None,
        }
    }

    pub(crate) fn token(hash: &str, client_id: &str, created_at: OffsetDateTime) -> OfflineGrantRefreshToken {
        OfflineGrantRefreshToken {
            token_hash: hash.to_string(),
            rotated_token_hash: None,
            rotated_at: None,
            client_id: client_id.to_string(),
            created_at,
            scopes: vec!["openid".to_string(), "offline_access".to_string()],
            authorization_id: "authz-1".to_string(),
            dpop_jkt: None,
            access_info: Some(AccessInfo::new(access_at(created_at))),
            expire_at: None,
        }
    }

    pub(crate) fn grant(id: &str, client_id: &str, created_at: OffsetDateTime) -> OfflineGrant {
        OfflineGrant {
            app_id: "app".to_string(),
            id: id.to_string(),
            initial_client_id: client_id.to_string(),
            authorization_id: "authz-1".to_string(),
            idp_session_id: None,
            identity_id: None,
            created_at,
            authenticated_at: created_at,
            scopes: vec!["openid".to_string(), "offline_access".to_string()],
            user_id: "user-1".to_string(),
            amr: vec!["pwd".to_string()],
            access_info: AccessInfo::new(access_at(created_at)),
            device_info: None,
            sso_enabled: false,
            app2app_device_key_jwk_json: None,
            participated_saml_service_provider_ids: Vec::new(),
            refresh_tokens: vec![token("root-hash", client_id, created_at)],
            expire_at: created_at + Duration::days(30),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;
    use time::Duration;

    #[test]
    fn test_current_hash_prefers_rotated() {
        let now = OffsetDateTime::now_utc();
        let mut t = token("initial", "c", now);
        assert_eq!(t.current_hash(), "initial");
        t.rotated_token_hash = Some("rotated".to_string());
        assert_eq!(t.current_hash(), "rotated");
        assert!(t.matches_hash("rotated"));
        assert!(!t.matches_hash("initial"));
    }

    #[test]
    fn test_last_access_falls_back_to_created_at() {
        let created = OffsetDateTime::now_utc() - Duration::hours(3);
        let mut t = token("h", "c", created);
        t.access_info = None;
        assert_eq!(t.last_access_or_created_at(), created);

        let later = created + Duration::hours(1);
        t.access_info = Some(AccessInfo::new(access_at(later)));
        assert_eq!(t.last_access_or_created_at(), later);
    }

    #[test]
    fn test_to_session_uses_token_fields() {
        let now = OffsetDateTime::now_utc();
        let mut g = grant("g1", "spa", now);
        let mut second = token("second", "other", now);
        second.authorization_id = "authz-2".to_string();
        second.dpop_jkt = Some("jkt".to_string());
        g.refresh_tokens.push(second);

        let session = g.to_session("second").unwrap();
        assert_eq!(session.client_id, "other");
        assert_eq!(session.authorization_id, "authz-2");
        assert_eq!(session.dpop_jkt.as_deref(), Some("jkt"));
        assert!(g.to_session("nope").is_none());
    }

    #[test]
    fn test_has_client_id() {
        let now = OffsetDateTime::now_utc();
        let mut g = grant("g1", "spa", now);
        g.refresh_tokens.push(token("t2", "native", now));
        assert!(g.has_client_id("spa"));
        assert!(g.has_client_id("native"));
        assert!(!g.has_client_id("partner"));
    }

    #[test]
    fn test_record_access_backfills_token_tracking() {
        let created = OffsetDateTime::now_utc() - Duration::hours(2);
        let mut g = grant("g1", "spa", created);
        g.refresh_tokens[0].access_info = None;

        let now = OffsetDateTime::now_utc();
        g.record_access(&access_at(now), Some("root-hash"));

        assert_eq!(g.access_info.last_access.timestamp, now);
        let info = g.refresh_tokens[0].access_info.as_ref().unwrap();
        assert_eq!(info.initial_access.timestamp, created);
        assert_eq!(info.last_access.timestamp, now);
    }

    #[test]
    fn test_rotate_and_remove_tokens() {
        let now = OffsetDateTime::now_utc();
        let mut g = grant("g1", "spa", now);
        g.rotate_token("root-hash", "new-hash".to_string(), now).unwrap();
        assert!(g.find_token("root-hash").is_none());
        assert!(g.find_token("new-hash").is_some());
        assert_eq!(g.refresh_tokens[0].token_hash, "root-hash");

        assert!(matches!(
            g.rotate_token("missing", "x".to_string(), now),
            Err(AuthError::GrantNotFound)
        ));

        g.remove_tokens(&["new-hash".to_string()]);
        assert!(g.has_valid_tokens());
        g.remove_tokens(&["root-hash".to_string()]);
        assert!(!g.has_valid_tokens());
    }

    #[test]
    fn test_rotated_token_keeps_initial_identity() {
        let earlier = OffsetDateTime::now_utc() - Duration::minutes(5);
        let mut g = grant("g1", "spa", earlier);
        g.rotate_token("root-hash", "new-hash".to_string(), earlier).unwrap();
        g.rotate_token("root-hash", "newer-hash".to_string(), earlier).unwrap();

        let session = g.to_session("newer-hash").unwrap();
        assert_eq!(session.token_hash, "root-hash");
        assert!(g.to_session_by_initial_hash("root-hash").is_some());
        assert!(g.to_session_by_initial_hash("newer-hash").is_none());

        let now = OffsetDateTime::now_utc();
        g.record_access(&access_at(now), Some("root-hash"));
        let info = g.refresh_tokens[0].access_info.as_ref().unwrap();
        assert_eq!(info.last_access.timestamp, now);
    }

    #[test]
    fn test_match_dpop_jkt() {
        let now = OffsetDateTime::now_utc();
        let mut g = grant("g1", "spa", now);
        let unbound = g.to_session("root-hash").unwrap();
        assert!(unbound.match_dpop_jkt(None).is_ok());

        g.refresh_tokens[0].dpop_jkt = Some("thumb".to_string());
        let bound = g.to_session("root-hash").unwrap();
        let err = bound.match_dpop_jkt(None).unwrap_err();
        assert_eq!(err.oauth_error_code(), "invalid_dpop_proof");

        let proof = DpopProof {
            jkt: "thumb".to_string(),
            jti: "j".to_string(),
            htm: "POST".to_string(),
            htu: "https://auth.example.com/oauth2/token".to_string(),
            iat: now,
        };
        assert!(bound.match_dpop_jkt(Some(&proof)).is_ok());
    }

    #[test]
    fn test_serde_tolerates_legacy_token() {
        let now = OffsetDateTime::now_utc();
        let g = grant("g1", "spa", now);
        let mut value = serde_json::to_value(&g).unwrap();
        value["refresh_tokens"][0]
            .as_object_mut()
            .unwrap()
            .remove("access_info");
        let decoded: OfflineGrant = serde_json::from_value(value).unwrap();
        assert!(decoded.refresh_tokens[0].access_info.is_none());
    }
}
