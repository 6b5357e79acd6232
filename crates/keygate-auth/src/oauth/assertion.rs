//! Device assertions for the anonymous and biometric grants.
//!
//! A device signs a short JWT with its own key pair and embeds the public
//! key in the header. The JWT names a challenge previously obtained from
//! `/oauth2/challenge`; the challenge is consumed on use. The key thumbprint
//! identifies the device.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode, decode_header};
use serde::Deserialize;
use time::{Duration, OffsetDateTime};

use crate::AuthResult;
use crate::error::AuthError;
use crate::oauth::dpop::jwk_thumbprint;
use crate::storage::ChallengeStore;
use crate::types::ChallengePurpose;

/// JWT `typ` of an anonymous request.
pub const ANONYMOUS_REQUEST_JWT_TYPE: &str = "vnd.keygate.anonymous-request";

/// JWT `typ` of a biometric request.
pub const BIOMETRIC_REQUEST_JWT_TYPE: &str = "vnd.keygate.biometric-request";

/// Which grant the assertion was presented at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssertionKind {
    /// Anonymous user request.
    Anonymous,
    /// Biometric authentication request.
    Biometric,
}

impl AssertionKind {
    fn jwt_type(self) -> &'static str {
        match self {
            Self::Anonymous => ANONYMOUS_REQUEST_JWT_TYPE,
            Self::Biometric => BIOMETRIC_REQUEST_JWT_TYPE,
        }
    }

    fn challenge_purpose(self) -> ChallengePurpose {
        match self {
            Self::Anonymous => ChallengePurpose::AnonymousRequest,
            Self::Biometric => ChallengePurpose::BiometricRequest,
        }
    }

    fn amr(self) -> &'static str {
        match self {
            Self::Anonymous => "x_anonymous",
            Self::Biometric => "x_biometric",
        }
    }
}

/// Outcome of a verified assertion.
#[derive(Debug, Clone)]
pub struct VerifiedAssertion {
    /// User the device signs in as.
    pub user_id: String,
    /// Authentication methods.
    pub amr: Vec<String>,
    /// Thumbprint of the device key.
    pub key_id: String,
    /// Device info reported in the assertion.
    pub device_info: Option<serde_json::Value>,
}

/// Verifies device assertions.
#[async_trait]
pub trait AssertionVerifier: Send + Sync {
    /// Verifies `jwt` for the given grant.
    ///
    /// # Errors
    ///
    /// `invalid_grant` for any malformed, unsigned, stale or replayed
    /// assertion.
    async fn verify(&self, kind: AssertionKind, jwt: &str) -> AuthResult<VerifiedAssertion>;
}

#[derive(Debug, Deserialize)]
struct AssertionClaims {
    challenge: String,
    iat: i64,
    #[serde(default)]
    device_info: Option<serde_json::Value>,
}

/// Verifier backed by the challenge store.
///
/// Anonymous users are keyed by device: the same key always signs in as
/// the same anonymous user. Biometric keys must be enrolled for a user
/// first.
pub struct ChallengeAssertionVerifier {
    challenges: Arc<dyn ChallengeStore>,
    biometric_enabled: bool,
    max_age: Duration,
    biometric_keys: DashMap<String, String>,
}

impl ChallengeAssertionVerifier {
    /// Creates a verifier. Biometric requests are refused unless enabled.
    #[must_use]
    pub fn new(challenges: Arc<dyn ChallengeStore>, biometric_enabled: bool) -> Self {
        Self {
            challenges,
            biometric_enabled,
            max_age: Duration::minutes(5),
            biometric_keys: DashMap::new(),
        }
    }

    /// Enrolls a biometric device key, by thumbprint, for a user.
    pub fn enroll_biometric_key(&self, key_id: impl Into<String>, user_id: impl Into<String>) {
        self.biometric_keys.insert(key_id.into(), user_id.into());
    }

    /// The anonymous user ID bound to a device key.
    #[must_use]
    pub fn anonymous_user_id(key_id: &str) -> String {
        format!("anonymous:{key_id}")
    }

    fn verify_signature(
        &self,
        kind: AssertionKind,
        jwt: &str,
    ) -> AuthResult<(String, AssertionClaims)> {
        let invalid = |detail: &str| {
            tracing::debug!(detail, "rejected device assertion");
            AuthError::invalid_grant("invalid jwt")
        };

        let header = decode_header(jwt).map_err(|_| invalid("malformed header"))?;
        if header.typ.as_deref() != Some(kind.jwt_type()) {
            return Err(invalid("unexpected typ"));
        }
        if matches!(
            header.alg,
            Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512
        ) {
            return Err(invalid("symmetric algorithm"));
        }
        let jwk = header.jwk.as_ref().ok_or_else(|| invalid("missing jwk"))?;
        let key = DecodingKey::from_jwk(jwk).map_err(|_| invalid("unusable jwk"))?;

        let mut validation = Validation::new(header.alg);
        validation.required_spec_claims.clear();
        validation.validate_exp = false;
        validation.validate_aud = false;
        let data = decode::<AssertionClaims>(jwt, &key, &validation)
            .map_err(|_| invalid("bad signature or claims"))?;

        let now = OffsetDateTime::now_utc();
        let iat = OffsetDateTime::from_unix_timestamp(data.claims.iat)
            .map_err(|_| invalid("bad iat"))?;
        if iat < now - self.max_age || iat > now + Duration::minutes(1) {
            return Err(invalid("stale"));
        }

        let key_id = jwk_thumbprint(jwk).map_err(|_| invalid("unsupported key"))?;
        Ok((key_id, data.claims))
    }
}

#[async_trait]
impl AssertionVerifier for ChallengeAssertionVerifier {
    async fn verify(&self, kind: AssertionKind, jwt: &str) -> AuthResult<VerifiedAssertion> {
        if kind == AssertionKind::Biometric && !self.biometric_enabled {
            return Err(AuthError::unauthorized_client(
                "biometric authentication is disabled",
            ));
        }

        let (key_id, claims) = self.verify_signature(kind, jwt)?;

        let challenge = self
            .challenges
            .consume_challenge(&claims.challenge)
            .await?
            .ok_or_else(|| AuthError::invalid_grant("invalid challenge"))?;
        if challenge.purpose != kind.challenge_purpose() {
            return Err(AuthError::invalid_grant("invalid challenge"));
        }

        let user_id = match kind {
            AssertionKind::Anonymous => Self::anonymous_user_id(&key_id),
            AssertionKind::Biometric => self
                .biometric_keys
                .get(&key_id)
                .map(|entry| entry.value().clone())
                .ok_or_else(|| AuthError::invalid_grant("biometric key is not enrolled"))?,
        };

        Ok(VerifiedAssertion {
            user_id,
            amr: vec![kind.amr().to_string()],
            key_id,
            device_info: claims.device_info,
        })
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;
    use crate::token::jwt::SigningKeyPair;
    use jsonwebtoken::Header;
    use jsonwebtoken::jwk::Jwk;

    pub(crate) fn sign_assertion(
        key: &SigningKeyPair,
        kind: AssertionKind,
        challenge: &str,
    ) -> String {
        let jwk: Jwk =
            serde_json::from_value(serde_json::to_value(key.to_jwk()).unwrap()).unwrap();
        let mut header = Header::new(key.algorithm.to_jwt_algorithm());
        header.typ = Some(kind.jwt_type().to_string());
        header.jwk = Some(jwk);
        let claims = serde_json::json!({
            "challenge": challenge,
            "iat": OffsetDateTime::now_utc().unix_timestamp(),
            "device_info": {"platform": "ios"},
        });
        key.sign(&header, &claims).unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::sign_assertion;
    use super::*;
    use crate::storage::MemoryStore;
    use crate::token::jwt::SigningKeyPair;
    use crate::types::Challenge;

    async fn challenge(store: &MemoryStore, token: &str, purpose: ChallengePurpose) {
        let now = OffsetDateTime::now_utc();
        store
            .create_challenge(&Challenge {
                token: token.to_string(),
                purpose,
                created_at: now,
                expire_at: now + Duration::minutes(5),
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_anonymous_assertion_is_single_use() {
        let store = Arc::new(MemoryStore::default());
        challenge(&store, "c1", ChallengePurpose::AnonymousRequest).await;
        let verifier = ChallengeAssertionVerifier::new(store.clone(), false);
        let key = SigningKeyPair::generate_ec().unwrap();

        let jwt = sign_assertion(&key, AssertionKind::Anonymous, "c1");
        let verified = verifier.verify(AssertionKind::Anonymous, &jwt).await.unwrap();
        assert_eq!(
            verified.user_id,
            ChallengeAssertionVerifier::anonymous_user_id(&verified.key_id)
        );
        assert_eq!(verified.device_info.unwrap()["platform"], "ios");

        let replay = verifier.verify(AssertionKind::Anonymous, &jwt).await;
        assert_eq!(replay.unwrap_err().oauth_error_code(), "invalid_grant");
    }

    #[tokio::test]
    async fn test_challenge_purpose_must_match() {
        let store = Arc::new(MemoryStore::default());
        challenge(&store, "c1", ChallengePurpose::App2appRequest).await;
        let verifier = ChallengeAssertionVerifier::new(store, false);
        let key = SigningKeyPair::generate_ec().unwrap();

        let jwt = sign_assertion(&key, AssertionKind::Anonymous, "c1");
        assert!(verifier.verify(AssertionKind::Anonymous, &jwt).await.is_err());
    }

    #[tokio::test]
    async fn test_wrong_typ_rejected() {
        let store = Arc::new(MemoryStore::default());
        challenge(&store, "c1", ChallengePurpose::AnonymousRequest).await;
        let verifier = ChallengeAssertionVerifier::new(store, true);
        let key = SigningKeyPair::generate_ec().unwrap();

        let jwt = sign_assertion(&key, AssertionKind::Biometric, "c1");
        let err = verifier
            .verify(AssertionKind::Anonymous, &jwt)
            .await
            .unwrap_err();
        assert_eq!(err.description(), "invalid jwt");
    }

    #[tokio::test]
    async fn test_biometric_requires_enrollment() {
        let store = Arc::new(MemoryStore::default());
        challenge(&store, "c1", ChallengePurpose::BiometricRequest).await;
        challenge(&store, "c2", ChallengePurpose::BiometricRequest).await;
        let verifier = ChallengeAssertionVerifier::new(store, true);
        let key = SigningKeyPair::generate_ec().unwrap();

        let jwt = sign_assertion(&key, AssertionKind::Biometric, "c1");
        let err = verifier
            .verify(AssertionKind::Biometric, &jwt)
            .await
            .unwrap_err();
        assert_eq!(err.description(), "biometric key is not enrolled");

        let jwk: jsonwebtoken::jwk::Jwk =
            serde_json::from_value(serde_json::to_value(key.to_jwk()).unwrap()).unwrap();
        verifier.enroll_biometric_key(jwk_thumbprint(&jwk).unwrap(), "user-1");
        let jwt = sign_assertion(&key, AssertionKind::Biometric, "c2");
        let verified = verifier.verify(AssertionKind::Biometric, &jwt).await.unwrap();
        assert_eq!(verified.user_id, "user-1");
        assert_eq!(verified.amr, vec!["x_biometric"]);
    }

    #[tokio::test]
    async fn test_biometric_disabled() {
        let store = Arc::new(MemoryStore::default());
        let verifier = ChallengeAssertionVerifier::new(store, false);
        let err = verifier
            .verify(AssertionKind::Biometric, "whatever")
            .await
            .unwrap_err();
        assert_eq!(err.oauth_error_code(), "unauthorized_client");
    }
}
