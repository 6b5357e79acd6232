//! Single-use challenges signed by devices in assertion grants.

use std::sync::Arc;
use std::time::Duration;

use time::OffsetDateTime;

use crate::AuthResult;
use crate::storage::ChallengeStore;
use crate::token::codec::generate_token;
use crate::types::{Challenge, ChallengePurpose};

/// Creates challenges.
#[derive(Clone)]
pub struct ChallengeService {
    store: Arc<dyn ChallengeStore>,
    lifetime: Duration,
}

impl ChallengeService {
    /// Creates the service.
    #[must_use]
    pub fn new(store: Arc<dyn ChallengeStore>, lifetime: Duration) -> Self {
        Self { store, lifetime }
    }

    /// Creates and stores a challenge for `purpose`.
    ///
    /// # Errors
    ///
    /// Store errors.
    pub async fn create(&self, purpose: ChallengePurpose) -> AuthResult<Challenge> {
        let now = OffsetDateTime::now_utc();
        let challenge = Challenge {
            token: generate_token(),
            purpose,
            created_at: now,
            expire_at: now + self.lifetime,
        };
        self.store.create_challenge(&challenge).await?;
        Ok(challenge)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;

    #[tokio::test]
    async fn test_challenge_is_single_use() {
        let store = Arc::new(MemoryStore::default());
        let service = ChallengeService::new(store.clone(), Duration::from_secs(300));

        let challenge = service.create(ChallengePurpose::AnonymousRequest).await.unwrap();
        assert!(challenge.expire_at > challenge.created_at);

        let consumed = store.consume_challenge(&challenge.token).await.unwrap().unwrap();
        assert_eq!(consumed.purpose, ChallengePurpose::AnonymousRequest);
        assert!(store.consume_challenge(&challenge.token).await.unwrap().is_none());
    }
}
