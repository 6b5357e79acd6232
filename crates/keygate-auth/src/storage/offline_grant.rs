//! Offline grant storage.
//!
//! Every mutation of a stored grant goes through
//! [`OfflineGrantStore::update_offline_grant_with_mutator`], which holds the
//! grant's named mutex across the read-modify-write cycle:
//!
//! 1. acquire the mutex (bounded by the lock acquire timeout)
//! 2. read the current grant
//! 3. apply the mutator in memory
//! 4. delete the grant if it has no refresh tokens left, otherwise write it
//!    back only if it still exists, with the expiry returned by the mutator
//! 5. release the mutex, on every exit path
//!
//! A failure to acquire the mutex is an error; implementations never fall
//! back to an unlocked write.

use async_trait::async_trait;
use time::OffsetDateTime;

use crate::AuthResult;
use crate::types::OfflineGrant;

/// In-memory mutation applied under the grant mutex.
///
/// Returns the expiry to persist the grant with.
pub type OfflineGrantMutator =
    Box<dyn FnOnce(&mut OfflineGrant) -> AuthResult<OffsetDateTime> + Send>;

/// Storage for offline grants and the per-user grant index.
#[async_trait]
pub trait OfflineGrantStore: Send + Sync {
    /// Stores a new grant expiring at `expire_at`.
    ///
    /// # Errors
    ///
    /// Fails if a grant with the same ID already exists.
    async fn create_offline_grant(
        &self,
        grant: &OfflineGrant,
        expire_at: OffsetDateTime,
    ) -> AuthResult<()>;

    /// Loads a grant by ID.
    async fn get_offline_grant(&self, id: &str) -> AuthResult<Option<OfflineGrant>>;

    /// Runs `mutator` against the stored grant under its mutex.
    ///
    /// Returns the written grant, or `None` when the mutation left no refresh
    /// tokens and the grant was deleted.
    ///
    /// # Errors
    ///
    /// `GrantNotFound` if the grant does not exist (or vanished while
    /// locked), `LockTimeout` if the mutex could not be acquired, or the
    /// mutator's own error, in which case nothing is written.
    async fn update_offline_grant_with_mutator(
        &self,
        id: &str,
        mutator: OfflineGrantMutator,
    ) -> AuthResult<Option<OfflineGrant>>;

    /// Deletes a grant and, best-effort, its per-user index entry.
    async fn delete_offline_grant(&self, grant: &OfflineGrant) -> AuthResult<()>;

    /// Lists live grants of a user, pruning stale index entries.
    async fn list_offline_grants(&self, user_id: &str) -> AuthResult<Vec<OfflineGrant>>;

    /// Lists live grants of a user that involve `client_id`.
    async fn list_client_offline_grants(
        &self,
        client_id: &str,
        user_id: &str,
    ) -> AuthResult<Vec<OfflineGrant>> {
        let grants = self.list_offline_grants(user_id).await?;
        Ok(grants
            .into_iter()
            .filter(|g| g.has_client_id(client_id))
            .collect())
    }

    /// Drops the per-user index of a user being deleted.
    async fn clean_up_for_deleting_user_id(&self, user_id: &str) -> AuthResult<()>;
}
