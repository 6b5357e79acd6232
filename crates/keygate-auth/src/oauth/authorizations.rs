//! Consent bookkeeping shared by the authorization and token handlers.

use std::sync::Arc;

use time::OffsetDateTime;

use crate::AuthResult;
use crate::error::AuthError;
use crate::storage::AuthorizationStore;
use crate::types::Authorization;

/// Creates and widens [`Authorization`] records.
#[derive(Clone)]
pub struct AuthorizationService {
    app_id: String,
    store: Arc<dyn AuthorizationStore>,
}

impl AuthorizationService {
    /// Creates the service.
    #[must_use]
    pub fn new(app_id: impl Into<String>, store: Arc<dyn AuthorizationStore>) -> Self {
        Self {
            app_id: app_id.into(),
            store,
        }
    }

    /// Returns the user's authorization for the client, creating it or
    /// widening its scopes as needed.
    ///
    /// # Errors
    ///
    /// Store errors.
    pub async fn check_and_grant(
        &self,
        client_id: &str,
        user_id: &str,
        scopes: &[String],
    ) -> AuthResult<Authorization> {
        let now = OffsetDateTime::now_utc();
        match self.store.get_authorization(user_id, client_id).await? {
            Some(mut authorization) => {
                if authorization.merge_scopes(scopes, now) {
                    tracing::debug!(
                        authorization_id = %authorization.id,
                        client_id = %client_id,
                        "widened authorization scopes"
                    );
                    self.store.update_authorization(&authorization).await?;
                }
                Ok(authorization)
            }
            None => {
                let authorization = Authorization::new(&self.app_id, client_id, user_id, scopes, now);
                match self.store.create_authorization(&authorization).await {
                    Ok(()) => Ok(authorization),
                    Err(AuthError::AuthorizationExists) => {
                        tracing::debug!(client_id = %client_id, "lost authorization create race, reloading");
                        self.merge_existing(client_id, user_id, scopes).await
                    }
                    Err(e) => Err(e),
                }
            }
        }
    }

    async fn merge_existing(
        &self,
        client_id: &str,
        user_id: &str,
        scopes: &[String],
    ) -> AuthResult<Authorization> {
        let mut authorization = self
            .store
            .get_authorization(user_id, client_id)
            .await?
            .ok_or(AuthError::AuthorizationNotFound)?;
        if authorization.merge_scopes(scopes, OffsetDateTime::now_utc()) {
            self.store.update_authorization(&authorization).await?;
        }
        Ok(authorization)
    }

    /// Loads an authorization by ID.
    ///
    /// # Errors
    ///
    /// Store errors.
    pub async fn get_by_id(&self, id: &str) -> AuthResult<Option<Authorization>> {
        self.store.get_authorization_by_id(id).await
    }

    /// Loads the user's authorization for a client.
    ///
    /// # Errors
    ///
    /// Store errors.
    pub async fn get(&self, user_id: &str, client_id: &str) -> AuthResult<Option<Authorization>> {
        self.store.get_authorization(user_id, client_id).await
    }

    /// Lists a user's authorizations.
    ///
    /// # Errors
    ///
    /// Store errors.
    pub async fn list(&self, user_id: &str) -> AuthResult<Vec<Authorization>> {
        self.store.list_authorizations(user_id).await
    }

    /// Deletes an authorization.
    ///
    /// # Errors
    ///
    /// Store errors.
    pub async fn delete(&self, id: &str) -> AuthResult<()> {
        self.store.delete_authorization(id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;

    fn scopes(values: &[&str]) -> Vec<String> {
        values.iter().map(ToString::to_string).collect()
    }

    #[tokio::test]
    async fn test_check_and_grant_creates_then_merges() {
        let service = AuthorizationService::new("app", Arc::new(MemoryStore::default()));

        let first = service
            .check_and_grant("spa", "user-1", &scopes(&["openid"]))
            .await
            .unwrap();
        let second = service
            .check_and_grant("spa", "user-1", &scopes(&["offline_access", "openid"]))
            .await
            .unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(second.scopes, scopes(&["openid", "offline_access"]));

        let stored = service.get_by_id(&first.id).await.unwrap().unwrap();
        assert_eq!(stored.scopes, scopes(&["openid", "offline_access"]));
    }

    #[tokio::test]
    async fn test_authorizations_are_per_client() {
        let service = AuthorizationService::new("app", Arc::new(MemoryStore::default()));
        let a = service
            .check_and_grant("spa", "user-1", &scopes(&["openid"]))
            .await
            .unwrap();
        let b = service
            .check_and_grant("native", "user-1", &scopes(&["openid"]))
            .await
            .unwrap();
        assert_ne!(a.id, b.id);
        assert_eq!(service.list("user-1").await.unwrap().len(), 2);
    }

    /// Misses the first lookup, as if a concurrent request created the
    /// record right after it.
    struct StaleFirstRead {
        inner: MemoryStore,
        missed: std::sync::atomic::AtomicBool,
    }

    #[async_trait::async_trait]
    impl AuthorizationStore for StaleFirstRead {
        async fn get_authorization(
            &self,
            user_id: &str,
            client_id: &str,
        ) -> AuthResult<Option<Authorization>> {
            if !self.missed.swap(true, std::sync::atomic::Ordering::SeqCst) {
                return Ok(None);
            }
            self.inner.get_authorization(user_id, client_id).await
        }

        async fn get_authorization_by_id(&self, id: &str) -> AuthResult<Option<Authorization>> {
            self.inner.get_authorization_by_id(id).await
        }

        async fn create_authorization(&self, authorization: &Authorization) -> AuthResult<()> {
            self.inner.create_authorization(authorization).await
        }

        async fn update_authorization(&self, authorization: &Authorization) -> AuthResult<()> {
            self.inner.update_authorization(authorization).await
        }

        async fn delete_authorization(&self, id: &str) -> AuthResult<()> {
            self.inner.delete_authorization(id).await
        }

        async fn list_authorizations(&self, user_id: &str) -> AuthResult<Vec<Authorization>> {
            self.inner.list_authorizations(user_id).await
        }
    }

    #[tokio::test]
    async fn test_check_and_grant_reloads_after_lost_create() {
        let inner = MemoryStore::default();
        let existing = Authorization::new(
            "app",
            "spa",
            "user-1",
            &scopes(&["openid"]),
            OffsetDateTime::now_utc(),
        );
        inner.create_authorization(&existing).await.unwrap();

        let store = StaleFirstRead {
            inner,
            missed: std::sync::atomic::AtomicBool::new(false),
        };
        let service = AuthorizationService::new("app", Arc::new(store));
        let granted = service
            .check_and_grant("spa", "user-1", &scopes(&["openid", "offline_access"]))
            .await
            .unwrap();

        assert_eq!(granted.id, existing.id);
        assert_eq!(granted.scopes, scopes(&["openid", "offline_access"]));
    }
}
