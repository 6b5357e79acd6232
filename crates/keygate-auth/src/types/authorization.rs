//! Durable user consent records.

use indexmap::IndexSet;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// Consent of a user to a client, keyed by `(user_id, client_id)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Authorization {
    /// Authorization ID.
    pub id: String,
    /// Tenant.
    pub app_id: String,
    /// Client.
    pub client_id: String,
    /// User.
    pub user_id: String,
    /// Granted scopes, in first-granted order.
    pub scopes: Vec<String>,
    /// Creation time.
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    /// Last scope change.
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl Authorization {
    /// Creates a new authorization.
    #[must_use]
    pub fn new(
        app_id: impl Into<String>,
        client_id: impl Into<String>,
        user_id: impl Into<String>,
        scopes: &[String],
        now: OffsetDateTime,
    ) -> Self {
        let scopes: IndexSet<String> = scopes.iter().cloned().collect();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            app_id: app_id.into(),
            client_id: client_id.into(),
            user_id: user_id.into(),
            scopes: scopes.into_iter().collect(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether every requested scope is already granted.
    #[must_use]
    pub fn is_authorized(&self, scopes: &[String]) -> bool {
        scopes.iter().all(|s| self.scopes.contains(s))
    }

    /// Unions new scopes into the grant, preserving insertion order.
    ///
    /// Returns `true` when the scope set widened.
    pub fn merge_scopes(&mut self, scopes: &[String], now: OffsetDateTime) -> bool {
        let mut merged: IndexSet<String> = self.scopes.drain(..).collect();
        let before = merged.len();
        merged.extend(scopes.iter().cloned());
        let widened = merged.len() != before;
        self.scopes = merged.into_iter().collect();
        if widened {
            self.updated_at = now;
        }
        widened
    }
}
