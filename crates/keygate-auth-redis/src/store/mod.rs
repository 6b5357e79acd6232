//! [`RedisStore`]: every `keygate-auth` store on one Redis.

mod authorization;
mod grant;
mod idp_session;
mod offline_grant;

use std::sync::Arc;

use deadpool_redis::{Connection, Pool};
use keygate_auth::config::LockConfig;
use keygate_auth::{AuthResult, Stores};
use serde::Serialize;
use serde::de::DeserializeOwned;
use time::OffsetDateTime;

use crate::RedisStoreError;
use crate::keys::KeySpace;
use crate::mutex::RedisMutex;

/// Conditional write modes of `SET`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Write {
    /// `NX`: only if the key is absent.
    Create,
    /// `XX`: only if the key exists.
    Update,
    /// Unconditional.
    Upsert,
}

/// Redis-backed grant, consent and session store.
#[derive(Clone)]
pub struct RedisStore {
    pool: Pool,
    keys: KeySpace,
    mutex: RedisMutex,
}

impl RedisStore {
    /// Creates a store for `app_id` whose grant mutex follows `lock`.
    #[must_use]
    pub fn new(pool: Pool, app_id: impl Into<String>, lock: LockConfig) -> Self {
        Self {
            mutex: RedisMutex::new(pool.clone(), lock),
            keys: KeySpace::new(app_id),
            pool,
        }
    }

    /// Key namespace of this store.
    #[must_use]
    pub fn keys(&self) -> &KeySpace {
        &self.keys
    }

    /// Backs every store of [`Stores`] with this store.
    #[must_use]
    pub fn into_stores(self: Arc<Self>) -> Stores {
        Stores {
            code_grants: self.clone(),
            access_grants: self.clone(),
            offline_grants: self.clone(),
            settings_action_grants: self.clone(),
            app_session_tokens: self.clone(),
            challenges: self.clone(),
            authorizations: self.clone(),
            idp_sessions: self,
        }
    }

    async fn conn(&self) -> AuthResult<Connection> {
        Ok(self.pool.get().await.map_err(RedisStoreError::from)?)
    }

    async fn get_json<T: DeserializeOwned>(&self, key: &str) -> AuthResult<Option<T>> {
        let mut conn = self.conn().await?;
        let raw: Option<String> = redis::cmd("GET")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(RedisStoreError::from)?;
        match raw {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    /// Writes `value` as JSON. Returns whether the condition held.
    ///
    /// `expire_at` sets the key TTL; a past expiry stores a record that
    /// vanishes within a millisecond.
    async fn set_json<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        expire_at: Option<OffsetDateTime>,
        write: Write,
    ) -> AuthResult<bool> {
        let payload = serde_json::to_string(value)?;
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(payload);
        match write {
            Write::Create => {
                cmd.arg("NX");
            }
            Write::Update => {
                cmd.arg("XX");
            }
            Write::Upsert => {}
        }
        if let Some(expire_at) = expire_at {
            cmd.arg("PX").arg(ttl_millis(expire_at, OffsetDateTime::now_utc()));
        }

        let mut conn = self.conn().await?;
        let written: Option<String> = cmd
            .query_async(&mut conn)
            .await
            .map_err(RedisStoreError::from)?;
        Ok(written.is_some())
    }

    async fn delete_key(&self, key: &str) -> AuthResult<()> {
        let mut conn = self.conn().await?;
        let _: i64 = redis::cmd("DEL")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(RedisStoreError::from)?;
        Ok(())
    }
}

/// Milliseconds until `expire_at`, at least one.
fn ttl_millis(expire_at: OffsetDateTime, now: OffsetDateTime) -> i64 {
    let millis = (expire_at - now).whole_milliseconds();
    i64::try_from(millis).unwrap_or(i64::MAX).max(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::Duration;

    #[test]
    fn test_ttl_millis() {
        let now = OffsetDateTime::now_utc();
        assert_eq!(ttl_millis(now + Duration::seconds(5), now), 5000);
        assert_eq!(ttl_millis(now - Duration::seconds(5), now), 1);
        assert_eq!(ttl_millis(now, now), 1);
    }
}
