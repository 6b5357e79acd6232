//! Named distributed mutex on Redis.
//!
//! A lock is a key set with `NX` and a lease TTL whose value is a random
//! token. Release deletes the key only while it still holds the caller's
//! token, so a holder whose lease ran out cannot free somebody else's lock.
//!
//! Acquisition retries every `retry_interval` until `acquire_timeout`
//! passes, then fails with [`AuthError::LockTimeout`]. A [`MutexGuard`]
//! dropped without [`MutexGuard::release`] (cancelled future, early return)
//! releases in a background task; a crashed holder is freed by the lease.

use std::time::Instant;

use deadpool_redis::Pool;
use keygate_auth::AuthError;
use keygate_auth::config::LockConfig;
use redis::Script;

use crate::RedisStoreError;

const RELEASE_SCRIPT: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
  return redis.call('DEL', KEYS[1])
else
  return 0
end
"#;

/// Factory for named locks sharing one pool and lock policy.
#[derive(Clone)]
pub struct RedisMutex {
    pool: Pool,
    config: LockConfig,
}

impl RedisMutex {
    /// Creates a mutex factory.
    #[must_use]
    pub fn new(pool: Pool, config: LockConfig) -> Self {
        Self { pool, config }
    }

    /// Acquires the lock `name`.
    ///
    /// # Errors
    ///
    /// `LockTimeout` when the lock stays taken past the acquire timeout,
    /// `Storage` when Redis cannot be reached.
    pub async fn acquire(&self, name: &str) -> Result<MutexGuard, AuthError> {
        let token = uuid::Uuid::new_v4().to_string();
        let lease_ms = u64::try_from(self.config.lease.as_millis()).unwrap_or(u64::MAX);
        let started = Instant::now();

        loop {
            let mut conn = self.pool.get().await.map_err(RedisStoreError::from)?;
            let acquired: Option<String> = redis::cmd("SET")
                .arg(name)
                .arg(&token)
                .arg("NX")
                .arg("PX")
                .arg(lease_ms)
                .query_async(&mut conn)
                .await
                .map_err(RedisStoreError::from)?;
            drop(conn);

            if acquired.is_some() {
                tracing::trace!(mutex = %name, "acquired mutex");
                return Ok(MutexGuard {
                    pool: self.pool.clone(),
                    name: name.to_string(),
                    token,
                    released: false,
                });
            }

            if started.elapsed() >= self.config.acquire_timeout {
                tracing::warn!(mutex = %name, "timed out acquiring mutex");
                return Err(AuthError::lock_timeout(name));
            }
            tokio::time::sleep(self.config.retry_interval).await;
        }
    }
}

/// A held lock.
#[must_use = "the lock is released as soon as the guard is dropped"]
pub struct MutexGuard {
    pool: Pool,
    name: String,
    token: String,
    released: bool,
}

impl MutexGuard {
    /// Name of the held lock.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Releases the lock. Failures are logged; the lease frees the lock
    /// eventually.
    pub async fn release(mut self) {
        self.released = true;
        if let Err(e) = release(&self.pool, &self.name, &self.token).await {
            tracing::warn!(mutex = %self.name, error = %e, "failed to release mutex");
        }
    }
}

impl Drop for MutexGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            tracing::warn!(mutex = %self.name, "mutex dropped outside a runtime, waiting for lease");
            return;
        };
        let pool = self.pool.clone();
        let name = std::mem::take(&mut self.name);
        let token = std::mem::take(&mut self.token);
        handle.spawn(async move {
            if let Err(e) = release(&pool, &name, &token).await {
                tracing::warn!(mutex = %name, error = %e, "failed to release dropped mutex");
            }
        });
    }
}

async fn release(pool: &Pool, name: &str, token: &str) -> Result<(), RedisStoreError> {
    let mut conn = pool.get().await?;
    let deleted: i32 = Script::new(RELEASE_SCRIPT)
        .key(name)
        .arg(token)
        .invoke_async(&mut conn)
        .await?;
    if deleted == 0 {
        tracing::debug!(mutex = %name, "mutex lease expired before release");
    }
    Ok(())
}
