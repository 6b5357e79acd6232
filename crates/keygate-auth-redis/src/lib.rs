//! # keygate-auth-redis
//!
//! Redis storage backend for `keygate-auth`.
//!
//! [`RedisStore`] implements every store trait of the authorization core
//! against a shared Redis, so several Keygate instances can serve the same
//! tenant. Offline grant updates are serialized across instances with
//! [`RedisMutex`].
//!
//! ## Key layout
//!
//! All keys are namespaced by application ID:
//!
//! | Key | Value |
//! |-----|-------|
//! | `app:{app}:code-grant:{hash}` | JSON, TTL until expiry |
//! | `app:{app}:access-grant:{hash}` | JSON, TTL until expiry |
//! | `app:{app}:offline-grant:{id}` | JSON, TTL until expiry |
//! | `app:{app}:offline-grant-list:{user}` | hash of grant ID to expiry |
//! | `app:{app}:offline-grant-mutex:{id}` | lock token, TTL = lease |
//! | `app:{app}:settings-action-grant:{hash}` | JSON, TTL until expiry |
//! | `app:{app}:app-session-token:{hash}` | JSON, TTL until expiry |
//! | `app:{app}:challenge:{token}` | JSON, TTL until expiry |
//! | `app:{app}:authorization:{id}` | JSON |
//! | `app:{app}:authorization-list:{user}` | hash of client ID to authorization ID |
//! | `app:{app}:idp-session:{id}` | JSON, TTL until expiry |
//! | `app:{app}:idp-session-list:{user}` | set of session IDs |

pub mod keys;
pub mod mutex;
pub mod store;

use std::time::Duration;

use deadpool_redis::{Config, Pool, Runtime};
use keygate_auth::AuthError;

pub use keys::KeySpace;
pub use mutex::{MutexGuard, RedisMutex};
pub use store::RedisStore;

/// Errors raised while setting up the Redis backend.
#[derive(Debug, thiserror::Error)]
pub enum RedisStoreError {
    /// The pool could not be created from the URL.
    #[error("Failed to create Redis pool: {0}")]
    CreatePool(#[from] deadpool_redis::CreatePoolError),

    /// No connection could be checked out of the pool.
    #[error("Failed to connect to Redis: {0}")]
    Pool(#[from] deadpool_redis::PoolError),

    /// A Redis command failed.
    #[error("Redis command failed: {0}")]
    Command(#[from] redis::RedisError),
}

impl From<RedisStoreError> for AuthError {
    fn from(e: RedisStoreError) -> Self {
        AuthError::storage(e.to_string())
    }
}

/// Creates a connection pool for `url`.
///
/// `timeout` bounds waiting for, creating and recycling a connection.
///
/// # Errors
///
/// Returns [`RedisStoreError::CreatePool`] for an invalid URL.
pub fn create_pool(url: &str, max_size: usize, timeout: Duration) -> Result<Pool, RedisStoreError> {
    let mut config = Config::from_url(url);
    if let Some(pool) = config.pool.as_mut() {
        pool.max_size = max_size;
        pool.timeouts.wait = Some(timeout);
        pool.timeouts.create = Some(timeout);
        pool.timeouts.recycle = Some(timeout);
    }
    Ok(config.create_pool(Some(Runtime::Tokio1))?)
}

/// Checks that the pool can reach Redis.
///
/// # Errors
///
/// Pool and command errors.
pub async fn ping(pool: &Pool) -> Result<(), RedisStoreError> {
    let mut conn = pool.get().await?;
    let _: String = redis::cmd("PING").query_async(&mut conn).await?;
    Ok(())
}
