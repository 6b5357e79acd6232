//! Token endpoint rate limiting.
//!
//! The token handler checks one bucket per client IP before it does any
//! work, and one per user once the user is known.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use moka::future::Cache;

use crate::AuthResult;
use crate::config::RateLimitingConfig;
use crate::error::AuthError;

/// Rate limit buckets of the token endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RateLimitBucket {
    /// Token requests from one IP address.
    TokenRequestPerIp,
    /// Token requests on behalf of one user.
    TokenRequestPerUser,
}

impl RateLimitBucket {
    /// Stable bucket name, used in keys and errors.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TokenRequestPerIp => "oauth.token.ip",
            Self::TokenRequestPerUser => "oauth.token.user",
        }
    }
}

impl fmt::Display for RateLimitBucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Consumes rate limit tokens.
#[async_trait]
pub trait RateLimiter: Send + Sync {
    /// Consumes one token of `bucket` for `key`.
    ///
    /// # Errors
    ///
    /// `RateLimited` when the bucket is exhausted.
    async fn check(&self, bucket: RateLimitBucket, key: &str) -> AuthResult<()>;
}

/// In-process fixed-window limiter.
///
/// Each `(bucket, key)` gets a counter when its first request arrives. The
/// counter lives for one window and is evicted afterwards, which resets it.
pub struct LocalRateLimiter {
    config: RateLimitingConfig,
    windows: Cache<(RateLimitBucket, String), Arc<AtomicU32>>,
}

impl LocalRateLimiter {
    /// Creates a limiter from configuration with one-minute windows.
    #[must_use]
    pub fn new(config: RateLimitingConfig) -> Self {
        Self::with_window(config, Duration::from_secs(60))
    }

    /// Creates a limiter with a custom window length.
    #[must_use]
    pub fn with_window(config: RateLimitingConfig, window: Duration) -> Self {
        let windows = Cache::builder().time_to_live(window).build();
        Self { config, windows }
    }

    fn limit(&self, bucket: RateLimitBucket) -> u32 {
        match bucket {
            RateLimitBucket::TokenRequestPerIp => self.config.token_requests_per_ip_per_minute,
            RateLimitBucket::TokenRequestPerUser => self.config.token_requests_per_user_per_minute,
        }
    }

    async fn record(&self, bucket: RateLimitBucket, key: &str) -> u32 {
        let counter = self
            .windows
            .get_with((bucket, key.to_string()), async { Arc::new(AtomicU32::new(0)) })
            .await;
        counter.fetch_add(1, Ordering::Relaxed).saturating_add(1)
    }
}

#[async_trait]
impl RateLimiter for LocalRateLimiter {
    async fn check(&self, bucket: RateLimitBucket, key: &str) -> AuthResult<()> {
        if !self.config.enabled {
            return Ok(());
        }
        let count = self.record(bucket, key).await;
        if count > self.limit(bucket) {
            tracing::debug!(bucket = %bucket, "rate limit exceeded");
            return Err(AuthError::rate_limited(bucket.as_str()));
        }
        Ok(())
    }
}
