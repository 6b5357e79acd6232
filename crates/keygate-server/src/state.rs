//! Storage backend selection and service wiring.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use keygate_auth::{AuthServices, Collaborators, MemoryStore, Stores};
use keygate_auth_redis::RedisStore;

use crate::config::AppConfig;

/// Builds the stores selected by `config.redis`.
///
/// Redis is required once enabled: the server refuses to start rather than
/// silently keeping grants in one process.
///
/// # Errors
///
/// Redis pool creation or connection failures.
pub async fn create_stores(config: &AppConfig) -> anyhow::Result<Stores> {
    if !config.redis.enabled {
        tracing::info!("Redis disabled, using in-memory store");
        let store = MemoryStore::new(config.auth.lock.acquire_timeout);
        return Ok(Stores::in_memory(Arc::new(store)));
    }

    tracing::info!(url = %config.redis.url, "Connecting to Redis");
    let pool = keygate_auth_redis::create_pool(
        &config.redis.url,
        config.redis.pool_size,
        Duration::from_millis(config.redis.timeout_ms),
    )
    .context("failed to create Redis pool")?;
    keygate_auth_redis::ping(&pool)
        .await
        .context("failed to connect to Redis")?;
    tracing::info!("Connected to Redis");

    let store = RedisStore::new(pool, config.auth.app_id.clone(), config.auth.lock.clone());
    Ok(Arc::new(store).into_stores())
}

/// Wires the authorization services over the configured backend.
///
/// # Errors
///
/// Backend or authorization core setup failures.
pub async fn build_services(config: &AppConfig) -> anyhow::Result<AuthServices> {
    let stores = create_stores(config).await?;
    let collaborators = Collaborators::local(&config.auth, &stores)
        .context("failed to set up collaborators")?;
    let services = AuthServices::build(config.auth.clone(), stores, collaborators)
        .context("failed to build authorization services")?;
    tracing::info!(
        issuer = %config.auth.issuer,
        app_id = %config.auth.app_id,
        clients = config.auth.clients.len(),
        "Authorization services ready"
    );
    Ok(services)
}
