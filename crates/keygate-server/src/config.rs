//! Server configuration.
//!
//! Loaded from a TOML file with `KEYGATE__`-prefixed environment overrides,
//! e.g. `KEYGATE__SERVER__PORT=9090` or `KEYGATE__AUTH__ISSUER=...`.
//!
//! ```toml
//! [server]
//! host = "0.0.0.0"
//! port = 8080
//!
//! [logging]
//! level = "info"
//!
//! [redis]
//! enabled = true
//! url = "redis://localhost:6379"
//!
//! [auth]
//! issuer = "https://auth.example.com"
//! ```

use std::net::{IpAddr, SocketAddr};
use std::path::Path;

use ::config::{Config, Environment, File};
use keygate_auth::AuthConfig;
use serde::{Deserialize, Serialize};

/// Default configuration file.
pub const DEFAULT_CONFIG_PATH: &str = "keygate.toml";

/// Prefix of environment overrides.
pub const ENV_PREFIX: &str = "KEYGATE";

/// Errors raised while loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigLoadError {
    /// The sources could not be read or merged.
    #[error("config build error: {0}")]
    Build(#[source] ::config::ConfigError),

    /// The merged configuration does not match [`AppConfig`].
    #[error("config deserialize error: {0}")]
    Deserialize(#[source] ::config::ConfigError),

    /// The authorization core rejected its section.
    #[error(transparent)]
    Auth(#[from] keygate_auth::ConfigError),

    /// Any other invalid value.
    #[error("{0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub redis: RedisConfig,
    /// Authorization core configuration.
    #[serde(default)]
    pub auth: AuthConfig,
}

impl AppConfig {
    /// Socket address to bind.
    ///
    /// # Errors
    ///
    /// `Invalid` when `server.host` is not an IP address.
    pub fn addr(&self) -> Result<SocketAddr, ConfigLoadError> {
        let ip: IpAddr = self.server.host.parse().map_err(|_| {
            ConfigLoadError::Invalid(format!(
                "server.host must be an IP address, got '{}'",
                self.server.host
            ))
        })?;
        Ok(SocketAddr::new(ip, self.server.port))
    }

    /// Checks every section.
    ///
    /// # Errors
    ///
    /// The first invalid value found.
    pub fn validate(&self) -> Result<(), ConfigLoadError> {
        self.addr()?;
        if self.server.body_limit_bytes == 0 {
            return Err(ConfigLoadError::Invalid(
                "server.body_limit_bytes must be > 0".to_string(),
            ));
        }
        if self.redis.enabled {
            if self.redis.url.trim().is_empty() {
                return Err(ConfigLoadError::Invalid(
                    "redis.url is required when redis is enabled".to_string(),
                ));
            }
            if self.redis.pool_size == 0 {
                return Err(ConfigLoadError::Invalid(
                    "redis.pool_size must be > 0".to_string(),
                ));
            }
        }
        self.auth.validate()?;
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_body_limit")]
    pub body_limit_bytes: usize,
}

fn default_host() -> String {
    "0.0.0.0".into()
}
fn default_port() -> u16 {
    8080
}
fn default_body_limit() -> usize {
    64 * 1024
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            body_limit_bytes: default_body_limit(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".into()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// Redis backend settings. Without Redis all state lives in process memory.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RedisConfig {
    /// Store grants, consent and sessions in Redis.
    #[serde(default)]
    pub enabled: bool,

    /// Connection URL, e.g. `redis://localhost:6379`.
    #[serde(default = "default_redis_url")]
    pub url: String,

    /// Connection pool size.
    #[serde(default = "default_redis_pool_size")]
    pub pool_size: usize,

    /// Connection timeout in milliseconds.
    #[serde(default = "default_redis_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_redis_url() -> String {
    "redis://localhost:6379".to_string()
}
fn default_redis_pool_size() -> usize {
    16
}
fn default_redis_timeout_ms() -> u64 {
    2000
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            url: default_redis_url(),
            pool_size: default_redis_pool_size(),
            timeout_ms: default_redis_timeout_ms(),
        }
    }
}

/// Loads and validates configuration.
///
/// A missing file is not an error: defaults and environment overrides
/// still apply.
///
/// # Errors
///
/// Unreadable or invalid configuration.
pub fn load_config(path: Option<&str>) -> Result<AppConfig, ConfigLoadError> {
    let path = Path::new(path.unwrap_or(DEFAULT_CONFIG_PATH));

    let mut builder = Config::builder();
    if path.exists() {
        builder = builder.add_source(File::from(path));
    }
    builder = builder.add_source(
        Environment::with_prefix(ENV_PREFIX)
            .try_parsing(true)
            .separator("__"),
    );

    let merged: AppConfig = builder
        .build()
        .map_err(ConfigLoadError::Build)?
        .try_deserialize()
        .map_err(ConfigLoadError::Deserialize)?;
    merged.validate()?;
    Ok(merged)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let cfg = AppConfig::default();
        cfg.validate().unwrap();
        assert_eq!(cfg.addr().unwrap().port(), 8080);
        assert!(!cfg.redis.enabled);
    }

    #[test]
    fn test_hostname_is_rejected() {
        let mut cfg = AppConfig::default();
        cfg.server.host = "localhost".to_string();
        assert!(matches!(cfg.validate(), Err(ConfigLoadError::Invalid(_))));
    }

    #[test]
    fn test_enabled_redis_needs_url() {
        let mut cfg = AppConfig::default();
        cfg.redis.enabled = true;
        cfg.redis.url = " ".to_string();
        assert!(cfg.validate().is_err());
    }
}
