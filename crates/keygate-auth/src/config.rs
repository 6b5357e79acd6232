//! Authorization core configuration.
//!
//! All knobs are plain data handed to constructors. The grant type whitelist
//! and the client registrations in particular are never held in globals.
//!
//! # Example (TOML)
//!
//! ```toml
//! [auth]
//! issuer = "https://auth.example.com"
//! app_id = "acme"
//!
//! [auth.oauth]
//! authorization_code_lifetime = "5m"
//!
//! [[auth.clients]]
//! client_id = "portal"
//! redirect_uris = ["https://portal.example.com/callback"]
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::token::jwt::SigningAlgorithm;
use crate::types::{ClientConfig, GrantType};

/// Root configuration of the authorization core.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Issuer URL, used for `iss` and every advertised endpoint.
    pub issuer: String,

    /// Tenant identifier. Every store key is namespaced by it.
    pub app_id: String,

    /// Protocol settings.
    pub oauth: OAuthConfig,

    /// Registered clients.
    pub clients: Vec<ClientConfig>,

    /// Offline grant mutex settings.
    pub lock: LockConfig,

    /// DPoP proof validation.
    pub dpop: DpopConfig,

    /// Token signing key.
    pub signing: SigningConfig,

    /// Token endpoint rate limits.
    pub rate_limiting: RateLimitingConfig,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            issuer: "http://localhost:8080".to_string(),
            app_id: "keygate".to_string(),
            oauth: OAuthConfig::default(),
            clients: Vec::new(),
            lock: LockConfig::default(),
            dpop: DpopConfig::default(),
            signing: SigningConfig::default(),
            rate_limiting: RateLimitingConfig::default(),
        }
    }
}

/// OAuth 2.0 / OpenID Connect settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct OAuthConfig {
    /// Authorization code lifetime.
    #[serde(with = "humantime_serde")]
    pub authorization_code_lifetime: Duration,

    /// ID token lifetime.
    #[serde(with = "humantime_serde")]
    pub id_token_lifetime: Duration,

    /// Settings action grant lifetime.
    #[serde(with = "humantime_serde")]
    pub settings_action_grant_lifetime: Duration,

    /// App session token lifetime.
    #[serde(with = "humantime_serde")]
    pub app_session_token_lifetime: Duration,

    /// Challenge lifetime.
    #[serde(with = "humantime_serde")]
    pub challenge_lifetime: Duration,

    /// Grant types every client may use regardless of its registration.
    pub whitelisted_grant_types: Vec<GrantType>,

    /// Login UI entry point for interactive authorization.
    pub login_url: String,

    /// Name of the IDP session cookie.
    pub session_cookie_name: String,

    /// Accept biometric request grants.
    pub biometric_enabled: bool,
}

impl Default for OAuthConfig {
    fn default() -> Self {
        Self {
            authorization_code_lifetime: Duration::from_secs(5 * 60),
            id_token_lifetime: Duration::from_secs(24 * 3600),
            settings_action_grant_lifetime: Duration::from_secs(5 * 60),
            app_session_token_lifetime: Duration::from_secs(5 * 60),
            challenge_lifetime: Duration::from_secs(5 * 60),
            whitelisted_grant_types: GrantType::ALL.to_vec(),
            login_url: "http://localhost:8080/login".to_string(),
            session_cookie_name: "session".to_string(),
            biometric_enabled: false,
        }
    }
}

/// Named mutex settings for offline grant updates.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LockConfig {
    /// How long to wait for the mutex before failing.
    #[serde(with = "humantime_serde")]
    pub acquire_timeout: Duration,

    /// Lease after which an abandoned mutex frees itself.
    #[serde(with = "humantime_serde")]
    pub lease: Duration,

    /// Delay between acquisition attempts.
    #[serde(with = "humantime_serde")]
    pub retry_interval: Duration,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            acquire_timeout: Duration::from_secs(5),
            lease: Duration::from_secs(10),
            retry_interval: Duration::from_millis(50),
        }
    }
}

/// DPoP proof settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DpopConfig {
    /// Maximum proof age.
    #[serde(with = "humantime_serde")]
    pub max_age: Duration,

    /// Tolerated clock skew.
    #[serde(with = "humantime_serde")]
    pub leeway: Duration,
}

impl Default for DpopConfig {
    fn default() -> Self {
        Self {
            max_age: Duration::from_secs(300),
            leeway: Duration::from_secs(30),
        }
    }
}

/// Token signing configuration.
///
/// Without `private_key_pem` a key is generated at startup, which is only
/// suitable for development since tokens do not survive a restart.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SigningConfig {
    /// Signing algorithm: "RS256", "RS384" or "ES384".
    pub algorithm: String,

    /// Key ID published in the JWKS.
    pub kid: Option<String>,

    /// PKCS#8 private key PEM.
    pub private_key_pem: Option<String>,
}

impl Default for SigningConfig {
    fn default() -> Self {
        Self {
            algorithm: "RS256".to_string(),
            kid: None,
            private_key_pem: None,
        }
    }
}

impl SigningConfig {
    /// The configured algorithm.
    ///
    /// # Errors
    ///
    /// Returns an error for unsupported algorithm names.
    pub fn signing_algorithm(&self) -> Result<SigningAlgorithm, ConfigError> {
        SigningAlgorithm::parse(&self.algorithm).ok_or_else(|| {
            ConfigError::InvalidValue(format!(
                "Invalid signing algorithm: '{}'. Must be RS256, RS384, or ES384",
                self.algorithm
            ))
        })
    }
}

/// Token endpoint rate limits.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RateLimitingConfig {
    /// Enable rate limiting.
    pub enabled: bool,

    /// Token requests per minute per client IP.
    pub token_requests_per_ip_per_minute: u32,

    /// Token requests per minute per user.
    pub token_requests_per_user_per_minute: u32,
}

impl Default for RateLimitingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            token_requests_per_ip_per_minute: 120,
            token_requests_per_user_per_minute: 60,
        }
    }
}

/// Configuration validation errors.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigError {
    /// An invalid configuration value was provided.
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),

    /// A client registration is inconsistent.
    #[error("Invalid client: {0}")]
    InvalidClient(String),
}

impl From<ConfigError> for crate::error::AuthError {
    fn from(err: ConfigError) -> Self {
        crate::error::AuthError::configuration(err.to_string())
    }
}

impl AuthConfig {
    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns the first problem found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.issuer.is_empty() {
            return Err(ConfigError::InvalidValue(
                "issuer cannot be empty".to_string(),
            ));
        }
        url::Url::parse(&self.issuer)
            .map_err(|e| ConfigError::InvalidValue(format!("issuer is not a URL: {e}")))?;

        if self.app_id.is_empty() {
            return Err(ConfigError::InvalidValue(
                "app_id cannot be empty".to_string(),
            ));
        }

        self.signing.signing_algorithm()?;

        if self.oauth.authorization_code_lifetime.is_zero() {
            return Err(ConfigError::InvalidValue(
                "authorization_code_lifetime must be > 0".to_string(),
            ));
        }

        if self.lock.acquire_timeout.is_zero() || self.lock.lease.is_zero() {
            return Err(ConfigError::InvalidValue(
                "lock acquire_timeout and lease must be > 0".to_string(),
            ));
        }

        let mut seen = std::collections::HashSet::new();
        for client in &self.clients {
            client
                .validate()
                .map_err(|e| ConfigError::InvalidClient(e.to_string()))?;
            if !seen.insert(client.client_id.as_str()) {
                return Err(ConfigError::InvalidClient(format!(
                    "duplicate client_id '{}'",
                    client.client_id
                )));
            }
        }

        if self.rate_limiting.enabled
            && (self.rate_limiting.token_requests_per_ip_per_minute == 0
                || self.rate_limiting.token_requests_per_user_per_minute == 0)
        {
            return Err(ConfigError::InvalidValue(
                "rate limits must be > 0 when rate limiting is enabled".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = AuthConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.oauth.authorization_code_lifetime, Duration::from_secs(300));
        assert_eq!(config.oauth.whitelisted_grant_types.len(), GrantType::ALL.len());
    }

    #[test]
    fn test_empty_issuer_rejected() {
        let config = AuthConfig {
            issuer: String::new(),
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("issuer"));
    }

    #[test]
    fn test_invalid_algorithm_rejected() {
        let mut config = AuthConfig::default();
        config.signing.algorithm = "HS256".to_string();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("signing algorithm"));
    }

    #[test]
    fn test_duplicate_clients_rejected() {
        let mut config = AuthConfig::default();
        let client = ClientConfig::new("portal", vec!["https://p.example.com/cb".to_string()]);
        config.clients = vec![client.clone(), client];
        let err = config.validate().unwrap_err();
        assert!(matches!(err, ConfigError::InvalidClient(_)));
    }

    #[test]
    fn test_deserialize_humantime_and_grant_types() {
        let json = serde_json::json!({
            "issuer": "https://auth.example.com",
            "oauth": {
                "authorization_code_lifetime": "2m",
                "whitelisted_grant_types": ["refresh_token", "urn:keygate:params:oauth:grant-type:id-token"]
            },
            "lock": { "acquire_timeout": "750ms" }
        });
        let config: AuthConfig = serde_json::from_value(json).unwrap();
        assert_eq!(config.oauth.authorization_code_lifetime, Duration::from_secs(120));
        assert_eq!(
            config.oauth.whitelisted_grant_types,
            vec![GrantType::RefreshToken, GrantType::IdToken]
        );
        assert_eq!(config.lock.acquire_timeout, Duration::from_millis(750));
        assert_eq!(config.lock.lease, Duration::from_secs(10));
        assert_eq!(config.app_id, "keygate");
    }
}
