//! OAuth 2.0 client configuration types.
//!
//! Clients are immutable configuration data: they are loaded once, wrapped
//! in `Arc` and handed to the handlers through a [`ClientResolver`].

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::token::codec::constant_time_eq;

/// Scope granting first-party clients unrestricted access to the user.
pub const FULL_ACCESS_SCOPE: &str = "https://keygate.dev/scopes/full-access";

/// The OpenID Connect scope.
pub const OPENID_SCOPE: &str = "openid";

/// The scope requesting a refresh token.
pub const OFFLINE_ACCESS_SCOPE: &str = "offline_access";

// =============================================================================
// Grant Type
// =============================================================================

/// Grant types understood by the token endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GrantType {
    /// Authorization Code flow.
    #[serde(rename = "authorization_code")]
    AuthorizationCode,
    /// Refresh Token flow.
    #[serde(rename = "refresh_token")]
    RefreshToken,
    /// Key-bound anonymous user request.
    #[serde(rename = "urn:keygate:params:oauth:grant-type:anonymous-request")]
    AnonymousRequest,
    /// Biometric authentication request.
    #[serde(rename = "urn:keygate:params:oauth:grant-type:biometric-request")]
    BiometricRequest,
    /// ID token refresh for an existing session.
    #[serde(rename = "urn:keygate:params:oauth:grant-type:id-token")]
    IdToken,
    /// Settings action completion.
    #[serde(rename = "urn:keygate:params:oauth:grant-type:settings-action")]
    SettingsAction,
    /// RFC 8693 token exchange.
    #[serde(rename = "urn:ietf:params:oauth:grant-type:token-exchange")]
    TokenExchange,
}

impl GrantType {
    /// Every grant type in a stable order.
    pub const ALL: [GrantType; 7] = [
        GrantType::AuthorizationCode,
        GrantType::RefreshToken,
        GrantType::AnonymousRequest,
        GrantType::BiometricRequest,
        GrantType::IdToken,
        GrantType::SettingsAction,
        GrantType::TokenExchange,
    ];

    /// Returns the `grant_type` parameter value.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AuthorizationCode => "authorization_code",
            Self::RefreshToken => "refresh_token",
            Self::AnonymousRequest => "urn:keygate:params:oauth:grant-type:anonymous-request",
            Self::BiometricRequest => "urn:keygate:params:oauth:grant-type:biometric-request",
            Self::IdToken => "urn:keygate:params:oauth:grant-type:id-token",
            Self::SettingsAction => "urn:keygate:params:oauth:grant-type:settings-action",
            Self::TokenExchange => "urn:ietf:params:oauth:grant-type:token-exchange",
        }
    }

    /// Parses a `grant_type` parameter value.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|g| g.as_str() == value)
    }
}

impl std::fmt::Display for GrantType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// =============================================================================
// Response Type
// =============================================================================

/// Response types accepted by the authorization endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseType {
    /// Authorization code response.
    Code,
    /// No artifact, the request only refreshes consent/session state.
    None,
}

impl ResponseType {
    /// Returns the `response_type` parameter value.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Code => "code",
            Self::None => "none",
        }
    }

    /// Parses a `response_type` parameter value.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "code" => Some(Self::Code),
            "none" => Some(Self::None),
            _ => None,
        }
    }
}

// =============================================================================
// Client Type
// =============================================================================

/// Kind of application behind a client registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ClientType {
    /// First-party single page application.
    #[default]
    Spa,
    /// First-party native application.
    Native,
    /// First-party server rendered web application.
    TraditionalWebapp,
    /// First-party confidential application.
    Confidential,
    /// Third-party confidential application.
    ThirdPartyApp,
}

// =============================================================================
// Client
// =============================================================================

/// OAuth 2.0 client registration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Unique client identifier.
    pub client_id: String,

    /// Human-readable name.
    #[serde(default)]
    pub name: String,

    /// Application kind.
    #[serde(default)]
    pub client_type: ClientType,

    /// Allowed redirect URIs, matched exactly.
    #[serde(default)]
    pub redirect_uris: Vec<String>,

    /// Allowed post-logout redirect URIs.
    #[serde(default)]
    pub post_logout_redirect_uris: Vec<String>,

    /// Declared grant types. The server whitelist is always added on top.
    #[serde(default = "default_grant_types")]
    pub grant_types: Vec<GrantType>,

    /// Allowed response types.
    #[serde(default = "default_response_types")]
    pub response_types: Vec<ResponseType>,

    /// Scope allow-list. Empty allows every scope.
    #[serde(default)]
    pub allowed_scopes: Vec<String>,

    /// Client secret material for confidential clients.
    #[serde(default)]
    pub client_secrets: Vec<String>,

    /// Access token lifetime.
    #[serde(default = "default_access_token_lifetime", with = "humantime_serde")]
    pub access_token_lifetime: Duration,

    /// Absolute refresh token (offline grant) lifetime.
    #[serde(default = "default_refresh_token_lifetime", with = "humantime_serde")]
    pub refresh_token_lifetime: Duration,

    /// Whether offline grants expire after a period of inactivity.
    #[serde(default = "default_true")]
    pub refresh_token_idle_timeout_enabled: bool,

    /// Inactivity period after which an offline grant expires.
    #[serde(default = "default_refresh_token_idle_timeout", with = "humantime_serde")]
    pub refresh_token_idle_timeout: Duration,

    /// Rotate refresh tokens at the refresh_token grant.
    #[serde(default)]
    pub refresh_token_rotation_enabled: bool,

    /// Issue signed JWT access tokens instead of opaque ones.
    #[serde(default)]
    pub issue_jwt_access_token: bool,

    /// Require a DPoP proof at the token endpoint.
    #[serde(default)]
    pub dpop_required: bool,

    /// Maximum concurrent offline grants per user. `1` revokes older ones,
    /// `0` is unlimited.
    #[serde(default)]
    pub max_concurrent_session: u32,
}

fn default_grant_types() -> Vec<GrantType> {
    vec![GrantType::AuthorizationCode, GrantType::RefreshToken]
}

fn default_response_types() -> Vec<ResponseType> {
    vec![ResponseType::Code]
}

fn default_access_token_lifetime() -> Duration {
    Duration::from_secs(30 * 60)
}

fn default_refresh_token_lifetime() -> Duration {
    Duration::from_secs(30 * 24 * 3600)
}

fn default_refresh_token_idle_timeout() -> Duration {
    Duration::from_secs(7 * 24 * 3600)
}

fn default_true() -> bool {
    true
}

impl ClientConfig {
    /// Creates a first-party SPA client with default lifetimes.
    #[must_use]
    pub fn new(client_id: impl Into<String>, redirect_uris: Vec<String>) -> Self {
        Self {
            client_id: client_id.into(),
            name: String::new(),
            client_type: ClientType::default(),
            redirect_uris,
            post_logout_redirect_uris: Vec::new(),
            grant_types: default_grant_types(),
            response_types: default_response_types(),
            allowed_scopes: Vec::new(),
            client_secrets: Vec::new(),
            access_token_lifetime: default_access_token_lifetime(),
            refresh_token_lifetime: default_refresh_token_lifetime(),
            refresh_token_idle_timeout_enabled: true,
            refresh_token_idle_timeout: default_refresh_token_idle_timeout(),
            refresh_token_rotation_enabled: false,
            issue_jwt_access_token: false,
            dpop_required: false,
            max_concurrent_session: 0,
        }
    }

    /// Validates the registration.
    ///
    /// # Errors
    ///
    /// Returns an error if the registration is inconsistent.
    pub fn validate(&self) -> Result<(), ClientValidationError> {
        if self.client_id.is_empty() {
            return Err(ClientValidationError::EmptyClientId);
        }

        if self.grant_types.contains(&GrantType::AuthorizationCode) && self.redirect_uris.is_empty()
        {
            return Err(ClientValidationError::NoRedirectUris(self.client_id.clone()));
        }

        for uri in &self.redirect_uris {
            url::Url::parse(uri)
                .map_err(|_| ClientValidationError::InvalidRedirectUri(uri.clone()))?;
        }

        if self.is_confidential() && self.client_secrets.is_empty() {
            return Err(ClientValidationError::MissingSecret(self.client_id.clone()));
        }

        if self.refresh_token_idle_timeout_enabled
            && self.refresh_token_idle_timeout > self.refresh_token_lifetime
        {
            return Err(ClientValidationError::IdleTimeoutExceedsLifetime(
                self.client_id.clone(),
            ));
        }

        Ok(())
    }

    /// Third-party apps are the only non first-party clients.
    #[must_use]
    pub fn is_first_party(&self) -> bool {
        self.client_type != ClientType::ThirdPartyApp
    }

    /// Confidential clients authenticate with a secret at the token endpoint.
    #[must_use]
    pub fn is_confidential(&self) -> bool {
        matches!(
            self.client_type,
            ClientType::Confidential | ClientType::ThirdPartyApp
        )
    }

    /// Public clients cannot keep a secret.
    #[must_use]
    pub fn is_public(&self) -> bool {
        !self.is_confidential()
    }

    /// First-party clients may hold the full-access scope.
    #[must_use]
    pub fn has_full_access_scope(&self) -> bool {
        self.is_first_party()
    }

    /// Returns the declared grant types plus the server whitelist.
    #[must_use]
    pub fn allowed_grant_types(&self, whitelist: &[GrantType]) -> Vec<GrantType> {
        let mut allowed = self.grant_types.clone();
        for grant_type in whitelist {
            if !allowed.contains(grant_type) {
                allowed.push(*grant_type);
            }
        }
        allowed
    }

    /// Checks a grant type against the declared set plus the whitelist.
    #[must_use]
    pub fn is_grant_type_allowed(&self, grant_type: GrantType, whitelist: &[GrantType]) -> bool {
        self.grant_types.contains(&grant_type) || whitelist.contains(&grant_type)
    }

    /// Whether the client itself declares the `refresh_token` grant.
    #[must_use]
    pub fn declares_refresh_token(&self) -> bool {
        self.grant_types.contains(&GrantType::RefreshToken)
    }

    /// Checks a response type against the allowed set.
    #[must_use]
    pub fn is_response_type_allowed(&self, response_type: ResponseType) -> bool {
        self.response_types.contains(&response_type)
    }

    /// Resolves the effective redirect URI of an authorization request.
    ///
    /// An omitted URI falls back to the sole registered one.
    #[must_use]
    pub fn resolve_redirect_uri(&self, requested: Option<&str>) -> Option<String> {
        match requested {
            Some(uri) if !uri.is_empty() => self
                .redirect_uris
                .iter()
                .find(|allowed| allowed.as_str() == uri)
                .cloned(),
            _ if self.redirect_uris.len() == 1 => self.redirect_uris.first().cloned(),
            _ => None,
        }
    }

    /// Checks a post-logout redirect URI, ignoring query parameters.
    #[must_use]
    pub fn is_post_logout_redirect_uri_allowed(&self, uri: &str) -> bool {
        let uri_without_query = uri.split('?').next().unwrap_or(uri);
        self.post_logout_redirect_uris.iter().any(|allowed| {
            let allowed_without_query = allowed.split('?').next().unwrap_or(allowed);
            allowed_without_query == uri_without_query
        })
    }

    /// Checks a presented secret against every configured secret in
    /// constant time.
    #[must_use]
    pub fn verify_client_secret(&self, presented: &str) -> bool {
        let mut matched = false;
        for secret in &self.client_secrets {
            matched |= constant_time_eq(secret, presented);
        }
        matched
    }

    /// Checks a scope against the allow-list.
    #[must_use]
    pub fn is_scope_allowed(&self, scope: &str) -> bool {
        if scope == FULL_ACCESS_SCOPE {
            return self.has_full_access_scope();
        }
        self.allowed_scopes.is_empty() || self.allowed_scopes.iter().any(|s| s == scope)
    }
}

// =============================================================================
// Client Resolver
// =============================================================================

/// Resolves client registrations by ID.
pub trait ClientResolver: Send + Sync {
    /// Returns the client, or `None` when it is unknown.
    fn resolve_client(&self, client_id: &str) -> Option<Arc<ClientConfig>>;
}

/// Resolver over a fixed set of registrations.
#[derive(Debug, Clone, Default)]
pub struct StaticClientResolver {
    clients: HashMap<String, Arc<ClientConfig>>,
}

impl StaticClientResolver {
    /// Creates a resolver from registrations.
    #[must_use]
    pub fn new(clients: impl IntoIterator<Item = ClientConfig>) -> Self {
        Self {
            clients: clients
                .into_iter()
                .map(|c| (c.client_id.clone(), Arc::new(c)))
                .collect(),
        }
    }
}

impl ClientResolver for StaticClientResolver {
    fn resolve_client(&self, client_id: &str) -> Option<Arc<ClientConfig>> {
        self.clients.get(client_id).cloned()
    }
}

// =============================================================================
// Validation Error
// =============================================================================

/// Errors that can occur during client validation.
#[derive(Debug, thiserror::Error)]
pub enum ClientValidationError {
    /// Client ID cannot be empty.
    #[error("Client ID cannot be empty")]
    EmptyClientId,

    /// Authorization code flow requires redirect URIs.
    #[error("Client '{0}' uses authorization_code but has no redirect URIs")]
    NoRedirectUris(String),

    /// A redirect URI is not an absolute URL.
    #[error("Invalid redirect URI: {0}")]
    InvalidRedirectUri(String),

    /// Confidential clients require a client secret.
    #[error("Confidential client '{0}' requires a client secret")]
    MissingSecret(String),

    /// The idle timeout cannot outlive the absolute lifetime.
    #[error("Client '{0}' has an idle timeout longer than its refresh token lifetime")]
    IdleTimeoutExceedsLifetime(String),
}

// =============================================================================
// Tests
// =============================================================================
