//! Authorization error types.
//!
//! Errors fall into three families:
//!
//! - **Protocol** errors carry a named OAuth 2.0 / OpenID Connect error code
//!   and are surfaced verbatim to the client.
//! - **Session** errors (grant not found, authorization not found, invalid
//!   session) mean the caller should treat the request as unauthenticated.
//! - **Infrastructure** errors (store unreachable, lock timeout, marshalling)
//!   are logged and surfaced as `server_error` without detail.

use std::fmt;

use axum::http::StatusCode;

/// Errors that can occur while authorizing requests and issuing tokens.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// The request is missing a parameter or is otherwise malformed.
    #[error("Invalid request: {message}")]
    InvalidRequest {
        /// Description of why the request is invalid.
        message: String,
    },

    /// The authorization code, refresh token or assertion is invalid.
    #[error("Invalid grant: {message}")]
    InvalidGrant {
        /// Description of why the grant is invalid.
        message: String,
    },

    /// Client authentication failed or the client is unknown.
    #[error("Invalid client: {message}")]
    InvalidClient {
        /// Description of why the client is invalid.
        message: String,
    },

    /// The client is not allowed to use this grant or response type.
    #[error("Unauthorized client: {message}")]
    UnauthorizedClient {
        /// Description of the restriction.
        message: String,
    },

    /// The grant type is not supported by this server.
    #[error("Unsupported grant type: {grant_type}")]
    UnsupportedGrantType {
        /// The unsupported grant type.
        grant_type: String,
    },

    /// The response type is not supported by this server.
    #[error("Unsupported response type: {response_type}")]
    UnsupportedResponseType {
        /// The unsupported response type.
        response_type: String,
    },

    /// The requested scope is invalid, unknown, or not allowed.
    #[error("Invalid scope: {message}")]
    InvalidScope {
        /// Description of why the scope is invalid.
        message: String,
    },

    /// `prompt=none` was requested but end-user authentication is needed.
    #[error("Login required: {message}")]
    LoginRequired {
        /// Description of why login is required.
        message: String,
    },

    /// The resource owner or the server denied the request.
    #[error("Access denied: {message}")]
    AccessDenied {
        /// Description of why access was denied.
        message: String,
    },

    /// The DPoP proof is missing, malformed, or bound to another key.
    #[error("Invalid DPoP proof: {message}")]
    InvalidDpopProof {
        /// Description of the proof failure.
        message: String,
    },

    /// A rate limit bucket is exhausted.
    #[error("Rate limited: {bucket}")]
    RateLimited {
        /// The exhausted bucket.
        bucket: String,
    },

    /// The referenced grant does not exist or has expired.
    #[error("Grant not found")]
    GrantNotFound,

    /// The authorization (consent) record does not exist.
    #[error("Authorization not found")]
    AuthorizationNotFound,

    /// Another authorization already exists for the user and client.
    #[error("Authorization already exists")]
    AuthorizationExists,

    /// The session behind a token is no longer valid.
    #[error("Invalid session")]
    InvalidSession,

    /// An error occurred while talking to the grant store.
    #[error("Storage error: {message}")]
    Storage {
        /// Description of the storage error.
        message: String,
    },

    /// A named grant mutex could not be acquired in time.
    #[error("Lock timeout: {name}")]
    LockTimeout {
        /// The mutex name.
        name: String,
    },

    /// A record could not be serialized or deserialized.
    #[error("Serialization error: {message}")]
    Serialization {
        /// Description of the serialization error.
        message: String,
    },

    /// The configuration is invalid.
    #[error("Configuration error: {message}")]
    Configuration {
        /// Description of the configuration error.
        message: String,
    },

    /// An unexpected internal error occurred.
    #[error("Internal error: {message}")]
    Internal {
        /// Description of the internal error.
        message: String,
    },
}

impl AuthError {
    /// Creates a new `InvalidRequest` error.
    #[must_use]
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest {
            message: message.into(),
        }
    }

    /// Creates a new `InvalidGrant` error.
    #[must_use]
    pub fn invalid_grant(message: impl Into<String>) -> Self {
        Self::InvalidGrant {
            message: message.into(),
        }
    }

    /// Creates a new `InvalidClient` error.
    #[must_use]
    pub fn invalid_client(message: impl Into<String>) -> Self {
        Self::InvalidClient {
            message: message.into(),
        }
    }

    /// Creates a new `UnauthorizedClient` error.
    #[must_use]
    pub fn unauthorized_client(message: impl Into<String>) -> Self {
        Self::UnauthorizedClient {
            message: message.into(),
        }
    }

    /// Creates a new `UnsupportedGrantType` error.
    #[must_use]
    pub fn unsupported_grant_type(grant_type: impl Into<String>) -> Self {
        Self::UnsupportedGrantType {
            grant_type: grant_type.into(),
        }
    }

    /// Creates a new `UnsupportedResponseType` error.
    #[must_use]
    pub fn unsupported_response_type(response_type: impl Into<String>) -> Self {
        Self::UnsupportedResponseType {
            response_type: response_type.into(),
        }
    }

    /// Creates a new `InvalidScope` error.
    #[must_use]
    pub fn invalid_scope(message: impl Into<String>) -> Self {
        Self::InvalidScope {
            message: message.into(),
        }
    }

    /// Creates a new `LoginRequired` error.
    #[must_use]
    pub fn login_required(message: impl Into<String>) -> Self {
        Self::LoginRequired {
            message: message.into(),
        }
    }

    /// Creates a new `AccessDenied` error.
    #[must_use]
    pub fn access_denied(message: impl Into<String>) -> Self {
        Self::AccessDenied {
            message: message.into(),
        }
    }

    /// Creates a new `InvalidDpopProof` error.
    #[must_use]
    pub fn invalid_dpop_proof(message: impl Into<String>) -> Self {
        Self::InvalidDpopProof {
            message: message.into(),
        }
    }

    /// Creates a new `RateLimited` error.
    #[must_use]
    pub fn rate_limited(bucket: impl Into<String>) -> Self {
        Self::RateLimited {
            bucket: bucket.into(),
        }
    }

    /// Creates a new `Storage` error.
    #[must_use]
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }

    /// Creates a new `LockTimeout` error.
    #[must_use]
    pub fn lock_timeout(name: impl Into<String>) -> Self {
        Self::LockTimeout { name: name.into() }
    }

    /// Creates a new `Serialization` error.
    #[must_use]
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization {
            message: message.into(),
        }
    }

    /// Creates a new `Configuration` error.
    #[must_use]
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Creates a new `Internal` error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns `true` for named OAuth / OIDC protocol errors.
    #[must_use]
    pub fn is_protocol_error(&self) -> bool {
        self.category() == ErrorCategory::Protocol
    }

    /// Returns `true` for errors that mean "treat as unauthenticated".
    #[must_use]
    pub fn is_session_error(&self) -> bool {
        self.category() == ErrorCategory::Session
    }

    /// Returns `true` for errors that must surface as `server_error`.
    #[must_use]
    pub fn is_server_error(&self) -> bool {
        self.category() == ErrorCategory::Infrastructure
    }

    /// Returns the error family.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::InvalidRequest { .. }
            | Self::InvalidGrant { .. }
            | Self::InvalidClient { .. }
            | Self::UnauthorizedClient { .. }
            | Self::UnsupportedGrantType { .. }
            | Self::UnsupportedResponseType { .. }
            | Self::InvalidScope { .. }
            | Self::LoginRequired { .. }
            | Self::AccessDenied { .. }
            | Self::InvalidDpopProof { .. }
            | Self::RateLimited { .. } => ErrorCategory::Protocol,
            Self::GrantNotFound | Self::AuthorizationNotFound | Self::InvalidSession => {
                ErrorCategory::Session
            }
            Self::Storage { .. }
            | Self::AuthorizationExists
            | Self::LockTimeout { .. }
            | Self::Serialization { .. }
            | Self::Configuration { .. }
            | Self::Internal { .. } => ErrorCategory::Infrastructure,
        }
    }

    /// Returns the OAuth 2.0 error code for this error.
    ///
    /// Session errors map to `invalid_grant`: a token endpoint caller only
    /// learns that the grant it presented is no longer usable.
    #[must_use]
    pub fn oauth_error_code(&self) -> &'static str {
        match self {
            Self::InvalidRequest { .. } => "invalid_request",
            Self::InvalidGrant { .. } => "invalid_grant",
            Self::InvalidClient { .. } => "invalid_client",
            Self::UnauthorizedClient { .. } => "unauthorized_client",
            Self::UnsupportedGrantType { .. } => "unsupported_grant_type",
            Self::UnsupportedResponseType { .. } => "unsupported_response_type",
            Self::InvalidScope { .. } => "invalid_scope",
            Self::LoginRequired { .. } => "login_required",
            Self::AccessDenied { .. } => "access_denied",
            Self::InvalidDpopProof { .. } => "invalid_dpop_proof",
            Self::RateLimited { .. } => "x_rate_limited",
            Self::GrantNotFound | Self::AuthorizationNotFound | Self::InvalidSession => {
                "invalid_grant"
            }
            Self::Storage { .. }
            | Self::AuthorizationExists
            | Self::LockTimeout { .. }
            | Self::Serialization { .. }
            | Self::Configuration { .. }
            | Self::Internal { .. } => "server_error",
        }
    }

    /// Returns the client-facing description for this error.
    ///
    /// Infrastructure details never leave the process.
    #[must_use]
    pub fn description(&self) -> String {
        match self {
            Self::InvalidRequest { message }
            | Self::InvalidGrant { message }
            | Self::InvalidClient { message }
            | Self::UnauthorizedClient { message }
            | Self::InvalidScope { message }
            | Self::LoginRequired { message }
            | Self::AccessDenied { message }
            | Self::InvalidDpopProof { message } => message.clone(),
            Self::UnsupportedGrantType { grant_type } => {
                format!("unsupported grant type: {grant_type}")
            }
            Self::UnsupportedResponseType { response_type } => {
                format!("unsupported response type: {response_type}")
            }
            Self::RateLimited { .. } => "rate limit exceeded, please try again later.".to_string(),
            Self::GrantNotFound => "invalid grant".to_string(),
            Self::AuthorizationNotFound => "invalid authorization".to_string(),
            Self::InvalidSession => "invalid session".to_string(),
            Self::Storage { .. }
            | Self::AuthorizationExists
            | Self::LockTimeout { .. }
            | Self::Serialization { .. }
            | Self::Configuration { .. }
            | Self::Internal { .. } => "internal server error".to_string(),
        }
    }

    /// Returns the HTTP status used when this error is rendered as JSON.
    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidClient { .. } => StatusCode::UNAUTHORIZED,
            Self::AccessDenied { .. } => StatusCode::FORBIDDEN,
            Self::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::Storage { .. }
            | Self::AuthorizationExists
            | Self::LockTimeout { .. }
            | Self::Serialization { .. }
            | Self::Configuration { .. }
            | Self::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::BAD_REQUEST,
        }
    }
}

impl From<serde_json::Error> for AuthError {
    fn from(err: serde_json::Error) -> Self {
        Self::serialization(err.to_string())
    }
}

/// Error families used for propagation decisions and logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Named OAuth / OIDC protocol errors.
    Protocol,
    /// Recoverable session and grant lookup misses.
    Session,
    /// Store, lock and marshalling failures.
    Infrastructure,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Protocol => write!(f, "protocol"),
            Self::Session => write!(f, "session"),
            Self::Infrastructure => write!(f, "infrastructure"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = AuthError::invalid_client("invalid client ID");
        assert_eq!(err.to_string(), "Invalid client: invalid client ID");

        let err = AuthError::invalid_grant("invalid authorization code");
        assert_eq!(err.to_string(), "Invalid grant: invalid authorization code");

        let err = AuthError::GrantNotFound;
        assert_eq!(err.to_string(), "Grant not found");

        let err = AuthError::lock_timeout("app:demo:offline-grant-mutex:g1");
        assert_eq!(err.to_string(), "Lock timeout: app:demo:offline-grant-mutex:g1");
    }

    #[test]
    fn test_error_predicates() {
        let err = AuthError::login_required("authentication required");
        assert!(err.is_protocol_error());
        assert!(!err.is_session_error());
        assert!(!err.is_server_error());

        let err = AuthError::InvalidSession;
        assert!(err.is_session_error());
        assert!(!err.is_server_error());

        let err = AuthError::storage("connection refused");
        assert!(err.is_server_error());
        assert!(!err.is_protocol_error());
    }

    #[test]
    fn test_error_category() {
        assert_eq!(
            AuthError::unauthorized_client("test").category(),
            ErrorCategory::Protocol
        );
        assert_eq!(
            AuthError::AuthorizationNotFound.category(),
            ErrorCategory::Session
        );
        assert_eq!(
            AuthError::serialization("test").category(),
            ErrorCategory::Infrastructure
        );
    }

    #[test]
    fn test_oauth_error_code() {
        assert_eq!(
            AuthError::invalid_request("test").oauth_error_code(),
            "invalid_request"
        );
        assert_eq!(
            AuthError::invalid_dpop_proof("test").oauth_error_code(),
            "invalid_dpop_proof"
        );
        assert_eq!(AuthError::GrantNotFound.oauth_error_code(), "invalid_grant");
        assert_eq!(
            AuthError::lock_timeout("m").oauth_error_code(),
            "server_error"
        );
        assert_eq!(
            AuthError::rate_limited("token:ip").oauth_error_code(),
            "x_rate_limited"
        );
    }

    #[test]
    fn test_description_hides_infrastructure_detail() {
        let err = AuthError::storage("redis://10.0.0.1 refused");
        assert_eq!(err.description(), "internal server error");

        let err = AuthError::invalid_grant("invalid refresh token");
        assert_eq!(err.description(), "invalid refresh token");
    }

    #[test]
    fn test_status_code() {
        assert_eq!(
            AuthError::invalid_client("x").status_code(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            AuthError::rate_limited("x").status_code(),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(
            AuthError::internal("x").status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            AuthError::invalid_grant("x").status_code(),
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn test_error_category_display() {
        assert_eq!(ErrorCategory::Protocol.to_string(), "protocol");
        assert_eq!(ErrorCategory::Session.to_string(), "session");
        assert_eq!(ErrorCategory::Infrastructure.to_string(), "infrastructure");
    }
}
