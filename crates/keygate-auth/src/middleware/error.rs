//! OAuth 2.0 error responses.
//!
//! Every [`AuthError`] renders as the RFC 6749 error body:
//!
//! ```json
//! { "error": "invalid_grant", "error_description": "invalid refresh token" }
//! ```

use axum::{
    Json,
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};

use crate::error::AuthError;

/// RFC 6749 error body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OAuthErrorBody {
    /// Error code.
    pub error: String,
    /// Human readable description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_description: Option<String>,
}

impl From<&AuthError> for OAuthErrorBody {
    fn from(err: &AuthError) -> Self {
        Self {
            error: err.oauth_error_code().to_string(),
            error_description: Some(err.description()),
        }
    }
}

// =============================================================================
// IntoResponse Implementation
// =============================================================================

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        if self.is_server_error() {
            tracing::error!(error = %self, "request failed");
        } else {
            tracing::debug!(error = %self, "request rejected");
        }

        let status = self.status_code();
        let mut headers = no_store_headers();
        if status == StatusCode::UNAUTHORIZED {
            let value = format!(
                "Basic realm=\"keygate\", error=\"{}\"",
                self.oauth_error_code()
            );
            if let Ok(value) = HeaderValue::from_str(&value) {
                headers.insert(header::WWW_AUTHENTICATE, value);
            }
        }

        (status, headers, Json(OAuthErrorBody::from(&self))).into_response()
    }
}

/// `401` for a resource request whose bearer token does not resolve.
///
/// A request without any token gets a bare `Bearer` challenge.
#[must_use]
pub fn invalid_token_response(token_present: bool) -> Response {
    let mut headers = HeaderMap::new();
    let challenge = if token_present {
        "Bearer error=\"invalid_token\""
    } else {
        "Bearer"
    };
    headers.insert(header::WWW_AUTHENTICATE, HeaderValue::from_static(challenge));

    let body = OAuthErrorBody {
        error: "invalid_token".to_string(),
        error_description: token_present.then(|| "invalid access token".to_string()),
    };
    (StatusCode::UNAUTHORIZED, headers, Json(body)).into_response()
}

/// `Cache-Control: no-store` and `Pragma: no-cache`.
#[must_use]
pub fn no_store_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    headers.insert(header::PRAGMA, HeaderValue::from_static("no-cache"));
    headers
}
