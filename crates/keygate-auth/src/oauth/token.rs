//! Token endpoint request and response types.
//!
//! # Grant Types
//!
//! - `authorization_code` - exchange a code for tokens
//! - `refresh_token` - refresh an access token, optionally rotating
//! - `urn:keygate:params:oauth:grant-type:anonymous-request` - key-bound anonymous user
//! - `urn:keygate:params:oauth:grant-type:biometric-request` - enrolled biometric key
//! - `urn:keygate:params:oauth:grant-type:id-token` - fresh ID token for a live session
//! - `urn:keygate:params:oauth:grant-type:settings-action` - settings action completion

use serde::{Deserialize, Serialize};

use crate::oauth::dpop::DpopProof;
use crate::oauth::token_service::IssuedAccessToken;
use crate::types::{RequestMeta, Session};

/// Token request parameters (form encoded).
///
/// Which fields are required depends on `grant_type`:
///
/// - `authorization_code`: code, redirect_uri, code_verifier (public clients)
/// - `refresh_token`: refresh_token
/// - anonymous and biometric requests: jwt
/// - settings action: code, redirect_uri, code_verifier (public clients)
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TokenRequest {
    /// OAuth 2.0 grant type.
    #[serde(default)]
    pub grant_type: String,

    /// Authorization or settings action code.
    #[serde(default)]
    pub code: Option<String>,

    /// Redirect URI the code was delivered to.
    #[serde(default)]
    pub redirect_uri: Option<String>,

    /// Client ID, unless sent through HTTP Basic.
    #[serde(default)]
    pub client_id: Option<String>,

    /// Client secret, unless sent through HTTP Basic.
    #[serde(default)]
    pub client_secret: Option<String>,

    /// PKCE code verifier.
    #[serde(default)]
    pub code_verifier: Option<String>,

    /// Refresh token.
    #[serde(default)]
    pub refresh_token: Option<String>,

    /// Device assertion.
    #[serde(default)]
    pub jwt: Option<String>,

    /// JSON device info reported by native clients.
    #[serde(default)]
    pub x_device_info: Option<String>,
}

/// Client credentials taken from an `Authorization: Basic` header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientCredentials {
    /// Client ID.
    pub client_id: String,
    /// Client secret.
    pub client_secret: String,
}

/// Everything about a token request besides its form body.
#[derive(Debug, Clone, Default)]
pub struct TokenRequestContext {
    /// HTTP Basic client credentials.
    pub basic_credentials: Option<ClientCredentials>,
    /// Validated DPoP proof.
    pub dpop_proof: Option<DpopProof>,
    /// Remote address and user agent.
    pub meta: RequestMeta,
    /// Session of the bearer token sent with the request.
    pub session: Option<Session>,
}

impl TokenRequestContext {
    /// Thumbprint of the DPoP key, if a proof was presented.
    #[must_use]
    pub fn dpop_jkt(&self) -> Option<String> {
        self.dpop_proof.as_ref().map(|proof| proof.jkt.clone())
    }
}

/// Successful token response.
///
/// ```json
/// {
///   "access_token": "3kPp...",
///   "token_type": "Bearer",
///   "expires_in": 1800,
///   "scope": "openid offline_access",
///   "refresh_token": "0b8f...-4e1a.Xq1...",
///   "id_token": "eyJhbG..."
/// }
/// ```
///
/// The ID token grant only carries `id_token`; the settings action grant
/// returns an empty object.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenResponse {
    /// The access token.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,

    /// `Bearer`, or `DPoP` for a bound token.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_type: Option<String>,

    /// Access token lifetime in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_in: Option<u64>,

    /// Granted scopes (space-separated).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,

    /// Refresh token.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,

    /// ID token.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id_token: Option<String>,
}

impl TokenResponse {
    /// Fills the access token fields.
    #[must_use]
    pub fn with_access_token(mut self, issued: &IssuedAccessToken) -> Self {
        let token_type = if issued.grant.dpop_jkt.is_some() {
            "DPoP"
        } else {
            "Bearer"
        };
        self.access_token = Some(issued.token.clone());
        self.token_type = Some(token_type.to_string());
        self.expires_in = Some(issued.expires_in);
        self.scope = Some(issued.grant.scopes.join(" "));
        self
    }

    /// Sets the refresh token.
    #[must_use]
    pub fn with_refresh_token(mut self, token: String) -> Self {
        self.refresh_token = Some(token);
        self
    }

    /// Sets the ID token.
    #[must_use]
    pub fn with_id_token(mut self, token: String) -> Self {
        self.id_token = Some(token);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_response_serializes_to_empty_object() {
        let json = serde_json::to_string(&TokenResponse::default()).unwrap();
        assert_eq!(json, "{}");
    }

    #[test]
    fn test_id_token_only_response() {
        let response = TokenResponse::default().with_id_token("eyJ".to_string());
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json, serde_json::json!({"id_token": "eyJ"}));
    }

    #[test]
    fn test_dpop_jkt_from_context() {
        let ctx = TokenRequestContext::default();
        assert!(ctx.dpop_jkt().is_none());
    }
}
