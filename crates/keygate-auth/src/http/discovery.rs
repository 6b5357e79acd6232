//! Discovery documents and the JWKS.
//!
//! `/.well-known/openid-configuration` and
//! `/.well-known/oauth-authorization-server` share one metadata builder; the
//! OpenID document adds the OIDC-only fields.

use axum::{
    Json,
    extract::State,
    http::header,
    response::IntoResponse,
};
use serde::{Deserialize, Serialize};

use crate::config::AuthConfig;
use crate::services::AuthServices;
use crate::token::Jwks;

use super::{
    AUTHORIZE_PATH, END_SESSION_PATH, JWKS_PATH, REVOKE_PATH, TOKEN_PATH, USERINFO_PATH,
};

/// Authorization server metadata (RFC 8414), optionally with the OpenID
/// Connect Discovery fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderMetadata {
    /// Issuer URL.
    pub issuer: String,
    /// Authorization endpoint.
    pub authorization_endpoint: String,
    /// Token endpoint.
    pub token_endpoint: String,
    /// Revocation endpoint.
    pub revocation_endpoint: String,
    /// JWKS URL.
    pub jwks_uri: String,
    /// Supported grant types.
    pub grant_types_supported: Vec<String>,
    /// Supported response types.
    pub response_types_supported: Vec<String>,
    /// Supported response modes.
    pub response_modes_supported: Vec<String>,
    /// Supported PKCE methods.
    pub code_challenge_methods_supported: Vec<String>,
    /// Supported client authentication methods.
    pub token_endpoint_auth_methods_supported: Vec<String>,
    /// DPoP proof algorithms accepted.
    pub dpop_signing_alg_values_supported: Vec<String>,
    /// Userinfo endpoint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub userinfo_endpoint: Option<String>,
    /// End session endpoint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_session_endpoint: Option<String>,
    /// Subject identifier types.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub subject_types_supported: Vec<String>,
    /// ID token signing algorithms.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub id_token_signing_alg_values_supported: Vec<String>,
    /// Supported claims.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub claims_supported: Vec<String>,
    /// Supported scopes.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub scopes_supported: Vec<String>,
}

fn strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|s| (*s).to_string()).collect()
}

/// Builds the metadata document for `config`. `openid` adds the OpenID
/// Connect fields.
#[must_use]
pub fn populate_metadata(config: &AuthConfig, id_token_alg: &str, openid: bool) -> ProviderMetadata {
    let base = config.issuer.trim_end_matches('/');
    let endpoint = |path: &str| format!("{base}{path}");

    let mut metadata = ProviderMetadata {
        issuer: base.to_string(),
        authorization_endpoint: endpoint(AUTHORIZE_PATH),
        token_endpoint: endpoint(TOKEN_PATH),
        revocation_endpoint: endpoint(REVOKE_PATH),
        jwks_uri: endpoint(JWKS_PATH),
        grant_types_supported: config
            .oauth
            .whitelisted_grant_types
            .iter()
            .map(|g| g.as_str().to_string())
            .collect(),
        response_types_supported: strings(&["code", "none"]),
        response_modes_supported: strings(&["query"]),
        code_challenge_methods_supported: strings(&["S256"]),
        token_endpoint_auth_methods_supported: strings(&[
            "client_secret_basic",
            "client_secret_post",
            "none",
        ]),
        dpop_signing_alg_values_supported: strings(&["ES256", "ES384", "RS256"]),
        userinfo_endpoint: None,
        end_session_endpoint: None,
        subject_types_supported: Vec::new(),
        id_token_signing_alg_values_supported: Vec::new(),
        claims_supported: Vec::new(),
        scopes_supported: Vec::new(),
    };

    if openid {
        metadata.userinfo_endpoint = Some(endpoint(USERINFO_PATH));
        metadata.end_session_endpoint = Some(endpoint(END_SESSION_PATH));
        metadata.subject_types_supported = strings(&["public"]);
        metadata.id_token_signing_alg_values_supported = vec![id_token_alg.to_string()];
        metadata.claims_supported = strings(&[
            "sub", "iss", "aud", "exp", "iat", "auth_time", "sid", "amr", "nonce",
        ]);
        metadata.scopes_supported = strings(&["openid", "offline_access"]);
    }
    metadata
}

/// Handler for `GET /.well-known/openid-configuration`.
pub async fn openid_configuration_handler(
    State(services): State<AuthServices>,
) -> Json<ProviderMetadata> {
    let alg = services.jwt.algorithm();
    Json(populate_metadata(&services.config, alg.as_str(), true))
}

/// Handler for `GET /.well-known/oauth-authorization-server`.
pub async fn authorization_server_metadata_handler(
    State(services): State<AuthServices>,
) -> Json<ProviderMetadata> {
    let alg = services.jwt.algorithm();
    Json(populate_metadata(&services.config, alg.as_str(), false))
}

/// Handler for `GET /oauth2/jwks`. Cacheable for an hour.
pub async fn jwks_handler(State(services): State<AuthServices>) -> impl IntoResponse {
    let jwks: Jwks = services.jwt.jwks();
    ([(header::CACHE_CONTROL, "public, max-age=3600")], Json(jwks))
}
