//! Token revocation endpoint handler (RFC 7009).
//!
//! ```text
//! POST /oauth2/revoke
//! Content-Type: application/x-www-form-urlencoded
//!
//! token=<token_to_revoke>&token_type_hint=refresh_token
//! ```
//!
//! Unknown, expired and malformed tokens are answered with 200 like valid
//! ones, so the endpoint does not reveal which tokens exist.

use axum::{
    Form,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Deserialize;

use crate::AuthResult;
use crate::error::AuthError;
use crate::services::AuthServices;
use crate::storage::AccessGrantStore;
use crate::token::decode_refresh_token;
use crate::types::Session;

/// Form parameters of the revocation endpoint.
#[derive(Debug, Deserialize)]
pub struct RevocationForm {
    /// The token to revoke.
    #[serde(default)]
    pub token: String,
    /// `refresh_token` or `access_token`.
    #[serde(default)]
    pub token_type_hint: Option<String>,
    /// Requesting client. Tokens of other clients are left alone.
    #[serde(default)]
    pub client_id: Option<String>,
}

/// Handler for `POST /oauth2/revoke`.
pub async fn revoke_handler(
    State(services): State<AuthServices>,
    Form(form): Form<RevocationForm>,
) -> Response {
    if form.token.is_empty() {
        return AuthError::invalid_request("token is required").into_response();
    }

    // Refresh tokens carry a grant ID, access tokens never do.
    let is_refresh_token = form.token_type_hint.as_deref() != Some("access_token")
        && decode_refresh_token(&form.token).is_ok();
    let result = if is_refresh_token {
        revoke_refresh_token(&services, &form).await
    } else {
        revoke_access_token(&services, &form.token).await
    };

    match result {
        Ok(()) => StatusCode::OK.into_response(),
        Err(e) if e.is_server_error() => e.into_response(),
        Err(e) => {
            tracing::debug!(error = %e, "ignoring unrevocable token");
            StatusCode::OK.into_response()
        }
    }
}

async fn revoke_refresh_token(services: &AuthServices, form: &RevocationForm) -> AuthResult<()> {
    let decoded = decode_refresh_token(&form.token)?;
    let grant = services
        .offline_grants
        .get_offline_grant(&decoded.grant_id)
        .await?;
    let token = grant
        .find_token(&decoded.token_hash())
        .ok_or(AuthError::GrantNotFound)?;
    if form
        .client_id
        .as_deref()
        .is_some_and(|client_id| client_id != token.client_id)
    {
        return Err(AuthError::GrantNotFound);
    }

    let session = grant
        .to_session_by_initial_hash(&token.token_hash)
        .ok_or(AuthError::GrantNotFound)?;
    services
        .sessions
        .revoke(&Session::OfflineGrant(Box::new(session)), false)
        .await?;
    tracing::info!(grant_id = %grant.id, "offline grant revoked");
    Ok(())
}

async fn revoke_access_token(services: &AuthServices, token: &str) -> AuthResult<()> {
    let token_hash = services.access_tokens.decode_access_token_hash(token)?;
    let Some(grant) = services
        .stores
        .access_grants
        .get_access_grant(&token_hash)
        .await?
    else {
        return Ok(());
    };
    services.stores.access_grants.delete_access_grant(&grant).await?;
    tracing::info!(session_id = %grant.session_id, "access token revoked");
    Ok(())
}
