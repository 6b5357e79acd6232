//! Token endpoint handler.
//!
//! ```text
//! POST /oauth2/token
//! Content-Type: application/x-www-form-urlencoded
//! DPoP: eyJ0eXAiOiJkcG9wK2p3dCIs...
//!
//! grant_type=authorization_code
//! &code=SplxlOBeZQQYbYS6WxSbIA
//! &redirect_uri=https://app.example.com/callback
//! &code_verifier=dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk
//! &client_id=my-app
//! ```

use axum::{
    Form, Json,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};

use crate::AuthResult;
use crate::middleware::{ClientMeta, basic_credentials, dpop_proof, no_store_headers};
use crate::oauth::{TokenRequest, TokenRequestContext};
use crate::services::AuthServices;

use super::TOKEN_PATH;

/// Handler for `POST /oauth2/token`.
pub async fn token_handler(
    State(services): State<AuthServices>,
    ClientMeta(meta): ClientMeta,
    headers: HeaderMap,
    Form(request): Form<TokenRequest>,
) -> Response {
    let grant_type = request.grant_type.clone();
    let result = async {
        let ctx = token_request_context(&services, &headers, "POST", TOKEN_PATH, meta).await?;
        services.tokens.handle(request, ctx).await
    }
    .await;

    match result {
        Ok(response) => {
            tracing::info!(grant_type = %grant_type, "token issued");
            (StatusCode::OK, no_store_headers(), Json(response)).into_response()
        }
        Err(e) => {
            tracing::info!(grant_type = %grant_type, error = %e, "token request failed");
            e.into_response()
        }
    }
}

/// Collects client credentials, the DPoP proof and the bearer session of a
/// request. The DPoP proof is validated once and shared with the bearer
/// token lookup.
pub(crate) async fn token_request_context(
    services: &AuthServices,
    headers: &HeaderMap,
    method: &str,
    path: &str,
    meta: crate::types::RequestMeta,
) -> AuthResult<TokenRequestContext> {
    let basic_credentials = basic_credentials(headers)?;
    let dpop_proof = dpop_proof(services, headers, method, path)?;

    let session = match services
        .resolver
        .resolve(headers, dpop_proof.as_ref(), &meta)
        .await
    {
        Ok(session) => session,
        Err(e) if e.is_server_error() => return Err(e),
        Err(_) => None,
    };

    Ok(TokenRequestContext {
        basic_credentials,
        dpop_proof,
        meta,
        session,
    })
}
