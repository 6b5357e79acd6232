//! App session token endpoint handler.
//!
//! ```text
//! POST /oauth2/app_session_token
//! Content-Type: application/json
//!
//! { "refresh_token": "<grantID>.<secret>" }
//! ```

use axum::{
    Json,
    extract::State,
    http::HeaderMap,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::middleware::{ClientMeta, no_store_headers};
use crate::services::AuthServices;

use super::APP_SESSION_TOKEN_PATH;
use super::token::token_request_context;

/// App session token request body.
#[derive(Debug, Deserialize)]
pub struct AppSessionTokenRequest {
    /// Refresh token of a full-access client.
    pub refresh_token: String,
}

/// A minted app session token.
#[derive(Debug, Serialize, Deserialize)]
pub struct AppSessionTokenResponse {
    /// The app session token.
    pub app_session_token: String,
    /// Expiry.
    #[serde(with = "time::serde::rfc3339")]
    pub expire_at: OffsetDateTime,
}

/// Handler for `POST /oauth2/app_session_token`.
pub async fn app_session_token_handler(
    State(services): State<AuthServices>,
    ClientMeta(meta): ClientMeta,
    headers: HeaderMap,
    Json(request): Json<AppSessionTokenRequest>,
) -> Response {
    let result = async {
        let ctx =
            token_request_context(&services, &headers, "POST", APP_SESSION_TOKEN_PATH, meta)
                .await?;
        services
            .app_sessions
            .issue_app_session_token(&request.refresh_token, &ctx)
            .await
    }
    .await;

    match result {
        Ok((token, record)) => (
            no_store_headers(),
            Json(AppSessionTokenResponse {
                app_session_token: token,
                expire_at: record.expire_at,
            }),
        )
            .into_response(),
        Err(e) => e.into_response(),
    }
}
