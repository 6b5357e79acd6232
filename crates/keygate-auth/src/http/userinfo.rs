//! UserInfo endpoint handler.

use axum::Json;
use serde::{Deserialize, Serialize};

use crate::middleware::BearerAuth;

/// Claims returned by the userinfo endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserInfo {
    /// Subject.
    pub sub: String,
    /// Authentication methods of the session.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub amr: Vec<String>,
    /// Authentication time (Unix timestamp).
    pub auth_time: i64,
}

/// Handler for `GET /oauth2/userinfo`.
pub async fn userinfo_handler(BearerAuth(session): BearerAuth) -> Json<UserInfo> {
    let info = session.authentication_info();
    Json(UserInfo {
        sub: info.user_id,
        amr: info.amr,
        auth_time: info.authenticated_at.unix_timestamp(),
    })
}
