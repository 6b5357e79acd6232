//! Challenge endpoint handler.

use axum::{Json, extract::State, response::{IntoResponse, Response}};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::middleware::no_store_headers;
use crate::services::AuthServices;
use crate::types::ChallengePurpose;

/// Challenge request body.
#[derive(Debug, Deserialize)]
pub struct ChallengeRequest {
    /// What the challenge will be signed for.
    pub purpose: ChallengePurpose,
}

/// A freshly created challenge.
#[derive(Debug, Serialize, Deserialize)]
pub struct ChallengeResponse {
    /// The challenge value.
    pub token: String,
    /// Expiry.
    #[serde(with = "time::serde::rfc3339")]
    pub expire_at: OffsetDateTime,
}

/// Handler for `POST /oauth2/challenge`.
pub async fn challenge_handler(
    State(services): State<AuthServices>,
    Json(request): Json<ChallengeRequest>,
) -> Response {
    match services.challenges.create(request.purpose).await {
        Ok(challenge) => (
            no_store_headers(),
            Json(ChallengeResponse {
                token: challenge.token,
                expire_at: challenge.expire_at,
            }),
        )
            .into_response(),
        Err(e) => e.into_response(),
    }
}
