//! Final redirect of an authorization response.
//!
//! Pages that finish an authorization outside the authorize handler (the
//! login UI, app-to-app flows) hand the response parameters to this
//! endpoint, which re-validates the redirect URI against the client before
//! sending the user agent there.

use axum::{
    extract::{Query, State},
    response::{IntoResponse, Redirect, Response},
};
use serde::Deserialize;
use url::Url;

use crate::error::AuthError;
use crate::services::AuthServices;
use crate::types::ClientResolver;

/// Query parameters of `GET /oauth2/redirect`.
#[derive(Debug, Default, Deserialize)]
pub struct RedirectQuery {
    /// Client the response is for.
    #[serde(default)]
    pub client_id: String,
    /// Where to send the user agent.
    #[serde(default)]
    pub redirect_uri: String,
    /// Authorization code.
    #[serde(default)]
    pub code: Option<String>,
    /// Echoed state.
    #[serde(default)]
    pub state: Option<String>,
    /// Error code.
    #[serde(default)]
    pub error: Option<String>,
    /// Error description.
    #[serde(default)]
    pub error_description: Option<String>,
}

/// Handler for `GET /oauth2/redirect`.
pub async fn redirect_handler(
    State(services): State<AuthServices>,
    Query(query): Query<RedirectQuery>,
) -> Response {
    match build_redirect(&services, &query) {
        Ok(url) => Redirect::to(url.as_str()).into_response(),
        Err(e) => e.into_response(),
    }
}

fn build_redirect(services: &AuthServices, query: &RedirectQuery) -> Result<Url, AuthError> {
    let client = services
        .clients
        .resolve_client(&query.client_id)
        .ok_or_else(|| AuthError::unauthorized_client("invalid client ID"))?;
    let redirect_uri = client
        .resolve_redirect_uri(Some(&query.redirect_uri))
        .ok_or_else(|| AuthError::invalid_request("redirect URI is not allowed"))?;

    let mut url = Url::parse(&redirect_uri)
        .map_err(|_| AuthError::invalid_request("redirect URI is not allowed"))?;
    {
        let mut pairs = url.query_pairs_mut();
        let params = [
            ("code", &query.code),
            ("state", &query.state),
            ("error", &query.error),
            ("error_description", &query.error_description),
        ];
        for (name, value) in params {
            if let Some(value) = value {
                pairs.append_pair(name, value);
            }
        }
    }
    Ok(url)
}
