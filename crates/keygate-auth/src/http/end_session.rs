//! RP-initiated logout.
//!
//! The session is the one named by the `sid` of `id_token_hint`, or the
//! current IDP session cookie when no hint is given.

use axum::{
    Form,
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Redirect, Response},
};
use axum_extra::extract::{CookieJar, cookie::Cookie};
use serde::Deserialize;
use url::Url;

use crate::AuthResult;
use crate::error::AuthError;
use crate::services::AuthServices;
use crate::types::{ClientResolver, Session, SessionRef};

use super::authorize::current_idp_session;

/// End session request parameters.
#[derive(Debug, Default, Deserialize)]
pub struct EndSessionRequest {
    /// ID token previously issued to the client.
    #[serde(default)]
    pub id_token_hint: Option<String>,
    /// Where to send the user agent afterwards.
    #[serde(default)]
    pub post_logout_redirect_uri: Option<String>,
    /// Echoed to the post logout redirect URI.
    #[serde(default)]
    pub state: Option<String>,
    /// Client, when no hint is given.
    #[serde(default)]
    pub client_id: Option<String>,
}

/// Handler for `GET /oauth2/end_session`.
pub async fn end_session_get_handler(
    State(services): State<AuthServices>,
    jar: CookieJar,
    Query(request): Query<EndSessionRequest>,
) -> Response {
    end_session(&services, jar, request).await
}

/// Handler for `POST /oauth2/end_session`.
pub async fn end_session_post_handler(
    State(services): State<AuthServices>,
    jar: CookieJar,
    Form(request): Form<EndSessionRequest>,
) -> Response {
    end_session(&services, jar, request).await
}

async fn end_session(services: &AuthServices, jar: CookieJar, request: EndSessionRequest) -> Response {
    let (session, client_id) = match resolve_session(services, &jar, &request).await {
        Ok(resolved) => resolved,
        Err(e) => return e.into_response(),
    };

    let mut jar = jar;
    if let Some(session) = session {
        match services.sessions.logout(&session).await {
            Ok(outcome) => {
                if outcome.clear_session_cookie {
                    let cookie_name = services.config.oauth.session_cookie_name.clone();
                    jar = jar.remove(Cookie::build(cookie_name).path("/"));
                }
            }
            Err(e) => return e.into_response(),
        }
    }

    match post_logout_redirect(services, client_id.as_deref(), &request) {
        Some(url) => (jar, Redirect::to(url.as_str())).into_response(),
        None => (jar, StatusCode::OK).into_response(),
    }
}

/// Returns the session to end, if any, and the client the request speaks
/// for.
async fn resolve_session(
    services: &AuthServices,
    jar: &CookieJar,
    request: &EndSessionRequest,
) -> AuthResult<(Option<Session>, Option<String>)> {
    let Some(hint) = request.id_token_hint.as_deref() else {
        let session = current_idp_session(services, jar).await.map(Session::Idp);
        return Ok((session, request.client_id.clone()));
    };

    let claims = services.id_tokens.verify_id_token_hint(hint)?;
    let Some(session_ref) = claims.sid.as_deref().and_then(SessionRef::decode_sid) else {
        return Ok((None, Some(claims.aud)));
    };

    let session = match services.sessions.get(&claims.sub, &session_ref.id).await {
        Ok(session) => Some(session),
        Err(AuthError::InvalidSession) => None,
        Err(e) => return Err(e),
    };
    Ok((session, Some(claims.aud)))
}

fn post_logout_redirect(
    services: &AuthServices,
    client_id: Option<&str>,
    request: &EndSessionRequest,
) -> Option<Url> {
    let uri = request.post_logout_redirect_uri.as_deref()?;
    let client = services.clients.resolve_client(client_id?)?;
    if !client.is_post_logout_redirect_uri_allowed(uri) {
        tracing::info!(client_id = %client.client_id, "post logout redirect URI not allowed");
        return None;
    }

    let mut url = Url::parse(uri).ok()?;
    if let Some(state) = &request.state {
        url.query_pairs_mut().append_pair("state", state);
    }
    Some(url)
}
