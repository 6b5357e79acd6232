//! Authorization endpoint handlers.
//!
//! The current IDP session is read from the session cookie. Responses are
//! always redirects, except for failures that happen before the client's
//! redirect URI is known, which render as a JSON error.

use axum::{
    Form,
    extract::{Query, State},
    response::{IntoResponse, Redirect, Response},
};
use axum_extra::extract::CookieJar;
use time::OffsetDateTime;

use crate::error::AuthError;
use crate::oauth::{AuthorizationContext, AuthorizationOutcome, AuthorizationRequest};
use crate::services::AuthServices;
use crate::storage::IdpSessionStore;
use crate::types::IdpSession;

/// Handler for `GET /oauth2/authorize`.
pub async fn authorize_get_handler(
    State(services): State<AuthServices>,
    jar: CookieJar,
    Query(request): Query<AuthorizationRequest>,
) -> Response {
    authorize(&services, &jar, request).await
}

/// Handler for `POST /oauth2/authorize`.
pub async fn authorize_post_handler(
    State(services): State<AuthServices>,
    jar: CookieJar,
    Form(request): Form<AuthorizationRequest>,
) -> Response {
    authorize(&services, &jar, request).await
}

async fn authorize(services: &AuthServices, jar: &CookieJar, request: AuthorizationRequest) -> Response {
    tracing::debug!(
        client_id = %request.client_id,
        response_type = %request.response_type,
        "authorization request"
    );

    let ctx = AuthorizationContext {
        session: current_idp_session(services, jar).await,
    };

    match services.authorize.handle(&request, &ctx).await {
        AuthorizationOutcome::Respond {
            redirect_uri,
            response,
        } => match response.to_redirect_url(&redirect_uri) {
            Ok(url) => Redirect::to(url.as_str()).into_response(),
            Err(e) => {
                tracing::error!(error = %e, "validated redirect URI does not parse");
                AuthError::internal("invalid redirect URI").into_response()
            }
        },
        AuthorizationOutcome::Login { location } => Redirect::to(location.as_str()).into_response(),
        AuthorizationOutcome::Failed(failure) => {
            tracing::info!(
                client_id = %request.client_id,
                error = %failure.error,
                "authorization request failed"
            );
            match failure.to_redirect_url() {
                Some(url) => Redirect::to(url.as_str()).into_response(),
                None => failure.error.into_response(),
            }
        }
    }
}

/// The live IDP session named by the session cookie. Lookup failures count
/// as no session.
pub(crate) async fn current_idp_session(
    services: &AuthServices,
    jar: &CookieJar,
) -> Option<IdpSession> {
    let cookie = jar.get(&services.config.oauth.session_cookie_name)?;
    match services.stores.idp_sessions.get_idp_session(cookie.value()).await {
        Ok(session) => session.filter(|s| !s.is_expired(OffsetDateTime::now_utc())),
        Err(e) => {
            tracing::warn!(error = %e, "failed to load IDP session");
            None
        }
    }
}
