//! HTTP handlers for the OAuth 2.0 / OpenID Connect endpoints.
//!
//! # Endpoints
//!
//! | Path | Handler |
//! |------|---------|
//! | `GET/POST /oauth2/authorize` | [`authorize`] |
//! | `POST /oauth2/token` | [`token`] |
//! | `POST /oauth2/revoke` | [`revoke`] |
//! | `GET /oauth2/userinfo` | [`userinfo`] |
//! | `GET /oauth2/jwks` | [`discovery`] |
//! | `GET /.well-known/openid-configuration` | [`discovery`] |
//! | `GET /.well-known/oauth-authorization-server` | [`discovery`] |
//! | `GET/POST /oauth2/end_session` | [`end_session`] |
//! | `POST /oauth2/challenge` | [`challenge`] |
//! | `POST /oauth2/app_session_token` | [`app_session`] |
//! | `GET /oauth2/redirect` | [`redirect`] |

pub mod app_session;
pub mod authorize;
pub mod challenge;
pub mod discovery;
pub mod end_session;
pub mod redirect;
pub mod revoke;
pub mod token;
pub mod userinfo;

use axum::{
    Router,
    routing::{get, post},
};

use crate::services::AuthServices;

/// Path of the authorization endpoint.
pub const AUTHORIZE_PATH: &str = "/oauth2/authorize";
/// Path of the token endpoint.
pub const TOKEN_PATH: &str = "/oauth2/token";
/// Path of the revocation endpoint.
pub const REVOKE_PATH: &str = "/oauth2/revoke";
/// Path of the userinfo endpoint.
pub const USERINFO_PATH: &str = "/oauth2/userinfo";
/// Path of the JWKS.
pub const JWKS_PATH: &str = "/oauth2/jwks";
/// Path of the end session endpoint.
pub const END_SESSION_PATH: &str = "/oauth2/end_session";
/// Path of the challenge endpoint.
pub const CHALLENGE_PATH: &str = "/oauth2/challenge";
/// Path of the app session token endpoint.
pub const APP_SESSION_TOKEN_PATH: &str = "/oauth2/app_session_token";
/// Path of the redirect page.
pub const REDIRECT_PATH: &str = "/oauth2/redirect";

/// Builds the OAuth router over `services`.
pub fn oauth_router(services: AuthServices) -> Router {
    Router::new()
        .route(
            AUTHORIZE_PATH,
            get(authorize::authorize_get_handler).post(authorize::authorize_post_handler),
        )
        .route(TOKEN_PATH, post(token::token_handler))
        .route(REVOKE_PATH, post(revoke::revoke_handler))
        .route(USERINFO_PATH, get(userinfo::userinfo_handler))
        .route(JWKS_PATH, get(discovery::jwks_handler))
        .route(
            "/.well-known/openid-configuration",
            get(discovery::openid_configuration_handler),
        )
        .route(
            "/.well-known/oauth-authorization-server",
            get(discovery::authorization_server_metadata_handler),
        )
        .route(
            END_SESSION_PATH,
            get(end_session::end_session_get_handler).post(end_session::end_session_post_handler),
        )
        .route(CHALLENGE_PATH, post(challenge::challenge_handler))
        .route(
            APP_SESSION_TOKEN_PATH,
            post(app_session::app_session_token_handler),
        )
        .route(REDIRECT_PATH, get(redirect::redirect_handler))
        .with_state(services)
}
