//! Request extractors.
//!
//! - [`BearerAuth`] - the live session behind `Authorization: Bearer|DPoP`
//! - [`OptionalBearerAuth`] - same, but absent or dead tokens yield `None`
//! - [`ClientMeta`] - remote address and user agent
//!
//! # Example
//!
//! ```ignore
//! async fn handler(BearerAuth(session): BearerAuth) -> String {
//!     session.user_id().to_string()
//! }
//! ```

use std::net::SocketAddr;

use axum::{
    extract::{ConnectInfo, FromRef, FromRequestParts},
    http::{HeaderMap, header::AUTHORIZATION, header::USER_AGENT, request::Parts},
    response::{IntoResponse, Response},
};
use base64::{Engine, engine::general_purpose::STANDARD};

use crate::AuthResult;
use crate::error::AuthError;
use crate::oauth::{ClientCredentials, DpopProof};
use crate::services::AuthServices;
use crate::session::extract_access_token;
use crate::types::{RequestMeta, Session};

use super::error::invalid_token_response;

/// Header carrying a DPoP proof.
pub const DPOP_HEADER: &str = "DPoP";

// =============================================================================
// Request Metadata
// =============================================================================

/// Remote address and user agent of the request.
///
/// The first `X-Forwarded-For` hop wins over the socket address.
#[derive(Debug, Clone, Default)]
pub struct ClientMeta(pub RequestMeta);

impl<S> FromRequestParts<S> for ClientMeta
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let forwarded = parts
            .headers
            .get("x-forwarded-for")
            .and_then(|h| h.to_str().ok())
            .and_then(|v| v.split(',').next())
            .map(|ip| ip.trim().to_string())
            .filter(|ip| !ip.is_empty());
        let remote_ip = forwarded.or_else(|| {
            parts
                .extensions
                .get::<ConnectInfo<SocketAddr>>()
                .map(|ConnectInfo(addr)| addr.ip().to_string())
        });
        let user_agent = parts
            .headers
            .get(USER_AGENT)
            .and_then(|h| h.to_str().ok())
            .map(str::to_string);

        Ok(Self(RequestMeta {
            remote_ip,
            user_agent,
        }))
    }
}

// =============================================================================
// Client Credentials
// =============================================================================

/// Parses `Authorization: Basic base64(client_id:client_secret)`.
///
/// Returns `None` when the header is absent or uses another scheme.
///
/// # Errors
///
/// `invalid_client` for a malformed Basic header.
pub fn basic_credentials(headers: &HeaderMap) -> AuthResult<Option<ClientCredentials>> {
    let Some(value) = headers.get(AUTHORIZATION).and_then(|h| h.to_str().ok()) else {
        return Ok(None);
    };
    let Some((scheme, encoded)) = value.split_once(' ') else {
        return Ok(None);
    };
    if !scheme.eq_ignore_ascii_case("basic") {
        return Ok(None);
    }

    let malformed = || AuthError::invalid_client("malformed basic credentials");
    let decoded = STANDARD.decode(encoded.trim()).map_err(|_| malformed())?;
    let decoded = String::from_utf8(decoded).map_err(|_| malformed())?;
    let (client_id, client_secret) = decoded.split_once(':').ok_or_else(malformed)?;

    Ok(Some(ClientCredentials {
        client_id: client_id.to_string(),
        client_secret: client_secret.to_string(),
    }))
}

// =============================================================================
// DPoP
// =============================================================================

/// Validates the `DPoP` header of a request, if any, against the request
/// method and the issuer-relative URL of `path`.
///
/// # Errors
///
/// `invalid_dpop_proof` for a proof that fails validation.
pub fn dpop_proof(
    services: &AuthServices,
    headers: &HeaderMap,
    method: &str,
    path: &str,
) -> AuthResult<Option<DpopProof>> {
    let Some(proof) = headers.get(DPOP_HEADER) else {
        return Ok(None);
    };
    let proof = proof
        .to_str()
        .map_err(|_| AuthError::invalid_dpop_proof("malformed DPoP header"))?;
    let uri = format!("{}{}", services.config.issuer.trim_end_matches('/'), path);
    Ok(Some(services.dpop.validate(proof, method, &uri)?))
}

// =============================================================================
// Bearer Auth Extractor
// =============================================================================

/// The session behind the request's access token.
pub struct BearerAuth(pub Session);

/// Why [`BearerAuth`] rejected a request.
#[derive(Debug)]
pub enum BearerRejection {
    /// No access token was sent.
    MissingToken,
    /// The token, its proof or its session is invalid.
    InvalidToken,
    /// Resolution failed for infrastructure reasons.
    Failed(AuthError),
}

impl IntoResponse for BearerRejection {
    fn into_response(self) -> Response {
        match self {
            Self::MissingToken => invalid_token_response(false),
            Self::InvalidToken => invalid_token_response(true),
            Self::Failed(err) => err.into_response(),
        }
    }
}

impl From<AuthError> for BearerRejection {
    fn from(err: AuthError) -> Self {
        if err.is_server_error() {
            Self::Failed(err)
        } else {
            Self::InvalidToken
        }
    }
}

impl<S> FromRequestParts<S> for BearerAuth
where
    S: Send + Sync,
    AuthServices: FromRef<S>,
{
    type Rejection = BearerRejection;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let services = AuthServices::from_ref(state);
        let token = extract_access_token(&parts.headers)
            .ok_or(BearerRejection::MissingToken)?
            .to_string();

        let proof = dpop_proof(
            &services,
            &parts.headers,
            parts.method.as_str(),
            parts.uri.path(),
        )?;
        let ClientMeta(meta) = ClientMeta::from_request_parts(parts, state)
            .await
            .unwrap_or_default();

        let session = services
            .resolver
            .resolve_access_token(&token, proof.as_ref(), &meta)
            .await?;

        tracing::debug!(
            user_id = %session.user_id(),
            session_kind = session.session_ref().kind.as_str(),
            "access token resolved"
        );
        Ok(Self(session))
    }
}

/// Like [`BearerAuth`], but unauthenticated requests pass with `None`.
///
/// Infrastructure failures still reject the request.
pub struct OptionalBearerAuth(pub Option<Session>);

impl<S> FromRequestParts<S> for OptionalBearerAuth
where
    S: Send + Sync,
    AuthServices: FromRef<S>,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        match BearerAuth::from_request_parts(parts, state).await {
            Ok(BearerAuth(session)) => Ok(Self(Some(session))),
            Err(BearerRejection::Failed(err)) => Err(err),
            Err(_) => Ok(Self(None)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{HeaderValue, Request};

    fn headers(authorization: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_str(authorization).unwrap());
        headers
    }

    #[test]
    fn test_basic_credentials() {
        let encoded = STANDARD.encode(b"portal:s3cret");
        let creds = basic_credentials(&headers(&format!("Basic {encoded}")))
            .unwrap()
            .unwrap();
        assert_eq!(creds.client_id, "portal");
        assert_eq!(creds.client_secret, "s3cret");
    }

    #[test]
    fn test_basic_credentials_ignores_other_schemes() {
        assert!(basic_credentials(&headers("Bearer abc")).unwrap().is_none());
        assert!(basic_credentials(&HeaderMap::new()).unwrap().is_none());
    }

    #[test]
    fn test_basic_credentials_malformed() {
        assert!(basic_credentials(&headers("Basic !!!")).is_err());
        let no_colon = STANDARD.encode(b"portal");
        assert!(basic_credentials(&headers(&format!("Basic {no_colon}"))).is_err());
    }

    #[tokio::test]
    async fn test_client_meta_prefers_forwarded_for() {
        let request = Request::builder()
            .header("x-forwarded-for", "203.0.113.7, 10.0.0.1")
            .header(USER_AGENT, "keygate-test")
            .body(())
            .unwrap();
        let (mut parts, ()) = request.into_parts();

        let ClientMeta(meta) = ClientMeta::from_request_parts(&mut parts, &())
            .await
            .unwrap();
        assert_eq!(meta.remote_ip.as_deref(), Some("203.0.113.7"));
        assert_eq!(meta.user_agent.as_deref(), Some("keygate-test"));
    }
}
