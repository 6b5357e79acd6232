//! OAuth 2.0 / OpenID Connect authorization server.
//!
//! - [`authorize`] - authorization endpoint decision logic
//! - [`token_handler`] - token endpoint grant type dispatch
//! - [`token_service`] - offline grant and access grant issuance
//! - [`offline_grant_service`] - offline grant expiry, liveness and rotation
//! - [`authorizations`] - consent records
//! - [`pkce`], [`dpop`] - proof checks
//! - [`assertion`], [`challenge`] - device assertion grants
//! - [`app_session`] - app session tokens
//!
//! # Authorization Code Flow
//!
//! ```ignore
//! let outcome = authorize.handle(&request, &ctx).await;
//! // ... user agent returns to the client with ?code=...
//! let response = tokens.handle(token_request, token_ctx).await?;
//! ```

pub mod app_session;
pub mod assertion;
pub mod authorizations;
pub mod authorize;
pub mod challenge;
pub mod dpop;
pub mod offline_grant_service;
pub mod pkce;
pub mod token;
pub mod token_handler;
pub mod token_service;

pub use app_session::AppSessionTokenService;
pub use assertion::{
    AssertionKind, AssertionVerifier, ChallengeAssertionVerifier, VerifiedAssertion,
};
pub use authorizations::AuthorizationService;
pub use authorize::{
    AuthorizationContext, AuthorizationFailure, AuthorizationHandler, AuthorizationHandlerDeps,
    AuthorizationOutcome, AuthorizationRequest, AuthorizationResponse,
};
pub use challenge::ChallengeService;
pub use dpop::{DpopError, DpopProof, DpopValidator, jwk_thumbprint};
pub use offline_grant_service::{
    CreateNewRefreshTokenOptions, NewRefreshToken, OfflineGrantService, compute_expiry,
};
pub use pkce::{PkceChallenge, PkceChallengeMethod, PkceError};
pub use token::{ClientCredentials, TokenRequest, TokenRequestContext, TokenResponse};
pub use token_handler::{TokenHandler, TokenHandlerDeps};
pub use token_service::{
    IssueAccessGrantOptions, IssueOfflineGrantOptions, IssuedAccessToken, IssuedOfflineGrant,
    TokenService,
};
