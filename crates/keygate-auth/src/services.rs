//! Service graph of the authorization core.
//!
//! [`AuthServices::build`] turns an [`AuthConfig`], a set of [`Stores`] and
//! the external [`Collaborators`] into every handler the HTTP layer needs.
//! Everything inside is cheaply cloneable and shared across requests.

use std::sync::Arc;

use crate::AuthResult;
use crate::config::AuthConfig;
use crate::oauth::{
    AppSessionTokenService, AssertionVerifier, AuthorizationHandler, AuthorizationHandlerDeps,
    AuthorizationService, ChallengeAssertionVerifier, ChallengeService, DpopValidator,
    OfflineGrantService, TokenHandler, TokenHandlerDeps, TokenService,
};
use crate::provider::{
    ClientScopeValidator, EventSink, LoginUi, OpenDirectory, ScopeValidator, TracingEventSink,
    UrlLoginUi, UserProvider,
};
use crate::ratelimit::{LocalRateLimiter, RateLimiter};
use crate::session::{AccessTokenResolver, SessionManager};
use crate::storage::Stores;
use crate::token::{AccessTokenEncoding, IdTokenIssuer, JwtService, SigningKeyPair};
use crate::types::{ClientResolver, StaticClientResolver};

/// Systems the authorization core talks to but does not own.
#[derive(Clone)]
pub struct Collaborators {
    /// Account status lookups.
    pub users: Arc<dyn UserProvider>,
    /// Session lifecycle events.
    pub events: Arc<dyn EventSink>,
    /// Device assertion verification.
    pub assertions: Arc<dyn AssertionVerifier>,
    /// Interactive login entry point.
    pub login_ui: Arc<dyn LoginUi>,
    /// Scope policy.
    pub scopes: Arc<dyn ScopeValidator>,
    /// Token endpoint rate limits.
    pub rate_limiter: Arc<dyn RateLimiter>,
}

impl Collaborators {
    /// Local defaults: every user active, events only logged, challenge
    /// backed assertions, the configured login URL, client scope lists and
    /// an in-process rate limiter.
    ///
    /// # Errors
    ///
    /// `Configuration` when the login URL is not absolute.
    pub fn local(config: &AuthConfig, stores: &Stores) -> AuthResult<Self> {
        Ok(Self {
            users: Arc::new(OpenDirectory),
            events: Arc::new(TracingEventSink),
            assertions: Arc::new(ChallengeAssertionVerifier::new(
                stores.challenges.clone(),
                config.oauth.biometric_enabled,
            )),
            login_ui: Arc::new(UrlLoginUi::new(&config.oauth.login_url)?),
            scopes: Arc::new(ClientScopeValidator),
            rate_limiter: Arc::new(LocalRateLimiter::new(config.rate_limiting.clone())),
        })
    }
}

/// Every service of the authorization core, wired together.
#[derive(Clone)]
pub struct AuthServices {
    /// Configuration the services were built from.
    pub config: Arc<AuthConfig>,
    /// Client registrations.
    pub clients: Arc<dyn ClientResolver>,
    /// Backing stores.
    pub stores: Stores,
    /// Signing key and JWKS.
    pub jwt: Arc<JwtService>,
    /// ID token issuance and hint verification.
    pub id_tokens: IdTokenIssuer,
    /// Access token encoding.
    pub access_tokens: AccessTokenEncoding,
    /// Authorization endpoint.
    pub authorize: AuthorizationHandler,
    /// Token endpoint.
    pub tokens: TokenHandler,
    /// Offline and access grant issuance.
    pub token_service: TokenService,
    /// Offline grant operations.
    pub offline_grants: OfflineGrantService,
    /// Consent records.
    pub authorizations: AuthorizationService,
    /// App session tokens.
    pub app_sessions: AppSessionTokenService,
    /// Device challenges.
    pub challenges: ChallengeService,
    /// Bearer token resolution.
    pub resolver: AccessTokenResolver,
    /// Session listing and revocation.
    pub sessions: SessionManager,
    /// DPoP proof validation.
    pub dpop: Arc<DpopValidator>,
    /// Session lifecycle events.
    pub events: Arc<dyn EventSink>,
}

impl AuthServices {
    /// Wires the services.
    ///
    /// # Errors
    ///
    /// `Configuration` for an invalid configuration or signing key.
    pub fn build(
        config: AuthConfig,
        stores: Stores,
        collaborators: Collaborators,
    ) -> AuthResult<Self> {
        config.validate()?;

        let jwt = Arc::new(JwtService::new(
            load_signing_key(&config)?,
            config.issuer.clone(),
        ));
        let clients: Arc<dyn ClientResolver> =
            Arc::new(StaticClientResolver::new(config.clients.iter().cloned()));

        let id_tokens = IdTokenIssuer::new(jwt.clone(), config.oauth.id_token_lifetime);
        let access_tokens = AccessTokenEncoding::new(jwt.clone());
        let authorizations =
            AuthorizationService::new(config.app_id.clone(), stores.authorizations.clone());
        let offline_grants = OfflineGrantService::new(
            stores.offline_grants.clone(),
            stores.idp_sessions.clone(),
            clients.clone(),
        );
        let token_service = TokenService::new(
            config.app_id.clone(),
            stores.access_grants.clone(),
            stores.offline_grants.clone(),
            offline_grants.clone(),
            access_tokens.clone(),
            collaborators.events.clone(),
        );

        let authorize = AuthorizationHandler::new(AuthorizationHandlerDeps {
            app_id: config.app_id.clone(),
            issuer: config.issuer.clone(),
            code_lifetime: config.oauth.authorization_code_lifetime,
            clients: clients.clone(),
            scopes: collaborators.scopes.clone(),
            login_ui: collaborators.login_ui.clone(),
            authorizations: authorizations.clone(),
            code_grants: stores.code_grants.clone(),
            idp_sessions: stores.idp_sessions.clone(),
            offline_grants: offline_grants.clone(),
            id_tokens: id_tokens.clone(),
        });

        let tokens = TokenHandler::new(TokenHandlerDeps {
            clients: clients.clone(),
            whitelisted_grant_types: config.oauth.whitelisted_grant_types.clone(),
            code_grants: stores.code_grants.clone(),
            settings_action_grants: stores.settings_action_grants.clone(),
            authorizations: authorizations.clone(),
            tokens: token_service.clone(),
            id_tokens: id_tokens.clone(),
            users: collaborators.users.clone(),
            rate_limiter: collaborators.rate_limiter.clone(),
            assertions: collaborators.assertions.clone(),
        });

        let app_sessions = AppSessionTokenService::new(
            tokens.clone(),
            offline_grants.clone(),
            stores.app_session_tokens.clone(),
            config.oauth.app_session_token_lifetime,
        );
        let challenges =
            ChallengeService::new(stores.challenges.clone(), config.oauth.challenge_lifetime);
        let resolver = AccessTokenResolver::new(
            stores.access_grants.clone(),
            authorizations.clone(),
            stores.idp_sessions.clone(),
            offline_grants.clone(),
            access_tokens.clone(),
        );
        let sessions = SessionManager::new(
            stores.idp_sessions.clone(),
            stores.offline_grants.clone(),
            offline_grants.clone(),
            authorizations.clone(),
            collaborators.events.clone(),
        );
        let dpop = Arc::new(DpopValidator::new(config.dpop.max_age, config.dpop.leeway));

        tracing::info!(
            issuer = %config.issuer,
            app_id = %config.app_id,
            clients = config.clients.len(),
            algorithm = %jwt.algorithm(),
            "authorization services ready"
        );

        Ok(Self {
            config: Arc::new(config),
            clients,
            stores,
            jwt,
            id_tokens,
            access_tokens,
            authorize,
            tokens,
            token_service,
            offline_grants,
            authorizations,
            app_sessions,
            challenges,
            resolver,
            sessions,
            dpop,
            events: collaborators.events,
        })
    }
}

fn load_signing_key(config: &AuthConfig) -> AuthResult<SigningKeyPair> {
    let algorithm = config.signing.signing_algorithm()?;
    let key = match &config.signing.private_key_pem {
        Some(pem) => {
            let kid = config
                .signing
                .kid
                .clone()
                .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
            SigningKeyPair::from_pem(kid, algorithm, pem)?
        }
        None => {
            tracing::warn!("no signing key configured, generating an ephemeral key");
            if algorithm.is_rsa() {
                SigningKeyPair::generate_rsa(algorithm)?
            } else {
                SigningKeyPair::generate_ec()?
            }
        }
    };
    Ok(key)
}
