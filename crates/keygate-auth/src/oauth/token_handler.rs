//! Token endpoint handling.
//!
//! A request goes through the same gates in order before any grant logic
//! runs:
//!
//! 1. per-IP rate limit
//! 2. client resolution
//! 3. request shape for the grant type
//! 4. grant type permission (client grant types plus the server whitelist)
//! 5. DPoP requirement of the client
//!
//! Every check that can fail runs before anything is written, so a failed
//! request never leaves a partially issued token behind.

use std::sync::Arc;

use time::OffsetDateTime;

use crate::AuthResult;
use crate::error::AuthError;
use crate::oauth::assertion::{AssertionKind, AssertionVerifier};
use crate::oauth::authorizations::AuthorizationService;
use crate::oauth::offline_grant_service::{CreateNewRefreshTokenOptions, OfflineGrantService};
use crate::oauth::pkce::PkceChallenge;
use crate::oauth::token::{TokenRequest, TokenRequestContext, TokenResponse};
use crate::oauth::token_service::{IssueAccessGrantOptions, IssueOfflineGrantOptions, TokenService};
use crate::provider::UserProvider;
use crate::ratelimit::{RateLimitBucket, RateLimiter};
use crate::storage::{CodeGrantStore, SettingsActionGrantStore};
use crate::token::codec::{decode_refresh_token, hash_token};
use crate::token::issuer::{IdTokenIssuer, IssueIdTokenOptions};
use crate::types::{
    Authorization, AuthenticationInfo, ClientConfig, ClientResolver, CodeGrant, FULL_ACCESS_SCOPE,
    GrantType, OFFLINE_ACCESS_SCOPE, OPENID_SCOPE, OfflineGrantSession, SessionKind, SessionRef,
};

const INVALID_CODE: &str = "invalid authorization code";
const INVALID_REFRESH_TOKEN: &str = "invalid refresh token";

/// Collaborators of the [`TokenHandler`].
#[derive(Clone)]
pub struct TokenHandlerDeps {
    /// Client registrations.
    pub clients: Arc<dyn ClientResolver>,
    /// Grant types every client may use.
    pub whitelisted_grant_types: Vec<GrantType>,
    /// Authorization codes.
    pub code_grants: Arc<dyn CodeGrantStore>,
    /// Settings action codes.
    pub settings_action_grants: Arc<dyn SettingsActionGrantStore>,
    /// Consent records.
    pub authorizations: AuthorizationService,
    /// Offline and access grant issuance.
    pub tokens: TokenService,
    /// ID tokens.
    pub id_tokens: IdTokenIssuer,
    /// Account status.
    pub users: Arc<dyn UserProvider>,
    /// Token endpoint rate limits.
    pub rate_limiter: Arc<dyn RateLimiter>,
    /// Device assertions.
    pub assertions: Arc<dyn AssertionVerifier>,
}

/// Handles `POST /oauth2/token`.
#[derive(Clone)]
pub struct TokenHandler {
    deps: TokenHandlerDeps,
}

impl TokenHandler {
    /// Creates the handler.
    #[must_use]
    pub fn new(deps: TokenHandlerDeps) -> Self {
        Self { deps }
    }

    fn offline_grants(&self) -> &OfflineGrantService {
        self.deps.tokens.offline_grants()
    }

    /// Handles a token request.
    ///
    /// # Errors
    ///
    /// The protocol error to render, or an infrastructure error.
    pub async fn handle(
        &self,
        request: TokenRequest,
        ctx: TokenRequestContext,
    ) -> AuthResult<TokenResponse> {
        let remote_ip = ctx.meta.remote_ip.as_deref().unwrap_or("unknown");
        self.deps
            .rate_limiter
            .check(RateLimitBucket::TokenRequestPerIp, remote_ip)
            .await?;

        let client_id = ctx
            .basic_credentials
            .as_ref()
            .map(|c| c.client_id.as_str())
            .or(request.client_id.as_deref())
            .unwrap_or_default();
        let client = self
            .deps
            .clients
            .resolve_client(client_id)
            .ok_or_else(|| AuthError::invalid_client("invalid client ID"))?;

        let grant_type = validate_request(&client, &request, &ctx)?;

        if !client.is_grant_type_allowed(grant_type, &self.deps.whitelisted_grant_types) {
            return Err(AuthError::unauthorized_client(
                "grant type is not allowed for this client",
            ));
        }

        if ctx.dpop_proof.is_none() {
            if client.dpop_required {
                return Err(AuthError::invalid_dpop_proof("DPoP proof is required"));
            }
            tracing::debug!(client_id = %client.client_id, "token request without DPoP proof");
        }

        tracing::debug!(client_id = %client.client_id, grant_type = %grant_type, "handling token request");

        match grant_type {
            GrantType::AuthorizationCode => {
                self.handle_authorization_code(&client, &request, &ctx).await
            }
            GrantType::RefreshToken => self.handle_refresh_token(&client, &request, &ctx).await,
            GrantType::IdToken => self.handle_id_token(&client, &ctx).await,
            GrantType::AnonymousRequest => {
                self.handle_assertion(AssertionKind::Anonymous, &client, &request, &ctx)
                    .await
            }
            GrantType::BiometricRequest => {
                self.handle_assertion(AssertionKind::Biometric, &client, &request, &ctx)
                    .await
            }
            GrantType::SettingsAction => {
                self.handle_settings_action(&client, &request, &ctx).await
            }
            GrantType::TokenExchange => Err(AuthError::unsupported_grant_type(
                GrantType::TokenExchange.as_str(),
            )),
        }
    }

    // =========================================================================
    // authorization_code
    // =========================================================================

    async fn handle_authorization_code(
        &self,
        client: &ClientConfig,
        request: &TokenRequest,
        ctx: &TokenRequestContext,
    ) -> AuthResult<TokenResponse> {
        let code = request.code.as_deref().unwrap_or_default();
        let code_grant = self
            .deps
            .code_grants
            .get_code_grant(&hash_token(code))
            .await?
            .filter(|grant| grant.client_id == client.client_id)
            .ok_or_else(|| AuthError::invalid_grant(INVALID_CODE))?;

        if let Some(expected) = code_grant.dpop_jkt.as_deref()
            && ctx.dpop_proof.as_ref().map(|p| p.jkt.as_str()) != Some(expected)
        {
            return Err(AuthError::invalid_dpop_proof("Invalid DPoP key binding"));
        }

        if code_grant.is_expired(OffsetDateTime::now_utc()) {
            return Err(AuthError::invalid_grant(INVALID_CODE));
        }

        if request.redirect_uri.as_deref().unwrap_or_default() != code_grant.redirect_uri {
            return Err(AuthError::invalid_request("invalid redirect URI"));
        }

        verify_pkce(
            client,
            code_grant.pkce_challenge.as_ref(),
            request.code_verifier.as_deref(),
        )
        .map_err(|_| AuthError::invalid_grant(INVALID_CODE))?;

        verify_client_secret(client, request, ctx)?;

        let authorization = self
            .deps
            .authorizations
            .get_by_id(&code_grant.authorization_id)
            .await?
            .ok_or_else(|| AuthError::invalid_grant(INVALID_CODE))?;

        self.deps
            .rate_limiter
            .check(RateLimitBucket::TokenRequestPerUser, &authorization.user_id)
            .await?;

        let device_info = parse_device_info(request)?;
        let result = self
            .issue_tokens_for_authorization_code(client, &code_grant, &authorization, ctx, device_info)
            .await;

        if let Err(e) = self.deps.code_grants.delete_code_grant(&code_grant).await {
            tracing::warn!(client_id = %client.client_id, error = %e, "failed to delete code grant");
        }

        result
    }

    async fn issue_tokens_for_authorization_code(
        &self,
        client: &ClientConfig,
        code_grant: &CodeGrant,
        authorization: &Authorization,
        ctx: &TokenRequestContext,
        device_info: Option<serde_json::Value>,
    ) -> AuthResult<TokenResponse> {
        let scopes = &code_grant.scopes;
        let issue_refresh_token =
            has_scope(scopes, OFFLINE_ACCESS_SCOPE) && client.declares_refresh_token();
        let issue_id_token = has_scope(scopes, OPENID_SCOPE);
        let info = &code_grant.authentication_info;
        let dpop_jkt = ctx.dpop_jkt();
        let now = OffsetDateTime::now_utc();

        let hint_session = code_grant
            .id_token_hint_sid
            .as_deref()
            .and_then(SessionRef::decode_sid);
        if let Some(hinted) = hint_session.as_ref().filter(|s| s.kind == SessionKind::OfflineGrant)
            && let Ok(grant) = self.offline_grants().get_offline_grant(&hinted.id).await
            && info.authenticated_at > grant.authenticated_at
        {
            self.offline_grants()
                .update_offline_grant_authenticated_at(&grant.id, info.authenticated_at)
                .await?;
        }

        let offline_options = || IssueOfflineGrantOptions {
            authentication_info: info.clone(),
            idp_session_id: info
                .authenticated_by
                .as_ref()
                .filter(|s| s.kind == SessionKind::IdpSession)
                .map(|s| s.id.clone()),
            identity_id: None,
            scopes: scopes.clone(),
            authorization_id: authorization.id.clone(),
            sso_enabled: code_grant.sso_enabled,
            dpop_jkt: dpop_jkt.clone(),
            device_info: device_info.clone(),
        };

        let mut response = TokenResponse::default();
        let mut refresh_token_hash = None;
        let session = if issue_refresh_token {
            let authenticating_grant = info
                .authenticated_by
                .as_ref()
                .filter(|s| s.kind == SessionKind::OfflineGrant);
            match authenticating_grant {
                Some(by) => {
                    let (new_token, grant) = self
                        .offline_grants()
                        .create_new_refresh_token(CreateNewRefreshTokenOptions {
                            grant_id: by.id.clone(),
                            client_id: client.client_id.clone(),
                            scopes: scopes.clone(),
                            authorization_id: authorization.id.clone(),
                            dpop_jkt: dpop_jkt.clone(),
                            access_event: ctx.meta.access_event(now),
                            expire_at: None,
                        })
                        .await?;
                    let grant = grant.ok_or(AuthError::GrantNotFound)?;
                    response = response.with_refresh_token(new_token.encode());
                    refresh_token_hash = Some(new_token.token_hash);
                    grant.session_ref()
                }
                None => {
                    if client.max_concurrent_session == 1 {
                        self.deps
                            .tokens
                            .revoke_client_offline_grants(&client.client_id, &info.user_id)
                            .await?;
                    }
                    let issued = self
                        .deps
                        .tokens
                        .issue_offline_grant(client, offline_options(), ctx.meta.access_event(now))
                        .await?;
                    response = response.with_refresh_token(issued.refresh_token.encode());
                    refresh_token_hash = Some(issued.refresh_token.token_hash);
                    issued.grant.session_ref()
                }
            }
        } else if let Some(hinted) = hint_session {
            if hinted.kind == SessionKind::OfflineGrant {
                let grant = self.offline_grants().get_offline_grant(&hinted.id).await?;
                refresh_token_hash = grant
                    .refresh_tokens
                    .iter()
                    .find(|t| t.client_id == client.client_id)
                    .map(|t| t.token_hash.clone());
            }
            hinted
        } else if client.is_confidential() {
            // The refresh token of this grant is never returned.
            let issued = self
                .deps
                .tokens
                .issue_offline_grant(client, offline_options(), ctx.meta.access_event(now))
                .await?;
            refresh_token_hash = Some(issued.refresh_token.token_hash);
            issued.grant.session_ref()
        } else {
            return Err(AuthError::invalid_request("cannot issue access token"));
        };

        let access = self
            .deps
            .tokens
            .issue_access_grant(IssueAccessGrantOptions {
                client,
                session: session.clone(),
                user_id: &authorization.user_id,
                authorization_id: &authorization.id,
                scopes: scopes.clone(),
                refresh_token_hash,
                dpop_jkt,
            })
            .await?;
        response = response.with_access_token(&access);

        if issue_id_token {
            let id_token = self.deps.id_tokens.issue_id_token(IssueIdTokenOptions {
                client_id: &client.client_id,
                session: Some(&session),
                nonce: code_grant.oidc_nonce.as_deref(),
                authentication_info: info,
            })?;
            response = response.with_id_token(id_token);
        }

        Ok(response)
    }

    // =========================================================================
    // refresh_token
    // =========================================================================

    /// Resolves a presented refresh token to its offline grant session and
    /// authorization, checking the DPoP binding and the owner's status.
    ///
    /// # Errors
    ///
    /// `invalid_grant` for any unusable token, `invalid_dpop_proof` for a
    /// binding mismatch.
    pub async fn parse_refresh_token(
        &self,
        refresh_token: &str,
        ctx: &TokenRequestContext,
    ) -> AuthResult<(OfflineGrantSession, Authorization)> {
        let decoded = decode_refresh_token(refresh_token)?;

        let grant = self
            .offline_grants()
            .get_offline_grant(&decoded.grant_id)
            .await
            .map_err(invalid_refresh_token)?;
        let session = grant
            .to_session(&decoded.token_hash())
            .ok_or_else(|| AuthError::invalid_grant(INVALID_REFRESH_TOKEN))?;

        session.match_dpop_jkt(ctx.dpop_proof.as_ref())?;

        let authorization = self
            .deps
            .authorizations
            .get_by_id(&session.authorization_id)
            .await?
            .ok_or_else(|| AuthError::invalid_grant(INVALID_REFRESH_TOKEN))?;

        self.deps
            .users
            .check_status(&session.grant.user_id)
            .await
            .map_err(invalid_refresh_token)?;

        Ok((session, authorization))
    }

    async fn handle_refresh_token(
        &self,
        client: &ClientConfig,
        request: &TokenRequest,
        ctx: &TokenRequestContext,
    ) -> AuthResult<TokenResponse> {
        verify_client_secret(client, request, ctx)?;

        let refresh_token = request.refresh_token.as_deref().unwrap_or_default();
        let (session, authorization) = self.parse_refresh_token(refresh_token, ctx).await?;

        if session.client_id != client.client_id {
            return Err(AuthError::invalid_request(
                "client id doesn't match the refresh token",
            ));
        }

        self.deps
            .rate_limiter
            .check(RateLimitBucket::TokenRequestPerUser, &session.grant.user_id)
            .await?;

        let device_info = parse_device_info(request)?;
        let grant_id = session.grant.id.clone();
        let mut response = TokenResponse::default();
        let token_hash = session.token_hash.clone();

        if client.refresh_token_rotation_enabled {
            let (new_token, _) = self
                .offline_grants()
                .rotate_refresh_token(&grant_id, &token_hash)
                .await
                .map_err(invalid_refresh_token)?;
            tracing::debug!(grant_id = %grant_id, "rotated refresh token");
            response = response.with_refresh_token(new_token.encode());
        }

        let event = ctx.meta.access_event(OffsetDateTime::now_utc());
        self.offline_grants()
            .access_offline_grant(&grant_id, Some(&token_hash), &event)
            .await?;
        if let Some(device_info) = device_info {
            self.offline_grants()
                .update_offline_grant_device_info(&grant_id, device_info)
                .await?;
        }

        let grant_ref = session.grant.session_ref();
        let access = self
            .deps
            .tokens
            .issue_access_grant(IssueAccessGrantOptions {
                client,
                session: grant_ref.clone(),
                user_id: &session.grant.user_id,
                authorization_id: &authorization.id,
                scopes: session.scopes.clone(),
                refresh_token_hash: Some(token_hash),
                dpop_jkt: ctx.dpop_jkt(),
            })
            .await?;
        response = response.with_access_token(&access);

        if has_scope(&session.scopes, OPENID_SCOPE) {
            let info = session.grant.authentication_info();
            let id_token = self.deps.id_tokens.issue_id_token(IssueIdTokenOptions {
                client_id: &client.client_id,
                session: Some(&grant_ref),
                nonce: None,
                authentication_info: &info,
            })?;
            response = response.with_id_token(id_token);
        }

        Ok(response)
    }

    // =========================================================================
    // id_token
    // =========================================================================

    async fn handle_id_token(
        &self,
        client: &ClientConfig,
        ctx: &TokenRequestContext,
    ) -> AuthResult<TokenResponse> {
        if !client.has_full_access_scope() {
            return Err(AuthError::unauthorized_client(
                "this client may not refresh id token",
            ));
        }
        let session = ctx
            .session
            .as_ref()
            .ok_or_else(|| AuthError::invalid_grant("valid session is required"))?;

        self.deps
            .rate_limiter
            .check(RateLimitBucket::TokenRequestPerUser, session.user_id())
            .await?;

        let session_ref = session.session_ref();
        let info = session.authentication_info();
        let id_token = self.deps.id_tokens.issue_id_token(IssueIdTokenOptions {
            client_id: &client.client_id,
            session: Some(&session_ref),
            nonce: None,
            authentication_info: &info,
        })?;

        Ok(TokenResponse::default().with_id_token(id_token))
    }

    // =========================================================================
    // anonymous and biometric requests
    // =========================================================================

    async fn handle_assertion(
        &self,
        kind: AssertionKind,
        client: &ClientConfig,
        request: &TokenRequest,
        ctx: &TokenRequestContext,
    ) -> AuthResult<TokenResponse> {
        if !client.has_full_access_scope() {
            let what = match kind {
                AssertionKind::Anonymous => "Anonymous user",
                AssertionKind::Biometric => "Biometric authentication",
            };
            return Err(AuthError::unauthorized_client(format!(
                "{what} is not supported by the client application type"
            )));
        }

        let jwt = request.jwt.as_deref().unwrap_or_default();
        let verified = self.deps.assertions.verify(kind, jwt).await?;

        self.deps
            .rate_limiter
            .check(RateLimitBucket::TokenRequestPerUser, &verified.user_id)
            .await?;

        let scopes = vec![
            OPENID_SCOPE.to_string(),
            OFFLINE_ACCESS_SCOPE.to_string(),
            FULL_ACCESS_SCOPE.to_string(),
        ];
        let authorization = self
            .deps
            .authorizations
            .check_and_grant(&client.client_id, &verified.user_id, &scopes)
            .await?;

        let now = OffsetDateTime::now_utc();
        let info = AuthenticationInfo {
            user_id: verified.user_id.clone(),
            authenticated_at: now,
            amr: verified.amr.clone(),
            authenticated_by: None,
        };

        if client.max_concurrent_session == 1 {
            self.deps
                .tokens
                .revoke_client_offline_grants(&client.client_id, &verified.user_id)
                .await?;
        }

        let issued = self
            .deps
            .tokens
            .issue_offline_grant(
                client,
                IssueOfflineGrantOptions {
                    authentication_info: info,
                    idp_session_id: None,
                    identity_id: Some(verified.key_id.clone()),
                    scopes: scopes.clone(),
                    authorization_id: authorization.id.clone(),
                    sso_enabled: false,
                    dpop_jkt: ctx.dpop_jkt(),
                    device_info: verified.device_info.clone(),
                },
                ctx.meta.access_event(now),
            )
            .await?;
        let grant_ref = issued.grant.session_ref();

        let access = self
            .deps
            .tokens
            .issue_access_grant(IssueAccessGrantOptions {
                client,
                session: grant_ref.clone(),
                user_id: &verified.user_id,
                authorization_id: &authorization.id,
                scopes,
                refresh_token_hash: Some(issued.refresh_token.token_hash.clone()),
                dpop_jkt: ctx.dpop_jkt(),
            })
            .await?;

        let id_token = self.deps.id_tokens.issue_id_token(IssueIdTokenOptions {
            client_id: &client.client_id,
            session: Some(&grant_ref),
            nonce: None,
            authentication_info: &issued.grant.authentication_info(),
        })?;

        Ok(TokenResponse::default()
            .with_access_token(&access)
            .with_refresh_token(issued.refresh_token.encode())
            .with_id_token(id_token))
    }

    // =========================================================================
    // settings action
    // =========================================================================

    async fn handle_settings_action(
        &self,
        client: &ClientConfig,
        request: &TokenRequest,
        ctx: &TokenRequestContext,
    ) -> AuthResult<TokenResponse> {
        let code = request.code.as_deref().unwrap_or_default();
        let grant = self
            .deps
            .settings_action_grants
            .get_settings_action_grant(&hash_token(code))
            .await?
            .filter(|g| g.client_id == client.client_id)
            .filter(|g| OffsetDateTime::now_utc() < g.expire_at)
            .ok_or_else(|| AuthError::invalid_grant(INVALID_CODE))?;

        if request.redirect_uri.as_deref().unwrap_or_default() != grant.redirect_uri {
            return Err(AuthError::invalid_request("invalid redirect URI"));
        }

        verify_pkce(
            client,
            grant.pkce_challenge.as_ref(),
            request.code_verifier.as_deref(),
        )
        .map_err(|_| AuthError::invalid_grant(INVALID_CODE))?;

        verify_client_secret(client, request, ctx)?;

        if let Err(e) = self
            .deps
            .settings_action_grants
            .delete_settings_action_grant(&grant)
            .await
        {
            tracing::warn!(client_id = %client.client_id, error = %e, "failed to delete settings action grant");
        }

        Ok(TokenResponse::default())
    }
}

// =============================================================================
// Helpers
// =============================================================================

/// Checks the parameters the grant type needs and parses the grant type.
fn validate_request(
    client: &ClientConfig,
    request: &TokenRequest,
    ctx: &TokenRequestContext,
) -> AuthResult<GrantType> {
    let grant_type = GrantType::parse(&request.grant_type)
        .ok_or_else(|| AuthError::unsupported_grant_type(request.grant_type.clone()))?;
    let present = |value: &Option<String>| value.as_deref().is_some_and(|v| !v.is_empty());

    match grant_type {
        GrantType::AuthorizationCode | GrantType::SettingsAction => {
            if !present(&request.code) {
                return Err(AuthError::invalid_request("code is required"));
            }
            if client.is_public() && !present(&request.code_verifier) {
                return Err(AuthError::invalid_request("PKCE code verifier is required"));
            }
            if client.is_confidential() && client_secret(request, ctx).is_none() {
                return Err(AuthError::invalid_client("client secret is required"));
            }
        }
        GrantType::RefreshToken => {
            if !present(&request.refresh_token) {
                return Err(AuthError::invalid_request("refresh token is required"));
            }
            if client.is_confidential() && client_secret(request, ctx).is_none() {
                return Err(AuthError::invalid_client("client secret is required"));
            }
        }
        GrantType::AnonymousRequest | GrantType::BiometricRequest => {
            if !present(&request.jwt) {
                return Err(AuthError::invalid_request("jwt is required"));
            }
        }
        GrantType::IdToken | GrantType::TokenExchange => {}
    }

    Ok(grant_type)
}

fn client_secret<'a>(request: &'a TokenRequest, ctx: &'a TokenRequestContext) -> Option<&'a str> {
    ctx.basic_credentials
        .as_ref()
        .map(|c| c.client_secret.as_str())
        .or(request.client_secret.as_deref())
        .filter(|s| !s.is_empty())
}

fn verify_client_secret(
    client: &ClientConfig,
    request: &TokenRequest,
    ctx: &TokenRequestContext,
) -> AuthResult<()> {
    if !client.is_confidential() {
        return Ok(());
    }
    match client_secret(request, ctx) {
        Some(secret) if client.verify_client_secret(secret) => Ok(()),
        _ => Err(AuthError::invalid_request("invalid client secret")),
    }
}

/// PKCE applies to first-party clients, to codes carrying a challenge and
/// to requests carrying a verifier.
fn verify_pkce(
    client: &ClientConfig,
    challenge: Option<&PkceChallenge>,
    verifier: Option<&str>,
) -> Result<(), ()> {
    let required = client.is_first_party() || challenge.is_some() || verifier.is_some();
    if !required {
        return Ok(());
    }
    match (challenge, verifier) {
        (Some(challenge), Some(verifier)) => challenge.verify(verifier).map_err(|_| ()),
        _ => Err(()),
    }
}

fn parse_device_info(request: &TokenRequest) -> AuthResult<Option<serde_json::Value>> {
    request
        .x_device_info
        .as_deref()
        .filter(|raw| !raw.is_empty())
        .map(|raw| {
            serde_json::from_str(raw)
                .map_err(|_| AuthError::invalid_request("x_device_info must be a JSON object"))
        })
        .transpose()
}

fn has_scope(scopes: &[String], scope: &str) -> bool {
    scopes.iter().any(|s| s == scope)
}

/// Folds lookup and account failures into `invalid_grant`; store failures
/// keep their identity.
fn invalid_refresh_token(err: AuthError) -> AuthError {
    if err.is_server_error() {
        err
    } else {
        AuthError::invalid_grant(INVALID_REFRESH_TOKEN)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ClientType;

    fn spa() -> ClientConfig {
        ClientConfig::new("spa", vec!["https://spa.example.com/cb".to_string()])
    }

    fn portal() -> ClientConfig {
        let mut client = ClientConfig::new("portal", vec!["https://p.example.com/cb".to_string()]);
        client.client_type = ClientType::ThirdPartyApp;
        client.client_secrets = vec!["s3cret".to_string()];
        client
    }

    fn request(grant_type: &str) -> TokenRequest {
        TokenRequest {
            grant_type: grant_type.to_string(),
            ..TokenRequest::default()
        }
    }

    fn description(result: AuthResult<GrantType>) -> String {
        result.unwrap_err().description()
    }

    #[test]
    fn test_validate_request_per_grant_type() {
        let ctx = TokenRequestContext::default();

        let err = validate_request(&spa(), &request("authorization_code"), &ctx);
        assert_eq!(description(err), "code is required");

        let mut code = request("authorization_code");
        code.code = Some("c".to_string());
        let err = validate_request(&spa(), &code, &ctx);
        assert_eq!(description(err), "PKCE code verifier is required");

        let err = validate_request(&portal(), &code, &ctx).unwrap_err();
        assert_eq!(err.oauth_error_code(), "invalid_client");

        let err = validate_request(&spa(), &request("refresh_token"), &ctx);
        assert_eq!(description(err), "refresh token is required");

        let err = validate_request(
            &spa(),
            &request("urn:keygate:params:oauth:grant-type:anonymous-request"),
            &ctx,
        );
        assert_eq!(description(err), "jwt is required");

        assert_eq!(
            validate_request(&spa(), &request("urn:keygate:params:oauth:grant-type:id-token"), &ctx)
                .unwrap(),
            GrantType::IdToken
        );

        let err = validate_request(&spa(), &request("password"), &ctx).unwrap_err();
        assert_eq!(err.oauth_error_code(), "unsupported_grant_type");
    }

    #[test]
    fn test_basic_credentials_win_over_form() {
        let mut req = request("authorization_code");
        req.client_secret = Some("form".to_string());
        let ctx = TokenRequestContext {
            basic_credentials: Some(crate::oauth::token::ClientCredentials {
                client_id: "portal".to_string(),
                client_secret: "s3cret".to_string(),
            }),
            ..TokenRequestContext::default()
        };
        assert_eq!(client_secret(&req, &ctx), Some("s3cret"));
        assert!(verify_client_secret(&portal(), &req, &ctx).is_ok());

        let err = verify_client_secret(&portal(), &req, &TokenRequestContext::default());
        assert_eq!(err.unwrap_err().description(), "invalid client secret");
    }

    #[test]
    fn test_pkce_rules() {
        let challenge = PkceChallenge::from_verifier("verifier-verifier-verifier-verifier-verifier");

        assert!(verify_pkce(&spa(), Some(&challenge), Some("verifier-verifier-verifier-verifier-verifier")).is_ok());
        assert!(verify_pkce(&spa(), Some(&challenge), Some("wrong")).is_err());
        // First-party clients always need PKCE.
        assert!(verify_pkce(&spa(), None, None).is_err());
        // Third-party clients only when either side brings it.
        assert!(verify_pkce(&portal(), None, None).is_ok());
        assert!(verify_pkce(&portal(), None, Some("v")).is_err());
        assert!(verify_pkce(&portal(), Some(&challenge), None).is_err());
    }

    #[test]
    fn test_parse_device_info() {
        let mut req = request("refresh_token");
        assert!(parse_device_info(&req).unwrap().is_none());
        req.x_device_info = Some(r#"{"model":"pixel"}"#.to_string());
        assert_eq!(parse_device_info(&req).unwrap().unwrap()["model"], "pixel");
        req.x_device_info = Some("not json".to_string());
        assert!(parse_device_info(&req).is_err());
    }

    #[test]
    fn test_invalid_refresh_token_keeps_server_errors() {
        let err = invalid_refresh_token(AuthError::GrantNotFound);
        assert_eq!(err.description(), "invalid refresh token");
        let err = invalid_refresh_token(AuthError::lock_timeout("m"));
        assert!(err.is_server_error());
    }
}
