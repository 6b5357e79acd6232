//! Authorization endpoint.
//!
//! # Flow
//!
//! 1. Resolve the client and its redirect URI. Failures here are shown to
//!    the user agent; everything later is redirected back to the client.
//! 2. Validate the request (response type, scopes, prompt, PKCE).
//! 3. Resolve `id_token_hint` and the effective prompt.
//! 4. Unless `prompt=none`, send the user agent to the login UI with a
//!    self-referential authorization URL.
//! 5. With `prompt=none`, require the current session, record consent and
//!    respond with a code (`response_type=code`) or nothing (`none`).

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use url::Url;

use crate::AuthResult;
use crate::error::AuthError;
use crate::oauth::authorizations::AuthorizationService;
use crate::oauth::offline_grant_service::OfflineGrantService;
use crate::oauth::pkce::PkceChallenge;
use crate::provider::{LoginUi, ScopeValidator};
use crate::storage::{CodeGrantStore, IdpSessionStore};
use crate::token::codec::{generate_token, hash_token};
use crate::token::issuer::IdTokenIssuer;
use crate::token::jwt::IdTokenClaims;
use crate::types::{
    Authorization, AuthenticationInfo, ClientConfig, ClientResolver, CodeGrant, IdpSession,
    ResponseType, SessionKind, SessionRef,
};

/// Authorization request parameters, from the query string or a form body.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AuthorizationRequest {
    /// Client identifier.
    #[serde(default)]
    pub client_id: String,

    /// Redirect URI. May be omitted when the client has exactly one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redirect_uri: Option<String>,

    /// `code` or `none`.
    #[serde(default)]
    pub response_type: String,

    /// Requested scopes (space-separated).
    #[serde(default)]
    pub scope: String,

    /// PKCE code challenge.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code_challenge: Option<String>,

    /// PKCE code challenge method. Only `S256`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code_challenge_method: Option<String>,

    /// OIDC nonce.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,

    /// Opaque client state, echoed back.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,

    /// Space-separated prompt values.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,

    /// Maximum authentication age in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_age: Option<i64>,

    /// A previously issued ID token.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id_token_hint: Option<String>,

    /// Login hint forwarded to the login UI.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub login_hint: Option<String>,

    /// DPoP key thumbprint the code is bound to (RFC 9449 §10).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dpop_jkt: Option<String>,

    /// Let the resulting offline grant follow the IDP session.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub x_sso_enabled: Option<bool>,
}

impl AuthorizationRequest {
    /// Requested scopes in request order.
    #[must_use]
    pub fn scopes(&self) -> Vec<String> {
        self.scope.split_whitespace().map(str::to_string).collect()
    }

    /// Prompt values in request order.
    #[must_use]
    pub fn prompts(&self) -> Vec<String> {
        self.prompt
            .as_deref()
            .unwrap_or_default()
            .split_whitespace()
            .map(str::to_string)
            .collect()
    }

    /// The URL the login UI returns to once the user is signed in.
    ///
    /// Re-enters the endpoint with `prompt=none`, without `max_age` and
    /// `login_hint`, so the fresh session is used directly.
    fn return_url(&self, issuer: &str) -> AuthResult<Url> {
        let mut again = self.clone();
        again.prompt = Some("none".to_string());
        again.max_age = None;
        again.login_hint = None;

        let mut url = Url::parse(issuer)
            .and_then(|base| base.join("/oauth2/authorize"))
            .map_err(|e| AuthError::configuration(format!("invalid issuer: {e}")))?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("client_id", &again.client_id);
            query.append_pair("response_type", &again.response_type);
            query.append_pair("scope", &again.scope);
            let optional = [
                ("redirect_uri", again.redirect_uri.as_deref()),
                ("code_challenge", again.code_challenge.as_deref()),
                ("code_challenge_method", again.code_challenge_method.as_deref()),
                ("nonce", again.nonce.as_deref()),
                ("state", again.state.as_deref()),
                ("prompt", again.prompt.as_deref()),
                ("id_token_hint", again.id_token_hint.as_deref()),
                ("dpop_jkt", again.dpop_jkt.as_deref()),
            ];
            for (name, value) in optional {
                if let Some(value) = value {
                    query.append_pair(name, value);
                }
            }
            if let Some(sso) = again.x_sso_enabled {
                query.append_pair("x_sso_enabled", if sso { "true" } else { "false" });
            }
        }
        Ok(url)
    }
}

/// Successful authorization response parameters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AuthorizationResponse {
    /// Authorization code. Absent for `response_type=none`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,

    /// Echoed state.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
}

impl AuthorizationResponse {
    /// Builds the redirect URL carrying the response.
    ///
    /// # Errors
    ///
    /// Fails when `redirect_uri` does not parse.
    pub fn to_redirect_url(&self, redirect_uri: &str) -> Result<Url, url::ParseError> {
        let mut url = Url::parse(redirect_uri)?;
        {
            let mut query = url.query_pairs_mut();
            if let Some(code) = &self.code {
                query.append_pair("code", code);
            }
            if let Some(state) = &self.state {
                query.append_pair("state", state);
            }
        }
        Ok(url)
    }
}

/// A failed authorization request.
///
/// Carries the redirect URI only once it was validated against the client.
#[derive(Debug)]
pub struct AuthorizationFailure {
    /// Validated redirect URI, if resolution got that far.
    pub redirect_uri: Option<String>,
    /// Echoed state.
    pub state: Option<String>,
    /// The error.
    pub error: AuthError,
}

impl AuthorizationFailure {
    /// Builds the redirect URL carrying `error`, `error_description` and
    /// `state`. `None` when there is no validated redirect URI.
    #[must_use]
    pub fn to_redirect_url(&self) -> Option<Url> {
        let mut url = Url::parse(self.redirect_uri.as_deref()?).ok()?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("error", self.error.oauth_error_code());
            query.append_pair("error_description", &self.error.description());
            if let Some(state) = &self.state {
                query.append_pair("state", state);
            }
        }
        Some(url)
    }
}

/// Result of an authorization request.
#[derive(Debug)]
pub enum AuthorizationOutcome {
    /// Redirect to the client with a response.
    Respond {
        /// Validated redirect URI.
        redirect_uri: String,
        /// Response parameters.
        response: AuthorizationResponse,
    },
    /// Hand the user agent over to the login UI.
    Login {
        /// Login UI URL.
        location: Url,
    },
    /// The request failed.
    Failed(AuthorizationFailure),
}

/// What the endpoint knows about the user agent.
#[derive(Debug, Clone, Default)]
pub struct AuthorizationContext {
    /// IDP session from the session cookie.
    pub session: Option<IdpSession>,
}

/// Collaborators of the [`AuthorizationHandler`].
#[derive(Clone)]
pub struct AuthorizationHandlerDeps {
    /// Tenant.
    pub app_id: String,
    /// Issuer URL the endpoint is served under.
    pub issuer: String,
    /// Authorization code lifetime.
    pub code_lifetime: Duration,
    /// Client registrations.
    pub clients: Arc<dyn ClientResolver>,
    /// Scope policy.
    pub scopes: Arc<dyn ScopeValidator>,
    /// Login UI.
    pub login_ui: Arc<dyn LoginUi>,
    /// Consent records.
    pub authorizations: AuthorizationService,
    /// Authorization codes.
    pub code_grants: Arc<dyn CodeGrantStore>,
    /// IDP sessions, for `id_token_hint`.
    pub idp_sessions: Arc<dyn IdpSessionStore>,
    /// Offline grants, for `id_token_hint`.
    pub offline_grants: OfflineGrantService,
    /// ID token verification.
    pub id_tokens: IdTokenIssuer,
}

/// The session an `id_token_hint` points at.
#[derive(Debug, Clone)]
struct HintedSession {
    session: SessionRef,
    authentication_info: AuthenticationInfo,
}

/// Handles `GET/POST /oauth2/authorize`.
#[derive(Clone)]
pub struct AuthorizationHandler {
    deps: AuthorizationHandlerDeps,
}

impl AuthorizationHandler {
    /// Creates the handler.
    #[must_use]
    pub fn new(deps: AuthorizationHandlerDeps) -> Self {
        Self { deps }
    }

    /// Handles an authorization request.
    pub async fn handle(
        &self,
        request: &AuthorizationRequest,
        ctx: &AuthorizationContext,
    ) -> AuthorizationOutcome {
        let fail = |redirect_uri: Option<String>, error: AuthError| {
            AuthorizationOutcome::Failed(AuthorizationFailure {
                redirect_uri,
                state: request.state.clone().filter(|s| !s.is_empty()),
                error,
            })
        };

        let Some(client) = self.deps.clients.resolve_client(&request.client_id) else {
            return fail(None, AuthError::unauthorized_client("invalid client ID"));
        };
        let Some(redirect_uri) = client.resolve_redirect_uri(request.redirect_uri.as_deref())
        else {
            return fail(None, AuthError::invalid_request("redirect URI is not allowed"));
        };

        match self.authorize(&client, &redirect_uri, request, ctx).await {
            Ok(outcome) => outcome,
            Err(error) => {
                if error.is_server_error() {
                    tracing::error!(client_id = %client.client_id, error = %error, "authorization failed");
                } else {
                    tracing::debug!(client_id = %client.client_id, error = %error, "authorization rejected");
                }
                fail(Some(redirect_uri), error)
            }
        }
    }

    async fn authorize(
        &self,
        client: &ClientConfig,
        redirect_uri: &str,
        request: &AuthorizationRequest,
        ctx: &AuthorizationContext,
    ) -> AuthResult<AuthorizationOutcome> {
        let (response_type, pkce) = validate_request(client, request)?;
        let scopes = request.scopes();
        self.deps.scopes.validate_scopes(client, &scopes)?;

        let (hint_claims, hint_session) = self.resolve_id_token_hint(client, request).await?;
        let now = OffsetDateTime::now_utc();
        let hint_auth = hint_session.as_ref().map(|s| &s.authentication_info);
        let current_auth = ctx.session.as_ref().map(IdpSession::authentication_info);
        let prompts = resolve_prompt(
            request.prompts(),
            request.max_age,
            hint_auth.or(current_auth.as_ref()),
            now,
        );

        if request.login_hint.is_some() || !prompts.iter().any(|p| p == "none") {
            let return_to = request.return_url(&self.deps.issuer)?;
            let location = self
                .deps
                .login_ui
                .login_redirect(return_to.as_str(), request.login_hint.as_deref())?;
            tracing::debug!(client_id = %client.client_id, "redirecting to login UI");
            return Ok(AuthorizationOutcome::Login { location });
        }

        let session = ctx
            .session
            .as_ref()
            .filter(|s| !s.is_expired(now))
            .ok_or_else(|| AuthError::login_required("authentication required"))?;
        if let Some(claims) = &hint_claims
            && claims.sub != session.user_id
        {
            return Err(AuthError::login_required("authentication required"));
        }

        let authorization = self
            .check_authorization(client, &session.user_id, &scopes)
            .await?;

        let mut response = AuthorizationResponse {
            code: None,
            state: request.state.clone().filter(|s| !s.is_empty()),
        };
        if response_type == ResponseType::Code {
            let id_token_hint_sid = hint_session
                .as_ref()
                .map(|s| s.session.encode_sid())
                .unwrap_or_else(|| session.session_ref().encode_sid());
            let code = self
                .create_code_grant(CodeGrantParams {
                    client,
                    redirect_uri,
                    request,
                    session,
                    authorization: &authorization,
                    id_token_hint_sid,
                    scopes,
                    pkce,
                    now,
                })
                .await?;
            response.code = Some(code);
        }

        Ok(AuthorizationOutcome::Respond {
            redirect_uri: redirect_uri.to_string(),
            response,
        })
    }

    /// First-party clients are granted consent implicitly. Third-party
    /// clients need an existing authorization covering the scopes.
    async fn check_authorization(
        &self,
        client: &ClientConfig,
        user_id: &str,
        scopes: &[String],
    ) -> AuthResult<Authorization> {
        if client.is_first_party() {
            return self
                .deps
                .authorizations
                .check_and_grant(&client.client_id, user_id, scopes)
                .await;
        }

        let authorization = self
            .deps
            .authorizations
            .get(user_id, &client.client_id)
            .await?
            .ok_or_else(|| AuthError::access_denied("authorization required"))?;
        if !authorization.is_authorized(scopes) {
            return Err(AuthError::access_denied("requested scopes are not granted"));
        }
        Ok(authorization)
    }

    async fn create_code_grant(&self, params: CodeGrantParams<'_>) -> AuthResult<String> {
        let code = generate_token();
        let grant = CodeGrant {
            app_id: self.deps.app_id.clone(),
            authorization_id: params.authorization.id.clone(),
            client_id: params.client.client_id.clone(),
            idp_session_id: Some(params.session.id.clone()),
            authentication_info: params.session.authentication_info(),
            id_token_hint_sid: Some(params.id_token_hint_sid),
            created_at: params.now,
            expire_at: params.now + self.deps.code_lifetime,
            scopes: params.scopes,
            code_hash: hash_token(&code),
            redirect_uri: params.redirect_uri.to_string(),
            oidc_nonce: params.request.nonce.clone(),
            pkce_challenge: params.pkce,
            sso_enabled: params.request.x_sso_enabled.unwrap_or(false),
            dpop_jkt: params.request.dpop_jkt.clone(),
        };
        self.deps.code_grants.create_code_grant(&grant).await?;
        tracing::debug!(client_id = %grant.client_id, "issued authorization code");
        Ok(code)
    }

    /// Verifies the hint and looks up the session named by its `sid`. A
    /// `sid` naming a dead session resolves to no session.
    async fn resolve_id_token_hint(
        &self,
        client: &ClientConfig,
        request: &AuthorizationRequest,
    ) -> AuthResult<(Option<IdTokenClaims>, Option<HintedSession>)> {
        let Some(hint) = request.id_token_hint.as_deref().filter(|h| !h.is_empty()) else {
            return Ok((None, None));
        };
        let claims = self.deps.id_tokens.verify_id_token_hint(hint)?;
        if claims.aud != client.client_id {
            return Err(AuthError::invalid_request("invalid id_token_hint"));
        }

        let Some(sid) = claims.sid.as_deref().and_then(SessionRef::decode_sid) else {
            return Ok((Some(claims), None));
        };
        let session = match sid.kind {
            SessionKind::IdpSession => self
                .deps
                .idp_sessions
                .get_idp_session(&sid.id)
                .await?
                .filter(|s| !s.is_expired(OffsetDateTime::now_utc()))
                .map(|s| HintedSession {
                    session: s.session_ref(),
                    authentication_info: s.authentication_info(),
                }),
            SessionKind::OfflineGrant => {
                match self.deps.offline_grants.get_offline_grant(&sid.id).await {
                    Ok(grant) => Some(HintedSession {
                        session: grant.session_ref(),
                        authentication_info: grant.authentication_info(),
                    }),
                    Err(e) if e.is_server_error() => return Err(e),
                    Err(_) => None,
                }
            }
        };
        Ok((Some(claims), session))
    }
}

struct CodeGrantParams<'a> {
    client: &'a ClientConfig,
    redirect_uri: &'a str,
    request: &'a AuthorizationRequest,
    session: &'a IdpSession,
    authorization: &'a Authorization,
    id_token_hint_sid: String,
    scopes: Vec<String>,
    pkce: Option<PkceChallenge>,
    now: OffsetDateTime,
}

/// Validates response type, scopes, prompt and PKCE parameters.
fn validate_request(
    client: &ClientConfig,
    request: &AuthorizationRequest,
) -> AuthResult<(ResponseType, Option<PkceChallenge>)> {
    let response_type = ResponseType::parse(&request.response_type)
        .ok_or_else(|| AuthError::unsupported_response_type(request.response_type.clone()))?;
    if !client.is_response_type_allowed(response_type) {
        return Err(AuthError::unauthorized_client(
            "response type is not allowed for this client",
        ));
    }

    if request.scope.split_whitespace().next().is_none() {
        return Err(AuthError::invalid_request("scope is required"));
    }

    let prompts = request.prompts();
    if prompts.iter().any(|p| p == "none") {
        if prompts.len() != 1 {
            return Err(AuthError::invalid_request(
                "prompt cannot have other values when none is set",
            ));
        }
        if request.max_age.is_some() {
            return Err(AuthError::invalid_request(
                "max_age could imply prompt=login so max_age cannot be present when prompt=none",
            ));
        }
    }

    let pkce = match response_type {
        ResponseType::Code => Some(PkceChallenge::from_request(
            request.code_challenge.as_deref(),
            request.code_challenge_method.as_deref(),
        )?),
        ResponseType::None => None,
    };

    Ok((response_type, pkce))
}

/// Adds `login` to the prompt when `max_age` demands a fresh login: with no
/// session, with `max_age=0`, or when the last authentication is older than
/// `max_age`. A negative elapsed time counts as too old.
fn resolve_prompt(
    mut prompts: Vec<String>,
    max_age: Option<i64>,
    session: Option<&AuthenticationInfo>,
    now: OffsetDateTime,
) -> Vec<String> {
    let Some(max_age) = max_age else {
        return prompts;
    };
    let implies_login = match session {
        None => true,
        Some(_) if max_age == 0 => true,
        Some(info) => {
            let elapsed = now - info.authenticated_at;
            elapsed.is_negative() || elapsed > time::Duration::seconds(max_age)
        }
    };
    if implies_login && !prompts.iter().any(|p| p == "login") {
        prompts.push("login".to_string());
    }
    prompts
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ClientType;

    fn client() -> ClientConfig {
        ClientConfig::new("spa", vec!["https://spa.example.com/cb".to_string()])
    }

    fn request() -> AuthorizationRequest {
        AuthorizationRequest {
            client_id: "spa".to_string(),
            response_type: "code".to_string(),
            scope: "openid offline_access".to_string(),
            code_challenge: Some(PkceChallenge::from_verifier("v").challenge),
            code_challenge_method: Some("S256".to_string()),
            ..AuthorizationRequest::default()
        }
    }

    fn info(authenticated_at: OffsetDateTime) -> AuthenticationInfo {
        AuthenticationInfo {
            user_id: "user-1".to_string(),
            authenticated_at,
            amr: vec!["pwd".to_string()],
            authenticated_by: None,
        }
    }

    #[test]
    fn test_validate_request_accepts_code_with_pkce() {
        let (rt, pkce) = validate_request(&client(), &request()).unwrap();
        assert_eq!(rt, ResponseType::Code);
        assert!(pkce.is_some());
    }

    #[test]
    fn test_validate_request_rejections() {
        let mut req = request();
        req.response_type = "token".to_string();
        let err = validate_request(&client(), &req).unwrap_err();
        assert_eq!(err.oauth_error_code(), "unsupported_response_type");

        let mut req = request();
        req.response_type = "none".to_string();
        let err = validate_request(&client(), &req).unwrap_err();
        assert_eq!(err.oauth_error_code(), "unauthorized_client");

        let mut req = request();
        req.scope = "  ".to_string();
        assert_eq!(
            validate_request(&client(), &req).unwrap_err().description(),
            "scope is required"
        );

        let mut req = request();
        req.prompt = Some("none login".to_string());
        assert!(validate_request(&client(), &req).is_err());

        let mut req = request();
        req.prompt = Some("none".to_string());
        req.max_age = Some(10);
        assert!(validate_request(&client(), &req).is_err());

        let mut req = request();
        req.code_challenge = None;
        assert_eq!(
            validate_request(&client(), &req).unwrap_err().description(),
            "PKCE code challenge is required"
        );

        let mut req = request();
        req.code_challenge_method = Some("plain".to_string());
        assert_eq!(
            validate_request(&client(), &req).unwrap_err().oauth_error_code(),
            "invalid_request"
        );
    }

    #[test]
    fn test_response_type_none_needs_no_pkce() {
        let mut c = client();
        c.client_type = ClientType::Native;
        c.response_types.push(ResponseType::None);
        let mut req = request();
        req.response_type = "none".to_string();
        req.code_challenge = None;
        let (rt, pkce) = validate_request(&c, &req).unwrap();
        assert_eq!(rt, ResponseType::None);
        assert!(pkce.is_none());
    }

    #[test]
    fn test_resolve_prompt_max_age() {
        let now = OffsetDateTime::now_utc();
        let recent = info(now - time::Duration::seconds(30));

        assert!(resolve_prompt(vec![], None, None, now).is_empty());
        assert_eq!(resolve_prompt(vec![], Some(60), None, now), vec!["login"]);
        assert_eq!(resolve_prompt(vec![], Some(0), Some(&recent), now), vec!["login"]);
        assert!(resolve_prompt(vec![], Some(60), Some(&recent), now).is_empty());
        assert_eq!(resolve_prompt(vec![], Some(10), Some(&recent), now), vec!["login"]);

        let future = info(now + time::Duration::seconds(30));
        assert_eq!(resolve_prompt(vec![], Some(60), Some(&future), now), vec!["login"]);

        // No duplicate login.
        assert_eq!(
            resolve_prompt(vec!["login".to_string()], Some(0), Some(&recent), now),
            vec!["login"]
        );
    }

    #[test]
    fn test_return_url_forces_prompt_none() {
        let mut req = request();
        req.state = Some("xyz".to_string());
        req.max_age = Some(0);
        req.login_hint = Some("alice".to_string());
        req.prompt = Some("login".to_string());

        let url = req.return_url("https://auth.example.com").unwrap();
        assert_eq!(url.path(), "/oauth2/authorize");
        let pairs: std::collections::HashMap<_, _> = url.query_pairs().into_owned().collect();
        assert_eq!(pairs["prompt"], "none");
        assert_eq!(pairs["state"], "xyz");
        assert!(!pairs.contains_key("max_age"));
        assert!(!pairs.contains_key("login_hint"));
    }

    #[test]
    fn test_failure_redirect_url() {
        let failure = AuthorizationFailure {
            redirect_uri: Some("https://spa.example.com/cb".to_string()),
            state: Some("s".to_string()),
            error: AuthError::login_required("authentication required"),
        };
        let url = failure.to_redirect_url().unwrap();
        let pairs: std::collections::HashMap<_, _> = url.query_pairs().into_owned().collect();
        assert_eq!(pairs["error"], "login_required");
        assert_eq!(pairs["state"], "s");

        let unredirectable = AuthorizationFailure {
            redirect_uri: None,
            state: None,
            error: AuthError::unauthorized_client("invalid client ID"),
        };
        assert!(unredirectable.to_redirect_url().is_none());
    }
}
