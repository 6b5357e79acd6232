//! Shared harness for the HTTP flow tests.

#![allow(dead_code)]

use std::sync::Arc;

use axum::{
    Router,
    body::{Body, to_bytes},
    http::{Request, StatusCode, header},
    response::Response,
};
use base64::{Engine, engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD}};
use keygate_auth::config::SigningConfig;
use keygate_auth::storage::{AuthorizationStore, IdpSessionStore};
use keygate_auth::types::{AccessEvent, AccessInfo, Authorization, ClientType, IdpSession};
use keygate_auth::{AuthConfig, AuthServices, ClientConfig, Collaborators, MemoryStore, Stores};
use serde_json::Value;
use sha2::{Digest, Sha256};
use time::{Duration, OffsetDateTime};
use tower::ServiceExt;
use url::Url;

pub const ISSUER: &str = "https://auth.example.com";
pub const SPA_REDIRECT: &str = "https://spa.example.com/callback";
pub const PARTNER_REDIRECT: &str = "https://partner.example.com/callback";
pub const PARTNER_SECRET: &str = "partner-secret";
pub const USER_ID: &str = "user-1";
pub const IDP_SESSION_ID: &str = "idp-session-1";
pub const VERIFIER: &str = "dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk";

pub fn s256(verifier: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()))
}

pub struct TestServer {
    pub services: AuthServices,
    pub store: Arc<MemoryStore>,
    router: Router,
}

impl TestServer {
    pub async fn new() -> Self {
        Self::with_spa_rotation(false).await
    }

    /// Same as [`Self::new`], with refresh token rotation toggled on the
    /// `spa` client.
    pub async fn with_spa_rotation(rotation: bool) -> Self {
        let spa = ClientConfig {
            post_logout_redirect_uris: vec!["https://spa.example.com/bye".to_string()],
            refresh_token_rotation_enabled: rotation,
            ..ClientConfig::new("spa", vec![SPA_REDIRECT.to_string()])
        };
        let partner = ClientConfig {
            client_type: ClientType::ThirdPartyApp,
            client_secrets: vec![PARTNER_SECRET.to_string()],
            ..ClientConfig::new("partner", vec![PARTNER_REDIRECT.to_string()])
        };
        let config = AuthConfig {
            issuer: ISSUER.to_string(),
            clients: vec![spa, partner],
            signing: SigningConfig {
                algorithm: "ES384".to_string(),
                ..Default::default()
            },
            ..Default::default()
        };

        let store = Arc::new(MemoryStore::default());
        let stores = Stores::in_memory(store.clone());
        let collaborators = Collaborators::local(&config, &stores).unwrap();
        let services = AuthServices::build(config, stores, collaborators).unwrap();

        let now = OffsetDateTime::now_utc();
        let event = AccessEvent {
            timestamp: now,
            remote_ip: None,
            user_agent: None,
        };
        store
            .create_idp_session(&IdpSession {
                id: IDP_SESSION_ID.to_string(),
                app_id: services.config.app_id.clone(),
                user_id: USER_ID.to_string(),
                created_at: now,
                authenticated_at: now,
                expire_at: now + Duration::hours(12),
                amr: vec!["pwd".to_string()],
                access_info: AccessInfo::new(event),
            })
            .await
            .unwrap();

        let router = keygate_auth::oauth_router(services.clone());
        Self {
            services,
            store,
            router,
        }
    }

    pub async fn send(&self, request: Request<Body>) -> Response {
        self.router.clone().oneshot(request).await.unwrap()
    }

    /// Grants `scopes` to `client_id` ahead of time, as a consent screen
    /// would.
    pub async fn consent(&self, client_id: &str, scopes: &[&str]) -> Authorization {
        let scopes: Vec<String> = scopes.iter().map(|s| (*s).to_string()).collect();
        let authorization = Authorization::new(
            self.services.config.app_id.clone(),
            client_id,
            USER_ID,
            &scopes,
            OffsetDateTime::now_utc(),
        );
        self.store.create_authorization(&authorization).await.unwrap();
        authorization
    }

    /// Runs a `prompt=none` authorization request in the user's session and
    /// returns the redirect location.
    pub async fn authorize(&self, client_id: &str, redirect_uri: &str, scope: &str) -> Url {
        let mut url = Url::parse("http://localhost/oauth2/authorize").unwrap();
        url.query_pairs_mut()
            .append_pair("client_id", client_id)
            .append_pair("redirect_uri", redirect_uri)
            .append_pair("response_type", "code")
            .append_pair("scope", scope)
            .append_pair("code_challenge", &s256(VERIFIER))
            .append_pair("code_challenge_method", "S256")
            .append_pair("prompt", "none")
            .append_pair("nonce", "n-0S6_WzA2Mj")
            .append_pair("state", "af0ifjsldkj");
        let path_and_query = format!("{}?{}", url.path(), url.query().unwrap_or_default());

        let response = self
            .send(
                Request::get(path_and_query)
                    .header(header::COOKIE, format!("session={IDP_SESSION_ID}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await;
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        let location = response.headers()[header::LOCATION].to_str().unwrap();
        Url::parse(location).unwrap()
    }

    /// Runs [`Self::authorize`] and extracts the code.
    pub async fn code(&self, client_id: &str, redirect_uri: &str, scope: &str) -> String {
        let location = self.authorize(client_id, redirect_uri, scope).await;
        query_param(&location, "code").expect("authorization response carries a code")
    }

    pub async fn token(&self, form: &[(&str, &str)], basic: Option<(&str, &str)>) -> (StatusCode, Value) {
        let body = url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(form)
            .finish();
        let mut request = Request::post("/oauth2/token")
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded");
        if let Some((id, secret)) = basic {
            let encoded = STANDARD.encode(format!("{id}:{secret}"));
            request = request.header(header::AUTHORIZATION, format!("Basic {encoded}"));
        }
        let response = self.send(request.body(Body::from(body)).unwrap()).await;
        let status = response.status();
        (status, json_body(response).await)
    }

    pub async fn exchange_code(&self, code: &str, verifier: &str) -> (StatusCode, Value) {
        self.token(
            &[
                ("grant_type", "authorization_code"),
                ("client_id", "spa"),
                ("code", code),
                ("redirect_uri", SPA_REDIRECT),
                ("code_verifier", verifier),
            ],
            None,
        )
        .await
    }

    pub async fn refresh(&self, refresh_token: &str) -> (StatusCode, Value) {
        self.token(
            &[
                ("grant_type", "refresh_token"),
                ("client_id", "spa"),
                ("refresh_token", refresh_token),
            ],
            None,
        )
        .await
    }

    pub async fn userinfo(&self, access_token: &str) -> Response {
        self.send(
            Request::get("/oauth2/userinfo")
                .header(header::AUTHORIZATION, format!("Bearer {access_token}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
    }

    pub async fn form_post(&self, path: &str, form: &[(&str, &str)]) -> Response {
        let body = url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(form)
            .finish();
        self.send(
            Request::post(path)
                .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
                .body(Body::from(body))
                .unwrap(),
        )
        .await
    }
}

pub fn query_param(url: &Url, name: &str) -> Option<String> {
    url.query_pairs()
        .find(|(key, _)| key == name)
        .map(|(_, value)| value.into_owned())
}

pub async fn json_body(response: Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    if bytes.is_empty() {
        return Value::Null;
    }
    serde_json::from_slice(&bytes).unwrap()
}

pub fn str_field<'a>(value: &'a Value, name: &str) -> &'a str {
    value[name].as_str().unwrap_or_else(|| panic!("missing {name} in {value}"))
}
