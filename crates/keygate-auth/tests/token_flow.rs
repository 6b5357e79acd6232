//! Token endpoint flows driven through the HTTP router.

mod common;

use axum::http::{StatusCode, header};
use common::*;

#[tokio::test]
async fn test_authorization_code_exchange_issues_tokens() {
    let server = TestServer::new().await;
    let location = server
        .authorize("spa", SPA_REDIRECT, "openid offline_access")
        .await;
    assert!(location.as_str().starts_with(SPA_REDIRECT));
    assert_eq!(query_param(&location, "state").as_deref(), Some("af0ifjsldkj"));
    let code = query_param(&location, "code").unwrap();

    let (status, body) = server.exchange_code(&code, VERIFIER).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(str_field(&body, "token_type"), "Bearer");
    assert!(!str_field(&body, "access_token").is_empty());
    assert!(!str_field(&body, "id_token").is_empty());
    assert!(str_field(&body, "refresh_token").contains('.'));
    assert_eq!(body["expires_in"], 1800);
}

#[tokio::test]
async fn test_code_is_single_use() {
    let server = TestServer::new().await;
    let code = server.code("spa", SPA_REDIRECT, "openid").await;

    let (status, _) = server.exchange_code(&code, VERIFIER).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = server.exchange_code(&code, VERIFIER).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(str_field(&body, "error"), "invalid_grant");
}

#[tokio::test]
async fn test_wrong_pkce_verifier_is_invalid_grant() {
    let server = TestServer::new().await;
    let code = server.code("spa", SPA_REDIRECT, "openid").await;

    let wrong = "x".repeat(43);
    let (status, body) = server.exchange_code(&code, &wrong).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(str_field(&body, "error"), "invalid_grant");
    assert_eq!(str_field(&body, "error_description"), "invalid authorization code");
}

#[tokio::test]
async fn test_failed_exchange_leaves_code_usable() {
    let server = TestServer::new().await;
    let code = server.code("spa", SPA_REDIRECT, "openid").await;

    let (status, _) = server.exchange_code(&code, &"y".repeat(43)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let (status, body) = server.exchange_code(&code, VERIFIER).await;
    assert_eq!(status, StatusCode::OK, "{body}");

    let (status, _) = server.exchange_code(&code, VERIFIER).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_refresh_token_of_unknown_grant() {
    let server = TestServer::new().await;
    let (status, body) = server.refresh("no-such-grant.secret").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(str_field(&body, "error"), "invalid_grant");
}

#[tokio::test]
async fn test_refresh_token_grant() {
    let server = TestServer::new().await;
    let code = server.code("spa", SPA_REDIRECT, "openid offline_access").await;
    let (_, tokens) = server.exchange_code(&code, VERIFIER).await;
    let refresh_token = str_field(&tokens, "refresh_token");

    let (status, body) = server.refresh(refresh_token).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert!(!str_field(&body, "access_token").is_empty());
    assert_ne!(str_field(&body, "access_token"), str_field(&tokens, "access_token"));
}

#[tokio::test]
async fn test_third_party_without_offline_access_gets_no_refresh_token() {
    let server = TestServer::new().await;
    server.consent("partner", &["openid"]).await;
    let code = server.code("partner", PARTNER_REDIRECT, "openid").await;

    let (status, body) = server
        .token(
            &[
                ("grant_type", "authorization_code"),
                ("code", &code),
                ("redirect_uri", PARTNER_REDIRECT),
                ("code_verifier", VERIFIER),
            ],
            Some(("partner", PARTNER_SECRET)),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert!(body["access_token"].is_string());
    assert!(body.get("refresh_token").is_none());
}

#[tokio::test]
async fn test_third_party_needs_consent() {
    let server = TestServer::new().await;
    let location = server.authorize("partner", PARTNER_REDIRECT, "openid").await;
    assert_eq!(query_param(&location, "error").as_deref(), Some("access_denied"));
    assert!(query_param(&location, "code").is_none());
}

#[tokio::test]
async fn test_third_party_wrong_secret() {
    let server = TestServer::new().await;
    server.consent("partner", &["openid"]).await;
    let code = server.code("partner", PARTNER_REDIRECT, "openid").await;

    let (status, body) = server
        .token(
            &[
                ("grant_type", "authorization_code"),
                ("code", &code),
                ("redirect_uri", PARTNER_REDIRECT),
                ("code_verifier", VERIFIER),
            ],
            Some(("partner", "guess")),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(str_field(&body, "error"), "invalid_request");
}

#[tokio::test]
async fn test_unknown_client_and_grant_type() {
    let server = TestServer::new().await;

    let (status, body) = server
        .token(&[("grant_type", "refresh_token"), ("client_id", "nobody")], None)
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(str_field(&body, "error"), "invalid_client");

    let (status, body) = server
        .token(&[("grant_type", "password"), ("client_id", "spa")], None)
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(str_field(&body, "error"), "unsupported_grant_type");
}

#[tokio::test]
async fn test_token_responses_are_not_cached() {
    let server = TestServer::new().await;
    let body = url::form_urlencoded::Serializer::new(String::new())
        .append_pair("grant_type", "refresh_token")
        .append_pair("client_id", "spa")
        .append_pair("refresh_token", "a.b")
        .finish();
    let response = server
        .send(
            axum::http::Request::post("/oauth2/token")
                .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
                .body(axum::body::Body::from(body))
                .unwrap(),
        )
        .await;
    assert_eq!(response.headers()[header::CACHE_CONTROL], "no-store");
    assert_eq!(response.headers()[header::PRAGMA], "no-cache");
}

#[tokio::test]
async fn test_authorize_without_session_requires_login() {
    let server = TestServer::new().await;
    let response = server
        .send(
            axum::http::Request::get(format!(
                "/oauth2/authorize?client_id=spa&response_type=code&scope=openid\
                 &code_challenge={}&code_challenge_method=S256&prompt=none",
                s256(VERIFIER)
            ))
            .body(axum::body::Body::empty())
            .unwrap(),
        )
        .await;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    let location = url::Url::parse(response.headers()[header::LOCATION].to_str().unwrap()).unwrap();
    assert_eq!(query_param(&location, "error").as_deref(), Some("login_required"));
}

#[tokio::test]
async fn test_authorize_unknown_client_is_not_redirected() {
    let server = TestServer::new().await;
    let response = server
        .send(
            axum::http::Request::get("/oauth2/authorize?client_id=nobody&response_type=code")
                .body(axum::body::Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = json_body(response).await;
    assert_eq!(str_field(&body, "error"), "unauthorized_client");
}
