//! Integration tests for the Redis store.
//!
//! Tests use testcontainers to spin up a real Redis instance shared by the
//! whole file.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use keygate_auth::config::LockConfig;
use keygate_auth::error::AuthError;
use keygate_auth::storage::{
    AuthorizationStore, ChallengeStore, CodeGrantStore, IdpSessionStore, OfflineGrantStore,
};
use keygate_auth::types::{
    AccessEvent, AccessInfo, AuthenticationInfo, Authorization, Challenge, ChallengePurpose,
    CodeGrant, IdpSession, OfflineGrant, OfflineGrantRefreshToken,
};
use keygate_auth_redis::{RedisMutex, RedisStore, create_pool};
use testcontainers::{ContainerAsync, runners::AsyncRunner};
use testcontainers_modules::redis::Redis;
use time::{Duration, OffsetDateTime};
use tokio::sync::OnceCell;

static SHARED_REDIS: OnceCell<(ContainerAsync<Redis>, String)> = OnceCell::const_new();

async fn redis_url() -> String {
    let (_, url) = SHARED_REDIS
        .get_or_init(|| async {
            let container = Redis::default()
                .start()
                .await
                .expect("start redis container");
            let port = container.get_host_port_ipv4(6379).await.expect("get port");
            (container, format!("redis://127.0.0.1:{port}"))
        })
        .await;
    url.clone()
}

fn lock_config() -> LockConfig {
    LockConfig {
        acquire_timeout: StdDuration::from_millis(300),
        lease: StdDuration::from_secs(5),
        retry_interval: StdDuration::from_millis(20),
    }
}

/// Each test gets its own application namespace.
async fn store() -> RedisStore {
    let pool = create_pool(&redis_url().await, 8, StdDuration::from_secs(2)).unwrap();
    RedisStore::new(pool, uuid::Uuid::new_v4().to_string(), lock_config())
}

fn event(at: OffsetDateTime) -> AccessEvent {
    AccessEvent {
        timestamp: at,
        remote_ip: Some("203.0.113.7".to_string()),
        user_agent: None,
    }
}

fn refresh_token(hash: &str, at: OffsetDateTime) -> OfflineGrantRefreshToken {
    OfflineGrantRefreshToken {
        token_hash: hash.to_string(),
        rotated_token_hash: None,
        rotated_at: None,
        client_id: "spa".to_string(),
        created_at: at,
        scopes: vec!["openid".to_string(), "offline_access".to_string()],
        authorization_id: "authz-1".to_string(),
        dpop_jkt: None,
        access_info: Some(AccessInfo::new(event(at))),
        expire_at: None,
    }
}

fn offline_grant(id: &str, user_id: &str) -> OfflineGrant {
    let now = OffsetDateTime::now_utc();
    OfflineGrant {
        app_id: "app".to_string(),
        id: id.to_string(),
        initial_client_id: "spa".to_string(),
        authorization_id: "authz-1".to_string(),
        idp_session_id: None,
        identity_id: None,
        created_at: now,
        authenticated_at: now,
        scopes: vec!["openid".to_string(), "offline_access".to_string()],
        user_id: user_id.to_string(),
        amr: vec!["pwd".to_string()],
        access_info: AccessInfo::new(event(now)),
        device_info: None,
        sso_enabled: false,
        app2app_device_key_jwk_json: None,
        participated_saml_service_provider_ids: Vec::new(),
        refresh_tokens: vec![refresh_token("root-hash", now)],
        expire_at: now + Duration::days(30),
    }
}

/// Raw connection for seeding keys the store would never write itself.
async fn raw_connection() -> redis::aio::MultiplexedConnection {
    redis::Client::open(redis_url().await)
        .unwrap()
        .get_multiplexed_async_connection()
        .await
        .unwrap()
}

fn in_a_day() -> OffsetDateTime {
    OffsetDateTime::now_utc() + Duration::days(1)
}

// ============================================================================
// Short-lived grants
// ============================================================================

#[tokio::test]
async fn test_code_grant_lifecycle() {
    let store = store().await;
    let now = OffsetDateTime::now_utc();
    let grant = CodeGrant {
        app_id: store.keys().app_id().to_string(),
        authorization_id: "authz-1".to_string(),
        client_id: "spa".to_string(),
        idp_session_id: Some("idp-1".to_string()),
        authentication_info: AuthenticationInfo {
            user_id: "user-1".to_string(),
            authenticated_at: now,
            amr: vec!["pwd".to_string()],
            authenticated_by: None,
        },
        id_token_hint_sid: None,
        created_at: now,
        expire_at: now + Duration::minutes(5),
        scopes: vec!["openid".to_string()],
        code_hash: "code-hash".to_string(),
        redirect_uri: "https://spa.example.com/callback".to_string(),
        oidc_nonce: None,
        pkce_challenge: None,
        sso_enabled: false,
        dpop_jkt: None,
    };

    store.create_code_grant(&grant).await.unwrap();
    assert!(store.create_code_grant(&grant).await.is_err());

    let loaded = store.get_code_grant("code-hash").await.unwrap().unwrap();
    assert_eq!(loaded.client_id, "spa");
    assert_eq!(loaded.idp_session_id.as_deref(), Some("idp-1"));

    store.delete_code_grant(&grant).await.unwrap();
    assert!(store.get_code_grant("code-hash").await.unwrap().is_none());
}

#[tokio::test]
async fn test_challenge_is_single_use() {
    let store = store().await;
    let now = OffsetDateTime::now_utc();
    let challenge = Challenge {
        token: "nonce".to_string(),
        purpose: ChallengePurpose::BiometricRequest,
        created_at: now,
        expire_at: now + Duration::minutes(5),
    };
    store.create_challenge(&challenge).await.unwrap();

    let consumed = store.consume_challenge("nonce").await.unwrap().unwrap();
    assert_eq!(consumed.purpose, ChallengePurpose::BiometricRequest);
    assert!(store.consume_challenge("nonce").await.unwrap().is_none());
}

#[tokio::test]
async fn test_expired_record_vanishes() {
    let store = store().await;
    let now = OffsetDateTime::now_utc();
    let challenge = Challenge {
        token: "stale".to_string(),
        purpose: ChallengePurpose::AnonymousRequest,
        created_at: now - Duration::minutes(10),
        expire_at: now - Duration::minutes(5),
    };
    store.create_challenge(&challenge).await.unwrap();
    tokio::time::sleep(StdDuration::from_millis(20)).await;
    assert!(store.consume_challenge("stale").await.unwrap().is_none());
}

// ============================================================================
// Offline grants
// ============================================================================

#[tokio::test]
async fn test_offline_grant_create_and_list() {
    let store = store().await;
    store
        .create_offline_grant(&offline_grant("g1", "user-1"), in_a_day())
        .await
        .unwrap();
    store
        .create_offline_grant(&offline_grant("g2", "user-1"), in_a_day())
        .await
        .unwrap();
    store
        .create_offline_grant(&offline_grant("g3", "user-2"), in_a_day())
        .await
        .unwrap();

    let mut ids: Vec<String> = store
        .list_offline_grants("user-1")
        .await
        .unwrap()
        .into_iter()
        .map(|g| g.id)
        .collect();
    ids.sort();
    assert_eq!(ids, vec!["g1", "g2"]);

    let duplicate = store
        .create_offline_grant(&offline_grant("g1", "user-1"), in_a_day())
        .await;
    assert!(duplicate.is_err());
}

#[tokio::test]
async fn test_list_prunes_deleted_grants() {
    let store = store().await;
    let grant = offline_grant("g1", "user-1");
    store.create_offline_grant(&grant, in_a_day()).await.unwrap();
    store.delete_offline_grant(&grant).await.unwrap();

    assert!(store.get_offline_grant("g1").await.unwrap().is_none());
    assert!(store.list_offline_grants("user-1").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_update_with_mutator() {
    let store = store().await;
    store
        .create_offline_grant(&offline_grant("g1", "user-1"), in_a_day())
        .await
        .unwrap();

    let updated = store
        .update_offline_grant_with_mutator(
            "g1",
            Box::new(|grant| {
                grant
                    .refresh_tokens
                    .push(refresh_token("second", grant.created_at));
                grant.device_info = Some(serde_json::json!({"model": "pixel"}));
                Ok(grant.created_at + Duration::hours(2))
            }),
        )
        .await
        .unwrap()
        .unwrap();
    assert_eq!(updated.refresh_tokens.len(), 2);
    assert_eq!(updated.expire_at, updated.created_at + Duration::hours(2));

    let stored = store.get_offline_grant("g1").await.unwrap().unwrap();
    assert_eq!(stored.refresh_tokens.len(), 2);
    assert_eq!(stored.device_info, Some(serde_json::json!({"model": "pixel"})));
    assert_eq!(stored.expire_at, updated.expire_at);
}

#[tokio::test]
async fn test_create_survives_broken_user_index() {
    let store = store().await;
    let mut conn = raw_connection().await;
    // A string where the index hash belongs makes HSET fail with WRONGTYPE.
    let _: () = redis::cmd("SET")
        .arg(store.keys().offline_grant_list("user-1"))
        .arg("not-a-hash")
        .query_async(&mut conn)
        .await
        .unwrap();

    let grant = offline_grant("g1", "user-1");
    store.create_offline_grant(&grant, in_a_day()).await.unwrap();
    assert!(store.get_offline_grant("g1").await.unwrap().is_some());
}

#[tokio::test]
async fn test_update_removing_last_token_deletes_grant() {
    let store = store().await;
    store
        .create_offline_grant(&offline_grant("g1", "user-1"), in_a_day())
        .await
        .unwrap();

    let result = store
        .update_offline_grant_with_mutator(
            "g1",
            Box::new(|grant| {
                grant.refresh_tokens.clear();
                Ok(grant.created_at + Duration::hours(2))
            }),
        )
        .await
        .unwrap();
    assert!(result.is_none());
    assert!(store.get_offline_grant("g1").await.unwrap().is_none());
    assert!(store.list_offline_grants("user-1").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_update_missing_grant() {
    let store = store().await;
    let result = store
        .update_offline_grant_with_mutator("missing", Box::new(|_| Ok(in_a_day())))
        .await;
    assert!(matches!(result, Err(AuthError::GrantNotFound)));
}

#[tokio::test]
async fn test_mutator_error_leaves_grant_untouched() {
    let store = store().await;
    store
        .create_offline_grant(&offline_grant("g1", "user-1"), in_a_day())
        .await
        .unwrap();

    let result = store
        .update_offline_grant_with_mutator(
            "g1",
            Box::new(|grant| {
                grant.refresh_tokens.clear();
                Err(AuthError::invalid_grant("nope"))
            }),
        )
        .await;
    assert!(result.is_err());
    let stored = store.get_offline_grant("g1").await.unwrap().unwrap();
    assert_eq!(stored.refresh_tokens.len(), 1);
}

#[tokio::test]
async fn test_concurrent_updates_do_not_lose_writes() {
    let store = Arc::new(store().await);
    store
        .create_offline_grant(&offline_grant("g1", "user-1"), in_a_day())
        .await
        .unwrap();

    let mut tasks = Vec::new();
    for i in 0..8 {
        let store = store.clone();
        tasks.push(tokio::spawn(async move {
            store
                .update_offline_grant_with_mutator(
                    "g1",
                    Box::new(move |grant| {
                        grant
                            .participated_saml_service_provider_ids
                            .push(format!("sp-{i}"));
                        Ok(grant.created_at + Duration::days(1))
                    }),
                )
                .await
        }));
    }
    for task in tasks {
        task.await.unwrap().unwrap();
    }

    let stored = store.get_offline_grant("g1").await.unwrap().unwrap();
    assert_eq!(stored.participated_saml_service_provider_ids.len(), 8);
}

#[tokio::test]
async fn test_held_mutex_times_out() {
    let store = store().await;
    store
        .create_offline_grant(&offline_grant("g1", "user-1"), in_a_day())
        .await
        .unwrap();

    let pool = create_pool(&redis_url().await, 2, StdDuration::from_secs(2)).unwrap();
    let mutex = RedisMutex::new(pool, lock_config());
    let guard = mutex
        .acquire(&store.keys().offline_grant_mutex("g1"))
        .await
        .unwrap();

    let result = store
        .update_offline_grant_with_mutator("g1", Box::new(|_| Ok(in_a_day())))
        .await;
    assert!(matches!(result, Err(AuthError::LockTimeout { .. })));

    guard.release().await;
    let result = store
        .update_offline_grant_with_mutator("g1", Box::new(|_| Ok(in_a_day())))
        .await;
    assert!(result.is_ok());
}

// ============================================================================
// Consent and IDP sessions
// ============================================================================

#[tokio::test]
async fn test_authorization_lifecycle() {
    let store = store().await;
    let now = OffsetDateTime::now_utc();
    let mut authorization =
        Authorization::new("app", "spa", "user-1", &["openid".to_string()], now);
    store.create_authorization(&authorization).await.unwrap();

    let duplicate = Authorization::new("app", "spa", "user-1", &["openid".to_string()], now);
    assert!(matches!(
        store.create_authorization(&duplicate).await,
        Err(AuthError::AuthorizationExists)
    ));

    authorization.merge_scopes(&["offline_access".to_string()], now);
    store.update_authorization(&authorization).await.unwrap();

    let loaded = store
        .get_authorization("user-1", "spa")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(loaded.id, authorization.id);
    assert!(loaded.scopes.contains(&"offline_access".to_string()));
    assert_eq!(store.list_authorizations("user-1").await.unwrap().len(), 1);

    store.delete_authorization(&authorization.id).await.unwrap();
    assert!(store.get_authorization("user-1", "spa").await.unwrap().is_none());
    assert!(
        store
            .get_authorization_by_id(&authorization.id)
            .await
            .unwrap()
            .is_none()
    );
    assert!(matches!(
        store.update_authorization(&authorization).await,
        Err(AuthError::AuthorizationNotFound)
    ));
}

#[tokio::test]
async fn test_authorization_claim_without_record_is_taken_over() {
    let store = store().await;
    let mut conn = raw_connection().await;
    let _: i64 = redis::cmd("HSET")
        .arg(store.keys().authorization_list("user-1"))
        .arg("spa")
        .arg("lost-authorization")
        .query_async(&mut conn)
        .await
        .unwrap();
    assert!(store.get_authorization("user-1", "spa").await.unwrap().is_none());

    let now = OffsetDateTime::now_utc();
    let authorization = Authorization::new("app", "spa", "user-1", &["openid".to_string()], now);
    store.create_authorization(&authorization).await.unwrap();

    let loaded = store
        .get_authorization("user-1", "spa")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(loaded.id, authorization.id);
}

#[tokio::test]
async fn test_idp_session_lifecycle() {
    let store = store().await;
    let now = OffsetDateTime::now_utc();
    let session = IdpSession {
        id: "idp-1".to_string(),
        app_id: "app".to_string(),
        user_id: "user-1".to_string(),
        created_at: now,
        authenticated_at: now,
        expire_at: now + Duration::hours(1),
        amr: vec!["pwd".to_string()],
        access_info: AccessInfo::new(event(now)),
    };
    store.create_idp_session(&session).await.unwrap();

    let later = event(now + Duration::minutes(1));
    let touched = store
        .update_idp_session_access("idp-1", &later)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(touched.access_info.last_access, later);
    assert_eq!(store.list_idp_sessions("user-1").await.unwrap().len(), 1);

    store.delete_idp_session("idp-1").await.unwrap();
    assert!(store.get_idp_session("idp-1").await.unwrap().is_none());
    assert!(store.list_idp_sessions("user-1").await.unwrap().is_empty());
    assert!(
        store
            .update_idp_session_access("idp-1", &later)
            .await
            .unwrap()
            .is_none()
    );
}
