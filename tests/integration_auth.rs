//! Authentication flow integration tests
//!
//! Tests the authentication system end to end over HTTP:
//! - Password login and bearer tokens
//! - Gate rejections
//! - Cluster delegation and peer credentials
//! - Capability checks on management routes
//! - Rate limiting

mod common;

use std::time::Duration;

use common::*;
use jarboot_auth::auth::token::Claims;
use jarboot_auth::auth::RateLimitConfig;
use jarboot_auth::models::{ADMIN_ROLE, SYSTEM_USERNAME};
use jsonwebtoken::{encode, EncodingKey, Header};
use reqwest::StatusCode;

async fn system_token(addr: std::net::SocketAddr) -> String {
    let response = login(addr, SYSTEM_USERNAME, SYSTEM_USERNAME).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body: serde_json::Value = response.json().await.unwrap();
    body["token"].as_str().unwrap().to_string()
}

/// Test 1: login with the default system password, then read the context
#[tokio::test]
async fn test_login_then_me() {
    let ctx = create_test_state().await;
    let (addr, _shutdown) = run_test_server(ctx.state).await;

    let token = system_token(addr).await;

    let response = reqwest::Client::new()
        .get(format!("http://{}/api/auth/me", addr))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["identity"], SYSTEM_USERNAME);
    assert_eq!(body["trust_level"], "USER");
}

/// Test 2: wrong password is a 401 with the uniform body
#[tokio::test]
async fn test_login_wrong_password() {
    let ctx = create_test_state().await;
    let (addr, _shutdown) = run_test_server(ctx.state).await;

    let response = login(addr, SYSTEM_USERNAME, "wrong").await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["code"], 401);
    assert!(body.get("token").is_none());
}

/// Test 3: expired token is rejected as invalid
#[tokio::test]
async fn test_expired_token_rejected() {
    let ctx = create_test_state().await;
    let (addr, _shutdown) = run_test_server(ctx.state).await;

    let now = chrono::Utc::now().timestamp();
    let claims = Claims {
        sub: SYSTEM_USERNAME.to_string(),
        roles: vec![ADMIN_ROLE.to_string()],
        iat: now - 120,
        exp: now - 60,
    };
    let expired = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(b"integration-token-secret"),
    )
    .unwrap();

    let response = reqwest::Client::new()
        .get(format!("http://{}/api/auth/me", addr))
        .bearer_auth(expired)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(
        body,
        serde_json::json!({ "code": 401, "msg": "token invalid, please re-authenticate" })
    );
}

/// Test 4: request without credentials is not authenticated
#[tokio::test]
async fn test_missing_credentials_rejected() {
    let ctx = create_test_state().await;
    let (addr, _shutdown) = run_test_server(ctx.state).await;

    let response = reqwest::get(format!("http://{}/api/roles", addr))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["msg"], "not authenticated");
}

/// Test 5: health stays public
#[tokio::test]
async fn test_health_is_public() {
    let ctx = create_test_state().await;
    let (addr, _shutdown) = run_test_server(ctx.state).await;

    let response = reqwest::get(format!("http://{}/health", addr))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

/// Test 6: peer credential admits a node-to-node call
#[tokio::test]
async fn test_peer_credential_admitted() {
    let ctx = create_test_state().await;
    let (addr, _shutdown) = run_test_server(ctx.state).await;

    let peer = create_cluster_node(PEER_HOST);
    let credential = peer.issue_peer_credential(NODE_HOST).unwrap();

    let response = reqwest::Client::new()
        .get(format!("http://{}/api/auth/me", addr))
        .header("x-cluster-token", credential)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["trust_level"], "PEER");
    assert!(body["identity"].is_null());
}

/// Test 7: delegation from a peer is accepted in place of a local token
#[tokio::test]
async fn test_delegation_admitted() {
    let ctx = create_test_state().await;
    let (addr, _shutdown) = run_test_server(ctx.state).await;

    let peer = create_cluster_node(PEER_HOST);
    let delegation = peer.issue_delegation(NODE_HOST, "alice").unwrap();

    let response = reqwest::Client::new()
        .get(format!("http://{}/api/roles", addr))
        .bearer_auth(&delegation)
        .header("access-cluster-host", PEER_HOST)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    // The same credential without the host header is just a bad token
    let response = reqwest::Client::new()
        .get(format!("http://{}/api/roles", addr))
        .bearer_auth(&delegation)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

/// Test 8: user management needs USER_MGR unless the caller holds the system role
#[tokio::test]
async fn test_user_management_capabilities() {
    let ctx = create_test_state().await;
    let tokens = ctx.tokens.clone();
    let (addr, _shutdown) = run_test_server(ctx.state).await;
    let client = reqwest::Client::new();

    let system = system_token(addr).await;
    let response = client
        .post(format!("http://{}/api/users", addr))
        .bearer_auth(&system)
        .json(&serde_json::json!({
            "username": "alice",
            "password": "alice_pw",
            "roles": ADMIN_ROLE,
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let body = response.text().await.unwrap();
    assert!(body.contains("alice"));
    assert!(!body.contains("password"));
    assert!(!body.contains("$argon2"));

    let alice = tokens.issue("alice", [ADMIN_ROLE]).unwrap().token;
    let response = client
        .get(format!("http://{}/api/users", addr))
        .bearer_auth(&alice)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = client
        .put(format!("http://{}/api/privilege", addr))
        .bearer_auth(&system)
        .json(&serde_json::json!({ "role": ADMIN_ROLE, "code": "USER_MGR", "granted": true }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let response = client
        .get(format!("http://{}/api/users", addr))
        .bearer_auth(&alice)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["total"], 2);
}

/// Test 9: a user changes their own password and logs in with it
#[tokio::test]
async fn test_change_own_password() {
    let ctx = create_test_state().await;
    let (addr, _shutdown) = run_test_server(ctx.state).await;
    let client = reqwest::Client::new();

    let system = system_token(addr).await;
    let response = client
        .put(format!("http://{}/api/users/password", addr))
        .bearer_auth(&system)
        .json(&serde_json::json!({
            "username": SYSTEM_USERNAME,
            "new_password": "rotated_pw",
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    assert_eq!(
        login(addr, SYSTEM_USERNAME, SYSTEM_USERNAME).await.status(),
        StatusCode::UNAUTHORIZED
    );
    assert_eq!(
        login(addr, SYSTEM_USERNAME, "rotated_pw").await.status(),
        StatusCode::OK
    );
}

/// Test 10: the system account can not be deleted over HTTP
#[tokio::test]
async fn test_delete_system_account_protected() {
    let ctx = create_test_state().await;
    let (addr, _shutdown) = run_test_server(ctx.state).await;
    let client = reqwest::Client::new();

    let system = system_token(addr).await;
    let response = client
        .get(format!("http://{}/api/users?username={}", addr, SYSTEM_USERNAME))
        .bearer_auth(&system)
        .send()
        .await
        .unwrap();
    let body: serde_json::Value = response.json().await.unwrap();
    let id = body["items"][0]["id"].as_i64().unwrap();

    let response = client
        .delete(format!("http://{}/api/users/{}", addr, id))
        .bearer_auth(&system)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

/// Test 11: repeated login failures from one IP are throttled
#[tokio::test]
async fn test_login_rate_limited() {
    let ctx = create_test_state_with(RateLimitConfig {
        max_failures: 2,
        block_duration: Duration::from_secs(60),
        window_duration: Duration::from_secs(60),
    })
    .await;
    let (addr, _shutdown) = run_test_server(ctx.state).await;

    for _ in 0..2 {
        assert_eq!(
            login(addr, SYSTEM_USERNAME, "wrong").await.status(),
            StatusCode::UNAUTHORIZED
        );
    }

    let response = login(addr, SYSTEM_USERNAME, SYSTEM_USERNAME).await;
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
}

/// Test 12: after a password change, the default password fails in every spelling
#[tokio::test]
async fn test_changed_system_password_blocks_case_variants() {
    let ctx = create_test_state().await;
    ctx.state
        .credentials
        .change_password(SYSTEM_USERNAME, SYSTEM_USERNAME, "", "n3w-Secret")
        .await
        .unwrap();
    let (addr, _shutdown) = run_test_server(ctx.state).await;

    for name in [SYSTEM_USERNAME, "JARBOOT", "JarBoot"] {
        let response = login(addr, name, SYSTEM_USERNAME).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED, "login as {}", name);
        let body: serde_json::Value = response.json().await.unwrap();
        assert!(body.get("token").is_none());
    }

    assert_eq!(
        login(addr, "JARBOOT", "n3w-Secret").await.status(),
        StatusCode::UNAUTHORIZED
    );
    assert_eq!(
        login(addr, SYSTEM_USERNAME, "n3w-Secret").await.status(),
        StatusCode::OK
    );
}

/// Test 13: peer and delegated calls hold no capabilities
#[tokio::test]
async fn test_peer_contexts_refused_management() {
    let ctx = create_test_state().await;
    let (addr, _shutdown) = run_test_server(ctx.state).await;
    let client = reqwest::Client::new();

    let peer = create_cluster_node(PEER_HOST);
    let credential = peer.issue_peer_credential(NODE_HOST).unwrap();
    let delegation = peer.issue_delegation(NODE_HOST, "alice").unwrap();

    let response = client
        .get(format!("http://{}/api/users", addr))
        .header("x-cluster-token", &credential)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = client
        .put(format!("http://{}/api/privilege", addr))
        .header("x-cluster-token", &credential)
        .json(&serde_json::json!({ "role": ADMIN_ROLE, "code": "USER_MGR", "granted": true }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = client
        .post(format!("http://{}/api/roles", addr))
        .bearer_auth(&delegation)
        .header("access-cluster-host", PEER_HOST)
        .json(&serde_json::json!({ "role": "ROLE_DEV", "name": "Developer" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = client
        .get(format!("http://{}/api/users", addr))
        .bearer_auth(&delegation)
        .header("access-cluster-host", PEER_HOST)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}
