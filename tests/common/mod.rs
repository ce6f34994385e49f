//! Common test utilities and helpers for integration tests

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use jarboot_auth::auth::{AuthGate, AuthManager, RateLimitConfig, SharedSecretTrust, TokenManager};
use jarboot_auth::database::SqliteDatabase;
use jarboot_auth::identity::{CredentialStore, PrivilegeRegistry};
use jarboot_auth::server::AppState;

/// Host identifier of the node under test
pub const NODE_HOST: &str = "127.0.0.1:9899";

/// Host identifier of its only peer
pub const PEER_HOST: &str = "127.0.0.2:9899";

/// Secret shared by the test cluster
pub const CLUSTER_SECRET: &str = "integration-cluster-secret";

/// Create an in-memory database for testing
pub async fn create_test_database() -> Arc<SqliteDatabase> {
    Arc::new(
        SqliteDatabase::in_memory()
            .await
            .expect("Failed to create test database"),
    )
}

/// Create a credential store over a fresh bootstrapped database
pub async fn create_test_store() -> (Arc<SqliteDatabase>, CredentialStore<SqliteDatabase>) {
    let database = create_test_database().await;
    let store = CredentialStore::new(Arc::clone(&database));
    store.bootstrap().await.expect("Failed to bootstrap");
    (database, store)
}

/// Token manager with a fixed secret
pub fn create_test_tokens(lifetime: Duration) -> Arc<TokenManager> {
    Arc::new(TokenManager::new(Some("integration-token-secret"), lifetime))
}

/// Trust delegate for `host` in a two-node cluster
pub fn create_cluster_node(host: &str) -> SharedSecretTrust {
    let peers = [NODE_HOST, PEER_HOST].into_iter().map(str::to_string);
    SharedSecretTrust::new(host, peers, Some(CLUSTER_SECRET), Duration::from_secs(60))
}

/// Everything a running test server needs
pub struct TestContext {
    pub state: AppState<SqliteDatabase>,
    pub database: Arc<SqliteDatabase>,
    pub tokens: Arc<TokenManager>,
}

/// Create a test application state over a bootstrapped in-memory database
pub async fn create_test_state() -> TestContext {
    create_test_state_with(RateLimitConfig::default()).await
}

/// Same as [`create_test_state`] with custom login throttling
pub async fn create_test_state_with(rate_limit: RateLimitConfig) -> TestContext {
    let database = create_test_database().await;
    let credentials = Arc::new(CredentialStore::new(Arc::clone(&database)));
    credentials.bootstrap().await.expect("Failed to bootstrap");

    let tokens = create_test_tokens(Duration::from_secs(3600));
    let gate = Arc::new(AuthGate::new(
        Arc::clone(&tokens),
        Arc::new(create_cluster_node(NODE_HOST)),
    ));

    let state = AppState {
        credentials: Arc::clone(&credentials),
        privileges: Arc::new(PrivilegeRegistry::new(Arc::clone(&database))),
        auth_manager: Arc::new(AuthManager::new(credentials, Arc::clone(&tokens), rate_limit)),
        gate,
    };

    TestContext {
        state,
        database,
        tokens,
    }
}

/// Run a test server in the background and return the address
/// The server will be shut down when the returned shutdown sender is dropped or sent
pub async fn run_test_server(
    state: AppState<SqliteDatabase>,
) -> (SocketAddr, tokio::sync::oneshot::Sender<()>) {
    use tokio::net::TcpListener;

    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind test server");
    let addr = listener.local_addr().expect("Failed to get local address");

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();

    let app = jarboot_auth::server::build_router(state)
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .into_make_service_with_connect_info::<SocketAddr>();

    tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.await;
            })
            .await
            .expect("Server error");
    });

    // Give the server a moment to start
    tokio::time::sleep(Duration::from_millis(100)).await;

    (addr, shutdown_tx)
}

/// Post a login request and return the raw response
pub async fn login(addr: SocketAddr, username: &str, password: &str) -> reqwest::Response {
    reqwest::Client::new()
        .post(format!("http://{}/api/auth/login", addr))
        .json(&serde_json::json!({ "username": username, "password": password }))
        .send()
        .await
        .expect("Failed to send login request")
}
