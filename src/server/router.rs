//! HTTP router configuration
//!
//! This module defines the route handlers and builds the axum router.
//! Everything under `/api` except login sits behind the authentication gate;
//! handlers then check capabilities explicitly against the request's context.

use axum::{
    extract::{ConnectInfo, Path, Query, State},
    http::StatusCode,
    middleware,
    response::{IntoResponse, Response},
    routing::{delete, get, post, put},
    Extension, Json, Router,
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;

use super::middleware::{auth_middleware, logging_middleware};
use crate::auth::{AuthGate, AuthManager, LoginRequest, LoginResponse, SecurityContext};
use crate::database::Database;
use crate::error::{AuthError, IdentityError};
use crate::identity::{CredentialStore, PrivilegeRegistry};
use crate::models::{
    NewUser, PrivilegeGrant, Role, UpdateUser, User, UserFilter, UserPage, PRIVILEGE_MGR,
    ROLE_MGR, USER_MGR,
};

/// Default page size for user listings
const DEFAULT_PAGE_SIZE: u32 = 10;

/// Application state shared across handlers
pub struct AppState<D: Database + 'static> {
    pub credentials: Arc<CredentialStore<D>>,
    pub privileges: Arc<PrivilegeRegistry<D>>,
    pub auth_manager: Arc<AuthManager<D>>,
    pub gate: Arc<AuthGate>,
}

impl<D: Database + 'static> Clone for AppState<D> {
    fn clone(&self) -> Self {
        Self {
            credentials: Arc::clone(&self.credentials),
            privileges: Arc::clone(&self.privileges),
            auth_manager: Arc::clone(&self.auth_manager),
            gate: Arc::clone(&self.gate),
        }
    }
}

/// Health check response
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

/// Error body returned by every API handler
///
/// Storage and hashing failures are logged and reported without detail.
#[derive(Debug)]
pub struct ApiError(pub IdentityError);

impl From<IdentityError> for ApiError {
    fn from(e: IdentityError) -> Self {
        Self(e)
    }
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match &self.0 {
            IdentityError::Validation(_) => StatusCode::BAD_REQUEST,
            IdentityError::Auth(AuthError::RateLimited) => StatusCode::TOO_MANY_REQUESTS,
            IdentityError::Auth(_) => StatusCode::UNAUTHORIZED,
            IdentityError::Forbidden(_) | IdentityError::Protected(_) => StatusCode::FORBIDDEN,
            IdentityError::NotFound(_) => StatusCode::NOT_FOUND,
            IdentityError::Database(_) | IdentityError::Hash(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let msg = if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = %self.0, "Request failed");
            "Internal server error".to_string()
        } else {
            self.0.to_string()
        };

        let body = serde_json::json!({ "code": status.as_u16(), "msg": msg });
        (status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

/// Build the main application router
///
/// Routes:
/// - `/health` - Health check endpoint
/// - `/api/auth/login` - Password login
/// - `/api/auth/me` - Current security context
/// - `/api/users` - User management
/// - `/api/privilege` - Privilege grants
/// - `/api/roles` - Role registry
pub fn build_router<D: Database + 'static>(state: AppState<D>) -> Router {
    let gate = Arc::clone(&state.gate);

    let protected = Router::new()
        .route("/api/auth/me", get(me_handler))
        .route(
            "/api/users",
            get(list_users_handler::<D>)
                .post(create_user_handler::<D>)
                .put(update_user_handler::<D>),
        )
        .route("/api/users/password", put(change_password_handler::<D>))
        .route("/api/users/:id", delete(delete_user_handler::<D>))
        .route(
            "/api/privilege",
            get(has_privilege_handler::<D>).put(save_privilege_handler::<D>),
        )
        .route(
            "/api/privilege/roles/:role",
            get(role_privileges_handler::<D>),
        )
        .route(
            "/api/roles",
            get(list_roles_handler::<D>).post(add_role_handler::<D>),
        )
        .route_layer(middleware::from_fn_with_state(gate, auth_middleware));

    Router::new()
        .route("/health", get(health_handler))
        .route("/api/auth/login", post(login_handler::<D>))
        .merge(protected)
        .layer(middleware::from_fn(logging_middleware))
        .with_state(state)
}

/// Health check handler
async fn health_handler() -> impl IntoResponse {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// =============================================================================
// Authentication
// =============================================================================

async fn login_handler<D: Database + 'static>(
    State(state): State<AppState<D>>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    Json(req): Json<LoginRequest>,
) -> ApiResult<Json<LoginResponse>> {
    let ip = connect_info.map(|ConnectInfo(addr)| addr.ip());
    let response = state
        .auth_manager
        .login(&req.username, &req.password, ip)
        .await?;
    Ok(Json(response))
}

async fn me_handler(Extension(ctx): Extension<SecurityContext>) -> Json<SecurityContext> {
    Json(ctx)
}

// =============================================================================
// User management
// =============================================================================

/// User listing query
#[derive(Debug, Default, Deserialize)]
pub struct ListUsersQuery {
    pub username: Option<String>,
    pub role: Option<String>,
    pub page: Option<u32>,
    pub page_size: Option<u32>,
}

/// Password change request; the acting user comes from the security context
#[derive(Debug, Deserialize)]
pub struct ChangePasswordRequest {
    pub username: String,

    #[serde(default)]
    pub old_password: String,

    pub new_password: String,
}

async fn list_users_handler<D: Database + 'static>(
    State(state): State<AppState<D>>,
    Extension(ctx): Extension<SecurityContext>,
    Query(query): Query<ListUsersQuery>,
) -> ApiResult<Json<UserPage>> {
    state.privileges.require_capability(&ctx, USER_MGR).await?;

    let filter = UserFilter {
        username: query.username,
        role: query.role,
    };
    let page = state
        .credentials
        .list(
            &filter,
            query.page.unwrap_or(0),
            query.page_size.unwrap_or(DEFAULT_PAGE_SIZE),
        )
        .await?;
    Ok(Json(page))
}

async fn create_user_handler<D: Database + 'static>(
    State(state): State<AppState<D>>,
    Extension(ctx): Extension<SecurityContext>,
    Json(req): Json<NewUser>,
) -> ApiResult<(StatusCode, Json<User>)> {
    state.privileges.require_capability(&ctx, USER_MGR).await?;

    let user = state.credentials.create(&req).await?;
    Ok((StatusCode::CREATED, Json(user)))
}

async fn update_user_handler<D: Database + 'static>(
    State(state): State<AppState<D>>,
    Extension(ctx): Extension<SecurityContext>,
    Json(req): Json<UpdateUser>,
) -> ApiResult<StatusCode> {
    state.privileges.require_capability(&ctx, USER_MGR).await?;

    state.credentials.update(&req).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn delete_user_handler<D: Database + 'static>(
    State(state): State<AppState<D>>,
    Extension(ctx): Extension<SecurityContext>,
    Path(id): Path<i64>,
) -> ApiResult<StatusCode> {
    state.privileges.require_capability(&ctx, USER_MGR).await?;

    state.credentials.delete(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn change_password_handler<D: Database + 'static>(
    State(state): State<AppState<D>>,
    Extension(ctx): Extension<SecurityContext>,
    Json(req): Json<ChangePasswordRequest>,
) -> ApiResult<StatusCode> {
    let acting = ctx
        .username()
        .ok_or_else(|| IdentityError::forbidden("Peer calls can not change passwords"))?;

    state
        .credentials
        .change_password(acting, &req.username, &req.old_password, &req.new_password)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

// =============================================================================
// Privileges and roles
// =============================================================================

/// Single grant lookup
#[derive(Debug, Deserialize)]
pub struct PrivilegeQuery {
    pub role: String,
    pub code: String,
}

async fn has_privilege_handler<D: Database + 'static>(
    State(state): State<AppState<D>>,
    Query(query): Query<PrivilegeQuery>,
) -> ApiResult<Json<PrivilegeGrant>> {
    let granted = state
        .privileges
        .has_privilege(&query.role, &query.code)
        .await?;
    Ok(Json(PrivilegeGrant::new(query.role, query.code, granted)))
}

async fn save_privilege_handler<D: Database + 'static>(
    State(state): State<AppState<D>>,
    Extension(ctx): Extension<SecurityContext>,
    Json(grant): Json<PrivilegeGrant>,
) -> ApiResult<StatusCode> {
    state
        .privileges
        .require_capability(&ctx, PRIVILEGE_MGR)
        .await?;

    state
        .privileges
        .save_privilege(&grant.role, &grant.code, grant.granted)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn role_privileges_handler<D: Database + 'static>(
    State(state): State<AppState<D>>,
    Path(role): Path<String>,
) -> ApiResult<Json<Vec<PrivilegeGrant>>> {
    Ok(Json(state.privileges.list_by_role(&role).await?))
}

async fn list_roles_handler<D: Database + 'static>(
    State(state): State<AppState<D>>,
) -> ApiResult<Json<Vec<Role>>> {
    Ok(Json(state.privileges.list_roles().await?))
}

async fn add_role_handler<D: Database + 'static>(
    State(state): State<AppState<D>>,
    Extension(ctx): Extension<SecurityContext>,
    Json(role): Json<Role>,
) -> ApiResult<StatusCode> {
    state.privileges.require_capability(&ctx, ROLE_MGR).await?;

    state.privileges.add_role(&role.role, &role.name).await?;
    Ok(StatusCode::CREATED)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{RateLimitConfig, SharedSecretTrust, TokenManager};
    use crate::database::MockDatabase;
    use crate::models::{ADMIN_ROLE, SYSTEM_ROLE};
    use axum::http::{HeaderName, HeaderValue};
    use axum_test::TestServer;
    use std::time::Duration;

    fn create_test_state(db: MockDatabase) -> (AppState<MockDatabase>, Arc<TokenManager>) {
        let db = Arc::new(db);
        let tokens = Arc::new(TokenManager::new(Some("router-secret"), Duration::from_secs(600)));
        let cluster = SharedSecretTrust::new("node-a:9899", vec![], None, Duration::from_secs(60));
        let credentials = Arc::new(CredentialStore::new(Arc::clone(&db)));

        let state = AppState {
            credentials: Arc::clone(&credentials),
            privileges: Arc::new(PrivilegeRegistry::new(Arc::clone(&db))),
            auth_manager: Arc::new(AuthManager::new(
                credentials,
                Arc::clone(&tokens),
                RateLimitConfig::default(),
            )),
            gate: Arc::new(AuthGate::new(Arc::clone(&tokens), Arc::new(cluster))),
        };
        (state, tokens)
    }

    fn bearer(tokens: &TokenManager, username: &str, role: &str) -> (HeaderName, HeaderValue) {
        let issued = tokens.issue(username, [role]).unwrap();
        (
            HeaderName::from_static("authorization"),
            HeaderValue::from_str(&format!("Bearer {}", issued.token)).unwrap(),
        )
    }

    // Test 1: Health endpoint returns OK without credentials
    #[tokio::test]
    async fn test_health_endpoint_returns_ok() {
        let (state, _) = create_test_state(MockDatabase::new());
        let server = TestServer::new(build_router(state)).unwrap();

        let response = server.get("/health").await;
        response.assert_status_ok();

        let body: HealthResponse = response.json();
        assert_eq!(body.status, "healthy");
        assert!(!body.version.is_empty());
    }

    // Test 2: Protected endpoint without credentials is rejected by the gate
    #[tokio::test]
    async fn test_protected_route_requires_auth() {
        let (state, _) = create_test_state(MockDatabase::new());
        let server = TestServer::new(build_router(state)).unwrap();

        let response = server.get("/api/roles").await;
        response.assert_status(StatusCode::UNAUTHORIZED);

        let body: serde_json::Value = response.json();
        assert_eq!(body["code"], 401);
        assert_eq!(body["msg"], "not authenticated");
    }

    // Test 3: /api/auth/me returns the context built by the gate
    #[tokio::test]
    async fn test_me_returns_context() {
        let (state, tokens) = create_test_state(MockDatabase::new());
        let server = TestServer::new(build_router(state)).unwrap();
        let (name, value) = bearer(&tokens, "alice", ADMIN_ROLE);

        let response = server.get("/api/auth/me").add_header(name, value).await;
        response.assert_status_ok();

        let body: serde_json::Value = response.json();
        assert_eq!(body["identity"], "alice");
        assert_eq!(body["trust_level"], "USER");
        assert_eq!(body["roles"][0], ADMIN_ROLE);
    }

    // Test 4: Listing users without USER_MGR is forbidden
    #[tokio::test]
    async fn test_list_users_forbidden_without_grant() {
        let mut db = MockDatabase::new();
        db.expect_get_privilege().returning(|_, _| Ok(None));
        db.expect_list_users().never();
        let (state, tokens) = create_test_state(db);
        let server = TestServer::new(build_router(state)).unwrap();
        let (name, value) = bearer(&tokens, "alice", ADMIN_ROLE);

        let response = server.get("/api/users").add_header(name, value).await;
        response.assert_status(StatusCode::FORBIDDEN);

        let body: serde_json::Value = response.json();
        assert_eq!(body["code"], 403);
    }

    // Test 5: System role lists users and the page size defaults to 10
    #[tokio::test]
    async fn test_list_users_as_system() {
        let mut db = MockDatabase::new();
        db.expect_list_users()
            .withf(|filter, limit, offset| {
                filter.username.as_deref() == Some("ali") && *limit == 10 && *offset == 0
            })
            .times(1)
            .returning(|_, _, _| {
                Ok(UserPage {
                    items: vec![User::new("alice", "secret-hash")],
                    total: 1,
                })
            });
        let (state, tokens) = create_test_state(db);
        let server = TestServer::new(build_router(state)).unwrap();
        let (name, value) = bearer(&tokens, "jarboot", SYSTEM_ROLE);

        let response = server
            .get("/api/users")
            .add_query_param("username", "ali")
            .add_header(name, value)
            .await;
        response.assert_status_ok();

        let body = response.text();
        assert!(body.contains("alice"));
        assert!(!body.contains("secret-hash"));
    }

    // Test 6: Deleting an unknown id maps to 404
    #[tokio::test]
    async fn test_delete_unknown_user_not_found() {
        let mut db = MockDatabase::new();
        db.expect_get_user().returning(|_| Ok(None));
        let (state, tokens) = create_test_state(db);
        let server = TestServer::new(build_router(state)).unwrap();
        let (name, value) = bearer(&tokens, "jarboot", SYSTEM_ROLE);

        let response = server.delete("/api/users/42").add_header(name, value).await;
        response.assert_status(StatusCode::NOT_FOUND);
    }

    // Test 7: Privilege lookup needs no capability and defaults to denied
    #[tokio::test]
    async fn test_has_privilege_lookup() {
        let mut db = MockDatabase::new();
        db.expect_get_privilege().returning(|_, _| Ok(None));
        let (state, tokens) = create_test_state(db);
        let server = TestServer::new(build_router(state)).unwrap();
        let (name, value) = bearer(&tokens, "alice", ADMIN_ROLE);

        let response = server
            .get("/api/privilege")
            .add_query_param("role", ADMIN_ROLE)
            .add_query_param("code", USER_MGR)
            .add_header(name, value)
            .await;
        response.assert_status_ok();

        let grant: PrivilegeGrant = response.json();
        assert!(!grant.granted);
    }

    // Test 8: Repository failures become a generic 500
    #[tokio::test]
    async fn test_database_error_is_generic() {
        let mut db = MockDatabase::new();
        db.expect_list_roles()
            .returning(|| Err(crate::error::DbError::ConstraintViolation("boom".to_string())));
        let (state, tokens) = create_test_state(db);
        let server = TestServer::new(build_router(state)).unwrap();
        let (name, value) = bearer(&tokens, "alice", ADMIN_ROLE);

        let response = server.get("/api/roles").add_header(name, value).await;
        response.assert_status(StatusCode::INTERNAL_SERVER_ERROR);

        let body = response.text();
        assert!(!body.contains("boom"));
    }

    // Test 9: ApiError status mapping
    #[test]
    fn test_api_error_status() {
        let cases = [
            (IdentityError::validation("x"), StatusCode::BAD_REQUEST),
            (IdentityError::not_found("x"), StatusCode::NOT_FOUND),
            (IdentityError::protected("x"), StatusCode::FORBIDDEN),
            (IdentityError::forbidden("x"), StatusCode::FORBIDDEN),
            (
                IdentityError::Auth(AuthError::InvalidCredentials),
                StatusCode::UNAUTHORIZED,
            ),
            (
                IdentityError::Auth(AuthError::RateLimited),
                StatusCode::TOO_MANY_REQUESTS,
            ),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError(err).status(), status);
        }
    }
}
