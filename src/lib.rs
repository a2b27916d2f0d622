// Warehouse authentication service
// Identity, sessions and rank-based authorization for the warehouse REST API

pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod validation;

use axum::{
    extract::{Request, State},
    middleware::{self, Next},
    response::Json,
    routing::{delete, get, post, put},
    Router,
};
use sqlx::PgPool;
use std::sync::Arc;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use auth::{
    handlers,
    memory::{InMemoryRoleRepository, InMemorySessionRepository, InMemoryUserRepository},
    repository::{
        PgRoleRepository, PgSessionRepository, PgUserRepository, RoleRepository, SessionRepository,
        UserRepository,
    },
    AuthError, AuthService, PasswordService, RequireRoles, RoleHierarchy, SessionStore, TokenService,
};
use config::AuthConfig;

/// Persistence backends behind the auth service
#[derive(Clone)]
pub struct Repositories {
    pub users: Arc<dyn UserRepository>,
    pub sessions: Arc<dyn SessionRepository>,
    pub roles: Arc<dyn RoleRepository>,
}

impl Repositories {
    pub fn postgres(pool: PgPool) -> Self {
        Self {
            users: Arc::new(PgUserRepository::new(pool.clone())),
            sessions: Arc::new(PgSessionRepository::new(pool.clone())),
            roles: Arc::new(PgRoleRepository::new(pool)),
        }
    }

    /// Volatile repositories seeded with the default warehouse roles
    pub fn in_memory() -> Self {
        Self {
            users: Arc::new(InMemoryUserRepository::new()),
            sessions: Arc::new(InMemorySessionRepository::new()),
            roles: Arc::new(InMemoryRoleRepository::warehouse_defaults()),
        }
    }
}

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub auth: Arc<AuthService>,
}

impl AppState {
    /// Wire the auth service over the given repositories
    ///
    /// Loads the role table and hashes the timing dummy, so this fails on a
    /// bad key, bad Argon2 parameters or an unreachable role store.
    pub async fn build(repos: Repositories, config: &AuthConfig) -> Result<Self, AuthError> {
        let tokens = Arc::new(TokenService::from_config(config)?);
        let passwords = PasswordService::new(config.password)?;
        let hierarchy = Arc::new(RoleHierarchy::load(repos.roles.clone()).await?);

        let auth = AuthService::new(
            repos.users,
            repos.roles,
            SessionStore::new(repos.sessions),
            hierarchy,
            passwords,
            tokens,
            config.default_role.clone(),
        )?;

        Ok(Self { auth: Arc::new(auth) })
    }
}

/// Restrict every route of `router` to callers passing the role gate
fn gated(router: Router<AppState>, state: &AppState, allowed: &[&str]) -> Router<AppState> {
    let gate = RequireRoles::any_of(allowed);
    router.route_layer(middleware::from_fn_with_state(
        state.clone(),
        move |st: State<AppState>, request: Request, next: Next| gate.clone().run(st, request, next),
    ))
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

/// Creates and configures the application router
/// Maps all API endpoints to their handlers and adds CORS and tracing layers
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let auth_routes = Router::new()
        .route("/api/auth/register", post(handlers::register_handler))
        .route("/api/auth/login", post(handlers::login_handler))
        .route("/api/auth/refresh", post(handlers::refresh_handler))
        .route("/api/auth/logout", post(handlers::logout_handler))
        .route("/api/auth/logout-all", post(handlers::logout_all_handler))
        .route("/api/auth/me", get(handlers::me_handler))
        .route("/api/auth/password", put(handlers::change_password_handler))
        .route("/api/auth/sessions", get(handlers::list_sessions_handler))
        .route("/api/auth/sessions/:id", delete(handlers::revoke_session_handler));

    // Threshold is the most privileged allowed rank, so list the least
    // privileged role that should pass
    let admin_routes = gated(
        Router::new()
            .route("/api/roles", get(handlers::list_roles_handler))
            .route("/api/users/:id/roles", post(handlers::assign_role_handler))
            .route("/api/users/:id/roles/:name", delete(handlers::unassign_role_handler)),
        &state,
        &["admin"],
    );

    let developer_routes = gated(
        Router::new().route("/api/roles", post(handlers::create_role_handler)),
        &state,
        &["developer"],
    );

    Router::new()
        .route("/health", get(health))
        .merge(auth_routes)
        .merge(admin_routes)
        .merge(developer_routes)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
