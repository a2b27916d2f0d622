// HTTP handlers for authentication, session and role endpoints

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use uuid::Uuid;

use crate::auth::{
    error::AuthError,
    middleware::{AuthenticatedUser, ClientMetadata},
    models::{
        AssignRoleRequest, AuthResponse, ChangePasswordRequest, CreateRoleRequest, LoginRequest,
        LogoutRequest, RefreshRequest, RefreshResponse, RegisterRequest, Role, SessionResponse,
        UserResponse,
    },
};
use crate::AppState;

/// Register a new user
/// POST /api/auth/register
pub async fn register_handler(
    State(state): State<AppState>,
    Json(request): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<UserResponse>), AuthError> {
    let user = state.auth.register(request).await?;
    Ok((StatusCode::CREATED, Json(user)))
}

/// Login a user
/// POST /api/auth/login
pub async fn login_handler(
    State(state): State<AppState>,
    ClientMetadata(metadata): ClientMetadata,
    Json(request): Json<LoginRequest>,
) -> Result<Json<AuthResponse>, AuthError> {
    let response = state.auth.login(request, metadata).await?;
    Ok(Json(response))
}

/// Rotate a refresh token
/// POST /api/auth/refresh
pub async fn refresh_handler(
    State(state): State<AppState>,
    ClientMetadata(metadata): ClientMetadata,
    Json(request): Json<RefreshRequest>,
) -> Result<Json<RefreshResponse>, AuthError> {
    let response = state.auth.refresh(&request.refresh_token, metadata).await?;
    Ok(Json(response))
}

/// POST /api/auth/logout
pub async fn logout_handler(
    State(state): State<AppState>,
    Json(request): Json<LogoutRequest>,
) -> Result<StatusCode, AuthError> {
    state.auth.logout(&request.refresh_token).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/auth/logout-all
pub async fn logout_all_handler(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> Result<StatusCode, AuthError> {
    state.auth.logout_all(user.user_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Get current user information
/// GET /api/auth/me
pub async fn me_handler(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> Result<Json<UserResponse>, AuthError> {
    let me = state.auth.me(user.user_id).await?;
    Ok(Json(me))
}

/// PUT /api/auth/password
pub async fn change_password_handler(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(request): Json<ChangePasswordRequest>,
) -> Result<StatusCode, AuthError> {
    state.auth.change_password(user.user_id, request).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /api/auth/sessions
pub async fn list_sessions_handler(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> Result<Json<Vec<SessionResponse>>, AuthError> {
    let sessions = state.auth.list_sessions(user.user_id).await?;
    Ok(Json(sessions))
}

/// DELETE /api/auth/sessions/:id
pub async fn revoke_session_handler(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(session_id): Path<Uuid>,
) -> Result<StatusCode, AuthError> {
    state.auth.revoke_session(user.user_id, session_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /api/roles
pub async fn list_roles_handler(State(state): State<AppState>) -> Result<Json<Vec<Role>>, AuthError> {
    let roles = state.auth.list_roles().await?;
    Ok(Json(roles))
}

/// POST /api/roles
pub async fn create_role_handler(
    State(state): State<AppState>,
    Json(request): Json<CreateRoleRequest>,
) -> Result<(StatusCode, Json<Role>), AuthError> {
    let role = state.auth.create_role(request).await?;
    Ok((StatusCode::CREATED, Json(role)))
}

/// POST /api/users/:id/roles
pub async fn assign_role_handler(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(user_id): Path<i32>,
    Json(request): Json<AssignRoleRequest>,
) -> Result<StatusCode, AuthError> {
    state.auth.assign_role(&user.roles, user_id, request).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// DELETE /api/users/:id/roles/:name
pub async fn unassign_role_handler(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path((user_id, role_name)): Path<(i32, String)>,
) -> Result<StatusCode, AuthError> {
    state.auth.unassign_role(&user.roles, user_id, &role_name).await?;
    Ok(StatusCode::NO_CONTENT)
}
