// Authentication middleware for protected routes

use axum::{
    async_trait,
    extract::{FromRef, FromRequestParts, Request, State},
    http::{header, request::Parts, HeaderMap},
    middleware::Next,
    response::Response,
};
use std::convert::Infallible;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

use crate::auth::{
    error::AuthError,
    models::SessionMetadata,
    roles::RoleSet,
    token::TokenService,
};
use crate::AppState;

/// Caller identity taken from a validated access token
#[derive(Debug, Clone)]
pub struct AuthenticatedUser {
    pub user_id: i32,
    pub name: String,
    pub roles: RoleSet,
    pub token_id: Uuid,
}

impl AuthenticatedUser {
    /// Validate a raw `Authorization` header value
    pub fn from_authorization(value: Option<&str>, tokens: &TokenService) -> Result<Self, AuthError> {
        let value = value.ok_or(AuthError::MissingToken)?;
        let token = value
            .strip_prefix("Bearer ")
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or(AuthError::InvalidToken)?;

        let claims = tokens.validate_access(token)?;
        Ok(Self {
            user_id: claims.sub,
            name: claims.name,
            roles: claims.roles,
            token_id: claims.jti,
        })
    }

    fn from_headers(headers: &HeaderMap, tokens: &TokenService) -> Result<Self, AuthError> {
        let value = match headers.get(header::AUTHORIZATION) {
            Some(v) => Some(v.to_str().map_err(|_| AuthError::InvalidToken)?),
            None => None,
        };
        Self::from_authorization(value, tokens)
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for AuthenticatedUser
where
    AppState: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        // Already validated by a role gate on this route
        if let Some(user) = parts.extensions.get::<AuthenticatedUser>() {
            return Ok(user.clone());
        }

        let state = AppState::from_ref(state);
        Self::from_headers(&parts.headers, state.auth.tokens())
    }
}

/// Route guard admitting callers whose best role rank meets the threshold
/// of the allowed role names
#[derive(Debug, Clone)]
pub struct RequireRoles {
    allowed: Arc<[String]>,
}

impl RequireRoles {
    pub fn any_of(names: &[&str]) -> Self {
        Self {
            allowed: names.iter().map(|n| n.to_string()).collect(),
        }
    }

    pub fn allowed(&self) -> &[String] {
        &self.allowed
    }

    /// Middleware function that validates role-based access
    pub async fn run(
        self,
        State(state): State<AppState>,
        mut request: Request,
        next: Next,
    ) -> Result<Response, AuthError> {
        let endpoint = request.uri().path().to_string();
        let user = AuthenticatedUser::from_headers(request.headers(), state.auth.tokens())?;

        let rank = state
            .auth
            .hierarchy()
            .authorize(&user.roles, &self.allowed)
            .await
            .map_err(|e| {
                debug!(user_id = user.user_id, endpoint = %endpoint, "Role gate rejected caller");
                e
            })?;

        debug!(user_id = user.user_id, rank, endpoint = %endpoint, "Authorization successful");
        request.extensions_mut().insert(user);
        Ok(next.run(request).await)
    }
}

/// User agent and client address of the current request
#[derive(Debug, Clone, Default)]
pub struct ClientMetadata(pub SessionMetadata);

impl ClientMetadata {
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let header_str = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::trim)
                .filter(|v| !v.is_empty())
        };

        let ip_address = header_str("x-forwarded-for")
            .and_then(|v| v.split(',').next())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .or_else(|| header_str("x-real-ip"))
            .map(str::to_string);

        Self(SessionMetadata {
            user_agent: header_str(header::USER_AGENT.as_str()).map(str::to_string),
            ip_address,
        })
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for ClientMetadata
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(Self::from_headers(&parts.headers))
    }
}
