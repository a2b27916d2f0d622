// Authentication and authorization error types

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use tracing::{debug, error, warn};

use crate::error::ErrorResponse;

/// Authentication and authorization error types
///
/// Every variant maps to an opaque, client-safe message; internal causes are
/// only ever written to the log.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    // Authentication errors
    #[error("Invalid username or password")]
    InvalidCredentials,

    #[error("Invalid token")]
    InvalidToken,

    #[error("Token has expired")]
    TokenExpired,

    #[error("Token claims are malformed")]
    MalformedClaims,

    #[error("Missing authentication token")]
    MissingToken,

    /// Refresh token decrypts but has no live session behind it
    #[error("Session is no longer valid")]
    SessionInvalid,

    // Authorization errors
    /// Authenticated but the best caller rank is above the endpoint threshold
    #[error("Insufficient permissions: best rank {best_rank:?}, required rank {required_rank}")]
    Forbidden {
        required_rank: i32,
        best_rank: Option<i32>,
    },

    #[error("Unknown role: {0}")]
    UnknownRole(String),

    // Input and state errors
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid request payload")]
    InvalidPayload(validator::ValidationErrors),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("{0} not found")]
    NotFound(String),

    // Server-side errors
    #[error("Database error: {0}")]
    Database(String),

    #[error("Internal error: {0}")]
    Internal(String),

    /// Broken key material or entropy source
    #[error("Fatal error: {0}")]
    Fatal(String),
}

impl AuthError {
    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            AuthError::InvalidCredentials
            | AuthError::InvalidToken
            | AuthError::TokenExpired
            | AuthError::MalformedClaims
            | AuthError::MissingToken
            | AuthError::SessionInvalid => StatusCode::UNAUTHORIZED,
            AuthError::Forbidden { .. } => StatusCode::FORBIDDEN,
            AuthError::UnknownRole(_) | AuthError::Validation(_) | AuthError::InvalidPayload(_) => {
                StatusCode::BAD_REQUEST
            }
            AuthError::Conflict(_) => StatusCode::CONFLICT,
            AuthError::NotFound(_) => StatusCode::NOT_FOUND,
            AuthError::Database(_) | AuthError::Internal(_) | AuthError::Fatal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Machine-readable error code
    pub fn error_code(&self) -> &'static str {
        match self {
            AuthError::InvalidCredentials => "INVALID_CREDENTIALS",
            AuthError::InvalidToken => "INVALID_TOKEN",
            AuthError::TokenExpired => "TOKEN_EXPIRED",
            AuthError::MalformedClaims => "MALFORMED_CLAIMS",
            AuthError::MissingToken => "MISSING_TOKEN",
            AuthError::SessionInvalid => "SESSION_INVALID",
            AuthError::Forbidden { .. } => "FORBIDDEN",
            AuthError::UnknownRole(_) => "UNKNOWN_ROLE",
            AuthError::Validation(_) | AuthError::InvalidPayload(_) => "VALIDATION_ERROR",
            AuthError::Conflict(_) => "CONFLICT",
            AuthError::NotFound(_) => "NOT_FOUND",
            AuthError::Database(_) => "DATABASE_ERROR",
            AuthError::Internal(_) | AuthError::Fatal(_) => "INTERNAL_ERROR",
        }
    }

    /// Get a descriptive error message for this error
    /// This message is safe to send to clients (no sensitive data)
    pub fn error_message(&self) -> String {
        match self {
            AuthError::Forbidden { .. } => "Insufficient permissions".to_string(),
            AuthError::InvalidPayload(_) => "Request validation failed".to_string(),
            AuthError::Validation(msg) | AuthError::Conflict(msg) => msg.clone(),
            AuthError::Database(_) | AuthError::Internal(_) | AuthError::Fatal(_) => {
                "Internal server error".to_string()
            }
            other => other.to_string(),
        }
    }

    /// Whether this error belongs to the token layer (401 on a bearer check)
    pub fn is_token_error(&self) -> bool {
        matches!(
            self,
            AuthError::InvalidToken
                | AuthError::TokenExpired
                | AuthError::MalformedClaims
                | AuthError::MissingToken
        )
    }

    fn log(&self) {
        match self {
            AuthError::Database(msg) => error!("Database error in auth: {}", msg),
            AuthError::Internal(msg) => error!("Internal auth error: {}", msg),
            AuthError::Fatal(msg) => error!("Fatal auth error: {}", msg),
            AuthError::Forbidden { required_rank, best_rank } => warn!(
                required_rank,
                best_rank = ?best_rank,
                "Authorization failed"
            ),
            AuthError::InvalidCredentials | AuthError::SessionInvalid => {
                warn!("Rejected authentication attempt: {}", self)
            }
            err if err.is_token_error() => warn!("Rejected bearer token: {}", err),
            other => debug!("Auth request rejected: {}", other),
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        self.log();

        let status = self.status_code();
        let mut body = ErrorResponse::new(self.error_code(), self.error_message());
        if let AuthError::InvalidPayload(errors) = &self {
            body = body.with_details(serde_json::to_value(errors).unwrap_or(serde_json::json!({})));
        }

        body.into_response_with(status)
    }
}

/// Convert sqlx errors to AuthError
impl From<sqlx::Error> for AuthError {
    fn from(err: sqlx::Error) -> Self {
        AuthError::Database(err.to_string())
    }
}

/// Convert validator errors to AuthError
impl From<validator::ValidationErrors> for AuthError {
    fn from(errors: validator::ValidationErrors) -> Self {
        AuthError::InvalidPayload(errors)
    }
}
