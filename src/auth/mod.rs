// Authentication module
// Sealed-token authentication with refresh sessions and rank-based role checks

pub mod error;
pub mod handlers;
pub mod memory;
pub mod middleware;
pub mod models;
pub mod password;
pub mod repository;
pub mod roles;
pub mod service;
pub mod session;
pub mod token;


// Re-export commonly used types
pub use error::AuthError;
pub use middleware::{AuthenticatedUser, ClientMetadata, RequireRoles};
pub use models::{AuthResponse, LoginRequest, RefreshRequest, RegisterRequest, Role, User, UserResponse};
pub use password::PasswordService;
pub use roles::{RoleHierarchy, RoleSet, RoleTable};
pub use service::AuthService;
pub use session::SessionStore;
pub use token::TokenService;
