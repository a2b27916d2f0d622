// Authentication service - business logic layer

use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;
use validator::Validate;

use crate::auth::{
    error::AuthError,
    models::{
        AssignRoleRequest, AuthResponse, ChangePasswordRequest, CreateRoleRequest, LoginRequest,
        NewUser, RefreshResponse, RegisterRequest, Role, SessionMetadata, SessionResponse, User,
        UserResponse,
    },
    password::PasswordService,
    repository::{RoleRepository, UserRepository},
    roles::{RoleHierarchy, RoleSet},
    session::SessionStore,
    token::{Identity, IssuedToken, TokenService},
};

const TOKEN_TYPE: &str = "Bearer";

/// Hashed once at startup and verified against for unknown usernames
const TIMING_DUMMY_PASSWORD: &str = "timing-equalizer-0";

/// Authentication service coordinating all auth operations
pub struct AuthService {
    users: Arc<dyn UserRepository>,
    roles: Arc<dyn RoleRepository>,
    sessions: SessionStore,
    hierarchy: Arc<RoleHierarchy>,
    passwords: PasswordService,
    tokens: Arc<TokenService>,
    default_role: Option<String>,
    dummy_hash: String,
}

impl AuthService {
    /// Create a new AuthService
    pub fn new(
        users: Arc<dyn UserRepository>,
        roles: Arc<dyn RoleRepository>,
        sessions: SessionStore,
        hierarchy: Arc<RoleHierarchy>,
        passwords: PasswordService,
        tokens: Arc<TokenService>,
        default_role: Option<String>,
    ) -> Result<Self, AuthError> {
        let dummy_hash = passwords.hash_password(TIMING_DUMMY_PASSWORD)?;
        Ok(Self {
            users,
            roles,
            sessions,
            hierarchy,
            passwords,
            tokens,
            default_role,
            dummy_hash,
        })
    }

    pub fn tokens(&self) -> &TokenService {
        &self.tokens
    }

    pub fn hierarchy(&self) -> &RoleHierarchy {
        &self.hierarchy
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    /// Register a new user
    ///
    /// No tokens are issued; the caller logs in separately.
    pub async fn register(&self, request: RegisterRequest) -> Result<UserResponse, AuthError> {
        request.validate()?;
        PasswordService::validate_password_strength(&request.password)?;

        let username = request.username.trim().to_string();
        let email = request.email.trim().to_string();

        if self.users.username_or_email_exists(&username, &email).await? {
            debug!(username = %username, "Registration rejected: username or email taken");
            return Err(AuthError::Conflict("Username or email already registered".to_string()));
        }

        let password_hash = self.hash_blocking(request.password).await?;
        let user = self
            .users
            .create_user(NewUser {
                username,
                email,
                full_name: request.full_name.trim().to_string(),
                password_hash,
            })
            .await?;

        let mut role_names = Vec::new();
        if let Some(role) = &self.default_role {
            if self.hierarchy.snapshot().await.rank_of(role).is_some() {
                self.roles.assign(user.id, role).await?;
                role_names.push(role.clone());
            } else {
                warn!(role = %role, "Default role does not exist, registering without roles");
            }
        }

        info!(user_id = user.id, "User registered");
        Ok(UserResponse::from_user(user, role_names))
    }

    /// Login a user
    pub async fn login(&self, request: LoginRequest, metadata: SessionMetadata) -> Result<AuthResponse, AuthError> {
        request.validate()?;

        let Some(user) = self.users.find_by_username(request.username.trim()).await? else {
            // Keep the response time of unknown usernames in line with wrong passwords
            let _ = self.verify_blocking(request.password, self.dummy_hash.clone()).await;
            return Err(AuthError::InvalidCredentials);
        };

        if !self.verify_blocking(request.password, user.password_hash.clone()).await? {
            return Err(AuthError::InvalidCredentials);
        }

        let (identity, role_names) = self.identity_for(&user).await?;
        let access = self.tokens.issue_access_token(&identity)?;
        let refresh = self.tokens.issue_refresh_token(&identity)?;
        let session = self
            .sessions
            .create(user.id, &refresh.token, &metadata, refresh.expires_at)
            .await?;

        let now = Utc::now();
        self.users.touch_last_login(user.id, now).await?;

        info!(user_id = user.id, session_id = %session.id, "User logged in");

        let mut user = user;
        user.last_login_at = Some(now);
        user.last_activity_at = Some(now);
        Ok(AuthResponse {
            access_token: access.token,
            refresh_token: refresh.token,
            token_type: TOKEN_TYPE.to_string(),
            expires_in: self.tokens.access_ttl().num_seconds(),
            user: UserResponse::from_user(user, role_names),
        })
    }

    /// Exchange a refresh token for a new token pair
    ///
    /// The presented token is single-use: its session is deleted and only the
    /// caller whose delete removed the row gets new tokens.
    pub async fn refresh(&self, refresh_token: &str, metadata: SessionMetadata) -> Result<RefreshResponse, AuthError> {
        let claims = self.tokens.validate_refresh(refresh_token)?;

        let session = self
            .sessions
            .find_by_token(refresh_token)
            .await?
            .ok_or(AuthError::SessionInvalid)?;

        if session.user_id != claims.sub {
            warn!(session_id = %session.id, "Refresh token subject does not match its session");
            return Err(AuthError::SessionInvalid);
        }

        if !self.sessions.revoke(session.id).await? {
            debug!(session_id = %session.id, "Refresh token already consumed");
            return Err(AuthError::SessionInvalid);
        }

        let user = self
            .users
            .find_by_id(claims.sub)
            .await?
            .ok_or(AuthError::SessionInvalid)?;

        let (identity, _) = self.identity_for(&user).await?;
        let access = self.tokens.issue_access_token(&identity)?;
        let rotated: IssuedToken = self.tokens.issue_refresh_token(&identity)?;
        let new_session = self
            .sessions
            .create(user.id, &rotated.token, &metadata, rotated.expires_at)
            .await?;

        self.users.touch_last_activity(user.id, Utc::now()).await?;

        debug!(
            user_id = user.id,
            old_session_id = %session.id,
            session_id = %new_session.id,
            "Refresh token rotated"
        );

        Ok(RefreshResponse {
            access_token: access.token,
            refresh_token: rotated.token,
            token_type: TOKEN_TYPE.to_string(),
            expires_in: self.tokens.access_ttl().num_seconds(),
        })
    }

    /// Revoke the session behind a refresh token; unknown tokens are a no-op
    pub async fn logout(&self, refresh_token: &str) -> Result<(), AuthError> {
        if let Some(session) = self.sessions.revoke_token(refresh_token).await? {
            self.users.touch_last_activity(session.user_id, Utc::now()).await?;
            info!(user_id = session.user_id, session_id = %session.id, "Session logged out");
        }
        Ok(())
    }

    pub async fn logout_all(&self, user_id: i32) -> Result<u64, AuthError> {
        let revoked = self.sessions.revoke_all_for_subject(user_id).await?;
        self.users.touch_last_activity(user_id, Utc::now()).await?;
        info!(user_id, revoked, "All sessions logged out");
        Ok(revoked)
    }

    /// Replace the password and sign out every device
    pub async fn change_password(&self, user_id: i32, request: ChangePasswordRequest) -> Result<(), AuthError> {
        request.validate()?;
        PasswordService::validate_password_strength(&request.new_password)?;

        let user = self.find_user(user_id).await?;
        if !self
            .verify_blocking(request.current_password, user.password_hash.clone())
            .await?
        {
            return Err(AuthError::InvalidCredentials);
        }

        let password_hash = self.hash_blocking(request.new_password).await?;
        self.users.update_password_hash(user_id, &password_hash).await?;
        let revoked = self.sessions.revoke_all_for_subject(user_id).await?;
        self.users.touch_last_activity(user_id, Utc::now()).await?;

        info!(user_id, revoked, "Password changed");
        Ok(())
    }

    /// Get current user information
    pub async fn me(&self, user_id: i32) -> Result<UserResponse, AuthError> {
        let user = self.find_user(user_id).await?;
        let names = self.role_names(user_id).await?;
        Ok(UserResponse::from_user(user, names))
    }

    pub async fn list_sessions(&self, user_id: i32) -> Result<Vec<SessionResponse>, AuthError> {
        let sessions = self.sessions.list_for_subject(user_id).await?;
        Ok(sessions.into_iter().map(SessionResponse::from).collect())
    }

    /// Sign out one of the caller's own devices
    pub async fn revoke_session(&self, user_id: i32, session_id: Uuid) -> Result<(), AuthError> {
        if !self.sessions.revoke_owned(user_id, session_id).await? {
            return Err(AuthError::NotFound("Session".to_string()));
        }
        info!(user_id, session_id = %session_id, "Session revoked by owner");
        Ok(())
    }

    pub async fn list_roles(&self) -> Result<Vec<Role>, AuthError> {
        self.roles.list_roles().await
    }

    pub async fn create_role(&self, request: CreateRoleRequest) -> Result<Role, AuthError> {
        request.validate()?;
        let role = self.roles.create_role(&request.name, request.rank).await?;
        self.hierarchy.reload().await?;
        info!(role = %role.name, rank = role.rank, "Role created");
        Ok(role)
    }

    /// Assign a role; takes effect at the user's next login or refresh
    ///
    /// The caller cannot grant a role more privileged than their own best one.
    pub async fn assign_role(
        &self,
        caller: &RoleSet,
        user_id: i32,
        request: AssignRoleRequest,
    ) -> Result<(), AuthError> {
        request.validate()?;
        self.hierarchy
            .snapshot()
            .await
            .ensure_can_manage(caller.iter(), &request.role)?;

        self.find_user(user_id).await?;
        self.roles.assign(user_id, &request.role).await?;
        info!(user_id, role = %request.role, "Role assigned");
        Ok(())
    }

    /// Remove a role, subject to the same rank rule as assignment
    pub async fn unassign_role(&self, caller: &RoleSet, user_id: i32, role_name: &str) -> Result<(), AuthError> {
        match self
            .hierarchy
            .snapshot()
            .await
            .ensure_can_manage(caller.iter(), role_name)
        {
            // A role that does not exist cannot be assigned to anyone
            Err(AuthError::UnknownRole(_)) => {
                return Err(AuthError::NotFound("Role assignment".to_string()))
            }
            Err(e) => return Err(e),
            Ok(_) => {}
        }

        if !self.roles.unassign(user_id, role_name).await? {
            return Err(AuthError::NotFound("Role assignment".to_string()));
        }
        info!(user_id, role = %role_name, "Role unassigned");
        Ok(())
    }

    async fn find_user(&self, user_id: i32) -> Result<User, AuthError> {
        self.users
            .find_by_id(user_id)
            .await?
            .ok_or_else(|| AuthError::NotFound("User".to_string()))
    }

    async fn role_names(&self, user_id: i32) -> Result<Vec<String>, AuthError> {
        let roles = self.roles.roles_for_user(user_id).await?;
        Ok(roles.into_iter().map(|r| r.name).collect())
    }

    /// Build the token identity from the user's current role assignments
    async fn identity_for(&self, user: &User) -> Result<(Identity, Vec<String>), AuthError> {
        let names = self.role_names(user.id).await?;
        let roles = self
            .hierarchy
            .snapshot()
            .await
            .role_set(names.iter().map(String::as_str))?;

        let identity = Identity {
            subject_id: user.id,
            name: user.full_name.clone(),
            roles,
        };
        Ok((identity, names))
    }

    async fn hash_blocking(&self, password: String) -> Result<String, AuthError> {
        let passwords = self.passwords.clone();
        tokio::task::spawn_blocking(move || passwords.hash_password(&password))
            .await
            .map_err(|e| AuthError::Internal(format!("Password hashing task failed: {e}")))?
    }

    async fn verify_blocking(&self, password: String, hash: String) -> Result<bool, AuthError> {
        let passwords = self.passwords.clone();
        tokio::task::spawn_blocking(move || passwords.verify_password(&password, &hash))
            .await
            .map_err(|e| AuthError::Internal(format!("Password verification task failed: {e}")))?
    }
}
