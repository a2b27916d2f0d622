// Database repositories for users, sessions and roles
//
// The traits are the persistence seam: the service layer only sees
// `Arc<dyn ...Repository>`, wired to PostgreSQL in production and to the
// in-memory implementations in tests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::auth::{
    error::AuthError,
    models::{NewUser, Role, Session, User},
};

/// Credential persistence
#[async_trait]
pub trait UserRepository: Send + Sync {
    /// Insert a user; duplicate username or email yields `Conflict`
    async fn create_user(&self, user: NewUser) -> Result<User, AuthError>;
    async fn find_by_username(&self, username: &str) -> Result<Option<User>, AuthError>;
    async fn find_by_id(&self, id: i32) -> Result<Option<User>, AuthError>;
    async fn username_or_email_exists(&self, username: &str, email: &str) -> Result<bool, AuthError>;
    async fn update_password_hash(&self, id: i32, password_hash: &str) -> Result<(), AuthError>;
    async fn touch_last_login(&self, id: i32, at: DateTime<Utc>) -> Result<(), AuthError>;
    async fn touch_last_activity(&self, id: i32, at: DateTime<Utc>) -> Result<(), AuthError>;
}

/// Refresh-token session persistence, keyed by token hash
#[async_trait]
pub trait SessionRepository: Send + Sync {
    /// Insert a session; a duplicate token hash yields `Fatal`
    async fn insert(&self, session: &Session) -> Result<(), AuthError>;
    async fn find_by_token_hash(&self, token_hash: &str) -> Result<Option<Session>, AuthError>;
    async fn find_by_id(&self, id: Uuid) -> Result<Option<Session>, AuthError>;
    async fn list_for_user(&self, user_id: i32, now: DateTime<Utc>) -> Result<Vec<Session>, AuthError>;
    /// Delete by id, true when a row was removed
    async fn delete(&self, id: Uuid) -> Result<bool, AuthError>;
    async fn delete_for_user(&self, user_id: i32, id: Uuid) -> Result<bool, AuthError>;
    async fn delete_all_for_user(&self, user_id: i32) -> Result<u64, AuthError>;
    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<u64, AuthError>;
}

/// Role and role-assignment persistence
#[async_trait]
pub trait RoleRepository: Send + Sync {
    async fn list_roles(&self) -> Result<Vec<Role>, AuthError>;
    /// Insert a role; duplicate name yields `Conflict`
    async fn create_role(&self, name: &str, rank: i32) -> Result<Role, AuthError>;
    async fn roles_for_user(&self, user_id: i32) -> Result<Vec<Role>, AuthError>;
    /// Idempotent; unknown role name yields `UnknownRole`
    async fn assign(&self, user_id: i32, role_name: &str) -> Result<(), AuthError>;
    async fn unassign(&self, user_id: i32, role_name: &str) -> Result<bool, AuthError>;
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db_err) if db_err.is_unique_violation())
}

fn is_foreign_key_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db_err) if db_err.is_foreign_key_violation())
}

/// PostgreSQL user repository
#[derive(Clone)]
pub struct PgUserRepository {
    pool: PgPool,
}

impl PgUserRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

const USER_COLUMNS: &str =
    "id, username, email, full_name, password_hash, created_at, last_login_at, last_activity_at";

#[async_trait]
impl UserRepository for PgUserRepository {
    async fn create_user(&self, user: NewUser) -> Result<User, AuthError> {
        let query = format!(
            "INSERT INTO users (username, email, full_name, password_hash) VALUES ($1, $2, $3, $4) RETURNING {USER_COLUMNS}"
        );

        sqlx::query_as::<_, User>(&query)
            .bind(&user.username)
            .bind(&user.email)
            .bind(&user.full_name)
            .bind(&user.password_hash)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| {
                if is_unique_violation(&e) {
                    return AuthError::Conflict("Username or email already registered".to_string());
                }
                AuthError::from(e)
            })
    }

    async fn find_by_username(&self, username: &str) -> Result<Option<User>, AuthError> {
        let query = format!("SELECT {USER_COLUMNS} FROM users WHERE username = $1");
        let user = sqlx::query_as::<_, User>(&query)
            .bind(username)
            .fetch_optional(&self.pool)
            .await?;
        Ok(user)
    }

    async fn find_by_id(&self, id: i32) -> Result<Option<User>, AuthError> {
        let query = format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1");
        let user = sqlx::query_as::<_, User>(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(user)
    }

    async fn username_or_email_exists(&self, username: &str, email: &str) -> Result<bool, AuthError> {
        let exists: (bool,) = sqlx::query_as(
            "SELECT EXISTS(SELECT 1 FROM users WHERE username = $1 OR LOWER(email) = LOWER($2))",
        )
        .bind(username)
        .bind(email)
        .fetch_one(&self.pool)
        .await?;

        Ok(exists.0)
    }

    async fn update_password_hash(&self, id: i32, password_hash: &str) -> Result<(), AuthError> {
        let result = sqlx::query("UPDATE users SET password_hash = $1 WHERE id = $2")
            .bind(password_hash)
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(AuthError::NotFound("User".to_string()));
        }
        Ok(())
    }

    async fn touch_last_login(&self, id: i32, at: DateTime<Utc>) -> Result<(), AuthError> {
        sqlx::query("UPDATE users SET last_login_at = $1, last_activity_at = $1 WHERE id = $2")
            .bind(at)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn touch_last_activity(&self, id: i32, at: DateTime<Utc>) -> Result<(), AuthError> {
        sqlx::query("UPDATE users SET last_activity_at = $1 WHERE id = $2")
            .bind(at)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

/// PostgreSQL session repository
#[derive(Clone)]
pub struct PgSessionRepository {
    pool: PgPool,
}

impl PgSessionRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

const SESSION_COLUMNS: &str =
    "id, user_id, refresh_token_hash, user_agent, ip_address, device_class, expires_at, created_at";

#[async_trait]
impl SessionRepository for PgSessionRepository {
    async fn insert(&self, session: &Session) -> Result<(), AuthError> {
        sqlx::query(
            r#"
            INSERT INTO sessions (id, user_id, refresh_token_hash, user_agent, ip_address, device_class, expires_at, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(session.id)
        .bind(session.user_id)
        .bind(&session.refresh_token_hash)
        .bind(&session.user_agent)
        .bind(&session.ip_address)
        .bind(session.device_class)
        .bind(session.expires_at)
        .bind(session.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                return AuthError::Fatal("Refresh token collision on session insert".to_string());
            }
            AuthError::from(e)
        })?;

        Ok(())
    }

    async fn find_by_token_hash(&self, token_hash: &str) -> Result<Option<Session>, AuthError> {
        let query = format!("SELECT {SESSION_COLUMNS} FROM sessions WHERE refresh_token_hash = $1");
        let session = sqlx::query_as::<_, Session>(&query)
            .bind(token_hash)
            .fetch_optional(&self.pool)
            .await?;
        Ok(session)
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Session>, AuthError> {
        let query = format!("SELECT {SESSION_COLUMNS} FROM sessions WHERE id = $1");
        let session = sqlx::query_as::<_, Session>(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(session)
    }

    async fn list_for_user(&self, user_id: i32, now: DateTime<Utc>) -> Result<Vec<Session>, AuthError> {
        let query = format!(
            "SELECT {SESSION_COLUMNS} FROM sessions WHERE user_id = $1 AND expires_at > $2 ORDER BY created_at DESC"
        );
        let sessions = sqlx::query_as::<_, Session>(&query)
            .bind(user_id)
            .bind(now)
            .fetch_all(&self.pool)
            .await?;
        Ok(sessions)
    }

    async fn delete(&self, id: Uuid) -> Result<bool, AuthError> {
        let result = sqlx::query("DELETE FROM sessions WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_for_user(&self, user_id: i32, id: Uuid) -> Result<bool, AuthError> {
        let result = sqlx::query("DELETE FROM sessions WHERE id = $1 AND user_id = $2")
            .bind(id)
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_all_for_user(&self, user_id: i32) -> Result<u64, AuthError> {
        let result = sqlx::query("DELETE FROM sessions WHERE user_id = $1")
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<u64, AuthError> {
        let result = sqlx::query("DELETE FROM sessions WHERE expires_at <= $1")
            .bind(now)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

/// PostgreSQL role repository
#[derive(Clone)]
pub struct PgRoleRepository {
    pool: PgPool,
}

impl PgRoleRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RoleRepository for PgRoleRepository {
    async fn list_roles(&self) -> Result<Vec<Role>, AuthError> {
        let roles = sqlx::query_as::<_, Role>("SELECT id, name, rank FROM roles ORDER BY rank, name")
            .fetch_all(&self.pool)
            .await?;
        Ok(roles)
    }

    async fn create_role(&self, name: &str, rank: i32) -> Result<Role, AuthError> {
        sqlx::query_as::<_, Role>("INSERT INTO roles (name, rank) VALUES ($1, $2) RETURNING id, name, rank")
            .bind(name)
            .bind(rank)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| {
                if is_unique_violation(&e) {
                    return AuthError::Conflict(format!("Role '{}' already exists", name));
                }
                AuthError::from(e)
            })
    }

    async fn roles_for_user(&self, user_id: i32) -> Result<Vec<Role>, AuthError> {
        let roles = sqlx::query_as::<_, Role>(
            r#"
            SELECT r.id, r.name, r.rank
            FROM roles r
            JOIN user_roles ur ON ur.role_id = r.id
            WHERE ur.user_id = $1
            ORDER BY r.rank, r.name
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(roles)
    }

    async fn assign(&self, user_id: i32, role_name: &str) -> Result<(), AuthError> {
        let result = sqlx::query(
            r#"
            INSERT INTO user_roles (user_id, role_id)
            SELECT $1, id FROM roles WHERE name = $2
            ON CONFLICT (user_id, role_id) DO NOTHING
            "#,
        )
        .bind(user_id)
        .bind(role_name)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if is_foreign_key_violation(&e) {
                return AuthError::NotFound("User".to_string());
            }
            AuthError::from(e)
        })?;

        if result.rows_affected() == 0 {
            // Either already assigned or the role does not exist
            let exists: (bool,) = sqlx::query_as("SELECT EXISTS(SELECT 1 FROM roles WHERE name = $1)")
                .bind(role_name)
                .fetch_one(&self.pool)
                .await?;
            if !exists.0 {
                return Err(AuthError::UnknownRole(role_name.to_string()));
            }
        }
        Ok(())
    }

    async fn unassign(&self, user_id: i32, role_name: &str) -> Result<bool, AuthError> {
        let result = sqlx::query(
            "DELETE FROM user_roles WHERE user_id = $1 AND role_id = (SELECT id FROM roles WHERE name = $2)",
        )
        .bind(user_id)
        .bind(role_name)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }
}
