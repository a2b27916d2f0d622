// In-memory repositories
//
// Same contracts as the PostgreSQL repositories, including uniqueness
// constraints, so flows can run without a database.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeSet, HashMap};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::auth::{
    error::AuthError,
    models::{NewUser, Role, Session, User},
    repository::{RoleRepository, SessionRepository, UserRepository},
};

#[derive(Default)]
struct UserTable {
    next_id: i32,
    rows: HashMap<i32, User>,
}

/// In-memory user repository
#[derive(Default)]
pub struct InMemoryUserRepository {
    inner: RwLock<UserTable>,
}

impl InMemoryUserRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl UserRepository for InMemoryUserRepository {
    async fn create_user(&self, user: NewUser) -> Result<User, AuthError> {
        let mut table = self.inner.write().await;
        let taken = table.rows.values().any(|u| {
            u.username == user.username || u.email.eq_ignore_ascii_case(&user.email)
        });
        if taken {
            return Err(AuthError::Conflict("Username or email already registered".to_string()));
        }

        table.next_id += 1;
        let created = User {
            id: table.next_id,
            username: user.username,
            email: user.email,
            full_name: user.full_name,
            password_hash: user.password_hash,
            created_at: Utc::now(),
            last_login_at: None,
            last_activity_at: None,
        };
        table.rows.insert(created.id, created.clone());
        Ok(created)
    }

    async fn find_by_username(&self, username: &str) -> Result<Option<User>, AuthError> {
        let table = self.inner.read().await;
        Ok(table.rows.values().find(|u| u.username == username).cloned())
    }

    async fn find_by_id(&self, id: i32) -> Result<Option<User>, AuthError> {
        Ok(self.inner.read().await.rows.get(&id).cloned())
    }

    async fn username_or_email_exists(&self, username: &str, email: &str) -> Result<bool, AuthError> {
        let table = self.inner.read().await;
        Ok(table
            .rows
            .values()
            .any(|u| u.username == username || u.email.eq_ignore_ascii_case(email)))
    }

    async fn update_password_hash(&self, id: i32, password_hash: &str) -> Result<(), AuthError> {
        let mut table = self.inner.write().await;
        let user = table
            .rows
            .get_mut(&id)
            .ok_or_else(|| AuthError::NotFound("User".to_string()))?;
        user.password_hash = password_hash.to_string();
        Ok(())
    }

    async fn touch_last_login(&self, id: i32, at: DateTime<Utc>) -> Result<(), AuthError> {
        if let Some(user) = self.inner.write().await.rows.get_mut(&id) {
            user.last_login_at = Some(at);
            user.last_activity_at = Some(at);
        }
        Ok(())
    }

    async fn touch_last_activity(&self, id: i32, at: DateTime<Utc>) -> Result<(), AuthError> {
        if let Some(user) = self.inner.write().await.rows.get_mut(&id) {
            user.last_activity_at = Some(at);
        }
        Ok(())
    }
}

/// In-memory session repository
#[derive(Default)]
pub struct InMemorySessionRepository {
    rows: RwLock<HashMap<Uuid, Session>>,
}

impl InMemorySessionRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored sessions, expired ones included
    pub async fn len(&self) -> usize {
        self.rows.read().await.len()
    }
}

#[async_trait]
impl SessionRepository for InMemorySessionRepository {
    async fn insert(&self, session: &Session) -> Result<(), AuthError> {
        let mut rows = self.rows.write().await;
        let collision = rows.contains_key(&session.id)
            || rows
                .values()
                .any(|s| s.refresh_token_hash == session.refresh_token_hash);
        if collision {
            return Err(AuthError::Fatal("Refresh token collision on session insert".to_string()));
        }
        rows.insert(session.id, session.clone());
        Ok(())
    }

    async fn find_by_token_hash(&self, token_hash: &str) -> Result<Option<Session>, AuthError> {
        let rows = self.rows.read().await;
        Ok(rows.values().find(|s| s.refresh_token_hash == token_hash).cloned())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Session>, AuthError> {
        Ok(self.rows.read().await.get(&id).cloned())
    }

    async fn list_for_user(&self, user_id: i32, now: DateTime<Utc>) -> Result<Vec<Session>, AuthError> {
        let rows = self.rows.read().await;
        let mut sessions: Vec<Session> = rows
            .values()
            .filter(|s| s.user_id == user_id && !s.is_expired_at(now))
            .cloned()
            .collect();
        sessions.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(sessions)
    }

    async fn delete(&self, id: Uuid) -> Result<bool, AuthError> {
        Ok(self.rows.write().await.remove(&id).is_some())
    }

    async fn delete_for_user(&self, user_id: i32, id: Uuid) -> Result<bool, AuthError> {
        let mut rows = self.rows.write().await;
        match rows.get(&id) {
            Some(session) if session.user_id == user_id => Ok(rows.remove(&id).is_some()),
            _ => Ok(false),
        }
    }

    async fn delete_all_for_user(&self, user_id: i32) -> Result<u64, AuthError> {
        let mut rows = self.rows.write().await;
        let before = rows.len();
        rows.retain(|_, s| s.user_id != user_id);
        Ok((before - rows.len()) as u64)
    }

    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<u64, AuthError> {
        let mut rows = self.rows.write().await;
        let before = rows.len();
        rows.retain(|_, s| !s.is_expired_at(now));
        Ok((before - rows.len()) as u64)
    }
}

#[derive(Default)]
struct RoleTables {
    next_id: i32,
    roles: Vec<Role>,
    assignments: HashMap<i32, BTreeSet<i32>>,
}

/// In-memory role repository
#[derive(Default)]
pub struct InMemoryRoleRepository {
    inner: RwLock<RoleTables>,
}

impl InMemoryRoleRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed with (name, rank) pairs
    pub fn with_roles(roles: &[(&str, i32)]) -> Self {
        let roles: Vec<Role> = roles
            .iter()
            .enumerate()
            .map(|(i, (name, rank))| Role {
                id: i as i32 + 1,
                name: name.to_string(),
                rank: *rank,
            })
            .collect();

        Self {
            inner: RwLock::new(RoleTables {
                next_id: roles.len() as i32,
                roles,
                assignments: HashMap::new(),
            }),
        }
    }

    /// The roles seeded by the initial migration
    pub fn warehouse_defaults() -> Self {
        Self::with_roles(&[
            ("developer", 1),
            ("admin", 15),
            ("manager", 18),
            ("picker", 20),
            ("qc_inspector", 25),
            ("driver", 30),
            ("guest", 99),
        ])
    }
}

#[async_trait]
impl RoleRepository for InMemoryRoleRepository {
    async fn list_roles(&self) -> Result<Vec<Role>, AuthError> {
        let mut roles = self.inner.read().await.roles.clone();
        roles.sort_by(|a, b| a.rank.cmp(&b.rank).then_with(|| a.name.cmp(&b.name)));
        Ok(roles)
    }

    async fn create_role(&self, name: &str, rank: i32) -> Result<Role, AuthError> {
        let mut tables = self.inner.write().await;
        if tables.roles.iter().any(|r| r.name == name) {
            return Err(AuthError::Conflict(format!("Role '{}' already exists", name)));
        }
        tables.next_id += 1;
        let role = Role {
            id: tables.next_id,
            name: name.to_string(),
            rank,
        };
        tables.roles.push(role.clone());
        Ok(role)
    }

    async fn roles_for_user(&self, user_id: i32) -> Result<Vec<Role>, AuthError> {
        let tables = self.inner.read().await;
        let Some(ids) = tables.assignments.get(&user_id) else {
            return Ok(Vec::new());
        };
        let mut roles: Vec<Role> = tables
            .roles
            .iter()
            .filter(|r| ids.contains(&r.id))
            .cloned()
            .collect();
        roles.sort_by(|a, b| a.rank.cmp(&b.rank).then_with(|| a.name.cmp(&b.name)));
        Ok(roles)
    }

    async fn assign(&self, user_id: i32, role_name: &str) -> Result<(), AuthError> {
        let mut tables = self.inner.write().await;
        let role_id = tables
            .roles
            .iter()
            .find(|r| r.name == role_name)
            .map(|r| r.id)
            .ok_or_else(|| AuthError::UnknownRole(role_name.to_string()))?;
        tables.assignments.entry(user_id).or_default().insert(role_id);
        Ok(())
    }

    async fn unassign(&self, user_id: i32, role_name: &str) -> Result<bool, AuthError> {
        let mut tables = self.inner.write().await;
        let Some(role_id) = tables.roles.iter().find(|r| r.name == role_name).map(|r| r.id) else {
            return Ok(false);
        };
        Ok(tables
            .assignments
            .get_mut(&user_id)
            .map(|ids| ids.remove(&role_id))
            .unwrap_or(false))
    }
}
