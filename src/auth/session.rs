// Refresh-token session store
//
// Only the SHA-256 digest of a refresh token is persisted. A session is live
// while its record exists and has not expired.

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::auth::{
    error::AuthError,
    models::{Session, SessionMetadata},
    repository::SessionRepository,
};

/// Hex SHA-256 digest of a refresh token
pub fn hash_refresh_token(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

#[derive(Clone)]
pub struct SessionStore {
    repo: Arc<dyn SessionRepository>,
}

impl SessionStore {
    pub fn new(repo: Arc<dyn SessionRepository>) -> Self {
        Self { repo }
    }

    /// Persist a session for a freshly issued refresh token
    pub async fn create(
        &self,
        user_id: i32,
        refresh_token: &str,
        metadata: &SessionMetadata,
        expires_at: DateTime<Utc>,
    ) -> Result<Session, AuthError> {
        let session = Session {
            id: Uuid::new_v4(),
            user_id,
            refresh_token_hash: hash_refresh_token(refresh_token),
            user_agent: metadata.user_agent.clone(),
            ip_address: metadata.ip_address.clone(),
            device_class: metadata.device_class(),
            expires_at,
            created_at: Utc::now(),
        };

        self.repo.insert(&session).await?;
        debug!(user_id, session_id = %session.id, "Session created");
        Ok(session)
    }

    /// Look up the live session behind a refresh token
    pub async fn find_by_token(&self, refresh_token: &str) -> Result<Option<Session>, AuthError> {
        self.find_by_token_at(refresh_token, Utc::now()).await
    }

    pub async fn find_by_token_at(
        &self,
        refresh_token: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Session>, AuthError> {
        let session = self
            .repo
            .find_by_token_hash(&hash_refresh_token(refresh_token))
            .await?;
        Ok(session.filter(|s| !s.is_expired_at(now)))
    }

    /// Delete a session; false when it was already gone
    pub async fn revoke(&self, session_id: Uuid) -> Result<bool, AuthError> {
        let removed = self.repo.delete(session_id).await?;
        debug!(session_id = %session_id, removed, "Session revoked");
        Ok(removed)
    }

    /// Delete whatever session a refresh token points at, expired or not
    ///
    /// Returns the session only when this call removed it.
    pub async fn revoke_token(&self, refresh_token: &str) -> Result<Option<Session>, AuthError> {
        match self.repo.find_by_token_hash(&hash_refresh_token(refresh_token)).await? {
            Some(session) if self.revoke(session.id).await? => Ok(Some(session)),
            _ => Ok(None),
        }
    }

    /// Delete a session only if it belongs to `user_id`
    pub async fn revoke_owned(&self, user_id: i32, session_id: Uuid) -> Result<bool, AuthError> {
        self.repo.delete_for_user(user_id, session_id).await
    }

    pub async fn revoke_all_for_subject(&self, user_id: i32) -> Result<u64, AuthError> {
        let removed = self.repo.delete_all_for_user(user_id).await?;
        info!(user_id, removed, "All sessions revoked");
        Ok(removed)
    }

    /// Live sessions, newest first
    pub async fn list_for_subject(&self, user_id: i32) -> Result<Vec<Session>, AuthError> {
        self.repo.list_for_user(user_id, Utc::now()).await
    }

    pub async fn purge_expired(&self) -> Result<u64, AuthError> {
        self.purge_expired_at(Utc::now()).await
    }

    pub async fn purge_expired_at(&self, now: DateTime<Utc>) -> Result<u64, AuthError> {
        self.repo.delete_expired(now).await
    }

    /// Spawn the periodic expired-session purge
    pub fn spawn_purge_task(self, every: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            loop {
                ticker.tick().await;
                match self.purge_expired().await {
                    Ok(0) => {}
                    Ok(purged) => info!(purged, "Purged expired sessions"),
                    Err(e) => warn!("Session purge failed: {}", e),
                }
            }
        })
    }
}
