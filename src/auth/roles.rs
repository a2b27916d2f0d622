// Role hierarchy and authorization decisions
//
// Ranks are the only authorization signal: lower rank means more privilege.
// The name -> rank table is held in memory and reloaded whenever roles change.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::auth::error::AuthError;
use crate::auth::models::Role;
use crate::auth::repository::RoleRepository;

/// Rank used as the threshold when none of an endpoint's allowed roles exist
pub const LEAST_PRIVILEGED_RANK: i32 = 99;

/// Validated, de-duplicated set of role names carried in access tokens
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoleSet(BTreeSet<String>);

impl RoleSet {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains(name)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn to_vec(&self) -> Vec<String> {
        self.0.iter().cloned().collect()
    }
}

/// Immutable snapshot of role name -> rank
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoleTable {
    ranks: HashMap<String, i32>,
}

impl RoleTable {
    pub fn from_roles(roles: &[Role]) -> Self {
        Self {
            ranks: roles.iter().map(|r| (r.name.clone(), r.rank)).collect(),
        }
    }

    pub fn from_pairs<'a>(pairs: impl IntoIterator<Item = (&'a str, i32)>) -> Self {
        Self {
            ranks: pairs.into_iter().map(|(n, r)| (n.to_string(), r)).collect(),
        }
    }

    pub fn rank_of(&self, name: &str) -> Option<i32> {
        self.ranks.get(name).copied()
    }

    pub fn len(&self) -> usize {
        self.ranks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ranks.is_empty()
    }

    /// Build a RoleSet, rejecting names absent from the table
    pub fn role_set<'a>(&self, names: impl IntoIterator<Item = &'a str>) -> Result<RoleSet, AuthError> {
        let mut set = BTreeSet::new();
        for name in names {
            if !self.ranks.contains_key(name) {
                return Err(AuthError::UnknownRole(name.to_string()));
            }
            set.insert(name.to_string());
        }
        Ok(RoleSet(set))
    }

    fn allowed_min<'a>(&self, allowed: impl IntoIterator<Item = &'a str>) -> Option<i32> {
        allowed.into_iter().filter_map(|name| self.rank_of(name)).min()
    }

    /// Most privileged rank among the allowed names that exist, else 99
    pub fn threshold<'a>(&self, allowed: impl IntoIterator<Item = &'a str>) -> i32 {
        self.allowed_min(allowed).unwrap_or(LEAST_PRIVILEGED_RANK)
    }

    /// Most privileged rank the caller holds, None when nothing resolves
    pub fn best_rank<'a>(&self, held: impl IntoIterator<Item = &'a str>) -> Option<i32> {
        held.into_iter().filter_map(|name| self.rank_of(name)).min()
    }

    /// Admit the caller when some held role ranks at or above the threshold
    ///
    /// When none of the allowed names exist the endpoint fails closed: only a
    /// caller holding the least-privileged default rank is admitted.
    /// Returns the rank that satisfied the check.
    pub fn authorize<'a, 'b>(
        &self,
        held: impl IntoIterator<Item = &'a str>,
        allowed: impl IntoIterator<Item = &'b str>,
    ) -> Result<i32, AuthError> {
        let held_ranks: Vec<i32> = held.into_iter().filter_map(|name| self.rank_of(name)).collect();
        let best_rank = held_ranks.iter().min().copied();

        match self.allowed_min(allowed) {
            Some(required_rank) => match best_rank {
                Some(best) if best <= required_rank => Ok(best),
                _ => Err(AuthError::Forbidden { required_rank, best_rank }),
            },
            None if held_ranks.contains(&LEAST_PRIVILEGED_RANK) => Ok(LEAST_PRIVILEGED_RANK),
            None => Err(AuthError::Forbidden {
                required_rank: LEAST_PRIVILEGED_RANK,
                best_rank,
            }),
        }
    }

    /// Check that the caller may grant or remove `role_name`
    ///
    /// Nobody manages a role more privileged than their own best rank.
    /// Returns the target role's rank.
    pub fn ensure_can_manage<'a>(
        &self,
        held: impl IntoIterator<Item = &'a str>,
        role_name: &str,
    ) -> Result<i32, AuthError> {
        let target_rank = self
            .rank_of(role_name)
            .ok_or_else(|| AuthError::UnknownRole(role_name.to_string()))?;

        match self.best_rank(held) {
            Some(best) if best <= target_rank => Ok(target_rank),
            best_rank => Err(AuthError::Forbidden {
                required_rank: target_rank,
                best_rank,
            }),
        }
    }
}

/// Shared, reloadable role table
///
/// Readers take a cheap Arc snapshot; reloads swap the snapshot atomically.
pub struct RoleHierarchy {
    repo: Arc<dyn RoleRepository>,
    table: RwLock<Arc<RoleTable>>,
}

impl RoleHierarchy {
    /// Load the role table from the repository
    pub async fn load(repo: Arc<dyn RoleRepository>) -> Result<Self, AuthError> {
        let roles = repo.list_roles().await?;
        info!(roles = roles.len(), "Role hierarchy loaded");
        Ok(Self {
            repo,
            table: RwLock::new(Arc::new(RoleTable::from_roles(&roles))),
        })
    }

    pub async fn snapshot(&self) -> Arc<RoleTable> {
        self.table.read().await.clone()
    }

    /// Re-read roles after a mutation
    pub async fn reload(&self) -> Result<(), AuthError> {
        let roles = self.repo.list_roles().await?;
        let table = Arc::new(RoleTable::from_roles(&roles));
        *self.table.write().await = table;
        debug!(roles = roles.len(), "Role hierarchy reloaded");
        Ok(())
    }

    pub async fn authorize(&self, held: &RoleSet, allowed: &[String]) -> Result<i32, AuthError> {
        self.snapshot()
            .await
            .authorize(held.iter(), allowed.iter().map(String::as_str))
    }
}
