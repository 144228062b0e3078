use async_trait::async_trait;
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, instrument};

use super::CredentialStore;
use crate::error::StoreError;
use crate::principal::{normalize_username, GroupId, PermissionId, Principal, PrincipalId, Scope};

#[derive(Default)]
struct State {
    principals: HashMap<PrincipalId, Principal>,
    usernames: HashMap<String, PrincipalId>,
    memberships: HashMap<PrincipalId, BTreeSet<GroupId>>,
    direct: HashMap<(PrincipalId, Scope), BTreeSet<PermissionId>>,
    group: HashMap<(GroupId, Scope), BTreeSet<PermissionId>>,
}

/// In-process store, used by the CLI fixtures and the test suite.
///
/// Latency and outages can be injected to exercise the timeout and
/// fail-closed paths.
#[derive(Default)]
pub struct MemoryStore {
    state: RwLock<State>,
    latency_ms: AtomicU64,
    unavailable: AtomicBool,
    round_trips: AtomicUsize,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every subsequent call by `latency`.
    pub fn set_latency(&self, latency: Duration) {
        let millis = u64::try_from(latency.as_millis()).unwrap_or(u64::MAX);
        self.latency_ms.store(millis, Ordering::SeqCst);
    }

    /// Make every subsequent call fail with `Unavailable`.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Number of calls served so far, failed ones included.
    #[must_use]
    pub fn round_trips(&self) -> usize {
        self.round_trips.load(Ordering::SeqCst)
    }

    async fn round_trip(&self) -> Result<(), StoreError> {
        self.round_trips.fetch_add(1, Ordering::SeqCst);
        let latency = self.latency_ms.load(Ordering::SeqCst);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable(
                "memory store marked unavailable".to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl CredentialStore for MemoryStore {
    async fn load(&self, username: &str) -> Result<Option<Principal>, StoreError> {
        self.round_trip().await?;
        let state = self.state.read().await;
        Ok(state
            .usernames
            .get(&normalize_username(username))
            .and_then(|id| state.principals.get(id))
            .cloned())
    }

    async fn load_by_id(&self, id: PrincipalId) -> Result<Option<Principal>, StoreError> {
        self.round_trip().await?;
        Ok(self.state.read().await.principals.get(&id).cloned())
    }

    #[instrument(skip(self, expected, new_hash))]
    async fn save_hash(
        &self,
        id: PrincipalId,
        expected: &str,
        new_hash: &str,
    ) -> Result<bool, StoreError> {
        self.round_trip().await?;
        let mut state = self.state.write().await;
        let Some(principal) = state.principals.get_mut(&id) else {
            return Ok(false);
        };
        if principal.password != expected {
            debug!("stored hash changed concurrently, write skipped");
            return Ok(false);
        }
        principal.password = new_hash.to_string();
        Ok(true)
    }

    async fn load_groups(&self, id: PrincipalId) -> Result<Vec<GroupId>, StoreError> {
        self.round_trip().await?;
        Ok(self
            .state
            .read()
            .await
            .memberships
            .get(&id)
            .map(|groups| groups.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn load_direct_permissions(
        &self,
        id: PrincipalId,
        scope: &Scope,
    ) -> Result<BTreeSet<PermissionId>, StoreError> {
        self.round_trip().await?;
        Ok(self
            .state
            .read()
            .await
            .direct
            .get(&(id, scope.clone()))
            .cloned()
            .unwrap_or_default())
    }

    async fn load_group_permissions(
        &self,
        groups: &[GroupId],
        scope: &Scope,
    ) -> Result<BTreeSet<PermissionId>, StoreError> {
        self.round_trip().await?;
        let state = self.state.read().await;
        Ok(groups
            .iter()
            .filter_map(|group| state.group.get(&(group.clone(), scope.clone())))
            .flatten()
            .cloned()
            .collect())
    }

    async fn create_principal(&self, principal: Principal) -> Result<Principal, StoreError> {
        self.round_trip().await?;
        let mut state = self.state.write().await;
        if state.usernames.contains_key(&principal.username) {
            return Err(StoreError::Rejected(format!(
                "username already taken: {}",
                principal.username
            )));
        }
        if state.principals.contains_key(&principal.id) {
            return Err(StoreError::Rejected(format!(
                "principal id already present: {}",
                principal.id
            )));
        }
        state
            .usernames
            .insert(principal.username.clone(), principal.id);
        state.principals.insert(principal.id, principal.clone());
        Ok(principal)
    }

    async fn principals_with_permission(
        &self,
        permission: &PermissionId,
        include_superusers: bool,
        is_active: Option<bool>,
    ) -> Result<Vec<Principal>, StoreError> {
        self.round_trip().await?;
        let state = self.state.read().await;
        let granted = |principal: &Principal| {
            let direct = state
                .direct
                .get(&(principal.id, Scope::Global))
                .is_some_and(|perms| perms.contains(permission));
            let via_group = state.memberships.get(&principal.id).is_some_and(|groups| {
                groups.iter().any(|group| {
                    state
                        .group
                        .get(&(group.clone(), Scope::Global))
                        .is_some_and(|perms| perms.contains(permission))
                })
            });
            direct || via_group || (include_superusers && principal.is_superuser)
        };
        let mut matches: Vec<Principal> = state
            .principals
            .values()
            .filter(|principal| is_active.map_or(true, |active| principal.is_active == active))
            .filter(|principal| granted(principal))
            .cloned()
            .collect();
        matches.sort_by(|a, b| a.username.cmp(&b.username));
        Ok(matches)
    }

    async fn grant_permission(
        &self,
        id: PrincipalId,
        permission: &PermissionId,
        scope: &Scope,
    ) -> Result<(), StoreError> {
        self.round_trip().await?;
        let mut state = self.state.write().await;
        if !state.principals.contains_key(&id) {
            return Err(StoreError::Rejected(format!("unknown principal: {id}")));
        }
        state
            .direct
            .entry((id, scope.clone()))
            .or_default()
            .insert(permission.clone());
        Ok(())
    }

    async fn revoke_permission(
        &self,
        id: PrincipalId,
        permission: &PermissionId,
        scope: &Scope,
    ) -> Result<(), StoreError> {
        self.round_trip().await?;
        if let Some(perms) = self
            .state
            .write()
            .await
            .direct
            .get_mut(&(id, scope.clone()))
        {
            perms.remove(permission);
        }
        Ok(())
    }

    async fn grant_group_permission(
        &self,
        group: &GroupId,
        permission: &PermissionId,
        scope: &Scope,
    ) -> Result<(), StoreError> {
        self.round_trip().await?;
        self.state
            .write()
            .await
            .group
            .entry((group.clone(), scope.clone()))
            .or_default()
            .insert(permission.clone());
        Ok(())
    }

    async fn revoke_group_permission(
        &self,
        group: &GroupId,
        permission: &PermissionId,
        scope: &Scope,
    ) -> Result<(), StoreError> {
        self.round_trip().await?;
        if let Some(perms) = self
            .state
            .write()
            .await
            .group
            .get_mut(&(group.clone(), scope.clone()))
        {
            perms.remove(permission);
        }
        Ok(())
    }

    async fn add_to_group(&self, id: PrincipalId, group: &GroupId) -> Result<(), StoreError> {
        self.round_trip().await?;
        let mut state = self.state.write().await;
        if !state.principals.contains_key(&id) {
            return Err(StoreError::Rejected(format!("unknown principal: {id}")));
        }
        state
            .memberships
            .entry(id)
            .or_default()
            .insert(group.clone());
        Ok(())
    }

    async fn remove_from_group(
        &self,
        id: PrincipalId,
        group: &GroupId,
    ) -> Result<(), StoreError> {
        self.round_trip().await?;
        if let Some(groups) = self.state.write().await.memberships.get_mut(&id) {
            groups.remove(group);
        }
        Ok(())
    }
}
