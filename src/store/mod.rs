//! Credential store adapter.
//!
//! The kernel never touches persistence directly. Everything goes through
//! [`CredentialStore`], and every round-trip is bounded by [`TimedStore`] so a
//! slow or wedged store fails closed instead of hanging a login.

mod fixture;
mod memory;

pub use self::fixture::{Fixture, FixtureGrant, FixtureGroup, FixturePrincipal};
pub use self::memory::MemoryStore;

use async_trait::async_trait;
use std::collections::BTreeSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

use crate::error::StoreError;
use crate::principal::{GroupId, PermissionId, Principal, PrincipalId, Scope};

/// Persistence operations the kernel relies on.
///
/// Lookups are tagged: `Ok(None)` is a clean miss, `Err` is a store failure.
/// The two must never be conflated.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn load(&self, username: &str) -> Result<Option<Principal>, StoreError>;

    async fn load_by_id(&self, id: PrincipalId) -> Result<Option<Principal>, StoreError>;

    /// Replace the stored hash only if it still equals `expected`.
    /// Returns `false` when another writer got there first.
    async fn save_hash(
        &self,
        id: PrincipalId,
        expected: &str,
        new_hash: &str,
    ) -> Result<bool, StoreError>;

    async fn load_groups(&self, id: PrincipalId) -> Result<Vec<GroupId>, StoreError>;

    async fn load_direct_permissions(
        &self,
        id: PrincipalId,
        scope: &Scope,
    ) -> Result<BTreeSet<PermissionId>, StoreError>;

    async fn load_group_permissions(
        &self,
        groups: &[GroupId],
        scope: &Scope,
    ) -> Result<BTreeSet<PermissionId>, StoreError>;

    /// Insert a new principal. Fails with `Rejected` when the username is taken.
    async fn create_principal(&self, principal: Principal) -> Result<Principal, StoreError>;

    /// Principals holding `permission` globally, directly or through a group.
    async fn principals_with_permission(
        &self,
        permission: &PermissionId,
        include_superusers: bool,
        is_active: Option<bool>,
    ) -> Result<Vec<Principal>, StoreError>;

    async fn grant_permission(
        &self,
        id: PrincipalId,
        permission: &PermissionId,
        scope: &Scope,
    ) -> Result<(), StoreError>;

    async fn revoke_permission(
        &self,
        id: PrincipalId,
        permission: &PermissionId,
        scope: &Scope,
    ) -> Result<(), StoreError>;

    async fn grant_group_permission(
        &self,
        group: &GroupId,
        permission: &PermissionId,
        scope: &Scope,
    ) -> Result<(), StoreError>;

    async fn revoke_group_permission(
        &self,
        group: &GroupId,
        permission: &PermissionId,
        scope: &Scope,
    ) -> Result<(), StoreError>;

    async fn add_to_group(&self, id: PrincipalId, group: &GroupId) -> Result<(), StoreError>;

    async fn remove_from_group(&self, id: PrincipalId, group: &GroupId)
        -> Result<(), StoreError>;
}

/// Wraps a store so that every call is bounded by `timeout`.
#[derive(Clone)]
pub struct TimedStore {
    inner: Arc<dyn CredentialStore>,
    timeout: Duration,
}

impl TimedStore {
    pub fn new(inner: Arc<dyn CredentialStore>, timeout: Duration) -> Self {
        Self { inner, timeout }
    }

    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn bounded<T, F>(&self, operation: &'static str, future: F) -> Result<T, StoreError>
    where
        T: Send,
        F: Future<Output = Result<T, StoreError>> + Send,
    {
        match tokio::time::timeout(self.timeout, future).await {
            Ok(result) => result,
            Err(_) => {
                warn!(operation, timeout = ?self.timeout, "store round-trip timed out");
                Err(StoreError::Timeout(self.timeout))
            }
        }
    }
}

#[async_trait]
impl CredentialStore for TimedStore {
    async fn load(&self, username: &str) -> Result<Option<Principal>, StoreError> {
        self.bounded("load", self.inner.load(username)).await
    }

    async fn load_by_id(&self, id: PrincipalId) -> Result<Option<Principal>, StoreError> {
        self.bounded("load_by_id", self.inner.load_by_id(id)).await
    }

    async fn save_hash(
        &self,
        id: PrincipalId,
        expected: &str,
        new_hash: &str,
    ) -> Result<bool, StoreError> {
        self.bounded("save_hash", self.inner.save_hash(id, expected, new_hash))
            .await
    }

    async fn load_groups(&self, id: PrincipalId) -> Result<Vec<GroupId>, StoreError> {
        self.bounded("load_groups", self.inner.load_groups(id)).await
    }

    async fn load_direct_permissions(
        &self,
        id: PrincipalId,
        scope: &Scope,
    ) -> Result<BTreeSet<PermissionId>, StoreError> {
        self.bounded(
            "load_direct_permissions",
            self.inner.load_direct_permissions(id, scope),
        )
        .await
    }

    async fn load_group_permissions(
        &self,
        groups: &[GroupId],
        scope: &Scope,
    ) -> Result<BTreeSet<PermissionId>, StoreError> {
        self.bounded(
            "load_group_permissions",
            self.inner.load_group_permissions(groups, scope),
        )
        .await
    }

    async fn create_principal(&self, principal: Principal) -> Result<Principal, StoreError> {
        self.bounded("create_principal", self.inner.create_principal(principal))
            .await
    }

    async fn principals_with_permission(
        &self,
        permission: &PermissionId,
        include_superusers: bool,
        is_active: Option<bool>,
    ) -> Result<Vec<Principal>, StoreError> {
        self.bounded(
            "principals_with_permission",
            self.inner
                .principals_with_permission(permission, include_superusers, is_active),
        )
        .await
    }

    async fn grant_permission(
        &self,
        id: PrincipalId,
        permission: &PermissionId,
        scope: &Scope,
    ) -> Result<(), StoreError> {
        self.bounded(
            "grant_permission",
            self.inner.grant_permission(id, permission, scope),
        )
        .await
    }

    async fn revoke_permission(
        &self,
        id: PrincipalId,
        permission: &PermissionId,
        scope: &Scope,
    ) -> Result<(), StoreError> {
        self.bounded(
            "revoke_permission",
            self.inner.revoke_permission(id, permission, scope),
        )
        .await
    }

    async fn grant_group_permission(
        &self,
        group: &GroupId,
        permission: &PermissionId,
        scope: &Scope,
    ) -> Result<(), StoreError> {
        self.bounded(
            "grant_group_permission",
            self.inner.grant_group_permission(group, permission, scope),
        )
        .await
    }

    async fn revoke_group_permission(
        &self,
        group: &GroupId,
        permission: &PermissionId,
        scope: &Scope,
    ) -> Result<(), StoreError> {
        self.bounded(
            "revoke_group_permission",
            self.inner.revoke_group_permission(group, permission, scope),
        )
        .await
    }

    async fn add_to_group(&self, id: PrincipalId, group: &GroupId) -> Result<(), StoreError> {
        self.bounded("add_to_group", self.inner.add_to_group(id, group))
            .await
    }

    async fn remove_from_group(
        &self,
        id: PrincipalId,
        group: &GroupId,
    ) -> Result<(), StoreError> {
        self.bounded("remove_from_group", self.inner.remove_from_group(id, group))
            .await
    }
}
