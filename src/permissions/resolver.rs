use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{instrument, trace};

use super::{PermissionCache, PermissionSet};
use crate::error::{AuthError, Result};
use crate::principal::{PermissionId, Principal, Scope};
use crate::store::CredentialStore;

/// Computes effective permissions from store grants, memoized per request.
#[derive(Clone)]
pub struct PermissionResolver {
    store: Arc<dyn CredentialStore>,
}

impl PermissionResolver {
    pub fn new(store: Arc<dyn CredentialStore>) -> Self {
        Self { store }
    }

    /// Permissions granted to the principal itself.
    ///
    /// # Errors
    /// Returns `StoreUnavailable` when the store fails or times out.
    pub async fn user_permissions(
        &self,
        principal: &Principal,
        scope: &Scope,
        cache: &mut PermissionCache,
    ) -> Result<PermissionSet> {
        if let Some(shortcut) = Self::shortcut(principal) {
            return Ok(shortcut);
        }
        Ok(self.direct(principal, scope, cache).await?.into())
    }

    /// Permissions the principal holds through group membership.
    ///
    /// # Errors
    /// Returns `StoreUnavailable` when the store fails or times out.
    pub async fn group_permissions(
        &self,
        principal: &Principal,
        scope: &Scope,
        cache: &mut PermissionCache,
    ) -> Result<PermissionSet> {
        if let Some(shortcut) = Self::shortcut(principal) {
            return Ok(shortcut);
        }
        Ok(self.grouped(principal, scope, cache).await?.into())
    }

    /// Union of direct and group permissions for exactly `scope`.
    ///
    /// # Errors
    /// Returns `StoreUnavailable` when the store fails or times out.
    #[instrument(skip(self, principal, cache), fields(principal = %principal.id))]
    pub async fn effective_permissions(
        &self,
        principal: &Principal,
        scope: &Scope,
        cache: &mut PermissionCache,
    ) -> Result<PermissionSet> {
        if let Some(shortcut) = Self::shortcut(principal) {
            return Ok(shortcut);
        }
        let mut permissions = self.direct(principal, scope, cache).await?;
        permissions.extend(self.grouped(principal, scope, cache).await?);
        Ok(PermissionSet::Only(permissions))
    }

    /// # Errors
    /// Returns `StoreUnavailable` when the store fails or times out.
    pub async fn has_permission(
        &self,
        principal: &Principal,
        permission: &PermissionId,
        scope: &Scope,
        cache: &mut PermissionCache,
    ) -> Result<bool> {
        Ok(self
            .effective_permissions(principal, scope, cache)
            .await?
            .contains(permission))
    }

    /// `true` only when every listed permission is held.
    ///
    /// # Errors
    /// Returns `InvalidArgument` for an empty list or a malformed id, and
    /// `StoreUnavailable` when the store fails.
    pub async fn has_all<S: AsRef<str>>(
        &self,
        principal: &Principal,
        permissions: &[S],
        scope: &Scope,
        cache: &mut PermissionCache,
    ) -> Result<bool> {
        let permissions = parse_permission_list(permissions)?;
        let effective = self.effective_permissions(principal, scope, cache).await?;
        Ok(permissions
            .iter()
            .all(|permission| effective.contains(permission)))
    }

    /// Whether the principal holds any global permission in `namespace`.
    ///
    /// # Errors
    /// Returns `StoreUnavailable` when the store fails or times out.
    pub async fn has_namespace_permissions(
        &self,
        principal: &Principal,
        namespace: &str,
        cache: &mut PermissionCache,
    ) -> Result<bool> {
        Ok(self
            .effective_permissions(principal, &Scope::Global, cache)
            .await?
            .any_in_namespace(namespace))
    }

    /// Principals holding `permission` globally.
    ///
    /// # Errors
    /// Returns `InvalidArgument` for a malformed id and `StoreUnavailable`
    /// when the store fails.
    pub async fn principals_with_permission(
        &self,
        permission: &str,
        include_superusers: bool,
        is_active: Option<bool>,
    ) -> Result<Vec<Principal>> {
        let permission: PermissionId = permission.parse()?;
        Ok(self
            .store
            .principals_with_permission(&permission, include_superusers, is_active)
            .await?)
    }

    fn shortcut(principal: &Principal) -> Option<PermissionSet> {
        if !principal.is_active || principal.is_anonymous() {
            return Some(PermissionSet::empty());
        }
        if principal.is_superuser {
            return Some(PermissionSet::All);
        }
        None
    }

    async fn direct(
        &self,
        principal: &Principal,
        scope: &Scope,
        cache: &mut PermissionCache,
    ) -> Result<BTreeSet<PermissionId>> {
        if let Some(direct) = cache
            .get(principal.id, scope)
            .and_then(|entry| entry.direct.clone())
        {
            trace!(%scope, "direct permissions served from cache");
            return Ok(direct);
        }
        let direct = self
            .store
            .load_direct_permissions(principal.id, scope)
            .await?;
        cache.entry(principal.id, scope).direct = Some(direct.clone());
        Ok(direct)
    }

    async fn grouped(
        &self,
        principal: &Principal,
        scope: &Scope,
        cache: &mut PermissionCache,
    ) -> Result<BTreeSet<PermissionId>> {
        if let Some(group) = cache
            .get(principal.id, scope)
            .and_then(|entry| entry.group.clone())
        {
            trace!(%scope, "group permissions served from cache");
            return Ok(group);
        }
        let groups = self.store.load_groups(principal.id).await?;
        let group = if groups.is_empty() {
            BTreeSet::new()
        } else {
            self.store.load_group_permissions(&groups, scope).await?
        };
        cache.entry(principal.id, scope).group = Some(group.clone());
        Ok(group)
    }
}

/// Parse a non-empty list of `namespace.action` ids.
///
/// # Errors
/// Returns `InvalidArgument` for an empty list or a malformed id.
pub fn parse_permission_list<S: AsRef<str>>(permissions: &[S]) -> Result<Vec<PermissionId>> {
    if permissions.is_empty() {
        return Err(AuthError::InvalidArgument(
            "permission list must not be empty".to_string(),
        ));
    }
    permissions
        .iter()
        .map(|permission| permission.as_ref().parse())
        .collect()
}
