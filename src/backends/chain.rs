use std::sync::Arc;
use tracing::{debug, instrument};

use super::{AuthBackend, Credentials};
use crate::error::{AuthError, Result};
use crate::permissions::{parse_permission_list, PermissionCache, PermissionSet};
use crate::principal::{PermissionId, Principal, PrincipalId, Scope};

/// A successful login: who, and which backend vouched for them.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Authenticated {
    pub principal: Principal,
    pub backend: &'static str,
}

/// Backends in configured order. Authentication stops at the first match;
/// permission checks succeed if any backend grants.
#[derive(Clone)]
pub struct BackendChain {
    backends: Vec<Arc<dyn AuthBackend>>,
}

impl std::fmt::Debug for BackendChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.backends.iter().map(|backend| backend.name()))
            .finish()
    }
}

impl BackendChain {
    /// # Errors
    /// Returns `InvalidArgument` for an empty chain.
    pub fn new(backends: Vec<Arc<dyn AuthBackend>>) -> Result<Self> {
        if backends.is_empty() {
            return Err(AuthError::InvalidArgument(
                "at least one authentication backend must be configured".to_string(),
            ));
        }
        Ok(Self { backends })
    }

    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.backends.iter().map(|backend| backend.name())
    }

    #[must_use]
    pub fn backend(&self, name: &str) -> Option<&Arc<dyn AuthBackend>> {
        self.backends.iter().find(|backend| backend.name() == name)
    }

    /// Try each backend in order; the first `Some` wins.
    ///
    /// # Errors
    /// A store failure in any backend aborts the chain with `StoreUnavailable`.
    #[instrument(skip(self, credentials))]
    pub async fn authenticate(&self, credentials: &Credentials) -> Result<Option<Authenticated>> {
        for (index, backend) in self.backends.iter().enumerate() {
            debug!(index, backend = backend.name(), "trying backend");
            match backend.authenticate(credentials).await {
                Ok(Some(principal)) => {
                    debug!(backend = backend.name(), principal = %principal.id, "authenticated");
                    return Ok(Some(Authenticated {
                        principal,
                        backend: backend.name(),
                    }));
                }
                Ok(None) => debug!(backend = backend.name(), "no match, moving on"),
                Err(err) => {
                    debug!(backend = backend.name(), "backend failed: {err}");
                    return Err(err);
                }
            }
        }
        debug!("all backends exhausted");
        Ok(None)
    }

    /// Load a principal through the backend recorded in its session.
    /// An unknown backend name yields `None`.
    ///
    /// # Errors
    /// Store failures.
    pub async fn get_principal(&self, id: PrincipalId, backend: &str) -> Result<Option<Principal>> {
        match self.backend(backend) {
            Some(backend) => backend.get_principal(id).await,
            None => {
                debug!(backend, "session names an unconfigured backend");
                Ok(None)
            }
        }
    }

    /// Union of what every backend grants.
    ///
    /// # Errors
    /// Store failures.
    pub async fn effective_permissions_for(
        &self,
        principal: &Principal,
        scope: &Scope,
        cache: &mut PermissionCache,
    ) -> Result<PermissionSet> {
        if principal.is_active_superuser() {
            return Ok(PermissionSet::All);
        }
        let mut permissions = PermissionSet::empty();
        for backend in &self.backends {
            permissions = permissions.union(
                backend
                    .effective_permissions(principal, scope, cache)
                    .await?,
            );
        }
        Ok(permissions)
    }

    /// Active superusers always pass. Otherwise any backend granting wins,
    /// and a backend saying no does not block a later one saying yes.
    ///
    /// # Errors
    /// Store failures.
    pub async fn has_permission(
        &self,
        principal: &Principal,
        permission: &PermissionId,
        scope: &Scope,
        cache: &mut PermissionCache,
    ) -> Result<bool> {
        if principal.is_active_superuser() {
            return Ok(true);
        }
        for backend in &self.backends {
            if backend
                .has_permission(principal, permission, scope, cache)
                .await?
            {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// # Errors
    /// Returns `InvalidArgument` for an empty list or a malformed id.
    pub async fn has_all<S: AsRef<str>>(
        &self,
        principal: &Principal,
        permissions: &[S],
        scope: &Scope,
        cache: &mut PermissionCache,
    ) -> Result<bool> {
        let permissions = parse_permission_list(permissions)?;
        for permission in &permissions {
            if !self.has_permission(principal, permission, scope, cache).await? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// # Errors
    /// Store failures.
    pub async fn has_namespace_permissions(
        &self,
        principal: &Principal,
        namespace: &str,
        cache: &mut PermissionCache,
    ) -> Result<bool> {
        if principal.is_active_superuser() {
            return Ok(true);
        }
        for backend in &self.backends {
            if backend
                .has_namespace_permissions(principal, namespace, cache)
                .await?
            {
                return Ok(true);
            }
        }
        Ok(false)
    }
}
