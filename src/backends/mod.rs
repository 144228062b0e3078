//! Authentication backends and the ordered chain that consults them.

mod chain;
mod model;
mod remote;

pub use self::chain::{Authenticated, BackendChain};
pub use self::model::ModelBackend;
pub use self::remote::{RemoteUserBackend, UsernameCleaner};

use async_trait::async_trait;
use secrecy::SecretString;
use std::fmt;

use crate::error::Result;
use crate::permissions::{PermissionCache, PermissionSet};
use crate::principal::{PermissionId, Principal, PrincipalId, Scope};

/// What a client presents to log in.
#[derive(Clone)]
pub enum Credentials {
    Password {
        username: String,
        password: SecretString,
    },
    /// Username asserted by a trusted upstream (e.g. a reverse proxy).
    RemoteUser { remote_user: String },
}

impl Credentials {
    #[must_use]
    pub fn password(username: &str, password: SecretString) -> Self {
        Self::Password {
            username: username.to_string(),
            password,
        }
    }

    #[must_use]
    pub fn remote_user(remote_user: &str) -> Self {
        Self::RemoteUser {
            remote_user: remote_user.to_string(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Password { username, .. } => f
                .debug_struct("Password")
                .field("username", username)
                .field("password", &"***")
                .finish(),
            Self::RemoteUser { remote_user } => f
                .debug_struct("RemoteUser")
                .field("remote_user", remote_user)
                .finish(),
        }
    }
}

/// One way of establishing who a principal is.
#[async_trait]
pub trait AuthBackend: Send + Sync {
    /// Stable name recorded in the session on login.
    fn name(&self) -> &'static str;

    /// `Ok(None)` means "not me, or not valid": the chain moves on.
    ///
    /// # Errors
    /// Store failures; these abort the chain.
    async fn authenticate(&self, credentials: &Credentials) -> Result<Option<Principal>>;

    /// # Errors
    /// Store failures.
    async fn get_principal(&self, id: PrincipalId) -> Result<Option<Principal>>;

    /// Active-principal policy. Inactive principals are refused by default.
    fn can_authenticate(&self, principal: &Principal) -> bool {
        principal.is_active
    }

    /// # Errors
    /// Store failures.
    async fn effective_permissions(
        &self,
        _principal: &Principal,
        _scope: &Scope,
        _cache: &mut PermissionCache,
    ) -> Result<PermissionSet> {
        Ok(PermissionSet::empty())
    }

    /// # Errors
    /// Store failures.
    async fn has_permission(
        &self,
        principal: &Principal,
        permission: &PermissionId,
        scope: &Scope,
        cache: &mut PermissionCache,
    ) -> Result<bool> {
        if !principal.is_active {
            return Ok(false);
        }
        Ok(self
            .effective_permissions(principal, scope, cache)
            .await?
            .contains(permission))
    }

    /// # Errors
    /// Store failures.
    async fn has_namespace_permissions(
        &self,
        principal: &Principal,
        namespace: &str,
        cache: &mut PermissionCache,
    ) -> Result<bool> {
        if !principal.is_active {
            return Ok(false);
        }
        Ok(self
            .effective_permissions(principal, &Scope::Global, cache)
            .await?
            .any_in_namespace(namespace))
    }
}
