use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info, instrument};

use super::{AuthBackend, Credentials};
use crate::config::BackendKind;
use crate::error::{Result, StoreError};
use crate::hashers::unusable_password;
use crate::permissions::{PermissionCache, PermissionResolver, PermissionSet};
use crate::principal::{Principal, PrincipalId, Scope};
use crate::store::CredentialStore;

/// Maps the upstream-asserted name to a local username.
pub type UsernameCleaner = Arc<dyn Fn(&str) -> String + Send + Sync>;

/// Trusts a username asserted by an upstream authenticator.
///
/// Unknown usernames are created on first sight with an unusable password,
/// unless `create_unknown_user` is off.
pub struct RemoteUserBackend {
    store: Arc<dyn CredentialStore>,
    resolver: PermissionResolver,
    create_unknown_user: bool,
    allow_inactive: bool,
    cleaner: Option<UsernameCleaner>,
}

impl RemoteUserBackend {
    pub fn new(store: Arc<dyn CredentialStore>) -> Self {
        Self {
            resolver: PermissionResolver::new(store.clone()),
            store,
            create_unknown_user: true,
            allow_inactive: false,
            cleaner: None,
        }
    }

    pub fn allow_all_users(store: Arc<dyn CredentialStore>) -> Self {
        Self {
            allow_inactive: true,
            ..Self::new(store)
        }
    }

    #[must_use]
    pub fn with_create_unknown_user(mut self, create: bool) -> Self {
        self.create_unknown_user = create;
        self
    }

    #[must_use]
    pub fn with_username_cleaner(mut self, cleaner: UsernameCleaner) -> Self {
        self.cleaner = Some(cleaner);
        self
    }

    fn clean_username(&self, remote_user: &str) -> String {
        self.cleaner
            .as_ref()
            .map_or_else(|| remote_user.to_string(), |clean| clean(remote_user))
    }

    async fn load_or_create(&self, username: &str) -> Result<Option<Principal>> {
        if let Some(principal) = self.store.load(username).await? {
            return Ok(Some(principal));
        }
        if !self.create_unknown_user {
            return Ok(None);
        }
        match self
            .store
            .create_principal(Principal::new(username, unusable_password()))
            .await
        {
            Ok(principal) => {
                info!(principal = %principal.id, username, "created principal for remote user");
                Ok(Some(principal))
            }
            // Lost a creation race; the other request's principal is ours too.
            Err(StoreError::Rejected(_)) => Ok(self.store.load(username).await?),
            Err(err) => Err(err.into()),
        }
    }
}

#[async_trait]
impl AuthBackend for RemoteUserBackend {
    fn name(&self) -> &'static str {
        if self.allow_inactive {
            BackendKind::AllowAllUsersRemoteUser.as_str()
        } else {
            BackendKind::RemoteUser.as_str()
        }
    }

    #[instrument(skip(self, credentials), fields(backend = self.name()))]
    async fn authenticate(&self, credentials: &Credentials) -> Result<Option<Principal>> {
        let Credentials::RemoteUser { remote_user } = credentials else {
            return Ok(None);
        };
        if remote_user.is_empty() {
            return Ok(None);
        }
        let username = self.clean_username(remote_user);
        let Some(principal) = self.load_or_create(&username).await? else {
            debug!(username, "remote user unknown");
            return Ok(None);
        };
        if !self.can_authenticate(&principal) {
            debug!(principal = %principal.id, "principal may not authenticate");
            return Ok(None);
        }
        Ok(Some(principal))
    }

    async fn get_principal(&self, id: PrincipalId) -> Result<Option<Principal>> {
        Ok(self
            .store
            .load_by_id(id)
            .await?
            .filter(|principal| self.can_authenticate(principal)))
    }

    fn can_authenticate(&self, principal: &Principal) -> bool {
        self.allow_inactive || principal.is_active
    }

    async fn effective_permissions(
        &self,
        principal: &Principal,
        scope: &Scope,
        cache: &mut PermissionCache,
    ) -> Result<PermissionSet> {
        self.resolver
            .effective_permissions(principal, scope, cache)
            .await
    }
}
