//! The assembled kernel: one place that wires configuration, store, hashers,
//! backends and session binding together.

use secrecy::{ExposeSecret, SecretString};
use std::sync::Arc;
use tracing::{debug, info, instrument};

use crate::backends::{
    Authenticated, AuthBackend, BackendChain, Credentials, ModelBackend, RemoteUserBackend,
};
use crate::config::{BackendKind, KernelConfig};
use crate::error::{AuthError, Result};
use crate::hashers::HashRegistry;
use crate::permissions::{PermissionCache, PermissionResolver, PermissionSet};
use crate::principal::{GroupId, PermissionId, Principal, Scope};
use crate::session::{SessionBinder, SessionState};
use crate::store::{CredentialStore, TimedStore};
use crate::validation::{help_texts, validate_password, PasswordValidator};
use crate::verifier::PasswordVerifier;

pub struct AuthKernel {
    store: Arc<dyn CredentialStore>,
    verifier: Arc<PasswordVerifier>,
    resolver: PermissionResolver,
    chain: BackendChain,
    binder: SessionBinder,
    validators: Vec<Box<dyn PasswordValidator>>,
}

impl AuthKernel {
    /// Build every component from `config`. The store is wrapped so each
    /// round-trip is bounded by `config.store_timeout`.
    ///
    /// # Errors
    /// Returns `InvalidArgument` for an unusable configuration: no backends,
    /// an unknown or duplicate hasher, an empty secret or a bad validator.
    pub fn new(config: KernelConfig, store: Arc<dyn CredentialStore>) -> Result<Self> {
        let store: Arc<dyn CredentialStore> =
            Arc::new(TimedStore::new(store, config.store_timeout));
        let registry = Arc::new(HashRegistry::from_settings(&config.hashers)?);
        let verifier = Arc::new(PasswordVerifier::new(registry)?);

        let backends = config
            .backends
            .iter()
            .map(|kind| -> Arc<dyn AuthBackend> {
                match kind {
                    BackendKind::Model => Arc::new(ModelBackend::new(store.clone(), verifier.clone())),
                    BackendKind::AllowAllUsersModel => {
                        Arc::new(ModelBackend::allow_all_users(store.clone(), verifier.clone()))
                    }
                    BackendKind::RemoteUser => Arc::new(
                        RemoteUserBackend::new(store.clone())
                            .with_create_unknown_user(config.remote_user.create_unknown_user),
                    ),
                    BackendKind::AllowAllUsersRemoteUser => Arc::new(
                        RemoteUserBackend::allow_all_users(store.clone())
                            .with_create_unknown_user(config.remote_user.create_unknown_user),
                    ),
                }
            })
            .collect();
        let chain = BackendChain::new(backends)?;

        let binder = SessionBinder::new(
            &config.key_salt,
            config.secret,
            config.fallback_secrets,
            config.fingerprint_algorithm,
        )?;
        let validators = config
            .validators
            .iter()
            .map(|validator| validator.build())
            .collect::<Result<Vec<_>>>()?;

        debug!(
            backends = ?chain,
            hashers = ?verifier.registry().algorithms().collect::<Vec<_>>(),
            "kernel assembled"
        );

        Ok(Self {
            resolver: PermissionResolver::new(store.clone()),
            store,
            verifier,
            chain,
            binder,
            validators,
        })
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<HashRegistry> {
        self.verifier.registry()
    }

    #[must_use]
    pub fn verifier(&self) -> &Arc<PasswordVerifier> {
        &self.verifier
    }

    #[must_use]
    pub fn binder(&self) -> &SessionBinder {
        &self.binder
    }

    #[must_use]
    pub fn chain(&self) -> &BackendChain {
        &self.chain
    }

    /// The timeout-bounded store every component shares.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn CredentialStore> {
        &self.store
    }

    /// Run the chain without touching any session.
    ///
    /// # Errors
    /// `StoreUnavailable` when a backend cannot reach the store.
    pub async fn authenticate(&self, credentials: &Credentials) -> Result<Option<Authenticated>> {
        self.chain.authenticate(credentials).await
    }

    /// Authenticate and, on success, bind the principal to `session`.
    /// A failed attempt leaves the session untouched.
    ///
    /// # Errors
    /// `StoreUnavailable` when a backend cannot reach the store.
    #[instrument(skip(self, credentials, session))]
    pub async fn login(
        &self,
        credentials: &Credentials,
        session: &mut SessionState,
    ) -> Result<Option<Authenticated>> {
        let Some(authenticated) = self.chain.authenticate(credentials).await? else {
            info!("login failed");
            return Ok(None);
        };
        self.binder
            .login(session, &authenticated.principal, authenticated.backend)?;
        Ok(Some(authenticated))
    }

    /// The principal a session belongs to, if it still checks out.
    ///
    /// The principal is reloaded through the backend that logged it in, and
    /// the session's fingerprint is checked against its current hash. Any
    /// failure logs the session out and keeps its business data.
    ///
    /// # Errors
    /// `StoreUnavailable` when the principal cannot be reloaded.
    #[instrument(skip(self, session))]
    pub async fn current_principal(&self, session: &mut SessionState) -> Result<Option<Principal>> {
        let (Some(id), Some(backend)) = (session.principal_id(), session.backend()) else {
            return Ok(None);
        };
        let Some(principal) = self.chain.get_principal(id, backend).await? else {
            debug!(principal = %id, "session principal no longer loadable");
            session.deauthenticate();
            return Ok(None);
        };
        if !self.binder.verify_session(session, &principal)? {
            return Ok(None);
        }
        Ok(Some(principal))
    }

    pub fn logout(&self, session: &mut SessionState) {
        self.binder.logout(session);
    }

    /// Validate, hash with the preferred algorithm and store a new password.
    ///
    /// The write only lands if the stored hash is still the one `principal`
    /// carries. `session` stays valid if it belongs to `principal`; every
    /// other session of theirs fails its next fingerprint check.
    ///
    /// # Errors
    /// `PasswordValidation` when a validator rejects the password,
    /// `RehashFailed` when the stored hash changed underneath, and
    /// `StoreUnavailable` on store failure.
    #[instrument(skip(self, principal, new_password, session), fields(principal = %principal.id))]
    pub async fn set_password(
        &self,
        principal: &Principal,
        new_password: &SecretString,
        session: &mut SessionState,
    ) -> Result<Principal> {
        validate_password(new_password.expose_secret(), Some(principal), &self.validators)?;
        let new_hash = self.registry().make_password(Some(new_password))?;
        if !self
            .store
            .save_hash(principal.id, &principal.password, &new_hash)
            .await?
        {
            return Err(AuthError::RehashFailed(
                "stored hash changed concurrently".to_string(),
            ));
        }
        let mut updated = principal.clone();
        updated.password = new_hash;
        self.binder.update_after_password_change(session, &updated)?;
        info!("password changed");
        Ok(updated)
    }

    /// # Errors
    /// `PasswordValidation` listing every rule the password breaks.
    pub fn validate_password(&self, password: &SecretString, principal: Option<&Principal>) -> Result<()> {
        validate_password(password.expose_secret(), principal, &self.validators)
    }

    #[must_use]
    pub fn password_help_texts(&self) -> Vec<String> {
        help_texts(&self.validators)
    }

    /// # Errors
    /// Store failures.
    pub async fn effective_permissions(
        &self,
        principal: &Principal,
        scope: &Scope,
        cache: &mut PermissionCache,
    ) -> Result<PermissionSet> {
        self.chain
            .effective_permissions_for(principal, scope, cache)
            .await
    }

    /// # Errors
    /// `InvalidArgument` for a malformed id, otherwise store failures.
    pub async fn has_permission(
        &self,
        principal: &Principal,
        permission: &str,
        scope: &Scope,
        cache: &mut PermissionCache,
    ) -> Result<bool> {
        let permission: PermissionId = permission.parse()?;
        self.chain
            .has_permission(principal, &permission, scope, cache)
            .await
    }

    /// # Errors
    /// `InvalidArgument` for an empty list or a malformed id.
    pub async fn has_all<S: AsRef<str>>(
        &self,
        principal: &Principal,
        permissions: &[S],
        scope: &Scope,
        cache: &mut PermissionCache,
    ) -> Result<bool> {
        self.chain.has_all(principal, permissions, scope, cache).await
    }

    /// # Errors
    /// Store failures.
    pub async fn has_namespace_permissions(
        &self,
        principal: &Principal,
        namespace: &str,
        cache: &mut PermissionCache,
    ) -> Result<bool> {
        self.chain
            .has_namespace_permissions(principal, namespace, cache)
            .await
    }

    /// # Errors
    /// `InvalidArgument` for a malformed id, otherwise store failures.
    pub async fn principals_with_permission(
        &self,
        permission: &str,
        include_superusers: bool,
        is_active: Option<bool>,
    ) -> Result<Vec<Principal>> {
        self.resolver
            .principals_with_permission(permission, include_superusers, is_active)
            .await
    }

    /// # Errors
    /// `InvalidArgument` for a malformed id, otherwise store failures.
    pub async fn grant(
        &self,
        principal: &Principal,
        permission: &str,
        scope: &Scope,
        cache: &mut PermissionCache,
    ) -> Result<()> {
        let permission: PermissionId = permission.parse()?;
        self.store
            .grant_permission(principal.id, &permission, scope)
            .await?;
        cache.invalidate(principal.id);
        info!(principal = %principal.id, %permission, %scope, "permission granted");
        Ok(())
    }

    /// # Errors
    /// `InvalidArgument` for a malformed id, otherwise store failures.
    pub async fn revoke(
        &self,
        principal: &Principal,
        permission: &str,
        scope: &Scope,
        cache: &mut PermissionCache,
    ) -> Result<()> {
        let permission: PermissionId = permission.parse()?;
        self.store
            .revoke_permission(principal.id, &permission, scope)
            .await?;
        cache.invalidate(principal.id);
        info!(principal = %principal.id, %permission, %scope, "permission revoked");
        Ok(())
    }

    /// Grant to a group. Any member may be cached, so the whole cache goes.
    ///
    /// # Errors
    /// `InvalidArgument` for a malformed id, otherwise store failures.
    pub async fn grant_group(
        &self,
        group: &GroupId,
        permission: &str,
        scope: &Scope,
        cache: &mut PermissionCache,
    ) -> Result<()> {
        let permission: PermissionId = permission.parse()?;
        self.store
            .grant_group_permission(group, &permission, scope)
            .await?;
        cache.clear();
        info!(group = %group.0, %permission, %scope, "group permission granted");
        Ok(())
    }

    /// # Errors
    /// `InvalidArgument` for a malformed id, otherwise store failures.
    pub async fn revoke_group(
        &self,
        group: &GroupId,
        permission: &str,
        scope: &Scope,
        cache: &mut PermissionCache,
    ) -> Result<()> {
        let permission: PermissionId = permission.parse()?;
        self.store
            .revoke_group_permission(group, &permission, scope)
            .await?;
        cache.clear();
        info!(group = %group.0, %permission, %scope, "group permission revoked");
        Ok(())
    }

    /// # Errors
    /// Store failures.
    pub async fn add_to_group(
        &self,
        principal: &Principal,
        group: &GroupId,
        cache: &mut PermissionCache,
    ) -> Result<()> {
        self.store.add_to_group(principal.id, group).await?;
        cache.invalidate(principal.id);
        info!(principal = %principal.id, group = %group.0, "added to group");
        Ok(())
    }

    /// # Errors
    /// Store failures.
    pub async fn remove_from_group(
        &self,
        principal: &Principal,
        group: &GroupId,
        cache: &mut PermissionCache,
    ) -> Result<()> {
        self.store.remove_from_group(principal.id, group).await?;
        cache.invalidate(principal.id);
        info!(principal = %principal.id, group = %group.0, "removed from group");
        Ok(())
    }
}
