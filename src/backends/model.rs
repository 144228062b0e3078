use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, instrument, warn};

use super::{AuthBackend, Credentials};
use crate::config::BackendKind;
use crate::error::{AuthError, Result};
use crate::permissions::{PermissionCache, PermissionResolver, PermissionSet};
use crate::principal::{Principal, PrincipalId, Scope};
use crate::store::CredentialStore;
use crate::verifier::PasswordVerifier;

/// Username and password against the credential store.
pub struct ModelBackend {
    store: Arc<dyn CredentialStore>,
    verifier: Arc<PasswordVerifier>,
    resolver: PermissionResolver,
    allow_inactive: bool,
}

impl ModelBackend {
    /// Refuses inactive principals.
    pub fn new(store: Arc<dyn CredentialStore>, verifier: Arc<PasswordVerifier>) -> Self {
        Self {
            resolver: PermissionResolver::new(store.clone()),
            store,
            verifier,
            allow_inactive: false,
        }
    }

    /// Accepts inactive principals too.
    pub fn allow_all_users(
        store: Arc<dyn CredentialStore>,
        verifier: Arc<PasswordVerifier>,
    ) -> Self {
        Self {
            allow_inactive: true,
            ..Self::new(store, verifier)
        }
    }

    /// Write the upgraded hash, unless someone else changed it first.
    async fn store_upgrade(&self, principal: &mut Principal, new_hash: String) {
        let result = self
            .store
            .save_hash(principal.id, &principal.password, &new_hash)
            .await;
        let failure = match result {
            Ok(true) => {
                debug!(principal = %principal.id, "password hash upgraded");
                principal.password = new_hash;
                return;
            }
            Ok(false) => AuthError::RehashFailed("stored hash changed concurrently".to_string()),
            Err(err) => AuthError::RehashFailed(err.to_string()),
        };
        warn!(principal = %principal.id, "{failure}");
    }
}

#[async_trait]
impl AuthBackend for ModelBackend {
    fn name(&self) -> &'static str {
        if self.allow_inactive {
            BackendKind::AllowAllUsersModel.as_str()
        } else {
            BackendKind::Model.as_str()
        }
    }

    #[instrument(skip(self, credentials), fields(backend = self.name()))]
    async fn authenticate(&self, credentials: &Credentials) -> Result<Option<Principal>> {
        let Credentials::Password { username, password } = credentials else {
            return Ok(None);
        };

        let Some(mut principal) = self.store.load(username).await? else {
            // Same cost as a real verification.
            self.verifier.authenticate(password, None, |_| {});
            debug!("no principal with that username");
            return Ok(None);
        };

        let mut upgraded = None;
        if !self
            .verifier
            .authenticate(password, Some(&principal.password), |hash| {
                upgraded = Some(hash);
            })
        {
            debug!(principal = %principal.id, "password rejected");
            return Ok(None);
        }
        if let Some(new_hash) = upgraded {
            self.store_upgrade(&mut principal, new_hash).await;
        }

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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HasherSettings;
    use crate::error::StoreError;
    use crate::hashers::{HashAlgorithm, HashRegistry, Pbkdf2Hasher};
    use crate::store::MemoryStore;
    use secrecy::SecretString;

    fn verifier() -> Arc<PasswordVerifier> {
        let settings = HasherSettings::low_cost().with_order(["pbkdf2_sha256", "pbkdf2_sha1"]);
        Arc::new(
            PasswordVerifier::new(Arc::new(HashRegistry::from_settings(&settings).unwrap()))
                .unwrap(),
        )
    }

    async fn store_with(principal: Principal) -> Arc<MemoryStore> {
        let store = Arc::new(MemoryStore::new());
        store.create_principal(principal).await.unwrap();
        store
    }

    fn hash(password: &str) -> String {
        verifier()
            .registry()
            .make_password(Some(&SecretString::from(password)))
            .unwrap()
    }

    #[tokio::test]
    async fn authenticates_with_correct_password() {
        let store = store_with(Principal::new("alice", hash("s3cret-pass"))).await;
        let backend = ModelBackend::new(store, verifier());

        let ok = backend
            .authenticate(&Credentials::password("alice", SecretString::from("s3cret-pass")))
            .await
            .unwrap();
        assert_eq!(ok.map(|p| p.username), Some("alice".to_string()));

        let bad = backend
            .authenticate(&Credentials::password("alice", SecretString::from("nope")))
            .await
            .unwrap();
        assert!(bad.is_none());

        let unknown = backend
            .authenticate(&Credentials::password("mallory", SecretString::from("x")))
            .await
            .unwrap();
        assert!(unknown.is_none());
    }

    #[tokio::test]
    async fn inactive_policy_depends_on_variant() {
        let principal = Principal::new("dormant", hash("s3cret-pass")).with_active(false);
        let store = store_with(principal.clone()).await;
        let credentials = Credentials::password("dormant", SecretString::from("s3cret-pass"));

        let strict = ModelBackend::new(store.clone(), verifier());
        assert!(strict.authenticate(&credentials).await.unwrap().is_none());
        assert!(strict.get_principal(principal.id).await.unwrap().is_none());

        let lenient = ModelBackend::allow_all_users(store, verifier());
        assert_eq!(lenient.name(), "allow_all_users_model");
        assert!(lenient.authenticate(&credentials).await.unwrap().is_some());
        assert!(lenient.get_principal(principal.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn legacy_hash_is_rewritten_on_login() {
        let legacy = Pbkdf2Hasher::sha1()
            .with_iterations(5)
            .encode(&SecretString::from("s3cret-pass"), "abcdefghijklmnopqrstuv")
            .unwrap();
        let store = store_with(Principal::new("alice", legacy.clone())).await;
        let backend = ModelBackend::new(store.clone(), verifier());

        let principal = backend
            .authenticate(&Credentials::password("alice", SecretString::from("s3cret-pass")))
            .await
            .unwrap()
            .unwrap();
        assert!(principal.password.starts_with("pbkdf2_sha256$"));
        let stored = store.load("alice").await.unwrap().unwrap();
        assert_eq!(stored.password, principal.password);
        assert_ne!(stored.password, legacy);
    }

    #[tokio::test]
    async fn store_outage_is_an_error_not_a_miss() {
        let store = store_with(Principal::new("alice", hash("s3cret-pass"))).await;
        store.set_unavailable(true);
        let backend = ModelBackend::new(store, verifier());
        let err = backend
            .authenticate(&Credentials::password("alice", SecretString::from("s3cret-pass")))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            AuthError::StoreUnavailable(StoreError::Unavailable(_))
        ));
    }

    #[tokio::test]
    async fn remote_user_credentials_are_ignored() {
        let store = store_with(Principal::new("alice", hash("s3cret-pass"))).await;
        let backend = ModelBackend::new(store, verifier());
        assert!(backend
            .authenticate(&Credentials::remote_user("alice"))
            .await
            .unwrap()
            .is_none());
    }
}
