use async_trait::async_trait;
use secrecy::SecretString;
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use warden::backends::{
    AuthBackend, BackendChain, Credentials, ModelBackend, RemoteUserBackend,
};
use warden::config::{BackendKind, HasherSettings, KernelConfig};
use warden::error::{AuthError, StoreError};
use warden::hashers::{HashAlgorithm, HashRegistry, Pbkdf2Hasher};
use warden::kernel::AuthKernel;
use warden::permissions::PermissionCache;
use warden::principal::{GroupId, PermissionId, Principal, PrincipalId, Scope};
use warden::session::SessionState;
use warden::store::{CredentialStore, MemoryStore};
use warden::verifier::PasswordVerifier;

const PASSWORD: &str = "correct horse battery staple";

fn settings() -> HasherSettings {
    HasherSettings::low_cost().with_order(["pbkdf2_sha256", "pbkdf2_sha1", "argon2", "scrypt"])
}

fn kernel(store: Arc<dyn CredentialStore>) -> AuthKernel {
    AuthKernel::new(
        KernelConfig::new(SecretString::from("integration-secret")).with_hashers(settings()),
        store,
    )
    .unwrap()
}

fn credentials(username: &str, password: &str) -> Credentials {
    Credentials::password(username, SecretString::from(password))
}

fn p95(mut samples: Vec<Duration>) -> Duration {
    samples.sort();
    let index = (samples.len() * 95 / 100).min(samples.len() - 1);
    samples[index]
}

#[tokio::test]
async fn unknown_and_known_usernames_cost_the_same() {
    let mut hashers = settings().with_order(["pbkdf2_sha256"]);
    hashers.pbkdf2_iterations = 4_000;
    let registry = Arc::new(HashRegistry::from_settings(&hashers).unwrap());
    let verifier = Arc::new(PasswordVerifier::new(registry.clone()).unwrap());

    let store = Arc::new(MemoryStore::new());
    let hash = registry
        .make_password(Some(&SecretString::from(PASSWORD)))
        .unwrap();
    store
        .create_principal(Principal::new("alice", hash))
        .await
        .unwrap();
    let backend = ModelBackend::new(store, verifier);

    // warm up both paths
    for username in ["alice", "mallory"] {
        let _ = backend.authenticate(&credentials(username, "wrong")).await;
    }

    let mut known = Vec::new();
    let mut unknown = Vec::new();
    for round in 0..30 {
        let candidate = format!("guess-{round}");
        let started = Instant::now();
        assert!(backend
            .authenticate(&credentials("alice", &candidate))
            .await
            .unwrap()
            .is_none());
        known.push(started.elapsed());

        let started = Instant::now();
        assert!(backend
            .authenticate(&credentials("mallory", &candidate))
            .await
            .unwrap()
            .is_none());
        unknown.push(started.elapsed());
    }

    let ratio = p95(known).as_secs_f64() / p95(unknown).as_secs_f64();
    assert!(
        (0.5..=2.0).contains(&ratio),
        "p95 timing ratio known/unknown out of bounds: {ratio:.3}"
    );
}

#[test]
fn verification_is_idempotent() {
    let registry = Arc::new(HashRegistry::from_settings(&settings()).unwrap());
    let verifier = PasswordVerifier::new(registry.clone()).unwrap();
    for algorithm in ["pbkdf2_sha256", "pbkdf2_sha1", "argon2", "scrypt"] {
        let hasher = registry.find(algorithm).unwrap();
        let encoded = hasher
            .encode(&SecretString::from(PASSWORD), &hasher.salt())
            .unwrap();
        for candidate in [PASSWORD, "not it"] {
            let first = verifier.authenticate(&SecretString::from(candidate), Some(encoded.as_str()), |_| {});
            for _ in 0..3 {
                assert_eq!(
                    verifier.authenticate(&SecretString::from(candidate), Some(encoded.as_str()), |_| {}),
                    first,
                    "{algorithm} flipped for {candidate:?}"
                );
            }
        }
    }
}

#[tokio::test]
async fn deprecated_hash_is_upgraded_on_login() {
    let legacy = Pbkdf2Hasher::sha1()
        .with_iterations(10)
        .encode(&SecretString::from(PASSWORD), "legacysaltlegacysalt12")
        .unwrap();
    let store = Arc::new(MemoryStore::new());
    store
        .create_principal(Principal::new("alice", legacy.clone()))
        .await
        .unwrap();
    let kernel = kernel(store.clone());

    let authenticated = kernel
        .authenticate(&credentials("alice", PASSWORD))
        .await
        .unwrap()
        .unwrap();
    let stored = store.load("alice").await.unwrap().unwrap().password;
    assert_ne!(stored, legacy);
    assert!(stored.starts_with("pbkdf2_sha256$"));
    assert_eq!(authenticated.principal.password, stored);

    let verifier = kernel.verifier();
    let mut upgraded_again = false;
    assert!(verifier.authenticate(&SecretString::from(PASSWORD), Some(stored.as_str()), |_| {
        upgraded_again = true;
    }));
    assert!(!upgraded_again);
}

#[tokio::test]
async fn weaker_work_factor_is_raised_on_login() {
    let weak = Pbkdf2Hasher::sha256()
        .with_iterations(10)
        .encode(&SecretString::from(PASSWORD), "weaksaltweaksaltweaksa")
        .unwrap();
    let store = Arc::new(MemoryStore::new());
    store
        .create_principal(Principal::new("alice", weak.clone()))
        .await
        .unwrap();
    let kernel = kernel(store.clone());

    kernel
        .authenticate(&credentials("alice", PASSWORD))
        .await
        .unwrap()
        .unwrap();
    let stored = store.load("alice").await.unwrap().unwrap().password;
    assert!(stored.starts_with(&format!(
        "pbkdf2_sha256${}$",
        settings().pbkdf2_iterations
    )));
}

#[tokio::test]
async fn slow_store_fails_closed() {
    let store = Arc::new(MemoryStore::new());
    store.set_latency(Duration::from_millis(250));
    let kernel = AuthKernel::new(
        KernelConfig::new(SecretString::from("integration-secret"))
            .with_hashers(settings())
            .with_store_timeout(Duration::from_millis(20)),
        store,
    )
    .unwrap();

    let mut session = SessionState::new();
    let err = kernel
        .login(&credentials("alice", PASSWORD), &mut session)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        AuthError::StoreUnavailable(StoreError::Timeout(_))
    ));
    assert!(!session.is_authenticated());
}

#[tokio::test]
async fn store_outage_is_not_a_failed_login() {
    let store = Arc::new(MemoryStore::new());
    store.set_unavailable(true);
    let kernel = kernel(store);
    let err = kernel
        .authenticate(&credentials("alice", PASSWORD))
        .await
        .unwrap_err();
    assert!(matches!(err, AuthError::StoreUnavailable(_)));
}

/// Reads work, hash writes always fail.
struct ReadOnly(MemoryStore);

#[async_trait]
impl CredentialStore for ReadOnly {
    async fn load(&self, username: &str) -> Result<Option<Principal>, StoreError> {
        self.0.load(username).await
    }

    async fn load_by_id(&self, id: PrincipalId) -> Result<Option<Principal>, StoreError> {
        self.0.load_by_id(id).await
    }

    async fn save_hash(&self, _: PrincipalId, _: &str, _: &str) -> Result<bool, StoreError> {
        Err(StoreError::Rejected("read-only replica".to_string()))
    }

    async fn load_groups(&self, id: PrincipalId) -> Result<Vec<GroupId>, StoreError> {
        self.0.load_groups(id).await
    }

    async fn load_direct_permissions(
        &self,
        id: PrincipalId,
        scope: &Scope,
    ) -> Result<BTreeSet<PermissionId>, StoreError> {
        self.0.load_direct_permissions(id, scope).await
    }

    async fn load_group_permissions(
        &self,
        groups: &[GroupId],
        scope: &Scope,
    ) -> Result<BTreeSet<PermissionId>, StoreError> {
        self.0.load_group_permissions(groups, scope).await
    }

    async fn create_principal(&self, principal: Principal) -> Result<Principal, StoreError> {
        self.0.create_principal(principal).await
    }

    async fn principals_with_permission(
        &self,
        permission: &PermissionId,
        include_superusers: bool,
        is_active: Option<bool>,
    ) -> Result<Vec<Principal>, StoreError> {
        self.0
            .principals_with_permission(permission, include_superusers, is_active)
            .await
    }

    async fn grant_permission(
        &self,
        id: PrincipalId,
        permission: &PermissionId,
        scope: &Scope,
    ) -> Result<(), StoreError> {
        self.0.grant_permission(id, permission, scope).await
    }

    async fn revoke_permission(
        &self,
        id: PrincipalId,
        permission: &PermissionId,
        scope: &Scope,
    ) -> Result<(), StoreError> {
        self.0.revoke_permission(id, permission, scope).await
    }

    async fn grant_group_permission(
        &self,
        group: &GroupId,
        permission: &PermissionId,
        scope: &Scope,
    ) -> Result<(), StoreError> {
        self.0.grant_group_permission(group, permission, scope).await
    }

    async fn revoke_group_permission(
        &self,
        group: &GroupId,
        permission: &PermissionId,
        scope: &Scope,
    ) -> Result<(), StoreError> {
        self.0.revoke_group_permission(group, permission, scope).await
    }

    async fn add_to_group(&self, id: PrincipalId, group: &GroupId) -> Result<(), StoreError> {
        self.0.add_to_group(id, group).await
    }

    async fn remove_from_group(&self, id: PrincipalId, group: &GroupId) -> Result<(), StoreError> {
        self.0.remove_from_group(id, group).await
    }
}

#[tokio::test]
async fn failed_rehash_write_still_logs_in() {
    let legacy = Pbkdf2Hasher::sha1()
        .with_iterations(10)
        .encode(&SecretString::from(PASSWORD), "legacysaltlegacysalt12")
        .unwrap();
    let inner = MemoryStore::new();
    inner
        .create_principal(Principal::new("alice", legacy.clone()))
        .await
        .unwrap();
    let store = Arc::new(ReadOnly(inner));
    let kernel = kernel(store.clone());

    let mut session = SessionState::new();
    let authenticated = kernel
        .login(&credentials("alice", PASSWORD), &mut session)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(authenticated.principal.password, legacy);
    assert_eq!(store.load("alice").await.unwrap().unwrap().password, legacy);

    // the session is bound to the hash that is actually stored
    assert!(kernel.current_principal(&mut session).await.unwrap().is_some());
}

/// Records the order in which backends were consulted.
struct Recording {
    inner: Arc<dyn AuthBackend>,
    log: Arc<Mutex<Vec<&'static str>>>,
}

#[async_trait]
impl AuthBackend for Recording {
    fn name(&self) -> &'static str {
        self.inner.name()
    }

    async fn authenticate(&self, credentials: &Credentials) -> warden::error::Result<Option<Principal>> {
        if let Ok(mut log) = self.log.lock() {
            log.push(self.inner.name());
        }
        self.inner.authenticate(credentials).await
    }

    async fn get_principal(&self, id: PrincipalId) -> warden::error::Result<Option<Principal>> {
        self.inner.get_principal(id).await
    }

    async fn effective_permissions(
        &self,
        principal: &Principal,
        scope: &Scope,
        cache: &mut PermissionCache,
    ) -> warden::error::Result<warden::permissions::PermissionSet> {
        self.inner.effective_permissions(principal, scope, cache).await
    }
}

#[tokio::test]
async fn remote_then_model_chain_falls_through_once() {
    let registry = Arc::new(HashRegistry::from_settings(&settings()).unwrap());
    let verifier = Arc::new(PasswordVerifier::new(registry.clone()).unwrap());
    let store = Arc::new(MemoryStore::new());
    let bob = store
        .create_principal(Principal::new(
            "bob",
            registry
                .make_password(Some(&SecretString::from(PASSWORD)))
                .unwrap(),
        ))
        .await
        .unwrap();

    let log = Arc::new(Mutex::new(Vec::new()));
    let chain = BackendChain::new(vec![
        Arc::new(Recording {
            inner: Arc::new(RemoteUserBackend::new(store.clone())),
            log: log.clone(),
        }) as Arc<dyn AuthBackend>,
        Arc::new(Recording {
            inner: Arc::new(ModelBackend::new(store.clone(), verifier)),
            log: log.clone(),
        }),
    ])
    .unwrap();

    let authenticated = chain
        .authenticate(&credentials("bob", PASSWORD))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(authenticated.principal.id, bob.id);
    assert_eq!(authenticated.backend, BackendKind::Model.as_str());
    assert_eq!(*log.lock().unwrap(), ["remote_user", "model"]);
}

#[tokio::test]
async fn unusable_password_never_authenticates() {
    let store = Arc::new(MemoryStore::new());
    store
        .create_principal(Principal::new("svc", warden::hashers::unusable_password()))
        .await
        .unwrap();
    let kernel = kernel(store);
    for candidate in ["", "!", PASSWORD] {
        assert!(kernel
            .authenticate(&credentials("svc", candidate))
            .await
            .unwrap()
            .is_none());
    }
}
