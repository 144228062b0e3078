use secrecy::SecretString;
use std::sync::Arc;
use tracing::{debug, warn};

use super::{
    algorithm_id, is_password_usable, unusable_password, Argon2Hasher, HashAlgorithm,
    Pbkdf2Hasher, ScryptHasher,
};
use crate::config::HasherSettings;
use crate::error::{AuthError, HashError};

/// Result of checking a password against a stored hash.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Verification {
    /// Password matched. `needs_upgrade` is set when the hash was produced by a
    /// non-preferred algorithm or with outdated parameters.
    Accepted { needs_upgrade: bool },
    Rejected,
    /// The stored hash is explicitly unusable, malformed, or names an
    /// unregistered algorithm.
    Unusable,
}

impl Verification {
    #[must_use]
    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted { .. })
    }
}

/// Ordered set of hash algorithms. The first entry is the preferred one.
#[derive(Clone)]
pub struct HashRegistry {
    algorithms: Vec<Arc<dyn HashAlgorithm>>,
}

impl std::fmt::Debug for HashRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.algorithms.iter().map(|algorithm| algorithm.algorithm()))
            .finish()
    }
}

impl HashRegistry {
    pub fn new(preferred: Arc<dyn HashAlgorithm>) -> Self {
        Self {
            algorithms: vec![preferred],
        }
    }

    /// Build the registry from configured identifiers, in order.
    ///
    /// # Errors
    /// Returns `InvalidArgument` for an empty list, an unknown identifier or a
    /// duplicate.
    pub fn from_settings(settings: &HasherSettings) -> Result<Self, AuthError> {
        let mut ids = settings.order.iter();
        let Some(first) = ids.next() else {
            return Err(AuthError::InvalidArgument(
                "at least one password hasher must be configured".to_string(),
            ));
        };
        let mut registry = Self::new(Self::build(first, settings)?);
        for id in ids {
            registry.register(Self::build(id, settings)?)?;
        }
        Ok(registry)
    }

    fn build(id: &str, settings: &HasherSettings) -> Result<Arc<dyn HashAlgorithm>, AuthError> {
        let algorithm: Arc<dyn HashAlgorithm> = match id {
            "pbkdf2_sha256" => {
                Arc::new(Pbkdf2Hasher::sha256().with_iterations(settings.pbkdf2_iterations))
            }
            "pbkdf2_sha1" => {
                Arc::new(Pbkdf2Hasher::sha1().with_iterations(settings.pbkdf2_iterations))
            }
            "argon2" => Arc::new(Argon2Hasher::new(
                settings.argon2_memory_kib,
                settings.argon2_time_cost,
                settings.argon2_parallelism,
            )),
            "scrypt" => Arc::new(ScryptHasher::new(
                settings.scrypt_work_factor,
                settings.scrypt_block_size,
                settings.scrypt_parallelism,
            )),
            other => {
                return Err(AuthError::InvalidArgument(format!(
                    "unknown password hasher: {other}"
                )))
            }
        };
        Ok(algorithm)
    }

    /// Append a non-preferred algorithm, kept for verifying historical hashes.
    ///
    /// # Errors
    /// Returns `InvalidArgument` when the identifier is already registered.
    pub fn register(&mut self, algorithm: Arc<dyn HashAlgorithm>) -> Result<(), AuthError> {
        if self.find(algorithm.algorithm()).is_some() {
            return Err(AuthError::InvalidArgument(format!(
                "password hasher registered twice: {}",
                algorithm.algorithm()
            )));
        }
        self.algorithms.push(algorithm);
        Ok(())
    }

    #[must_use]
    pub fn preferred(&self) -> &Arc<dyn HashAlgorithm> {
        &self.algorithms[0]
    }

    #[must_use]
    pub fn find(&self, algorithm: &str) -> Option<&Arc<dyn HashAlgorithm>> {
        self.algorithms
            .iter()
            .find(|candidate| candidate.algorithm() == algorithm)
    }

    /// Identifiers in preference order.
    pub fn algorithms(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.algorithms.iter().map(|algorithm| algorithm.algorithm())
    }

    /// Resolve the algorithm that produced `encoded`.
    ///
    /// # Errors
    /// Returns `UnknownAlgorithm` when the prefix is missing or unregistered.
    pub fn identify(&self, encoded: &str) -> Result<&Arc<dyn HashAlgorithm>, HashError> {
        let id = algorithm_id(encoded)
            .ok_or_else(|| HashError::UnknownAlgorithm(String::from("<none>")))?;
        self.find(id)
            .ok_or_else(|| HashError::UnknownAlgorithm(id.to_string()))
    }

    /// Hash with the preferred algorithm and a fresh salt, or produce an
    /// unusable hash when no password is given.
    ///
    /// # Errors
    /// Returns an error when the preferred algorithm rejects its parameters.
    pub fn make_password(&self, password: Option<&SecretString>) -> Result<String, HashError> {
        match password {
            Some(password) => {
                let preferred = self.preferred();
                preferred.encode(password, &preferred.salt())
            }
            None => Ok(unusable_password()),
        }
    }

    /// Verify `password` against `encoded` without any store interaction.
    ///
    /// Runs `harden_runtime` when verification fails against an outdated hash
    /// of the preferred algorithm, and calls `setter` once when a correct
    /// password needs rehashing.
    pub fn check_password<F>(&self, password: &SecretString, encoded: &str, setter: F) -> Verification
    where
        F: FnOnce(&SecretString),
    {
        if !is_password_usable(encoded) {
            return Verification::Unusable;
        }
        let hasher = match self.identify(encoded) {
            Ok(hasher) => hasher,
            Err(err) => {
                warn!("stored password hash cannot be used: {err}");
                return Verification::Unusable;
            }
        };
        if let Err(err) = hasher.decode(encoded) {
            warn!(algorithm = hasher.algorithm(), "stored password hash is malformed: {err}");
            return Verification::Unusable;
        }
        let preferred = self.preferred();
        let hasher_changed = hasher.algorithm() != preferred.algorithm();
        let must_update = hasher_changed || preferred.must_update(encoded);

        if hasher.verify(password, encoded) {
            if must_update {
                debug!(
                    algorithm = hasher.algorithm(),
                    preferred = preferred.algorithm(),
                    "password hash needs upgrade"
                );
                setter(password);
            }
            Verification::Accepted {
                needs_upgrade: must_update,
            }
        } else {
            if !hasher_changed && must_update {
                hasher.harden_runtime(password, encoded);
            }
            Verification::Rejected
        }
    }
}
