//! Explicit kernel configuration.
//!
//! Nothing is read from global state: the CLI (or an embedding service)
//! builds a [`KernelConfig`] and hands it to [`AuthKernel::new`](crate::kernel::AuthKernel::new).

use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::error::AuthError;
use crate::hashers::{
    DEFAULT_ARGON2_MEMORY_KIB, DEFAULT_ARGON2_PARALLELISM, DEFAULT_ARGON2_TIME_COST,
    DEFAULT_PBKDF2_ITERATIONS, DEFAULT_SCRYPT_BLOCK_SIZE, DEFAULT_SCRYPT_PARALLELISM,
    DEFAULT_SCRYPT_WORK_FACTOR,
};
use crate::validation::ValidatorKind;

pub const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_secs(2);
pub const DEFAULT_KEY_SALT: &str = "warden.session.fingerprint";

/// Identifiers of the shipped authentication backends.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// Username and password, active principals only.
    Model,
    /// Username and password, inactive principals included.
    AllowAllUsersModel,
    /// Trusted upstream username, active principals only.
    RemoteUser,
    /// Trusted upstream username, inactive principals included.
    AllowAllUsersRemoteUser,
}

impl BackendKind {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Model => "model",
            Self::AllowAllUsersModel => "allow_all_users_model",
            Self::RemoteUser => "remote_user",
            Self::AllowAllUsersRemoteUser => "allow_all_users_remote_user",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendKind {
    type Err = AuthError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "model" => Ok(Self::Model),
            "allow_all_users_model" => Ok(Self::AllowAllUsersModel),
            "remote_user" => Ok(Self::RemoteUser),
            "allow_all_users_remote_user" => Ok(Self::AllowAllUsersRemoteUser),
            other => Err(AuthError::InvalidArgument(format!(
                "unknown authentication backend: {other}"
            ))),
        }
    }
}

/// HMAC digest used for session fingerprints.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FingerprintAlgorithm {
    #[default]
    Sha256,
    Sha512,
}

impl FromStr for FingerprintAlgorithm {
    type Err = AuthError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "sha256" => Ok(Self::Sha256),
            "sha512" => Ok(Self::Sha512),
            other => Err(AuthError::InvalidArgument(format!(
                "unsupported fingerprint algorithm: {other}"
            ))),
        }
    }
}

/// Ordered hasher identifiers plus their cost parameters.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HasherSettings {
    pub order: Vec<String>,
    pub pbkdf2_iterations: u32,
    pub argon2_memory_kib: u32,
    pub argon2_time_cost: u32,
    pub argon2_parallelism: u32,
    pub scrypt_work_factor: u64,
    pub scrypt_block_size: u32,
    pub scrypt_parallelism: u32,
}

impl Default for HasherSettings {
    fn default() -> Self {
        Self {
            order: ["pbkdf2_sha256", "pbkdf2_sha1", "argon2", "scrypt"]
                .into_iter()
                .map(String::from)
                .collect(),
            pbkdf2_iterations: DEFAULT_PBKDF2_ITERATIONS,
            argon2_memory_kib: DEFAULT_ARGON2_MEMORY_KIB,
            argon2_time_cost: DEFAULT_ARGON2_TIME_COST,
            argon2_parallelism: DEFAULT_ARGON2_PARALLELISM,
            scrypt_work_factor: DEFAULT_SCRYPT_WORK_FACTOR,
            scrypt_block_size: DEFAULT_SCRYPT_BLOCK_SIZE,
            scrypt_parallelism: DEFAULT_SCRYPT_PARALLELISM,
        }
    }
}

impl HasherSettings {
    /// Default ordering with minimal work factors. Hashes produced this way
    /// are only fit for tests and fixtures.
    #[must_use]
    pub fn low_cost() -> Self {
        Self {
            pbkdf2_iterations: 1_000,
            argon2_memory_kib: 64,
            argon2_time_cost: 1,
            argon2_parallelism: 1,
            scrypt_work_factor: 16,
            scrypt_block_size: 1,
            scrypt_parallelism: 1,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_order<I, S>(mut self, order: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.order = order.into_iter().map(Into::into).collect();
        self
    }
}

/// Remote-user backend behaviour.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteUserSettings {
    /// Create a principal with an unusable password for unknown usernames.
    pub create_unknown_user: bool,
}

impl Default for RemoteUserSettings {
    fn default() -> Self {
        Self {
            create_unknown_user: true,
        }
    }
}

#[derive(Clone, Debug)]
pub struct KernelConfig {
    pub backends: Vec<BackendKind>,
    pub hashers: HasherSettings,
    pub secret: SecretString,
    pub fallback_secrets: Vec<SecretString>,
    pub key_salt: String,
    pub fingerprint_algorithm: FingerprintAlgorithm,
    pub store_timeout: Duration,
    pub validators: Vec<ValidatorKind>,
    pub remote_user: RemoteUserSettings,
}

impl KernelConfig {
    #[must_use]
    pub fn new(secret: SecretString) -> Self {
        Self {
            backends: vec![BackendKind::Model],
            hashers: HasherSettings::default(),
            secret,
            fallback_secrets: Vec::new(),
            key_salt: DEFAULT_KEY_SALT.to_string(),
            fingerprint_algorithm: FingerprintAlgorithm::default(),
            store_timeout: DEFAULT_STORE_TIMEOUT,
            validators: ValidatorKind::defaults(),
            remote_user: RemoteUserSettings::default(),
        }
    }

    #[must_use]
    pub fn with_backends(mut self, backends: Vec<BackendKind>) -> Self {
        self.backends = backends;
        self
    }

    #[must_use]
    pub fn with_hashers(mut self, hashers: HasherSettings) -> Self {
        self.hashers = hashers;
        self
    }

    #[must_use]
    pub fn with_fallback_secrets(mut self, fallback_secrets: Vec<SecretString>) -> Self {
        self.fallback_secrets = fallback_secrets;
        self
    }

    #[must_use]
    pub fn with_key_salt(mut self, key_salt: &str) -> Self {
        self.key_salt = key_salt.to_string();
        self
    }

    #[must_use]
    pub fn with_fingerprint_algorithm(mut self, algorithm: FingerprintAlgorithm) -> Self {
        self.fingerprint_algorithm = algorithm;
        self
    }

    #[must_use]
    pub fn with_store_timeout(mut self, timeout: Duration) -> Self {
        self.store_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_validators(mut self, validators: Vec<ValidatorKind>) -> Self {
        self.validators = validators;
        self
    }

    #[must_use]
    pub fn with_remote_user(mut self, remote_user: RemoteUserSettings) -> Self {
        self.remote_user = remote_user;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_kind_parses_and_displays() {
        for kind in [
            BackendKind::Model,
            BackendKind::AllowAllUsersModel,
            BackendKind::RemoteUser,
            BackendKind::AllowAllUsersRemoteUser,
        ] {
            assert_eq!(kind.to_string().parse::<BackendKind>().unwrap(), kind);
        }
        assert!("ldap".parse::<BackendKind>().is_err());
    }

    #[test]
    fn fingerprint_algorithm_parses_case_insensitively() {
        assert_eq!(
            "SHA512".parse::<FingerprintAlgorithm>().unwrap(),
            FingerprintAlgorithm::Sha512
        );
        assert!("md5".parse::<FingerprintAlgorithm>().is_err());
    }

    #[test]
    fn hasher_defaults_prefer_pbkdf2_sha256() {
        let settings = HasherSettings::default();
        assert_eq!(settings.order[0], "pbkdf2_sha256");
        assert_eq!(settings.pbkdf2_iterations, 600_000);
        assert_eq!(settings.argon2_memory_kib, 19_456);
        assert_eq!(settings.scrypt_work_factor, 16_384);
    }

    #[test]
    fn hasher_settings_deserialize_with_defaults() {
        let settings: HasherSettings =
            serde_json::from_str(r#"{"order": ["argon2"], "argon2_time_cost": 3}"#).unwrap();
        assert_eq!(settings.order, vec!["argon2".to_string()]);
        assert_eq!(settings.argon2_time_cost, 3);
        assert_eq!(settings.pbkdf2_iterations, 600_000);
    }

    #[test]
    fn kernel_config_builders() {
        let config = KernelConfig::new(SecretString::from("s"))
            .with_backends(vec![BackendKind::RemoteUser, BackendKind::Model])
            .with_store_timeout(Duration::from_millis(50))
            .with_fingerprint_algorithm(FingerprintAlgorithm::Sha512);
        assert_eq!(config.backends.len(), 2);
        assert_eq!(config.store_timeout, Duration::from_millis(50));
        assert_eq!(config.fingerprint_algorithm, FingerprintAlgorithm::Sha512);
        assert_eq!(config.key_salt, DEFAULT_KEY_SALT);
    }
}
