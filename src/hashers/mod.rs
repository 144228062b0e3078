//! Password hashing algorithms and the ordered registry that selects them.
//!
//! Every stored hash starts with its algorithm id followed by `$`. The
//! registry keeps every configured algorithm verifiable so historical hashes
//! stay valid, while new hashes always use the first (preferred) entry.
//!
//! Hashes beginning with [`UNUSABLE_PASSWORD_PREFIX`] never verify. They mark
//! principals that authenticate through some other means.

mod argon2;
mod pbkdf2;
mod registry;
mod scrypt;

pub use self::argon2::{
    Argon2Hasher, DEFAULT_MEMORY_KIB as DEFAULT_ARGON2_MEMORY_KIB,
    DEFAULT_PARALLELISM as DEFAULT_ARGON2_PARALLELISM,
    DEFAULT_TIME_COST as DEFAULT_ARGON2_TIME_COST,
};
pub use self::pbkdf2::{Pbkdf2Digest, Pbkdf2Hasher, DEFAULT_ITERATIONS as DEFAULT_PBKDF2_ITERATIONS};
pub use self::registry::{HashRegistry, Verification};
pub use self::scrypt::{
    ScryptHasher, DEFAULT_BLOCK_SIZE as DEFAULT_SCRYPT_BLOCK_SIZE,
    DEFAULT_PARALLELISM as DEFAULT_SCRYPT_PARALLELISM,
    DEFAULT_WORK_FACTOR as DEFAULT_SCRYPT_WORK_FACTOR,
};

use rand::{distributions::Alphanumeric, rngs::OsRng, Rng};
use secrecy::SecretString;
use subtle::ConstantTimeEq;

use crate::error::HashError;

pub const UNUSABLE_PASSWORD_PREFIX: &str = "!";
const UNUSABLE_PASSWORD_SUFFIX_LENGTH: usize = 40;
const SALT_LENGTH: usize = 22;
const SALT_ENTROPY_BITS: f64 = 128.0;
const MASK_VISIBLE_CHARS: usize = 6;

/// Work factor of a stored hash, per algorithm family.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Cost {
    Iterations(u32),
    Argon2 {
        variant: String,
        version: u32,
        memory_kib: u32,
        time_cost: u32,
        parallelism: u32,
    },
    Scrypt {
        work_factor: u64,
        block_size: u32,
        parallelism: u32,
    },
}

/// A parsed credential hash record.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DecodedHash {
    pub algorithm: String,
    pub cost: Cost,
    pub salt: String,
    pub digest: String,
}

impl DecodedHash {
    /// Render the record back into its stored form.
    #[must_use]
    pub fn encode(&self) -> String {
        let Self {
            algorithm,
            cost,
            salt,
            digest,
        } = self;
        match cost {
            Cost::Iterations(iterations) => format!("{algorithm}${iterations}${salt}${digest}"),
            Cost::Argon2 {
                variant,
                version,
                memory_kib,
                time_cost,
                parallelism,
            } => format!(
                "{algorithm}${variant}$v={version}$m={memory_kib},t={time_cost},p={parallelism}${salt}${digest}"
            ),
            Cost::Scrypt {
                work_factor,
                block_size,
                parallelism,
            } => format!("{algorithm}${salt}${work_factor}${block_size}${parallelism}${digest}"),
        }
    }
}

/// Capability interface for a password hashing algorithm.
pub trait HashAlgorithm: Send + Sync {
    /// Identifier used as the hash prefix, e.g. `pbkdf2_sha256`.
    fn algorithm(&self) -> &'static str;

    /// Fresh random salt suitable for [`HashAlgorithm::encode`].
    fn salt(&self) -> String {
        random_string(SALT_LENGTH)
    }

    /// Hash `password` with `salt` using the current work factor.
    ///
    /// # Errors
    /// Returns an error when the salt or the configured parameters are invalid.
    fn encode(&self, password: &SecretString, salt: &str) -> Result<String, HashError>;

    /// Parse an encoded hash produced by this algorithm.
    ///
    /// # Errors
    /// Returns `Malformed` when the string does not belong to this algorithm.
    fn decode(&self, encoded: &str) -> Result<DecodedHash, HashError>;

    /// Constant-time check of `password` against `encoded`.
    fn verify(&self, password: &SecretString, encoded: &str) -> bool;

    /// Whether `encoded` was produced with parameters weaker than current settings.
    fn must_update(&self, encoded: &str) -> bool;

    /// Burn the work-factor difference after a failed verification against
    /// an outdated hash, so timing does not reveal the stored parameters.
    fn harden_runtime(&self, _password: &SecretString, _encoded: &str) {}

    /// Human-readable description with salt and digest masked.
    ///
    /// # Errors
    /// Returns an error when `encoded` cannot be decoded.
    fn safe_summary(&self, encoded: &str) -> Result<Vec<(&'static str, String)>, HashError> {
        let decoded = self.decode(encoded)?;
        let mut summary = vec![("algorithm", decoded.algorithm.clone())];
        match decoded.cost {
            Cost::Iterations(iterations) => summary.push(("iterations", iterations.to_string())),
            Cost::Argon2 {
                variant,
                version,
                memory_kib,
                time_cost,
                parallelism,
            } => {
                summary.push(("variant", variant));
                summary.push(("version", version.to_string()));
                summary.push(("memory cost", memory_kib.to_string()));
                summary.push(("time cost", time_cost.to_string()));
                summary.push(("parallelism", parallelism.to_string()));
            }
            Cost::Scrypt {
                work_factor,
                block_size,
                parallelism,
            } => {
                summary.push(("work factor", work_factor.to_string()));
                summary.push(("block size", block_size.to_string()));
                summary.push(("parallelism", parallelism.to_string()));
            }
        }
        summary.push(("salt", mask_hash(&decoded.salt)));
        summary.push(("hash", mask_hash(&decoded.digest)));
        Ok(summary)
    }
}

/// Whether `encoded` can ever verify a password.
#[must_use]
pub fn is_password_usable(encoded: &str) -> bool {
    !encoded.is_empty() && !encoded.starts_with(UNUSABLE_PASSWORD_PREFIX)
}

/// A hash that no password verifies against.
#[must_use]
pub fn unusable_password() -> String {
    format!(
        "{UNUSABLE_PASSWORD_PREFIX}{}",
        random_string(UNUSABLE_PASSWORD_SUFFIX_LENGTH)
    )
}

/// Algorithm id of an encoded hash: everything before the first `$`.
#[must_use]
pub fn algorithm_id(encoded: &str) -> Option<&str> {
    encoded
        .split_once('$')
        .map(|(algorithm, _)| algorithm)
        .filter(|algorithm| !algorithm.is_empty())
}

/// Keep the first few characters and star the rest.
#[must_use]
pub fn mask_hash(value: &str) -> String {
    let visible: String = value.chars().take(MASK_VISIBLE_CHARS).collect();
    let hidden = value.chars().count().saturating_sub(MASK_VISIBLE_CHARS);
    format!("{visible}{}", "*".repeat(hidden))
}

pub(crate) fn random_string(length: usize) -> String {
    OsRng
        .sample_iter(&Alphanumeric)
        .take(length)
        .map(char::from)
        .collect()
}

pub(crate) fn constant_time_eq(a: &str, b: &str) -> bool {
    a.as_bytes().ct_eq(b.as_bytes()).into()
}

pub(crate) fn validate_salt(salt: &str) -> Result<(), HashError> {
    if salt.is_empty() || salt.contains('$') {
        return Err(HashError::InvalidSalt);
    }
    Ok(())
}

/// Salts drawn from fewer than 128 bits of alphanumeric entropy get rehashed.
pub(crate) fn salt_entropy_too_low(salt: &str) -> bool {
    #[allow(clippy::cast_precision_loss)]
    let bits = salt.chars().count() as f64 * 62f64.log2();
    bits < SALT_ENTROPY_BITS
}
