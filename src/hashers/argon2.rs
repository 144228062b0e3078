use ::argon2::{
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Algorithm, Argon2, Params, Version,
};
use secrecy::{ExposeSecret, SecretString};

use super::{validate_salt, Cost, DecodedHash, HashAlgorithm};
use crate::error::HashError;

const ALGORITHM: &str = "argon2";
const VARIANT: &str = "argon2id";
const VERSION: u32 = 0x13;
const MIN_SALT_BYTES: usize = 8;

pub const DEFAULT_MEMORY_KIB: u32 = 19_456;
pub const DEFAULT_TIME_COST: u32 = 2;
pub const DEFAULT_PARALLELISM: u32 = 1;

/// Argon2id stored as `argon2` followed by the PHC string.
#[derive(Clone, Debug)]
pub struct Argon2Hasher {
    memory_kib: u32,
    time_cost: u32,
    parallelism: u32,
}

impl Default for Argon2Hasher {
    fn default() -> Self {
        Self {
            memory_kib: DEFAULT_MEMORY_KIB,
            time_cost: DEFAULT_TIME_COST,
            parallelism: DEFAULT_PARALLELISM,
        }
    }
}

impl Argon2Hasher {
    #[must_use]
    pub fn new(memory_kib: u32, time_cost: u32, parallelism: u32) -> Self {
        Self {
            memory_kib,
            time_cost,
            parallelism,
        }
    }

    fn context(&self) -> Result<Argon2<'static>, HashError> {
        let params = Params::new(self.memory_kib, self.time_cost, self.parallelism, None)
            .map_err(|err| HashError::InvalidParams {
                algorithm: ALGORITHM,
                reason: err.to_string(),
            })?;
        Ok(Argon2::new(Algorithm::Argon2id, Version::V0x13, params))
    }
}

impl HashAlgorithm for Argon2Hasher {
    fn algorithm(&self) -> &'static str {
        ALGORITHM
    }

    fn encode(&self, password: &SecretString, salt: &str) -> Result<String, HashError> {
        validate_salt(salt)?;
        if salt.len() < MIN_SALT_BYTES {
            return Err(HashError::InvalidSalt);
        }
        let salt = SaltString::encode_b64(salt.as_bytes()).map_err(|_| HashError::InvalidSalt)?;
        let phc = self
            .context()?
            .hash_password(password.expose_secret().as_bytes(), &salt)
            .map_err(|err| HashError::InvalidParams {
                algorithm: ALGORITHM,
                reason: err.to_string(),
            })?;
        Ok(format!("{ALGORITHM}{phc}"))
    }

    fn decode(&self, encoded: &str) -> Result<DecodedHash, HashError> {
        let malformed = || HashError::Malformed {
            algorithm: ALGORITHM,
        };
        let phc = encoded
            .strip_prefix(ALGORITHM)
            .filter(|rest| rest.starts_with('$'))
            .ok_or_else(malformed)?;

        // $argon2id$v=19$m=..,t=..,p=..$salt$hash
        let parts: Vec<&str> = phc.split('$').collect();
        let [_, variant, version, params, salt, digest] = parts.as_slice() else {
            return Err(malformed());
        };
        let version = version
            .strip_prefix("v=")
            .and_then(|v| v.parse::<u32>().ok())
            .ok_or_else(malformed)?;

        let (mut memory_kib, mut time_cost, mut parallelism) = (None, None, None);
        for pair in params.split(',') {
            let (key, value) = pair.split_once('=').ok_or_else(malformed)?;
            let value = value.parse::<u32>().map_err(|_| malformed())?;
            match key {
                "m" => memory_kib = Some(value),
                "t" => time_cost = Some(value),
                "p" => parallelism = Some(value),
                _ => return Err(malformed()),
            }
        }
        let (Some(memory_kib), Some(time_cost), Some(parallelism)) =
            (memory_kib, time_cost, parallelism)
        else {
            return Err(malformed());
        };
        if variant.is_empty() || salt.is_empty() || digest.is_empty() {
            return Err(malformed());
        }

        Ok(DecodedHash {
            algorithm: ALGORITHM.to_string(),
            cost: Cost::Argon2 {
                variant: (*variant).to_string(),
                version,
                memory_kib,
                time_cost,
                parallelism,
            },
            salt: (*salt).to_string(),
            digest: (*digest).to_string(),
        })
    }

    fn verify(&self, password: &SecretString, encoded: &str) -> bool {
        let Some(phc) = encoded.strip_prefix(ALGORITHM) else {
            return false;
        };
        let Ok(parsed) = PasswordHash::new(phc) else {
            return false;
        };
        // Parameters are taken from the stored hash, not from self.
        Argon2::default()
            .verify_password(password.expose_secret().as_bytes(), &parsed)
            .is_ok()
    }

    fn must_update(&self, encoded: &str) -> bool {
        match self.decode(encoded) {
            Ok(decoded) => {
                decoded.cost
                    != Cost::Argon2 {
                        variant: VARIANT.to_string(),
                        version: VERSION,
                        memory_kib: self.memory_kib,
                        time_cost: self.time_cost,
                        parallelism: self.parallelism,
                    }
            }
            Err(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cheap() -> Argon2Hasher {
        Argon2Hasher::new(64, 1, 1)
    }

    #[test]
    fn encodes_with_prefix_and_phc_fields() {
        let encoded = cheap()
            .encode(&SecretString::from("secret"), "abcdefghijklmnopqrstuv")
            .unwrap();
        assert!(encoded.starts_with("argon2$argon2id$v=19$m=64,t=1,p=1$"));
    }

    #[test]
    fn verifies_and_rejects() {
        let hasher = cheap();
        let encoded = hasher
            .encode(&SecretString::from("secret"), "abcdefghijklmnopqrstuv")
            .unwrap();
        assert!(hasher.verify(&SecretString::from("secret"), &encoded));
        assert!(!hasher.verify(&SecretString::from("Secret"), &encoded));
        assert!(!hasher.verify(&SecretString::from("secret"), "argon2$garbage"));
    }

    #[test]
    fn verifies_hashes_made_with_other_parameters() {
        let encoded = Argon2Hasher::new(128, 2, 1)
            .encode(&SecretString::from("secret"), "abcdefghijklmnopqrstuv")
            .unwrap();
        assert!(cheap().verify(&SecretString::from("secret"), &encoded));
        assert!(cheap().must_update(&encoded));
    }

    #[test]
    fn decode_round_trips() {
        let hasher = cheap();
        let encoded = hasher
            .encode(&SecretString::from("secret"), "abcdefghijklmnopqrstuv")
            .unwrap();
        let decoded = hasher.decode(&encoded).unwrap();
        assert_eq!(
            decoded.cost,
            Cost::Argon2 {
                variant: "argon2id".to_string(),
                version: 19,
                memory_kib: 64,
                time_cost: 1,
                parallelism: 1,
            }
        );
        assert_eq!(decoded.encode(), encoded);
        assert!(!hasher.must_update(&encoded));
    }

    #[test]
    fn short_salt_is_rejected() {
        assert_eq!(
            cheap().encode(&SecretString::from("secret"), "abc"),
            Err(HashError::InvalidSalt)
        );
    }
}
