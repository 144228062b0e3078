use base64ct::{Base64, Encoding};
use secrecy::{ExposeSecret, SecretString};

use super::{constant_time_eq, validate_salt, Cost, DecodedHash, HashAlgorithm};
use crate::error::HashError;

const ALGORITHM: &str = "scrypt";

pub const DEFAULT_WORK_FACTOR: u64 = 1 << 14;
pub const DEFAULT_BLOCK_SIZE: u32 = 8;
pub const DEFAULT_PARALLELISM: u32 = 1;
pub const DEFAULT_KEY_LENGTH: usize = 64;

#[derive(Clone, Debug)]
pub struct ScryptHasher {
    work_factor: u64,
    block_size: u32,
    parallelism: u32,
}

impl Default for ScryptHasher {
    fn default() -> Self {
        Self {
            work_factor: DEFAULT_WORK_FACTOR,
            block_size: DEFAULT_BLOCK_SIZE,
            parallelism: DEFAULT_PARALLELISM,
        }
    }
}

impl ScryptHasher {
    #[must_use]
    pub fn new(work_factor: u64, block_size: u32, parallelism: u32) -> Self {
        Self {
            work_factor,
            block_size,
            parallelism,
        }
    }

    fn encode_with(
        password: &SecretString,
        salt: &str,
        work_factor: u64,
        block_size: u32,
        parallelism: u32,
    ) -> Result<String, HashError> {
        validate_salt(salt)?;
        let invalid = |reason: String| HashError::InvalidParams {
            algorithm: ALGORITHM,
            reason,
        };
        if work_factor < 2 || !work_factor.is_power_of_two() {
            return Err(invalid(format!(
                "work factor must be a power of two greater than one, got {work_factor}"
            )));
        }
        let log_n = u8::try_from(work_factor.trailing_zeros())
            .map_err(|err| invalid(err.to_string()))?;
        let params = ::scrypt::Params::new(log_n, block_size, parallelism, DEFAULT_KEY_LENGTH)
            .map_err(|err| invalid(err.to_string()))?;

        let mut derived = [0u8; DEFAULT_KEY_LENGTH];
        ::scrypt::scrypt(
            password.expose_secret().as_bytes(),
            salt.as_bytes(),
            &params,
            &mut derived,
        )
        .map_err(|err| invalid(err.to_string()))?;

        Ok(format!(
            "{ALGORITHM}${salt}${work_factor}${block_size}${parallelism}${}",
            Base64::encode_string(&derived)
        ))
    }
}

impl HashAlgorithm for ScryptHasher {
    fn algorithm(&self) -> &'static str {
        ALGORITHM
    }

    fn encode(&self, password: &SecretString, salt: &str) -> Result<String, HashError> {
        Self::encode_with(
            password,
            salt,
            self.work_factor,
            self.block_size,
            self.parallelism,
        )
    }

    fn decode(&self, encoded: &str) -> Result<DecodedHash, HashError> {
        let malformed = || HashError::Malformed {
            algorithm: ALGORITHM,
        };
        let parts: Vec<&str> = encoded.splitn(6, '$').collect();
        let [algorithm, salt, work_factor, block_size, parallelism, digest] = parts.as_slice()
        else {
            return Err(malformed());
        };
        if *algorithm != ALGORITHM || salt.is_empty() || digest.is_empty() {
            return Err(malformed());
        }
        Ok(DecodedHash {
            algorithm: ALGORITHM.to_string(),
            cost: Cost::Scrypt {
                work_factor: work_factor.parse().map_err(|_| malformed())?,
                block_size: block_size.parse().map_err(|_| malformed())?,
                parallelism: parallelism.parse().map_err(|_| malformed())?,
            },
            salt: (*salt).to_string(),
            digest: (*digest).to_string(),
        })
    }

    fn verify(&self, password: &SecretString, encoded: &str) -> bool {
        let Ok(DecodedHash {
            cost:
                Cost::Scrypt {
                    work_factor,
                    block_size,
                    parallelism,
                },
            salt,
            ..
        }) = self.decode(encoded)
        else {
            return false;
        };
        Self::encode_with(password, &salt, work_factor, block_size, parallelism)
            .is_ok_and(|candidate| constant_time_eq(&candidate, encoded))
    }

    fn must_update(&self, encoded: &str) -> bool {
        match self.decode(encoded) {
            Ok(decoded) => {
                decoded.cost
                    != Cost::Scrypt {
                        work_factor: self.work_factor,
                        block_size: self.block_size,
                        parallelism: self.parallelism,
                    }
            }
            Err(_) => false,
        }
    }
}
