use base64ct::{Base64, Encoding};
use secrecy::{ExposeSecret, SecretString};
use sha1::Sha1;
use std::hint::black_box;
use sha2::Sha256;

use super::{
    constant_time_eq, random_string, salt_entropy_too_low, validate_salt, Cost, DecodedHash,
    HashAlgorithm, SALT_LENGTH,
};
use crate::error::HashError;

pub const DEFAULT_ITERATIONS: u32 = 600_000;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Pbkdf2Digest {
    Sha256,
    Sha1,
}

/// PBKDF2 with HMAC-SHA256 (the default) or HMAC-SHA1 for legacy hashes.
#[derive(Clone, Debug)]
pub struct Pbkdf2Hasher {
    digest: Pbkdf2Digest,
    iterations: u32,
}

impl Pbkdf2Hasher {
    #[must_use]
    pub fn sha256() -> Self {
        Self {
            digest: Pbkdf2Digest::Sha256,
            iterations: DEFAULT_ITERATIONS,
        }
    }

    #[must_use]
    pub fn sha1() -> Self {
        Self {
            digest: Pbkdf2Digest::Sha1,
            iterations: DEFAULT_ITERATIONS,
        }
    }

    #[must_use]
    pub fn with_iterations(mut self, iterations: u32) -> Self {
        self.iterations = iterations;
        self
    }

    #[must_use]
    pub fn iterations(&self) -> u32 {
        self.iterations
    }

    fn derive(&self, password: &[u8], salt: &[u8], iterations: u32) -> Vec<u8> {
        match self.digest {
            Pbkdf2Digest::Sha256 => {
                let mut out = [0u8; 32];
                ::pbkdf2::pbkdf2_hmac::<Sha256>(password, salt, iterations, &mut out);
                out.to_vec()
            }
            Pbkdf2Digest::Sha1 => {
                let mut out = [0u8; 20];
                ::pbkdf2::pbkdf2_hmac::<Sha1>(password, salt, iterations, &mut out);
                out.to_vec()
            }
        }
    }

    fn encode_with(
        &self,
        password: &SecretString,
        salt: &str,
        iterations: u32,
    ) -> Result<String, HashError> {
        validate_salt(salt)?;
        if iterations == 0 {
            return Err(HashError::InvalidParams {
                algorithm: self.algorithm(),
                reason: "iterations must be greater than zero".to_string(),
            });
        }
        let derived = self.derive(
            password.expose_secret().as_bytes(),
            salt.as_bytes(),
            iterations,
        );
        Ok(format!(
            "{}${iterations}${salt}${}",
            self.algorithm(),
            Base64::encode_string(&derived)
        ))
    }
}

impl HashAlgorithm for Pbkdf2Hasher {
    fn algorithm(&self) -> &'static str {
        match self.digest {
            Pbkdf2Digest::Sha256 => "pbkdf2_sha256",
            Pbkdf2Digest::Sha1 => "pbkdf2_sha1",
        }
    }

    fn encode(&self, password: &SecretString, salt: &str) -> Result<String, HashError> {
        self.encode_with(password, salt, self.iterations)
    }

    fn decode(&self, encoded: &str) -> Result<DecodedHash, HashError> {
        let malformed = || HashError::Malformed {
            algorithm: self.algorithm(),
        };
        let mut parts = encoded.splitn(4, '$');
        let (Some(algorithm), Some(iterations), Some(salt), Some(digest)) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(malformed());
        };
        if algorithm != self.algorithm() || salt.is_empty() || digest.is_empty() {
            return Err(malformed());
        }
        let iterations = iterations.parse::<u32>().map_err(|_| malformed())?;
        Ok(DecodedHash {
            algorithm: algorithm.to_string(),
            cost: Cost::Iterations(iterations),
            salt: salt.to_string(),
            digest: digest.to_string(),
        })
    }

    fn verify(&self, password: &SecretString, encoded: &str) -> bool {
        let Ok(decoded) = self.decode(encoded) else {
            return false;
        };
        let Cost::Iterations(iterations) = decoded.cost else {
            return false;
        };
        self.encode_with(password, &decoded.salt, iterations)
            .is_ok_and(|candidate| constant_time_eq(&candidate, encoded))
    }

    fn must_update(&self, encoded: &str) -> bool {
        match self.decode(encoded) {
            Ok(decoded) => {
                decoded.cost != Cost::Iterations(self.iterations)
                    || salt_entropy_too_low(&decoded.salt)
            }
            Err(_) => false,
        }
    }

    fn harden_runtime(&self, password: &SecretString, encoded: &str) {
        let Ok(DecodedHash {
            cost: Cost::Iterations(iterations),
            ..
        }) = self.decode(encoded)
        else {
            return;
        };
        let extra = self.iterations.saturating_sub(iterations);
        if extra > 0 {
            let salt = random_string(SALT_LENGTH);
            black_box(self.derive(
                black_box(password.expose_secret().as_bytes()),
                salt.as_bytes(),
                extra,
            ));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secret(value: &str) -> SecretString {
        SecretString::from(value)
    }

    #[test]
    fn encodes_known_vector() {
        // PBKDF2-HMAC-SHA256("password", "salt", 1)
        let hasher = Pbkdf2Hasher::sha256().with_iterations(1);
        let encoded = hasher.encode(&secret("password"), "salt").unwrap();
        assert_eq!(
            encoded,
            "pbkdf2_sha256$1$salt$Eg+2z/z4syxD5yJSVsT4N6hlSMkszDVICAWYfLcL4Xs="
        );
    }

    #[test]
    fn verifies_and_rejects() {
        let hasher = Pbkdf2Hasher::sha256().with_iterations(10);
        let encoded = hasher
            .encode(&secret("correct horse"), "seasalt1234567890abcd")
            .unwrap();
        assert!(hasher.verify(&secret("correct horse"), &encoded));
        assert!(!hasher.verify(&secret("wrong horse"), &encoded));
        assert!(!hasher.verify(&secret("correct horse"), "pbkdf2_sha256$bad"));
    }

    #[test]
    fn sha1_variant_uses_its_own_prefix() {
        let hasher = Pbkdf2Hasher::sha1().with_iterations(5);
        let encoded = hasher.encode(&secret("pw"), "abcdefghijklmnopqrstuv").unwrap();
        assert!(encoded.starts_with("pbkdf2_sha1$5$"));
        assert!(hasher.verify(&secret("pw"), &encoded));
        assert!(!Pbkdf2Hasher::sha256().verify(&secret("pw"), &encoded));
    }

    #[test]
    fn rejects_bad_salt() {
        let hasher = Pbkdf2Hasher::sha256().with_iterations(1);
        assert_eq!(
            hasher.encode(&secret("pw"), ""),
            Err(HashError::InvalidSalt)
        );
        assert_eq!(
            hasher.encode(&secret("pw"), "a$b"),
            Err(HashError::InvalidSalt)
        );
    }

    #[test]
    fn decode_round_trips() {
        let hasher = Pbkdf2Hasher::sha256().with_iterations(3);
        let encoded = hasher.encode(&secret("pw"), "abcdefghijklmnopqrstuv").unwrap();
        let decoded = hasher.decode(&encoded).unwrap();
        assert_eq!(decoded.cost, Cost::Iterations(3));
        assert_eq!(decoded.salt, "abcdefghijklmnopqrstuv");
        assert_eq!(decoded.encode(), encoded);
    }

    #[test]
    fn must_update_on_iteration_change_or_weak_salt() {
        let old = Pbkdf2Hasher::sha256().with_iterations(3);
        let current = Pbkdf2Hasher::sha256().with_iterations(4);
        let encoded = old.encode(&secret("pw"), "abcdefghijklmnopqrstuv").unwrap();
        assert!(!old.must_update(&encoded));
        assert!(current.must_update(&encoded));

        let weak_salt = old.encode(&secret("pw"), "salt").unwrap();
        assert!(old.must_update(&weak_salt));
    }

    #[test]
    fn safe_summary_masks_salt_and_digest() {
        let hasher = Pbkdf2Hasher::sha256().with_iterations(2);
        let encoded = hasher.encode(&secret("pw"), "abcdefghijklmnopqrstuv").unwrap();
        let summary = hasher.safe_summary(&encoded).unwrap();
        assert_eq!(summary[0], ("algorithm", "pbkdf2_sha256".to_string()));
        assert_eq!(summary[1], ("iterations", "2".to_string()));
        assert_eq!(summary[2].1, format!("abcdef{}", "*".repeat(16)));
        assert!(summary[3].1.ends_with('*'));
    }
}
