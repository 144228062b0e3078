//! Timing-safe password verification.
//!
//! Every call costs one full verification with the preferred algorithm,
//! whether or not a principal was found, so response time does not reveal
//! which usernames exist.

use secrecy::SecretString;
use std::hint::black_box;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::HashError;
use crate::hashers::{is_password_usable, random_string, HashRegistry, Verification};

const DUMMY_PASSWORD_LENGTH: usize = 32;

#[derive(Clone, Debug)]
pub struct PasswordVerifier {
    registry: Arc<HashRegistry>,
    dummy_hash: String,
}

impl PasswordVerifier {
    /// Precompute the dummy hash with the preferred algorithm.
    ///
    /// # Errors
    /// Returns an error when the preferred algorithm cannot produce a hash.
    pub fn new(registry: Arc<HashRegistry>) -> Result<Self, HashError> {
        let dummy = SecretString::from(random_string(DUMMY_PASSWORD_LENGTH));
        let dummy_hash = registry.make_password(Some(&dummy))?;
        Ok(Self {
            registry,
            dummy_hash,
        })
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<HashRegistry> {
        &self.registry
    }

    /// Verify `candidate` and report the outcome.
    ///
    /// `on_upgrade` receives a fresh hash made with the preferred algorithm
    /// when the password matched but the stored hash is outdated. It runs at
    /// most once, before this returns.
    pub fn verify_with_outcome<F>(
        &self,
        candidate: &SecretString,
        stored: Option<&str>,
        on_upgrade: F,
    ) -> Verification
    where
        F: FnOnce(String),
    {
        let Some(stored) = stored else {
            self.burn(candidate);
            return Verification::Rejected;
        };

        if !is_password_usable(stored) {
            debug!("stored password is marked unusable");
            self.burn(candidate);
            return Verification::Unusable;
        }

        let mut upgrade_requested = false;
        let verification =
            self.registry
                .check_password(candidate, stored, |_| upgrade_requested = true);

        match verification {
            Verification::Unusable => {
                warn!("stored password hash is malformed or uses an unregistered algorithm");
                self.burn(candidate);
            }
            Verification::Accepted {
                needs_upgrade: true,
            } if upgrade_requested => match self.registry.make_password(Some(candidate)) {
                Ok(new_hash) => on_upgrade(new_hash),
                Err(err) => warn!("could not rehash password with preferred algorithm: {err}"),
            },
            Verification::Accepted { .. } | Verification::Rejected => {}
        }
        verification
    }

    /// `true` when `candidate` matches `stored`. See [`Self::verify_with_outcome`].
    pub fn authenticate<F>(&self, candidate: &SecretString, stored: Option<&str>, on_upgrade: F) -> bool
    where
        F: FnOnce(String),
    {
        self.verify_with_outcome(candidate, stored, on_upgrade)
            .is_accepted()
    }

    /// Run one full verification against the dummy hash and discard the result.
    fn burn(&self, candidate: &SecretString) {
        black_box(
            self.registry
                .preferred()
                .verify(black_box(candidate), &self.dummy_hash),
        );
    }
}
