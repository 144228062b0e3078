//! Binding of sessions to credential state.
//!
//! A session stores an HMAC fingerprint of the principal's credential hash.
//! Changing the password changes the hash, which silently invalidates every
//! other session of that principal. Rotating the server secret keeps old
//! sessions valid as long as the previous secret is listed as a fallback.

use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256, Sha512};
use std::collections::BTreeMap;
use subtle::ConstantTimeEq;
use tracing::{debug, info};

use crate::config::FingerprintAlgorithm;
use crate::error::{AuthError, Result};
use crate::hashers::random_string;
use crate::principal::{Principal, PrincipalId};

const SESSION_KEY_LENGTH: usize = 32;

/// Which secret a stored fingerprint was produced with.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FingerprintMatch {
    Current,
    /// Matched the fallback secret at this index.
    Fallback(usize),
    Mismatch,
}

/// Computes and checks session fingerprints.
#[derive(Clone, Debug)]
pub struct SessionBinder {
    key_salt: String,
    secret: SecretString,
    fallback_secrets: Vec<SecretString>,
    algorithm: FingerprintAlgorithm,
}

impl SessionBinder {
    /// # Errors
    /// Returns `InvalidArgument` when the secret is empty.
    pub fn new(
        key_salt: &str,
        secret: SecretString,
        fallback_secrets: Vec<SecretString>,
        algorithm: FingerprintAlgorithm,
    ) -> Result<Self> {
        if secret.expose_secret().is_empty() {
            return Err(AuthError::InvalidArgument(
                "session secret must not be empty".to_string(),
            ));
        }
        Ok(Self {
            key_salt: key_salt.to_string(),
            secret,
            fallback_secrets,
            algorithm,
        })
    }

    /// Hex HMAC of `credential_hash`, keyed by `H(key_salt || secret)`.
    ///
    /// # Errors
    /// Returns `InvalidArgument` if the HMAC cannot be keyed.
    pub fn fingerprint(&self, credential_hash: &str, secret: &SecretString) -> Result<String> {
        let mut key_material = self.key_salt.clone().into_bytes();
        key_material.extend_from_slice(secret.expose_secret().as_bytes());
        let invalid_key = |err: hmac::digest::InvalidLength| {
            AuthError::InvalidArgument(format!("invalid fingerprint key: {err}"))
        };
        let digest = match self.algorithm {
            FingerprintAlgorithm::Sha256 => {
                let key = Sha256::digest(&key_material);
                let mut mac = Hmac::<Sha256>::new_from_slice(&key).map_err(invalid_key)?;
                mac.update(credential_hash.as_bytes());
                hex::encode(mac.finalize().into_bytes())
            }
            FingerprintAlgorithm::Sha512 => {
                let key = Sha512::digest(&key_material);
                let mut mac = Hmac::<Sha512>::new_from_slice(&key).map_err(invalid_key)?;
                mac.update(credential_hash.as_bytes());
                hex::encode(mac.finalize().into_bytes())
            }
        };
        Ok(digest)
    }

    /// Fingerprint under the current secret, as stored on login.
    ///
    /// # Errors
    /// See [`Self::fingerprint`].
    pub fn issue_session_fingerprint(&self, credential_hash: &str) -> Result<String> {
        self.fingerprint(credential_hash, &self.secret)
    }

    /// Fingerprints under each fallback secret, in configured order.
    ///
    /// # Errors
    /// See [`Self::fingerprint`].
    pub fn fingerprint_with_fallback_secrets(&self, credential_hash: &str) -> Result<Vec<String>> {
        self.fallback_secrets
            .iter()
            .map(|secret| self.fingerprint(credential_hash, secret))
            .collect()
    }

    /// Compare `stored` against the current secret, then each fallback.
    ///
    /// # Errors
    /// See [`Self::fingerprint`].
    pub fn match_fingerprint(&self, stored: &str, credential_hash: &str) -> Result<FingerprintMatch> {
        if constant_time_eq(stored, &self.issue_session_fingerprint(credential_hash)?) {
            return Ok(FingerprintMatch::Current);
        }
        for (index, candidate) in self
            .fingerprint_with_fallback_secrets(credential_hash)?
            .iter()
            .enumerate()
        {
            if constant_time_eq(stored, candidate) {
                return Ok(FingerprintMatch::Fallback(index));
            }
        }
        Ok(FingerprintMatch::Mismatch)
    }

    /// # Errors
    /// See [`Self::fingerprint`].
    pub fn validate_session_fingerprint(&self, stored: &str, credential_hash: &str) -> Result<bool> {
        Ok(self.match_fingerprint(stored, credential_hash)? != FingerprintMatch::Mismatch)
    }

    /// Record `principal` as authenticated in `session`.
    ///
    /// Switching principals, or a stale fingerprint for the same principal,
    /// flushes the session. Otherwise the key is cycled and data is kept.
    ///
    /// # Errors
    /// See [`Self::fingerprint`].
    pub fn login(&self, session: &mut SessionState, principal: &Principal, backend: &str) -> Result<()> {
        let fingerprint = self.issue_session_fingerprint(&principal.password)?;
        let stale = match (&session.principal_id, &session.fingerprint) {
            (Some(current), _) if *current != principal.id => true,
            (Some(_), Some(stored)) => !constant_time_eq(stored, &fingerprint),
            _ => false,
        };
        if stale {
            session.flush();
        } else {
            session.cycle_key();
        }
        session.principal_id = Some(principal.id);
        session.backend = Some(backend.to_string());
        session.fingerprint = Some(fingerprint);
        info!(principal = %principal.id, backend, "session logged in");
        Ok(())
    }

    /// Check the session against the principal's current credential hash.
    ///
    /// A fallback match is upgraded to the current secret and the key is
    /// cycled. A missing or mismatched fingerprint logs the session out but
    /// keeps its business data.
    ///
    /// # Errors
    /// See [`Self::fingerprint`].
    pub fn verify_session(&self, session: &mut SessionState, principal: &Principal) -> Result<bool> {
        let Some(stored) = session.fingerprint.clone() else {
            session.deauthenticate();
            return Ok(false);
        };
        match self.match_fingerprint(&stored, &principal.password)? {
            FingerprintMatch::Current => Ok(true),
            FingerprintMatch::Fallback(index) => {
                debug!(fallback = index, "session fingerprint refreshed to current secret");
                session.cycle_key();
                session.fingerprint = Some(self.issue_session_fingerprint(&principal.password)?);
                Ok(true)
            }
            FingerprintMatch::Mismatch => {
                debug!(principal = %principal.id, "session fingerprint mismatch, logging out");
                session.deauthenticate();
                Ok(false)
            }
        }
    }

    /// Keep the current session valid after its principal changed password.
    /// Other sessions of the same principal are left to fail verification.
    ///
    /// # Errors
    /// See [`Self::fingerprint`].
    pub fn update_after_password_change(
        &self,
        session: &mut SessionState,
        principal: &Principal,
    ) -> Result<()> {
        session.cycle_key();
        if session.principal_id == Some(principal.id) {
            session.fingerprint = Some(self.issue_session_fingerprint(&principal.password)?);
        }
        Ok(())
    }

    pub fn logout(&self, session: &mut SessionState) {
        if let Some(principal) = session.principal_id {
            info!(%principal, "session logged out");
        }
        session.flush();
    }
}

fn constant_time_eq(a: &str, b: &str) -> bool {
    a.as_bytes().ct_eq(b.as_bytes()).into()
}

/// Per-client session record.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SessionState {
    key: String,
    principal_id: Option<PrincipalId>,
    backend: Option<String>,
    fingerprint: Option<String>,
    #[serde(default)]
    data: BTreeMap<String, serde_json::Value>,
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionState {
    #[must_use]
    pub fn new() -> Self {
        Self {
            key: random_string(SESSION_KEY_LENGTH),
            principal_id: None,
            backend: None,
            fingerprint: None,
            data: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    #[must_use]
    pub fn principal_id(&self) -> Option<PrincipalId> {
        self.principal_id
    }

    #[must_use]
    pub fn backend(&self) -> Option<&str> {
        self.backend.as_deref()
    }

    #[must_use]
    pub fn fingerprint(&self) -> Option<&str> {
        self.fingerprint.as_deref()
    }

    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.principal_id.is_some()
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.data.get(key)
    }

    pub fn insert(&mut self, key: &str, value: serde_json::Value) {
        self.data.insert(key.to_string(), value);
    }

    pub fn remove(&mut self, key: &str) -> Option<serde_json::Value> {
        self.data.remove(key)
    }

    /// New key, same contents.
    pub fn cycle_key(&mut self) {
        self.key = random_string(SESSION_KEY_LENGTH);
    }

    /// Forget who is logged in and cycle the key. Business data stays.
    pub fn deauthenticate(&mut self) {
        self.principal_id = None;
        self.backend = None;
        self.fingerprint = None;
        self.cycle_key();
    }

    /// New key, nothing else.
    pub fn flush(&mut self) {
        *self = Self::new();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn binder(secret: &str, fallbacks: &[&str]) -> SessionBinder {
        SessionBinder::new(
            "warden.test",
            SecretString::from(secret),
            fallbacks.iter().map(|s| SecretString::from(*s)).collect(),
            FingerprintAlgorithm::Sha256,
        )
        .unwrap()
    }

    #[test]
    fn fingerprint_matches_reference_construction() {
        // hmac_sha256(key = sha256("warden.test" + "s3cret"), msg = "hash")
        let key = Sha256::digest(b"warden.tests3cret");
        let mut mac = Hmac::<Sha256>::new_from_slice(&key).unwrap();
        mac.update(b"hash");
        let expected = hex::encode(mac.finalize().into_bytes());

        let binder = binder("s3cret", &[]);
        assert_eq!(binder.issue_session_fingerprint("hash").unwrap(), expected);
        assert_eq!(expected.len(), 64);
    }

    #[test]
    fn sha512_fingerprints_are_longer() {
        let binder = SessionBinder::new(
            "warden.test",
            SecretString::from("s3cret"),
            Vec::new(),
            FingerprintAlgorithm::Sha512,
        )
        .unwrap();
        assert_eq!(binder.issue_session_fingerprint("hash").unwrap().len(), 128);
    }

    #[test]
    fn empty_secret_is_rejected() {
        assert!(SessionBinder::new(
            "salt",
            SecretString::from(""),
            Vec::new(),
            FingerprintAlgorithm::Sha256
        )
        .is_err());
    }

    #[test]
    fn fallback_secrets_are_checked_in_order() {
        let old = binder("old", &[]);
        let stored = old.issue_session_fingerprint("hash").unwrap();

        let rotated = binder("new", &["older", "old"]);
        assert_eq!(
            rotated.match_fingerprint(&stored, "hash").unwrap(),
            FingerprintMatch::Fallback(1)
        );
        assert!(rotated.validate_session_fingerprint(&stored, "hash").unwrap());
        assert!(!binder("new", &[])
            .validate_session_fingerprint(&stored, "hash")
            .unwrap());
        assert_eq!(
            rotated.match_fingerprint(&stored, "other-hash").unwrap(),
            FingerprintMatch::Mismatch
        );
    }

    #[test]
    fn login_cycles_key_and_keeps_data_for_same_principal() {
        let binder = binder("s3cret", &[]);
        let alice = Principal::new("alice", "hash-1".to_string());
        let mut session = SessionState::new();
        session.insert("cart", serde_json::json!([1, 2]));
        let anonymous_key = session.key().to_string();

        binder.login(&mut session, &alice, "model").unwrap();
        assert_ne!(session.key(), anonymous_key);
        assert_eq!(session.principal_id(), Some(alice.id));
        assert_eq!(session.backend(), Some("model"));
        assert!(session.get("cart").is_some());
    }

    #[test]
    fn login_as_someone_else_flushes() {
        let binder = binder("s3cret", &[]);
        let alice = Principal::new("alice", "hash-1".to_string());
        let bob = Principal::new("bob", "hash-2".to_string());
        let mut session = SessionState::new();
        binder.login(&mut session, &alice, "model").unwrap();
        session.insert("cart", serde_json::json!("alice's"));

        binder.login(&mut session, &bob, "model").unwrap();
        assert_eq!(session.principal_id(), Some(bob.id));
        assert!(session.get("cart").is_none());
    }

    #[test]
    fn password_change_invalidates_other_sessions_only() {
        let binder = binder("s3cret", &[]);
        let mut alice = Principal::new("alice", "hash-1".to_string());
        let mut current = SessionState::new();
        let mut other = SessionState::new();
        binder.login(&mut current, &alice, "model").unwrap();
        binder.login(&mut other, &alice, "model").unwrap();

        alice.password = "hash-2".to_string();
        let key_before = current.key().to_string();
        binder
            .update_after_password_change(&mut current, &alice)
            .unwrap();
        assert_ne!(current.key(), key_before);

        assert!(binder.verify_session(&mut current, &alice).unwrap());
        other.insert("cart", serde_json::json!(["book"]));
        let other_key = other.key().to_string();
        assert!(!binder.verify_session(&mut other, &alice).unwrap());
        assert!(!other.is_authenticated());
        assert!(other.fingerprint().is_none());
        assert!(other.backend().is_none());
        assert_ne!(other.key(), other_key);
        assert_eq!(other.get("cart"), Some(&serde_json::json!(["book"])));
    }

    #[test]
    fn session_without_fingerprint_is_logged_out_not_flushed() {
        let binder = binder("s3cret", &[]);
        let alice = Principal::new("alice", "hash-1".to_string());
        let mut session = SessionState::new();
        binder.login(&mut session, &alice, "model").unwrap();
        session.fingerprint = None;
        session.insert("theme", serde_json::json!("dark"));

        assert!(!binder.verify_session(&mut session, &alice).unwrap());
        assert!(!session.is_authenticated());
        assert!(session.get("theme").is_some());
    }

    #[test]
    fn fallback_match_is_refreshed() {
        let alice = Principal::new("alice", "hash-1".to_string());
        let mut session = SessionState::new();
        binder("old", &[]).login(&mut session, &alice, "model").unwrap();

        let rotated = binder("new", &["old"]);
        let key_before = session.key().to_string();
        assert!(rotated.verify_session(&mut session, &alice).unwrap());
        assert_ne!(session.key(), key_before);
        assert_eq!(
            session.fingerprint(),
            Some(rotated.issue_session_fingerprint("hash-1").unwrap().as_str())
        );
    }

    #[test]
    fn logout_flushes_everything() {
        let binder = binder("s3cret", &[]);
        let alice = Principal::new("alice", "hash-1".to_string());
        let mut session = SessionState::new();
        binder.login(&mut session, &alice, "model").unwrap();
        session.insert("theme", serde_json::json!("dark"));

        binder.logout(&mut session);
        assert!(!session.is_authenticated());
        assert!(session.get("theme").is_none());
        assert!(session.fingerprint().is_none());
    }
}
