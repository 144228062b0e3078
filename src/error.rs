//! Error taxonomy for the kernel.
//!
//! Only [`AuthError::StoreUnavailable`] and [`AuthError::InvalidArgument`] ever
//! reach callers of the authentication path. Lookup misses and unusable hashes
//! are absorbed into a plain "not authenticated" answer so the outcome of a
//! login cannot be used to probe which principals exist.

use std::time::Duration;

use crate::validation::ValidationError;

/// Failures reported by a [`CredentialStore`](crate::store::CredentialStore).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("store round-trip exceeded {0:?}")]
    Timeout(Duration),
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("store rejected write: {0}")]
    Rejected(String),
}

/// Failures while encoding or decoding a credential hash.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HashError {
    #[error("unknown password hashing algorithm: {0}")]
    UnknownAlgorithm(String),
    #[error("malformed {algorithm} hash")]
    Malformed { algorithm: &'static str },
    #[error("invalid {algorithm} parameters: {reason}")]
    InvalidParams {
        algorithm: &'static str,
        reason: String,
    },
    #[error("salt must be non-empty and must not contain '$'")]
    InvalidSalt,
}

/// Errors surfaced by the authentication and permission kernel.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// Principal lookup missed. Never returned from the login path; kept so
    /// internal helpers can name the condition before it is absorbed.
    #[error("credential not found")]
    CredentialNotFound,
    #[error("stored hash is unusable: {0}")]
    HashUnusable(#[from] HashError),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error(transparent)]
    StoreUnavailable(#[from] StoreError),
    #[error("password upgrade write failed: {0}")]
    RehashFailed(String),
    #[error("password rejected: {}", join_validation(.0))]
    PasswordValidation(Vec<ValidationError>),
}

fn join_validation(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

pub type Result<T, E = AuthError> = std::result::Result<T, E>;
