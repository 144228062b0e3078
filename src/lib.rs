//! # Warden
//!
//! Password authentication and permission kernel.
//!
//! A login runs through an ordered [`backends::BackendChain`]. The model
//! backend checks the password with the [`verifier::PasswordVerifier`], which
//! costs the same whether or not the username exists and transparently
//! upgrades outdated hashes. The principal is then bound to the session with a
//! keyed fingerprint of its credential hash ([`session::SessionBinder`]), so a
//! password change invalidates every other session.
//!
//! Permissions are the union of direct and group grants, resolved per request
//! through an explicit [`permissions::PermissionCache`]. Active superusers hold
//! everything.
//!
//! ## Hash format
//!
//! Hashes are stored as `<algorithm>$<fields...>`, for example
//! `pbkdf2_sha256$<iterations>$<salt>$<base64 digest>`. A hash starting with
//! `!` is unusable and never verifies.
//!
//! [`kernel::AuthKernel`] wires everything from a [`config::KernelConfig`].

pub mod backends;
pub mod cli;
pub mod config;
pub mod error;
pub mod hashers;
pub mod kernel;
pub mod permissions;
pub mod principal;
pub mod session;
pub mod store;
pub mod validation;
pub mod verifier;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};
