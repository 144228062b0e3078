//! Principals, permissions, groups and scopes.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use unicode_normalization::UnicodeNormalization;
use uuid::Uuid;

use crate::error::AuthError;

/// Stable principal identifier.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PrincipalId(pub Uuid);

impl PrincipalId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    #[must_use]
    pub fn is_nil(&self) -> bool {
        self.0.is_nil()
    }
}

impl Default for PrincipalId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for PrincipalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for PrincipalId {
    type Err = AuthError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s.trim())
            .map(Self)
            .map_err(|_| AuthError::InvalidArgument(format!("invalid principal id: {s}")))
    }
}

/// An authenticatable entity.
///
/// `password` holds the encoded credential hash, never plaintext, and is
/// masked in `Debug` output.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub id: PrincipalId,
    pub username: String,
    #[serde(default)]
    pub email: String,
    pub password: String,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default)]
    pub is_superuser: bool,
    #[serde(default)]
    pub created_at_unix: i64,
}

const fn default_true() -> bool {
    true
}

impl Principal {
    /// Build an active, non-superuser principal with a normalized username.
    #[must_use]
    pub fn new(username: &str, password_hash: String) -> Self {
        Self {
            id: PrincipalId::new(),
            username: normalize_username(username),
            email: String::new(),
            password: password_hash,
            is_active: true,
            is_superuser: false,
            created_at_unix: unix_now(),
        }
    }

    /// The principal used for unauthenticated requests.
    #[must_use]
    pub fn anonymous() -> Self {
        Self {
            id: PrincipalId(Uuid::nil()),
            username: String::new(),
            email: String::new(),
            password: String::new(),
            is_active: false,
            is_superuser: false,
            created_at_unix: 0,
        }
    }

    #[must_use]
    pub fn with_email(mut self, email: &str) -> Self {
        self.email = normalize_email(email);
        self
    }

    #[must_use]
    pub fn with_active(mut self, active: bool) -> Self {
        self.is_active = active;
        self
    }

    #[must_use]
    pub fn with_superuser(mut self, superuser: bool) -> Self {
        self.is_superuser = superuser;
        self
    }

    #[must_use]
    pub fn is_anonymous(&self) -> bool {
        self.id.is_nil()
    }

    /// Active superusers implicitly hold every permission.
    #[must_use]
    pub fn is_active_superuser(&self) -> bool {
        self.is_active && self.is_superuser && !self.is_anonymous()
    }
}

impl fmt::Debug for Principal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Principal")
            .field("id", &self.id)
            .field("username", &self.username)
            .field("email", &self.email)
            .field("password", &"***")
            .field("is_active", &self.is_active)
            .field("is_superuser", &self.is_superuser)
            .field("created_at_unix", &self.created_at_unix)
            .finish()
    }
}

/// A permission identified by `namespace.action`, e.g. `billing.delete_invoice`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PermissionId {
    namespace: String,
    action: String,
}

impl PermissionId {
    /// # Errors
    /// Returns `InvalidArgument` when either part is empty or contains a `.`.
    pub fn new(namespace: &str, action: &str) -> Result<Self, AuthError> {
        if namespace.is_empty() || action.is_empty() || namespace.contains('.') || action.contains('.')
        {
            return Err(AuthError::InvalidArgument(format!(
                "permission must be in the form namespace.action, got {namespace}.{action}"
            )));
        }
        Ok(Self {
            namespace: namespace.to_string(),
            action: action.to_string(),
        })
    }

    #[must_use]
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    #[must_use]
    pub fn action(&self) -> &str {
        &self.action
    }
}

impl FromStr for PermissionId {
    type Err = AuthError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let Some((namespace, action)) = s.split_once('.') else {
            return Err(AuthError::InvalidArgument(format!(
                "permission must be in the form namespace.action, got {s:?}"
            )));
        };
        Self::new(namespace, action)
    }
}

impl TryFrom<String> for PermissionId {
    type Error = AuthError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<PermissionId> for String {
    fn from(value: PermissionId) -> Self {
        value.to_string()
    }
}

impl fmt::Display for PermissionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.namespace, self.action)
    }
}

/// Group name. Groups are referenced by principals, never owned by them.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GroupId(pub String);

impl GroupId {
    #[must_use]
    pub fn new(name: &str) -> Self {
        Self(name.to_string())
    }
}

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The object (or absence of one) a permission check is evaluated against.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum Scope {
    #[default]
    Global,
    Object {
        kind: String,
        id: String,
    },
}

impl Scope {
    #[must_use]
    pub fn object(kind: &str, id: &str) -> Self {
        Self::Object {
            kind: kind.to_string(),
            id: id.to_string(),
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Global => f.write_str("global"),
            Self::Object { kind, id } => write!(f, "{kind}:{id}"),
        }
    }
}

impl FromStr for Scope {
    type Err = AuthError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.is_empty() || trimmed == "global" {
            return Ok(Self::Global);
        }
        match trimmed.split_once(':') {
            Some((kind, id)) if !kind.is_empty() && !id.is_empty() => Ok(Self::object(kind, id)),
            _ => Err(AuthError::InvalidArgument(format!(
                "scope must be \"global\" or kind:id, got {s:?}"
            ))),
        }
    }
}

/// Apply NFKC so visually identical usernames compare equal.
#[must_use]
pub fn normalize_username(username: &str) -> String {
    username.nfkc().collect::<String>()
}

/// Lowercase the domain part of an email address; the local part is kept.
#[must_use]
pub fn normalize_email(email: &str) -> String {
    let trimmed = email.trim();
    match trimmed.rsplit_once('@') {
        Some((local, domain)) => format!("{local}@{}", domain.to_lowercase()),
        None => trimmed.to_string(),
    }
}

pub(crate) fn unix_now() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|duration| i64::try_from(duration.as_secs()).unwrap_or(i64::MAX))
        .unwrap_or_default()
}
