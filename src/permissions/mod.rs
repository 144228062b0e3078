//! Permission resolution.
//!
//! A principal's effective permissions for a scope are the union of the
//! grants made to it directly and the grants made to each of its groups.
//! Active superusers hold everything; inactive and anonymous principals hold
//! nothing.

mod cache;
mod resolver;

pub use self::cache::{CacheEntry, PermissionCache};
pub use self::resolver::{parse_permission_list, PermissionResolver};

use std::collections::BTreeSet;
use std::fmt;

use crate::principal::PermissionId;

/// A resolved set of permissions.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PermissionSet {
    /// Every permission, present or future.
    All,
    Only(BTreeSet<PermissionId>),
}

impl Default for PermissionSet {
    fn default() -> Self {
        Self::empty()
    }
}

impl PermissionSet {
    #[must_use]
    pub fn empty() -> Self {
        Self::Only(BTreeSet::new())
    }

    #[must_use]
    pub fn contains(&self, permission: &PermissionId) -> bool {
        match self {
            Self::All => true,
            Self::Only(permissions) => permissions.contains(permission),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Only(permissions) if permissions.is_empty())
    }

    #[must_use]
    pub fn is_all(&self) -> bool {
        matches!(self, Self::All)
    }

    /// Whether any held permission belongs to `namespace`.
    #[must_use]
    pub fn any_in_namespace(&self, namespace: &str) -> bool {
        match self {
            Self::All => true,
            Self::Only(permissions) => permissions
                .iter()
                .any(|permission| permission.namespace() == namespace),
        }
    }

    #[must_use]
    pub fn union(self, other: Self) -> Self {
        match (self, other) {
            (Self::All, _) | (_, Self::All) => Self::All,
            (Self::Only(mut left), Self::Only(right)) => {
                left.extend(right);
                Self::Only(left)
            }
        }
    }
}

impl From<BTreeSet<PermissionId>> for PermissionSet {
    fn from(permissions: BTreeSet<PermissionId>) -> Self {
        Self::Only(permissions)
    }
}

impl fmt::Display for PermissionSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::All => f.write_str("*"),
            Self::Only(permissions) => {
                let rendered: Vec<String> = permissions.iter().map(ToString::to_string).collect();
                f.write_str(&rendered.join(", "))
            }
        }
    }
}
