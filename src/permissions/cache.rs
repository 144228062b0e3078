use std::collections::{BTreeSet, HashMap};

use crate::principal::{PermissionId, PrincipalId, Scope};

/// The two halves of a principal's grants for one scope. A half is `None`
/// until it has been loaded.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CacheEntry {
    pub direct: Option<BTreeSet<PermissionId>>,
    pub group: Option<BTreeSet<PermissionId>>,
}

/// Request-scoped memo of loaded grants, keyed by principal and scope.
///
/// Owned by the request that created it and passed down as `&mut`, so it is
/// never shared between concurrent requests.
#[derive(Debug, Default)]
pub struct PermissionCache {
    entries: HashMap<(PrincipalId, Scope), CacheEntry>,
}

impl PermissionCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn get(&self, principal: PrincipalId, scope: &Scope) -> Option<&CacheEntry> {
        self.entries.get(&(principal, scope.clone()))
    }

    pub(crate) fn entry(&mut self, principal: PrincipalId, scope: &Scope) -> &mut CacheEntry {
        self.entries.entry((principal, scope.clone())).or_default()
    }

    /// Drop every scope cached for `principal`.
    pub fn invalidate(&mut self, principal: PrincipalId) {
        self.entries.retain(|(cached, _), _| *cached != principal);
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
