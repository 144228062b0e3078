use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;

use super::{CredentialStore, MemoryStore};
use crate::error::{AuthError, StoreError};
use crate::principal::{GroupId, PermissionId, Principal, PrincipalId, Scope};

/// Seed data for a [`MemoryStore`], usually read from a JSON file.
///
/// ```json
/// {
///   "principals": [
///     {"username": "alice", "password": "pbkdf2_sha256$...", "groups": ["editors"],
///      "permissions": [{"permission": "docs.read"}]}
///   ],
///   "groups": [
///     {"name": "editors", "permissions": [{"permission": "docs.edit"}]}
///   ]
/// }
/// ```
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Fixture {
    #[serde(default)]
    pub principals: Vec<FixturePrincipal>,
    #[serde(default)]
    pub groups: Vec<FixtureGroup>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FixturePrincipal {
    #[serde(default)]
    pub id: Option<PrincipalId>,
    pub username: String,
    #[serde(default)]
    pub email: String,
    /// Encoded hash. Missing means an unusable password.
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default)]
    pub is_superuser: bool,
    #[serde(default)]
    pub groups: Vec<GroupId>,
    #[serde(default)]
    pub permissions: Vec<FixtureGrant>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FixtureGroup {
    pub name: GroupId,
    #[serde(default)]
    pub permissions: Vec<FixtureGrant>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FixtureGrant {
    pub permission: PermissionId,
    #[serde(default)]
    pub scope: Scope,
}

const fn default_true() -> bool {
    true
}

impl Fixture {
    /// # Errors
    /// Returns `InvalidArgument` when the JSON does not describe a fixture.
    pub fn from_json(json: &str) -> Result<Self, AuthError> {
        serde_json::from_str(json)
            .map_err(|err| AuthError::InvalidArgument(format!("invalid fixture: {err}")))
    }

    /// # Errors
    /// Returns `InvalidArgument` when the file cannot be read or parsed.
    pub fn from_path(path: &Path) -> Result<Self, AuthError> {
        let json = std::fs::read_to_string(path).map_err(|err| {
            AuthError::InvalidArgument(format!("cannot read fixture {}: {err}", path.display()))
        })?;
        Self::from_json(&json)
    }

    /// Load every principal, membership and grant into a fresh store.
    ///
    /// # Errors
    /// Returns the store error when a record is rejected, e.g. a duplicate username.
    pub async fn into_store(self) -> Result<MemoryStore, StoreError> {
        let store = MemoryStore::new();
        for group in &self.groups {
            for grant in &group.permissions {
                store
                    .grant_group_permission(&group.name, &grant.permission, &grant.scope)
                    .await?;
            }
        }
        for record in self.principals {
            let mut principal = Principal::new(
                &record.username,
                record.password.unwrap_or_else(crate::hashers::unusable_password),
            )
            .with_email(&record.email)
            .with_active(record.is_active)
            .with_superuser(record.is_superuser);
            if let Some(id) = record.id {
                principal.id = id;
            }
            let principal = store.create_principal(principal).await?;
            for group in &record.groups {
                store.add_to_group(principal.id, group).await?;
            }
            for grant in &record.permissions {
                store
                    .grant_permission(principal.id, &grant.permission, &grant.scope)
                    .await?;
            }
            debug!(username = %principal.username, id = %principal.id, "fixture principal loaded");
        }
        Ok(store)
    }
}
