use anyhow::{bail, Context, Result};
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::Arc;

use crate::permissions::{PermissionCache, PermissionResolver, PermissionSet};
use crate::principal::{Principal, Scope};
use crate::store::{CredentialStore, Fixture};

/// What to ask the resolver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Query {
    /// Every permission the principal holds in the scope.
    Effective { username: String },
    /// Whether the principal holds all of `permissions`.
    Check {
        username: String,
        permissions: Vec<String>,
    },
    Namespace { username: String, namespace: String },
    /// Principals holding a permission globally.
    Holders {
        permission: String,
        include_superusers: bool,
    },
}

#[derive(Debug)]
pub struct Args {
    pub fixture: PathBuf,
    pub scope: Scope,
    pub query: Query,
}

fn render(permissions: &PermissionSet) -> Value {
    match permissions {
        PermissionSet::All => json!("*"),
        PermissionSet::Only(ids) => json!(ids.iter().map(ToString::to_string).collect::<Vec<_>>()),
    }
}

async fn load(store: &dyn CredentialStore, username: &str) -> Result<Principal> {
    store
        .load(username)
        .await?
        .with_context(|| format!("no principal named {username:?}"))
}

/// Returns the report and whether the query's check passed.
async fn resolve(args: Args) -> Result<(Value, bool)> {
    let store: Arc<dyn CredentialStore> = Arc::new(
        Fixture::from_path(&args.fixture)?
            .into_store()
            .await
            .context("failed to seed store from fixture")?,
    );
    let resolver = PermissionResolver::new(store.clone());
    let mut cache = PermissionCache::new();

    match args.query {
        Query::Holders {
            permission,
            include_superusers,
        } => {
            let holders = resolver
                .principals_with_permission(&permission, include_superusers, Some(true))
                .await?;
            let usernames: Vec<String> = holders.into_iter().map(|p| p.username).collect();
            Ok((json!({ "permission": permission, "holders": usernames }), true))
        }
        Query::Effective { username } => {
            let principal = load(store.as_ref(), &username).await?;
            let permissions = resolver
                .effective_permissions(&principal, &args.scope, &mut cache)
                .await?;
            Ok((
                json!({
                    "username": principal.username,
                    "scope": args.scope.to_string(),
                    "permissions": render(&permissions),
                }),
                true,
            ))
        }
        Query::Check {
            username,
            permissions,
        } => {
            let principal = load(store.as_ref(), &username).await?;
            let granted = resolver
                .has_all(&principal, &permissions, &args.scope, &mut cache)
                .await?;
            Ok((
                json!({
                    "username": principal.username,
                    "scope": args.scope.to_string(),
                    "permissions": permissions,
                    "granted": granted,
                }),
                granted,
            ))
        }
        Query::Namespace {
            username,
            namespace,
        } => {
            let principal = load(store.as_ref(), &username).await?;
            let granted = resolver
                .has_namespace_permissions(&principal, &namespace, &mut cache)
                .await?;
            Ok((
                json!({
                    "username": principal.username,
                    "namespace": namespace,
                    "granted": granted,
                }),
                granted,
            ))
        }
    }
}

/// # Errors
/// Returns an error if the fixture or principal cannot be loaded, or a
/// requested check is not granted.
pub async fn execute(args: Args) -> Result<()> {
    let (report, passed) = resolve(args).await?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    if !passed {
        bail!("permission check failed");
    }
    Ok(())
}
