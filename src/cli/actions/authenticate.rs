use anyhow::{bail, Context, Result};
use secrecy::SecretString;
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::backends::Credentials;
use crate::cli::globals::GlobalArgs;
use crate::config::{BackendKind, KernelConfig};
use crate::kernel::AuthKernel;
use crate::session::SessionState;
use crate::store::Fixture;

#[derive(Debug)]
pub struct Args {
    pub globals: GlobalArgs,
    pub fixture: PathBuf,
    pub secret: SecretString,
    pub backends: Vec<BackendKind>,
    pub credentials: Credentials,
    pub store_timeout: Duration,
}

async fn login(args: Args) -> Result<Option<Value>> {
    let store = Fixture::from_path(&args.fixture)?
        .into_store()
        .await
        .context("failed to seed store from fixture")?;
    let config = KernelConfig::new(args.secret)
        .with_backends(args.backends)
        .with_hashers(args.globals.hashers)
        .with_store_timeout(args.store_timeout);
    let kernel = AuthKernel::new(config, Arc::new(store))?;

    let mut session = SessionState::new();
    let Some(authenticated) = kernel.login(&args.credentials, &mut session).await? else {
        return Ok(None);
    };
    info!(backend = authenticated.backend, "authenticated");
    Ok(Some(json!({
        "id": authenticated.principal.id.to_string(),
        "username": authenticated.principal.username,
        "backend": authenticated.backend,
        "is_superuser": authenticated.principal.is_superuser,
        "session_key": session.key(),
        "fingerprint": session.fingerprint(),
    })))
}

/// # Errors
/// Returns an error if the fixture cannot be loaded, the store fails, or no
/// backend accepts the credentials.
pub async fn execute(args: Args) -> Result<()> {
    match login(args).await? {
        Some(report) => {
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
        None => bail!("authentication failed"),
    }
}
