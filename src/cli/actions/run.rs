use crate::cli::actions::{authenticate, fingerprint, password, permissions, Action};
use anyhow::Result;

/// Execute the provided action.
// Single dispatch point; each `Action::*` variant maps to one `execute` call.
/// # Errors
/// Returns an error if the action fails.
pub async fn execute(action: Action) -> Result<()> {
    match action {
        Action::Hash(args) => password::hash(&args),
        Action::Verify(args) => password::verify(&args),
        Action::Inspect(args) => password::inspect(&args),
        Action::Authenticate(args) => authenticate::execute(args).await,
        Action::Permissions(args) => permissions::execute(args).await,
        Action::Fingerprint(args) => fingerprint::execute(&args),
    }
}
