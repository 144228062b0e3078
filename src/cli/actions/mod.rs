pub mod authenticate;
pub mod fingerprint;
pub mod password;
pub mod permissions;

// Internal "interpreter" for `Action`.
mod run;

#[derive(Debug)]
pub enum Action {
    Hash(password::HashArgs),
    Verify(password::VerifyArgs),
    Inspect(password::InspectArgs),
    Authenticate(authenticate::Args),
    Permissions(permissions::Args),
    Fingerprint(fingerprint::Args),
}

impl Action {
    /// Execute the action.
    /// # Errors
    /// Returns an error if the action fails or its check does not pass.
    pub async fn execute(self) -> anyhow::Result<()> {
        run::execute(self).await
    }
}
