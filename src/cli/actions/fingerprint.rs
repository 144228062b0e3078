use anyhow::{bail, Result};
use secrecy::SecretString;

use crate::config::FingerprintAlgorithm;
use crate::session::{FingerprintMatch, SessionBinder};

#[derive(Debug)]
pub struct Args {
    pub secret: SecretString,
    pub fallback_secrets: Vec<SecretString>,
    pub key_salt: String,
    pub digest: FingerprintAlgorithm,
    pub hash: String,
    /// Validate this fingerprint instead of issuing a new one.
    pub check: Option<String>,
}

fn binder(args: &Args) -> Result<SessionBinder> {
    Ok(SessionBinder::new(
        &args.key_salt,
        args.secret.clone(),
        args.fallback_secrets.clone(),
        args.digest,
    )?)
}

fn describe(outcome: FingerprintMatch) -> &'static str {
    match outcome {
        FingerprintMatch::Current => "current",
        FingerprintMatch::Fallback(_) => "fallback",
        FingerprintMatch::Mismatch => "mismatch",
    }
}

/// # Errors
/// Returns an error if the secret is empty or a checked fingerprint does not
/// match under any secret.
pub fn execute(args: &Args) -> Result<()> {
    let binder = binder(args)?;
    match &args.check {
        None => println!("{}", binder.issue_session_fingerprint(&args.hash)?),
        Some(stored) => {
            let outcome = binder.match_fingerprint(stored, &args.hash)?;
            println!("{}", describe(outcome));
            if outcome == FingerprintMatch::Mismatch {
                bail!("fingerprint does not match");
            }
        }
    }
    Ok(())
}
