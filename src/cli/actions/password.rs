use anyhow::{bail, Context, Result};
use secrecy::SecretString;
use serde_json::{json, Map, Value};
use std::sync::Arc;

use crate::cli::globals::GlobalArgs;
use crate::hashers::{algorithm_id, is_password_usable, HashAlgorithm, HashRegistry, Verification};
use crate::verifier::PasswordVerifier;

#[derive(Debug)]
pub struct HashArgs {
    pub globals: GlobalArgs,
    pub password: SecretString,
    pub salt: Option<String>,
}

#[derive(Debug)]
pub struct VerifyArgs {
    pub globals: GlobalArgs,
    pub password: SecretString,
    pub hash: String,
}

#[derive(Debug)]
pub struct InspectArgs {
    pub globals: GlobalArgs,
    pub hash: String,
}

fn registry(globals: &GlobalArgs) -> Result<HashRegistry> {
    HashRegistry::from_settings(&globals.hashers).context("invalid hasher configuration")
}

fn encode(args: &HashArgs) -> Result<String> {
    let registry = registry(&args.globals)?;
    let encoded = match &args.salt {
        Some(salt) => registry.preferred().encode(&args.password, salt)?,
        None => registry.make_password(Some(&args.password))?,
    };
    Ok(encoded)
}

/// # Errors
/// Returns an error if the hasher configuration or the salt is invalid.
pub fn hash(args: &HashArgs) -> Result<()> {
    println!("{}", encode(args)?);
    Ok(())
}

fn verify_report(args: &VerifyArgs) -> Result<(Value, bool)> {
    let verifier = PasswordVerifier::new(Arc::new(registry(&args.globals)?))?;
    let mut upgraded = None;
    let verification = verifier.verify_with_outcome(&args.password, Some(args.hash.as_str()), |hash| {
        upgraded = Some(hash);
    });
    let (outcome, needs_upgrade) = match verification {
        Verification::Accepted { needs_upgrade } => ("accepted", needs_upgrade),
        Verification::Rejected => ("rejected", false),
        Verification::Unusable => ("unusable", false),
    };
    let report = json!({
        "algorithm": algorithm_id(&args.hash),
        "outcome": outcome,
        "needs_upgrade": needs_upgrade,
        "upgraded_hash": upgraded,
    });
    Ok((report, verification.is_accepted()))
}

/// # Errors
/// Returns an error when the password does not match.
pub fn verify(args: &VerifyArgs) -> Result<()> {
    let (report, accepted) = verify_report(args)?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    if !accepted {
        bail!("password does not match");
    }
    Ok(())
}

fn inspect_report(args: &InspectArgs) -> Result<Value> {
    if !is_password_usable(&args.hash) {
        return Ok(json!({ "usable": false }));
    }
    let registry = registry(&args.globals)?;
    let hasher = registry.identify(&args.hash)?;
    let mut report = Map::new();
    report.insert("usable".to_string(), Value::Bool(true));
    for (field, value) in hasher.safe_summary(&args.hash)? {
        report.insert(field.to_string(), Value::String(value));
    }
    report.insert(
        "must_update".to_string(),
        Value::Bool(hasher.must_update(&args.hash)),
    );
    Ok(Value::Object(report))
}

/// # Errors
/// Returns an error if the hash names an unknown algorithm or is malformed.
pub fn inspect(args: &InspectArgs) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(&inspect_report(args)?)?);
    Ok(())
}
