use crate::backends::Credentials;
use crate::cli::actions::{authenticate, fingerprint, password, permissions, Action};
use crate::cli::globals::GlobalArgs;
use crate::config::{BackendKind, FingerprintAlgorithm};
use crate::principal::Scope;
use anyhow::{anyhow, Context, Result};
use secrecy::SecretString;
use std::path::PathBuf;
use std::time::Duration;

fn required(matches: &clap::ArgMatches, id: &str) -> Result<String> {
    matches
        .get_one::<String>(id)
        .cloned()
        .with_context(|| format!("missing required argument: --{id}"))
}

fn secret(matches: &clap::ArgMatches, id: &str) -> Result<SecretString> {
    required(matches, id).map(SecretString::from)
}

fn strings(matches: &clap::ArgMatches, id: &str) -> Vec<String> {
    matches
        .get_many::<String>(id)
        .map(|values| values.map(|value| value.trim().to_string()).collect())
        .unwrap_or_default()
}

fn authenticate_args(globals: GlobalArgs, sub_m: &clap::ArgMatches) -> Result<authenticate::Args> {
    let backends = strings(sub_m, "backend")
        .iter()
        .map(|name| name.parse::<BackendKind>())
        .collect::<Result<Vec<_>, _>>()
        .context("invalid --backend")?;

    let credentials = match sub_m.get_one::<String>("remote-user") {
        Some(remote_user) => Credentials::remote_user(remote_user),
        None => Credentials::password(&required(sub_m, "username")?, secret(sub_m, "password")?),
    };

    Ok(authenticate::Args {
        globals,
        fixture: PathBuf::from(required(sub_m, "fixture")?),
        secret: secret(sub_m, "secret")?,
        backends,
        credentials,
        store_timeout: Duration::from_millis(
            sub_m.get_one::<u64>("store-timeout").copied().unwrap_or(2000),
        ),
    })
}

fn permissions_args(sub_m: &clap::ArgMatches) -> Result<permissions::Args> {
    let scope: Scope = required(sub_m, "scope")?
        .parse()
        .context("invalid --scope")?;

    let query = if let Some(permission) = sub_m.get_one::<String>("holders-of") {
        permissions::Query::Holders {
            permission: permission.clone(),
            include_superusers: sub_m.get_flag("include-superusers"),
        }
    } else {
        let username = required(sub_m, "username")?;
        let checks = strings(sub_m, "check");
        match sub_m.get_one::<String>("namespace") {
            Some(namespace) => permissions::Query::Namespace {
                username,
                namespace: namespace.clone(),
            },
            None if checks.is_empty() => permissions::Query::Effective { username },
            None => permissions::Query::Check {
                username,
                permissions: checks,
            },
        }
    };

    Ok(permissions::Args {
        fixture: PathBuf::from(required(sub_m, "fixture")?),
        scope,
        query,
    })
}

fn fingerprint_args(sub_m: &clap::ArgMatches) -> Result<fingerprint::Args> {
    Ok(fingerprint::Args {
        secret: secret(sub_m, "secret")?,
        fallback_secrets: strings(sub_m, "fallback-secret")
            .into_iter()
            .filter(|value| !value.is_empty())
            .map(SecretString::from)
            .collect(),
        key_salt: required(sub_m, "key-salt")?,
        digest: required(sub_m, "digest")?
            .parse::<FingerprintAlgorithm>()
            .context("invalid --digest")?,
        hash: required(sub_m, "hash")?,
        check: sub_m.get_one::<String>("check").cloned(),
    })
}

/// Turn parsed arguments into an [`Action`].
///
/// # Errors
/// Returns an error if required arguments are missing or do not parse.
pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    let globals = GlobalArgs::from_matches(matches);

    match matches.subcommand() {
        Some(("hash", sub_m)) => Ok(Action::Hash(password::HashArgs {
            globals,
            password: secret(sub_m, "password")?,
            salt: sub_m.get_one::<String>("salt").cloned(),
        })),
        Some(("verify", sub_m)) => Ok(Action::Verify(password::VerifyArgs {
            globals,
            password: secret(sub_m, "password")?,
            hash: required(sub_m, "hash")?,
        })),
        Some(("inspect", sub_m)) => Ok(Action::Inspect(password::InspectArgs {
            globals,
            hash: required(sub_m, "hash")?,
        })),
        Some(("authenticate", sub_m)) => {
            Ok(Action::Authenticate(authenticate_args(globals, sub_m)?))
        }
        Some(("permissions", sub_m)) => Ok(Action::Permissions(permissions_args(sub_m)?)),
        Some(("fingerprint", sub_m)) => Ok(Action::Fingerprint(fingerprint_args(sub_m)?)),
        _ => Err(anyhow!("no subcommand given")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::commands;

    fn dispatch(args: &[&str]) -> Result<Action> {
        handler(&commands::new().get_matches_from(args))
    }

    #[test]
    fn test_authenticate_password() {
        temp_env::with_vars(
            [
                ("WARDEN_SECRET", Some("s3cr3t")),
                ("WARDEN_BACKENDS", None),
                ("WARDEN_FIXTURE", None),
                ("WARDEN_PASSWORD", None),
            ],
            || {
                let action = dispatch(&[
                    "warden",
                    "authenticate",
                    "-f",
                    "fixture.json",
                    "-u",
                    "alice",
                    "--password",
                    "pw",
                    "-b",
                    "remote_user,allow_all_users_model",
                    "--store-timeout",
                    "150",
                ])
                .unwrap();
                let Action::Authenticate(args) = action else {
                    panic!("expected authenticate action");
                };
                assert_eq!(
                    args.backends,
                    [BackendKind::RemoteUser, BackendKind::AllowAllUsersModel]
                );
                assert_eq!(args.store_timeout, Duration::from_millis(150));
                assert!(matches!(
                    args.credentials,
                    Credentials::Password { ref username, .. } if username == "alice"
                ));
            },
        );
    }

    #[test]
    fn test_unknown_backend() {
        temp_env::with_vars(
            [("WARDEN_SECRET", Some("s3cr3t")), ("WARDEN_BACKENDS", None)],
            || {
                let result = dispatch(&[
                    "warden",
                    "authenticate",
                    "-f",
                    "fixture.json",
                    "--remote-user",
                    "carol",
                    "-b",
                    "ldap",
                ]);
                assert!(result.is_err());
            },
        );
    }

    #[test]
    fn test_permissions_query_selection() {
        temp_env::with_vars([("WARDEN_FIXTURE", Some("fixture.json"))], || {
            let Action::Permissions(args) = dispatch(&["warden", "permissions", "-u", "alice"]).unwrap()
            else {
                panic!("expected permissions action");
            };
            assert_eq!(args.scope, Scope::Global);
            assert_eq!(
                args.query,
                permissions::Query::Effective {
                    username: "alice".to_string()
                }
            );

            let Action::Permissions(args) =
                dispatch(&["warden", "permissions", "-u", "alice", "-n", "docs"]).unwrap()
            else {
                panic!("expected permissions action");
            };
            assert!(matches!(args.query, permissions::Query::Namespace { .. }));

            assert!(dispatch(&["warden", "permissions", "-u", "alice", "-s", "document"]).is_err());
        });
    }

    #[test]
    fn test_fingerprint_fallbacks() {
        temp_env::with_vars(
            [
                ("WARDEN_SECRET", Some("new")),
                ("WARDEN_FALLBACK_SECRETS", Some("old,older")),
                ("WARDEN_FINGERPRINT_DIGEST", Some("sha512")),
            ],
            || {
                let Action::Fingerprint(args) =
                    dispatch(&["warden", "fingerprint", "--hash", "h"]).unwrap()
                else {
                    panic!("expected fingerprint action");
                };
                assert_eq!(args.fallback_secrets.len(), 2);
                assert_eq!(args.digest, FingerprintAlgorithm::Sha512);
                assert!(args.check.is_none());
            },
        );
    }
}
