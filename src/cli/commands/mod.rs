use clap::{
    builder::{
        styling::{AnsiColor, Effects, Styles},
        ValueParser,
    },
    Arg, ArgAction, ColorChoice, Command,
};

pub fn validator_log_level() -> ValueParser {
    ValueParser::from(move |level: &str| -> std::result::Result<u8, String> {
        if let Ok(parsed) = level.parse::<u8>() {
            if parsed <= 5 {
                return Ok(parsed);
            }
        }

        match level.to_lowercase().as_str() {
            "error" => Ok(0),
            "warn" => Ok(1),
            "info" => Ok(2),
            "debug" => Ok(3),
            "trace" => Ok(4),
            _ => Err("invalid log level".to_string()),
        }
    })
}

fn password_arg() -> Arg {
    Arg::new("password")
        .long("password")
        .help("Plaintext password")
        .env("WARDEN_PASSWORD")
        .hide_env_values(true)
}

fn fixture_arg() -> Arg {
    Arg::new("fixture")
        .short('f')
        .long("fixture")
        .help("JSON fixture describing principals, groups and grants")
        .env("WARDEN_FIXTURE")
        .required(true)
}

fn secret_arg() -> Arg {
    Arg::new("secret")
        .long("secret")
        .help("Secret keying session fingerprints")
        .env("WARDEN_SECRET")
        .hide_env_values(true)
        .required(true)
}

fn hash_command() -> Command {
    Command::new("hash")
        .about("Hash a password with the preferred algorithm")
        .arg(password_arg().required(true))
        .arg(
            Arg::new("salt")
                .long("salt")
                .help("Use this salt instead of a random one"),
        )
}

fn verify_command() -> Command {
    Command::new("verify")
        .about("Check a password against an encoded hash")
        .arg(password_arg().required(true))
        .arg(
            Arg::new("hash")
                .long("hash")
                .help("Encoded hash, e.g. pbkdf2_sha256$<iterations>$<salt>$<digest>")
                .required(true),
        )
}

fn inspect_command() -> Command {
    Command::new("inspect")
        .about("Show a masked summary of an encoded hash")
        .arg(
            Arg::new("hash")
                .long("hash")
                .help("Encoded hash")
                .required(true),
        )
}

fn authenticate_command() -> Command {
    Command::new("authenticate")
        .about("Run the backend chain against a fixture store")
        .arg(fixture_arg())
        .arg(secret_arg())
        .arg(
            Arg::new("backend")
                .short('b')
                .long("backend")
                .help("Backend to try, in order: model, allow_all_users_model, remote_user, allow_all_users_remote_user")
                .env("WARDEN_BACKENDS")
                .value_delimiter(',')
                .action(ArgAction::Append)
                .default_value("model"),
        )
        .arg(
            Arg::new("username")
                .short('u')
                .long("username")
                .help("Username for password authentication")
                .required_unless_present("remote-user")
                .requires("password"),
        )
        .arg(password_arg())
        .arg(
            Arg::new("remote-user")
                .long("remote-user")
                .help("Username asserted by a trusted upstream")
                .conflicts_with("username"),
        )
        .arg(
            Arg::new("store-timeout")
                .long("store-timeout")
                .help("Store round-trip timeout in milliseconds")
                .env("WARDEN_STORE_TIMEOUT")
                .default_value("2000")
                .value_parser(clap::value_parser!(u64)),
        )
}

fn permissions_command() -> Command {
    Command::new("permissions")
        .about("Resolve or check permissions against a fixture store")
        .arg(fixture_arg())
        .arg(
            Arg::new("username")
                .short('u')
                .long("username")
                .help("Principal to resolve")
                .required_unless_present("holders-of"),
        )
        .arg(
            Arg::new("scope")
                .short('s')
                .long("scope")
                .help("Scope: global or <kind>:<id>")
                .default_value("global"),
        )
        .arg(
            Arg::new("check")
                .short('c')
                .long("check")
                .help("Permission that must be held (repeatable)")
                .action(ArgAction::Append),
        )
        .arg(
            Arg::new("namespace")
                .short('n')
                .long("namespace")
                .help("Report whether any permission in this namespace is held")
                .conflicts_with("check"),
        )
        .arg(
            Arg::new("holders-of")
                .long("holders-of")
                .help("List principals holding this permission globally")
                .conflicts_with_all(["username", "check", "namespace"]),
        )
        .arg(
            Arg::new("include-superusers")
                .long("include-superusers")
                .help("With --holders-of, include superusers")
                .action(ArgAction::SetTrue)
                .requires("holders-of"),
        )
}

fn fingerprint_command() -> Command {
    Command::new("fingerprint")
        .about("Compute or check a session fingerprint for a credential hash")
        .arg(secret_arg())
        .arg(
            Arg::new("hash")
                .long("hash")
                .help("Encoded credential hash")
                .required(true),
        )
        .arg(
            Arg::new("fallback-secret")
                .long("fallback-secret")
                .help("Previous secret still accepted (repeatable)")
                .env("WARDEN_FALLBACK_SECRETS")
                .hide_env_values(true)
                .value_delimiter(',')
                .action(ArgAction::Append),
        )
        .arg(
            Arg::new("key-salt")
                .long("key-salt")
                .help("Key derivation salt")
                .env("WARDEN_KEY_SALT")
                .default_value(crate::config::DEFAULT_KEY_SALT),
        )
        .arg(
            Arg::new("digest")
                .long("digest")
                .help("HMAC digest")
                .env("WARDEN_FINGERPRINT_DIGEST")
                .value_parser(["sha256", "sha512"])
                .default_value("sha256"),
        )
        .arg(
            Arg::new("check")
                .long("check")
                .help("Stored fingerprint to validate instead of issuing one"),
        )
}

#[must_use]
pub fn new() -> Command {
    let styles = Styles::styled()
        .header(AnsiColor::Yellow.on_default() | Effects::BOLD)
        .usage(AnsiColor::Green.on_default() | Effects::BOLD)
        .literal(AnsiColor::Blue.on_default() | Effects::BOLD)
        .placeholder(AnsiColor::Green.on_default());

    let long_version: &'static str = Box::leak(
        format!("{} - {}", env!("CARGO_PKG_VERSION"), crate::GIT_COMMIT_HASH).into_boxed_str(),
    );

    Command::new("warden")
        .about(env!("CARGO_PKG_DESCRIPTION"))
        .version(env!("CARGO_PKG_VERSION"))
        .long_version(long_version)
        .color(ColorChoice::Auto)
        .styles(styles)
        .subcommand_required(true)
        .arg_required_else_help(true)
        .arg(
            Arg::new("hashers")
                .long("hashers")
                .help("Hasher order, preferred first")
                .env("WARDEN_HASHERS")
                .value_delimiter(',')
                .action(ArgAction::Append)
                .global(true),
        )
        .arg(
            Arg::new("pbkdf2-iterations")
                .long("pbkdf2-iterations")
                .help("PBKDF2 iteration count")
                .env("WARDEN_PBKDF2_ITERATIONS")
                .global(true)
                .value_parser(clap::value_parser!(u32).range(1..)),
        )
        .arg(
            Arg::new("verbosity")
                .short('v')
                .long("verbose")
                .help("Verbosity level: ERROR, WARN, INFO, DEBUG, TRACE (default: ERROR)")
                .env("WARDEN_LOG_LEVEL")
                .global(true)
                .action(ArgAction::Count)
                .value_parser(validator_log_level()),
        )
        .subcommand(hash_command())
        .subcommand(verify_command())
        .subcommand(inspect_command())
        .subcommand(authenticate_command())
        .subcommand(permissions_command())
        .subcommand(fingerprint_command())
}
