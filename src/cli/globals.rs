use clap::ArgMatches;

use crate::config::HasherSettings;

/// Arguments shared by every subcommand.
#[derive(Debug, Clone, Default)]
pub struct GlobalArgs {
    pub hashers: HasherSettings,
}

impl GlobalArgs {
    #[must_use]
    pub fn new(hashers: HasherSettings) -> Self {
        Self { hashers }
    }

    /// Overlay `--hashers` and `--pbkdf2-iterations` on the default settings.
    #[must_use]
    pub fn from_matches(matches: &ArgMatches) -> Self {
        let mut hashers = HasherSettings::default();
        if let Some(order) = matches.get_many::<String>("hashers") {
            hashers = hashers.with_order(order.map(|id| id.trim().to_string()));
        }
        if let Some(iterations) = matches.get_one::<u32>("pbkdf2-iterations") {
            hashers.pbkdf2_iterations = *iterations;
        }
        Self::new(hashers)
    }
}
