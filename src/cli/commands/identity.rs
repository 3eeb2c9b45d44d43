//! Identity provider connection arguments.

use anyhow::{Context, Result};
use clap::{Arg, ArgMatches, Command};
use secrecy::SecretString;

pub const ARG_PROVIDER_URL: &str = "provider-url";
pub const ARG_PROVIDER_PUBLIC_KEY: &str = "provider-public-key";
pub const ARG_PROVIDER_SERVICE_KEY: &str = "provider-service-key";
pub const ARG_PROVIDER_TIMEOUT_SECONDS: &str = "provider-timeout-seconds";

/// Local development stack address, used only in `test` mode.
pub const TEST_PROVIDER_URL: &str = "http://127.0.0.1:54321";

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_PROVIDER_URL)
                .long(ARG_PROVIDER_URL)
                .help("Identity provider base URL, example: https://project.supabase.co")
                .env("COMPLYAUTH_PROVIDER_URL"),
        )
        .arg(
            Arg::new(ARG_PROVIDER_PUBLIC_KEY)
                .long(ARG_PROVIDER_PUBLIC_KEY)
                .help("Identity provider public (anon) key")
                .env("COMPLYAUTH_PROVIDER_PUBLIC_KEY")
                .hide_env_values(true),
        )
        .arg(
            Arg::new(ARG_PROVIDER_SERVICE_KEY)
                .long(ARG_PROVIDER_SERVICE_KEY)
                .help("Privileged service key; enables admin lookups, provider session store and audit table")
                .env("COMPLYAUTH_PROVIDER_SERVICE_KEY")
                .hide_env_values(true),
        )
        .arg(
            Arg::new(ARG_PROVIDER_TIMEOUT_SECONDS)
                .long(ARG_PROVIDER_TIMEOUT_SECONDS)
                .help("Timeout for every identity provider request")
                .env("COMPLYAUTH_PROVIDER_TIMEOUT_SECONDS")
                .default_value("10")
                .value_parser(clap::value_parser!(u64).range(1..)),
        )
}

#[derive(Debug)]
pub struct Options {
    pub url: Option<String>,
    pub public_key: Option<SecretString>,
    pub service_key: Option<SecretString>,
    pub timeout_seconds: u64,
}

impl Options {
    /// # Errors
    /// Returns an error if a defaulted argument is missing.
    pub fn parse(matches: &ArgMatches) -> Result<Self> {
        let non_blank = |id: &str| {
            matches
                .get_one::<String>(id)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        Ok(Self {
            url: non_blank(ARG_PROVIDER_URL),
            public_key: non_blank(ARG_PROVIDER_PUBLIC_KEY).map(SecretString::from),
            service_key: non_blank(ARG_PROVIDER_SERVICE_KEY).map(SecretString::from),
            timeout_seconds: matches
                .get_one::<u64>(ARG_PROVIDER_TIMEOUT_SECONDS)
                .copied()
                .context("missing required argument: --provider-timeout-seconds")?,
        })
    }
}
