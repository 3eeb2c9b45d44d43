pub mod auth;
pub mod identity;
pub mod logging;

use clap::{
    builder::styling::{AnsiColor, Effects, Styles},
    Arg, ColorChoice, Command,
};

pub const ARG_PORT: &str = "port";
pub const ARG_MODE: &str = "mode";

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

    let command = Command::new("complyauth")
        .about("Credential and session service")
        .version(env!("CARGO_PKG_VERSION"))
        .long_version(long_version)
        .color(ColorChoice::Auto)
        .styles(styles)
        .arg(
            Arg::new(ARG_PORT)
                .short('p')
                .long(ARG_PORT)
                .help("Port to listen on")
                .default_value("8080")
                .env("COMPLYAUTH_PORT")
                .value_parser(clap::value_parser!(u16)),
        )
        .arg(
            Arg::new(ARG_MODE)
                .short('m')
                .long(ARG_MODE)
                .help("Run mode: production, development or test")
                .long_help(
                    "Run mode. `development` drops the Secure cookie attribute and echoes internal error details. `test` allows an ephemeral token secret and a local identity provider.",
                )
                .default_value("production")
                .env("COMPLYAUTH_MODE"),
        );

    let command = identity::with_args(command);
    let command = auth::with_args(command);
    logging::with_args(command)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new() {
        let command = new();

        assert_eq!(command.get_name(), "complyauth");
        assert_eq!(
            command.get_about().map(ToString::to_string),
            Some("Credential and session service".to_string())
        );
        assert_eq!(
            command.get_version().map(ToString::to_string),
            Some(env!("CARGO_PKG_VERSION").to_string())
        );
    }

    #[test]
    fn test_check_args() {
        temp_env::with_vars(
            [
                ("COMPLYAUTH_PORT", None::<&str>),
                ("COMPLYAUTH_PROVIDER_TIMEOUT_SECONDS", None),
                ("COMPLYAUTH_OAUTH_PROVIDERS", None),
            ],
            || {
                let command = new();
                let matches = command.get_matches_from(vec![
                    "complyauth",
                    "--port",
                    "9090",
                    "--provider-url",
                    "https://project.supabase.co",
                    "--provider-public-key",
                    "anon",
                    "--token-secret",
                    "s3cret",
                    "--oauth-providers",
                    "google,azure",
                ]);

                assert_eq!(matches.get_one::<u16>(ARG_PORT).copied(), Some(9090));
                assert_eq!(
                    matches
                        .get_one::<String>(identity::ARG_PROVIDER_URL)
                        .map(ToString::to_string),
                    Some("https://project.supabase.co".to_string())
                );
                assert_eq!(
                    matches
                        .get_one::<u64>(identity::ARG_PROVIDER_TIMEOUT_SECONDS)
                        .copied(),
                    Some(10)
                );
                let providers: Vec<String> = matches
                    .get_many::<String>(auth::ARG_OAUTH_PROVIDERS)
                    .map(|values| values.cloned().collect())
                    .unwrap_or_default();
                assert_eq!(providers, vec!["google".to_string(), "azure".to_string()]);
            },
        );
    }

    #[test]
    fn test_check_env() {
        temp_env::with_vars(
            [
                ("COMPLYAUTH_PORT", Some("443")),
                ("COMPLYAUTH_MODE", Some("development")),
                ("COMPLYAUTH_PROVIDER_URL", Some("https://project.supabase.co")),
                ("COMPLYAUTH_SESSION_STORE", Some("provider")),
                ("COMPLYAUTH_ENFORCE_HEALTH_GATE", Some("true")),
                ("COMPLYAUTH_LOG_LEVEL", Some("info")),
            ],
            || {
                let command = new();
                let matches = command.get_matches_from(vec!["complyauth"]);
                assert_eq!(matches.get_one::<u16>(ARG_PORT).copied(), Some(443));
                assert_eq!(
                    matches.get_one::<String>(ARG_MODE).map(ToString::to_string),
                    Some("development".to_string())
                );
                assert_eq!(
                    matches
                        .get_one::<String>(auth::ARG_SESSION_STORE)
                        .map(ToString::to_string),
                    Some("provider".to_string())
                );
                assert!(matches.get_flag(auth::ARG_ENFORCE_HEALTH_GATE));
                assert_eq!(
                    matches.get_one::<u8>(logging::ARG_VERBOSITY).copied(),
                    Some(2)
                );
            },
        );
    }

    #[test]
    fn test_invalid_session_store_is_rejected() {
        temp_env::with_vars([("COMPLYAUTH_SESSION_STORE", None::<&str>)], || {
            let result =
                new().try_get_matches_from(vec!["complyauth", "--session-store", "redis"]);
            assert!(result.is_err());
        });
    }

    #[test]
    fn test_check_log_level_env() {
        let levels = ["error", "warn", "info", "debug", "trace"];
        for (index, &level) in levels.iter().enumerate() {
            temp_env::with_vars([("COMPLYAUTH_LOG_LEVEL", Some(level))], || {
                let command = new();
                let matches = command.get_matches_from(vec!["complyauth"]);
                assert_eq!(
                    matches.get_one::<u8>(logging::ARG_VERBOSITY).copied(),
                    u8::try_from(index).ok()
                );
            });
        }
    }

    #[test]
    fn test_check_log_level_verbosity() {
        let levels = ["error", "warn", "info", "debug", "trace"];
        for (index, _) in levels.iter().enumerate() {
            temp_env::with_vars([("COMPLYAUTH_LOG_LEVEL", None::<String>)], || {
                let mut args = vec!["complyauth".to_string()];

                // Add the appropriate number of "-v" flags based on the index
                if index > 0 {
                    args.push(format!("-{}", "v".repeat(index)));
                }

                let matches = new().get_matches_from(args);

                assert_eq!(
                    matches.get_one::<u8>(logging::ARG_VERBOSITY).copied(),
                    u8::try_from(index).ok()
                );
            });
        }
    }
}
