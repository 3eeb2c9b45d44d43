//! `-v` / `COMPLYAUTH_LOG_LEVEL` handling.
//!
//! The flag is a counter so `-vvv` works on the command line, while the
//! environment variable takes either a level name or its position in
//! [`LOG_LEVELS`]. Both resolve to the same verbosity count.

use clap::{builder::ValueParser, Arg, ArgAction, Command};

pub const ARG_VERBOSITY: &str = "verbosity";

/// Level names in verbosity order; the index is the `-v` count.
pub const LOG_LEVELS: [&str; 5] = ["error", "warn", "info", "debug", "trace"];

/// Resolve a level name or a verbosity count.
///
/// # Errors
/// Returns a message listing the accepted names when nothing matches.
pub fn parse_verbosity(value: &str) -> Result<u8, String> {
    let value = value.trim();
    if let Ok(count) = value.parse::<u8>() {
        return if usize::from(count) < LOG_LEVELS.len() {
            Ok(count)
        } else {
            Err(format!("verbosity must be below {}", LOG_LEVELS.len()))
        };
    }

    LOG_LEVELS
        .iter()
        .position(|level| level.eq_ignore_ascii_case(value))
        .and_then(|index| u8::try_from(index).ok())
        .ok_or_else(|| format!("unknown log level {value:?}, expected one of {}", LOG_LEVELS.join(", ")))
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command.arg(
        Arg::new(ARG_VERBOSITY)
            .short('v')
            .long("verbose")
            .help("Increase log verbosity (-v warn, -vv info, -vvv debug, -vvvv trace)")
            .env("COMPLYAUTH_LOG_LEVEL")
            .global(true)
            .action(ArgAction::Count)
            .value_parser(ValueParser::new(parse_verbosity)),
    )
}
