use anyhow::{Context, Result};
use clap::{builder::PossibleValuesParser, Arg, ArgAction, ArgMatches, Command};
use secrecy::SecretString;

pub const ARG_TOKEN_SECRET: &str = "token-secret";
pub const ARG_FRONTEND_BASE_URL: &str = "frontend-base-url";
pub const ARG_PUBLIC_BASE_URL: &str = "public-base-url";
pub const ARG_OAUTH_PROVIDERS: &str = "oauth-providers";
pub const ARG_OAUTH_FLOW_TTL_SECONDS: &str = "oauth-flow-ttl-seconds";
pub const ARG_SESSION_STORE: &str = "session-store";
pub const ARG_AUDIT_SINK: &str = "audit-sink";
pub const ARG_ENFORCE_HEALTH_GATE: &str = "enforce-health-gate";
pub const ARG_SWEEP_INTERVAL_SECONDS: &str = "sweep-interval-seconds";

pub fn with_args(command: Command) -> Command {
    let command = with_token_args(command);
    let command = with_oauth_args(command);
    with_storage_args(command)
}

fn with_token_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_TOKEN_SECRET)
                .long(ARG_TOKEN_SECRET)
                .help("HS256 secret for access and refresh tokens (required outside test mode)")
                .env("COMPLYAUTH_TOKEN_SECRET")
                .hide_env_values(true),
        )
        .arg(
            Arg::new(ARG_FRONTEND_BASE_URL)
                .long(ARG_FRONTEND_BASE_URL)
                .help("Dashboard base URL; OAuth redirects and CORS use it")
                .env("COMPLYAUTH_FRONTEND_BASE_URL")
                .default_value("http://localhost:5173"),
        )
        .arg(
            Arg::new(ARG_PUBLIC_BASE_URL)
                .long(ARG_PUBLIC_BASE_URL)
                .help("Public base URL of this service, used to build OAuth callback URLs")
                .env("COMPLYAUTH_PUBLIC_BASE_URL")
                .default_value("http://localhost:8080"),
        )
}

fn with_oauth_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_OAUTH_PROVIDERS)
                .long(ARG_OAUTH_PROVIDERS)
                .help("Comma separated OAuth providers allowed to start a login")
                .env("COMPLYAUTH_OAUTH_PROVIDERS")
                .value_delimiter(',')
                .default_value("google,github"),
        )
        .arg(
            Arg::new(ARG_OAUTH_FLOW_TTL_SECONDS)
                .long(ARG_OAUTH_FLOW_TTL_SECONDS)
                .help("How long a started OAuth login may take to come back")
                .env("COMPLYAUTH_OAUTH_FLOW_TTL_SECONDS")
                .default_value("600")
                .value_parser(clap::value_parser!(u64)),
        )
}

fn with_storage_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_SESSION_STORE)
                .long(ARG_SESSION_STORE)
                .help("Refresh session backend")
                .env("COMPLYAUTH_SESSION_STORE")
                .default_value("memory")
                .value_parser(PossibleValuesParser::new(["memory", "provider", "none"])),
        )
        .arg(
            Arg::new(ARG_AUDIT_SINK)
                .long(ARG_AUDIT_SINK)
                .help("Where audit events go")
                .env("COMPLYAUTH_AUDIT_SINK")
                .default_value("log")
                .value_parser(PossibleValuesParser::new(["log", "provider"])),
        )
        .arg(
            Arg::new(ARG_ENFORCE_HEALTH_GATE)
                .long(ARG_ENFORCE_HEALTH_GATE)
                .help("Answer 503 on authenticated routes while the identity provider is unhealthy")
                .env("COMPLYAUTH_ENFORCE_HEALTH_GATE")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new(ARG_SWEEP_INTERVAL_SECONDS)
                .long(ARG_SWEEP_INTERVAL_SECONDS)
                .help("Interval between purges of expired rate windows, sessions and OAuth flows")
                .env("COMPLYAUTH_SWEEP_INTERVAL_SECONDS")
                .default_value("300")
                .value_parser(clap::value_parser!(u64).range(1..)),
        )
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionBackend {
    Memory,
    Provider,
    Disabled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditBackend {
    Log,
    Provider,
}

#[derive(Debug)]
pub struct Options {
    pub token_secret: Option<SecretString>,
    pub frontend_base_url: String,
    pub public_base_url: String,
    pub oauth_providers: Vec<String>,
    pub oauth_flow_ttl_seconds: u64,
    pub session_backend: SessionBackend,
    pub audit_backend: AuditBackend,
    pub enforce_health_gate: bool,
    pub sweep_interval_seconds: u64,
}

impl Options {
    /// # Errors
    /// Returns an error if a defaulted argument is missing.
    pub fn parse(matches: &ArgMatches) -> Result<Self> {
        let session_backend = match matches
            .get_one::<String>(ARG_SESSION_STORE)
            .map(String::as_str)
        {
            Some("provider") => SessionBackend::Provider,
            Some("none") => SessionBackend::Disabled,
            _ => SessionBackend::Memory,
        };
        let audit_backend = match matches.get_one::<String>(ARG_AUDIT_SINK).map(String::as_str) {
            Some("provider") => AuditBackend::Provider,
            _ => AuditBackend::Log,
        };

        Ok(Self {
            token_secret: matches
                .get_one::<String>(ARG_TOKEN_SECRET)
                .filter(|secret| !secret.trim().is_empty())
                .map(|secret| SecretString::from(secret.clone())),
            frontend_base_url: matches
                .get_one::<String>(ARG_FRONTEND_BASE_URL)
                .cloned()
                .context("missing required argument: --frontend-base-url")?,
            public_base_url: matches
                .get_one::<String>(ARG_PUBLIC_BASE_URL)
                .cloned()
                .context("missing required argument: --public-base-url")?,
            oauth_providers: matches
                .get_many::<String>(ARG_OAUTH_PROVIDERS)
                .map(|values| values.cloned().collect())
                .unwrap_or_default(),
            oauth_flow_ttl_seconds: matches
                .get_one::<u64>(ARG_OAUTH_FLOW_TTL_SECONDS)
                .copied()
                .context("missing required argument: --oauth-flow-ttl-seconds")?,
            session_backend,
            audit_backend,
            enforce_health_gate: matches.get_flag(ARG_ENFORCE_HEALTH_GATE),
            sweep_interval_seconds: matches
                .get_one::<u64>(ARG_SWEEP_INTERVAL_SECONDS)
                .copied()
                .context("missing required argument: --sweep-interval-seconds")?,
        })
    }
}
