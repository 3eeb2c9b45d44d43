//! Command-line argument dispatch.
//!
//! Turns validated CLI matches into a server action, applying the run-mode
//! rules: outside `test` mode a token secret, a provider URL and a provider
//! public key are mandatory.

use crate::api::handlers::auth::RunMode;
use crate::cli::actions::{server::Args, Action};
use crate::cli::commands::{self, auth, identity};
use crate::cli::globals::GlobalArgs;
use anyhow::{anyhow, Context, Result};
use secrecy::SecretString;

/// Map validated CLI matches to a server action.
///
/// # Errors
/// Returns an error if required arguments are missing or inconsistent.
pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    let port = matches
        .get_one::<u16>(commands::ARG_PORT)
        .copied()
        .unwrap_or(8080);
    let run_mode: RunMode = matches
        .get_one::<String>(commands::ARG_MODE)
        .map_or("production", String::as_str)
        .parse()
        .map_err(|err| anyhow!("invalid --mode: {err}"))?;

    let identity_opts = identity::Options::parse(matches)?;
    let auth_opts = auth::Options::parse(matches)?;

    let testing = run_mode == RunMode::Test;
    if !testing && auth_opts.token_secret.is_none() {
        return Err(anyhow!(
            "missing required argument: --token-secret (required outside test mode)"
        ));
    }
    let provider_url = match identity_opts.url {
        Some(url) => url,
        None if testing => identity::TEST_PROVIDER_URL.to_string(),
        None => {
            return Err(anyhow!(
                "missing required argument: --provider-url (required outside test mode)"
            ))
        }
    };
    let public_key = match identity_opts.public_key {
        Some(key) => key,
        None if testing => SecretString::default(),
        None => {
            return Err(anyhow!(
                "missing required argument: --provider-public-key (required outside test mode)"
            ))
        }
    };

    url::Url::parse(&provider_url)
        .with_context(|| format!("invalid --provider-url: {provider_url}"))?;

    let mut globals = GlobalArgs::new(provider_url);
    globals.set_public_key(public_key);
    globals.set_service_key(identity_opts.service_key);
    globals.set_token_secret(auth_opts.token_secret);

    Ok(Action::Server(Args {
        port,
        run_mode,
        globals,
        provider_timeout_seconds: identity_opts.timeout_seconds,
        frontend_base_url: auth_opts.frontend_base_url,
        public_base_url: auth_opts.public_base_url,
        oauth_providers: auth_opts.oauth_providers,
        oauth_flow_ttl_seconds: auth_opts.oauth_flow_ttl_seconds,
        session_backend: auth_opts.session_backend,
        audit_backend: auth_opts.audit_backend,
        enforce_health_gate: auth_opts.enforce_health_gate,
        sweep_interval_seconds: auth_opts.sweep_interval_seconds,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::commands::auth::SessionBackend;
    use secrecy::ExposeSecret;

    const CLEARED: [(&str, Option<&str>); 6] = [
        ("COMPLYAUTH_MODE", None),
        ("COMPLYAUTH_TOKEN_SECRET", None),
        ("COMPLYAUTH_PROVIDER_URL", None),
        ("COMPLYAUTH_PROVIDER_PUBLIC_KEY", None),
        ("COMPLYAUTH_PROVIDER_SERVICE_KEY", None),
        ("COMPLYAUTH_SESSION_STORE", None),
    ];

    fn dispatch(args: &[&str]) -> Result<Action> {
        let matches = commands::new().get_matches_from(args);
        handler(&matches)
    }

    #[test]
    fn token_secret_required_outside_test_mode() {
        temp_env::with_vars(CLEARED, || {
            let result = dispatch(&[
                "complyauth",
                "--provider-url",
                "https://project.supabase.co",
                "--provider-public-key",
                "anon",
            ]);
            assert!(result.is_err());
            if let Err(err) = result {
                assert!(err
                    .to_string()
                    .contains("missing required argument: --token-secret"));
            }
        });
    }

    #[test]
    fn provider_url_required_outside_test_mode() {
        temp_env::with_vars(CLEARED, || {
            let result = dispatch(&["complyauth", "--mode", "development", "--token-secret", "s"]);
            assert!(result.is_err());
            if let Err(err) = result {
                assert!(err.to_string().contains("--provider-url"));
            }
        });
    }

    #[test]
    fn test_mode_fills_local_defaults() {
        temp_env::with_vars(CLEARED, || {
            let result = dispatch(&["complyauth", "--mode", "test"]);
            assert!(result.is_ok());
            if let Ok(Action::Server(args)) = result {
                assert_eq!(args.run_mode, RunMode::Test);
                assert_eq!(args.globals.provider_url, identity::TEST_PROVIDER_URL);
                assert!(args.globals.token_secret.is_none());
                assert_eq!(args.session_backend, SessionBackend::Memory);
                assert_eq!(
                    args.oauth_providers,
                    vec!["google".to_string(), "github".to_string()]
                );
            }
        });
    }

    #[test]
    fn env_configuration_is_dispatched() {
        temp_env::with_vars(
            [
                ("COMPLYAUTH_MODE", Some("prod")),
                ("COMPLYAUTH_TOKEN_SECRET", Some("token-secret-value")),
                ("COMPLYAUTH_PROVIDER_URL", Some("https://project.supabase.co")),
                ("COMPLYAUTH_PROVIDER_PUBLIC_KEY", Some("anon")),
                ("COMPLYAUTH_PROVIDER_SERVICE_KEY", Some("service")),
                ("COMPLYAUTH_SESSION_STORE", Some("provider")),
            ],
            || {
                let result = dispatch(&["complyauth"]);
                assert!(result.is_ok());
                if let Ok(Action::Server(args)) = result {
                    assert_eq!(args.run_mode, RunMode::Production);
                    assert_eq!(
                        args.globals
                            .token_secret
                            .as_ref()
                            .map(|secret| secret.expose_secret().to_string()),
                        Some("token-secret-value".to_string())
                    );
                    assert!(args.globals.provider_service_key.is_some());
                    assert_eq!(args.session_backend, SessionBackend::Provider);
                }
            },
        );
    }

    #[test]
    fn invalid_mode_is_rejected() {
        temp_env::with_vars(CLEARED, || {
            assert!(dispatch(&["complyauth", "--mode", "staging"]).is_err());
        });
    }
}
