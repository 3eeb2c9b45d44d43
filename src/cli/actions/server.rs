use crate::{
    api::{
        self,
        handlers::auth::{
            AuditSink, AuthConfig, AuthState, GoTrueProvider, LogAuditSink, ProviderAuditSink,
            ProviderSessionStore, RefreshSessionStore, RestClient, RunMode, SessionStore,
            TokenIssuer,
        },
    },
    cli::{
        commands::auth::{AuditBackend, SessionBackend},
        globals::GlobalArgs,
    },
};
use anyhow::{anyhow, Context, Result};
use std::{sync::Arc, time::Duration};
use tracing::{debug, info, warn};

#[derive(Debug)]
pub struct Args {
    pub port: u16,
    pub run_mode: RunMode,
    pub globals: GlobalArgs,
    pub provider_timeout_seconds: u64,
    pub frontend_base_url: String,
    pub public_base_url: String,
    pub oauth_providers: Vec<String>,
    pub oauth_flow_ttl_seconds: u64,
    pub session_backend: SessionBackend,
    pub audit_backend: AuditBackend,
    pub enforce_health_gate: bool,
    pub sweep_interval_seconds: u64,
}

/// Execute the server action.
/// # Errors
/// Returns an error if the service context cannot be built or the server fails to start.
pub async fn execute(args: Args) -> Result<()> {
    debug!("Server args: {:?}", args);
    let port = args.port;
    let auth_state = build_state(args)?;
    api::new(port, Arc::new(auth_state)).await
}

/// Build the service context from validated arguments.
///
/// # Errors
/// Returns an error if the token secret is unusable, a client cannot be built,
/// or a provider-backed component is requested without the service key.
pub fn build_state(args: Args) -> Result<AuthState> {
    let timeout = Duration::from_secs(args.provider_timeout_seconds);
    let globals = args.globals;

    let issuer = match (&globals.token_secret, args.run_mode) {
        (Some(secret), _) => TokenIssuer::new(secret)?,
        (None, RunMode::Test) => {
            warn!("No token secret configured; using an ephemeral secret (test mode)");
            TokenIssuer::ephemeral()
        }
        (None, _) => return Err(anyhow!("missing required argument: --token-secret")),
    };

    let provider = GoTrueProvider::new(
        &globals.provider_url,
        globals.provider_public_key.clone(),
        globals.provider_service_key.clone(),
        timeout,
    )?;

    let rest = match &globals.provider_service_key {
        Some(key) => Some(RestClient::new(&globals.provider_url, key.clone(), timeout)?),
        None => None,
    };

    let sessions = match args.session_backend {
        SessionBackend::Memory => RefreshSessionStore::memory(),
        SessionBackend::Disabled => {
            warn!("Refresh session store disabled; every refresh token will be rejected");
            RefreshSessionStore::disabled()
        }
        SessionBackend::Provider => {
            let rest = rest
                .clone()
                .context("--session-store provider requires --provider-service-key")?;
            let backend: Arc<dyn SessionStore> = Arc::new(ProviderSessionStore::new(rest));
            RefreshSessionStore::new(Some(backend))
        }
    };

    let audit: Arc<dyn AuditSink> = match args.audit_backend {
        AuditBackend::Log => Arc::new(LogAuditSink),
        AuditBackend::Provider => {
            let rest = rest.context("--audit-sink provider requires --provider-service-key")?;
            Arc::new(ProviderAuditSink::new(rest))
        }
    };

    if globals.provider_service_key.is_none() {
        info!("No provider service key; duplicate-email pre-checks and admin lookups are skipped");
    }

    let config = AuthConfig::new(args.frontend_base_url, args.public_base_url)
        .with_run_mode(args.run_mode)
        .with_oauth_providers(args.oauth_providers)
        .with_oauth_flow_ttl_seconds(args.oauth_flow_ttl_seconds)
        .with_enforce_health_gate(args.enforce_health_gate)
        .with_sweep_interval_seconds(args.sweep_interval_seconds);

    Ok(AuthState::new(config, issuer, Arc::new(provider))
        .with_sessions(sessions)
        .with_audit(audit))
}
