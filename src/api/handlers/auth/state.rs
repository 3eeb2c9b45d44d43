//! Auth state, configuration, and pending OAuth flows.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use uuid::Uuid;

use super::audit::{AuditEvent, AuditSink, LogAuditSink};
use super::error::ApiError;
use super::health_gate::{HealthGate, HEALTH_CACHE_TTL};
use super::provider::IdentityProvider;
use super::rate_limit::{RateLimiter, WindowRateLimiter};
use super::refresh_store::RefreshSessionStore;
use super::token::{TokenError, TokenIssuer};

const DEFAULT_OAUTH_FLOW_TTL_SECONDS: u64 = 10 * 60;
const DEFAULT_SWEEP_INTERVAL_SECONDS: u64 = 5 * 60;
const DEFAULT_OAUTH_PROVIDERS: [&str; 2] = ["google", "github"];

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum RunMode {
    #[default]
    Production,
    Development,
    Test,
}

impl RunMode {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Production => "production",
            Self::Development => "development",
            Self::Test => "test",
        }
    }
}

impl fmt::Display for RunMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunMode {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "production" | "prod" => Ok(Self::Production),
            "development" | "dev" => Ok(Self::Development),
            "test" => Ok(Self::Test),
            other => Err(format!("unknown environment: {other}")),
        }
    }
}

#[derive(Clone, Debug)]
pub struct AuthConfig {
    frontend_base_url: String,
    public_base_url: String,
    run_mode: RunMode,
    oauth_providers: Vec<String>,
    oauth_flow_ttl_seconds: u64,
    enforce_health_gate: bool,
    sweep_interval_seconds: u64,
}

impl AuthConfig {
    #[must_use]
    pub fn new(frontend_base_url: String, public_base_url: String) -> Self {
        Self {
            frontend_base_url: frontend_base_url.trim_end_matches('/').to_string(),
            public_base_url: public_base_url.trim_end_matches('/').to_string(),
            run_mode: RunMode::default(),
            oauth_providers: DEFAULT_OAUTH_PROVIDERS.iter().map(ToString::to_string).collect(),
            oauth_flow_ttl_seconds: DEFAULT_OAUTH_FLOW_TTL_SECONDS,
            enforce_health_gate: false,
            sweep_interval_seconds: DEFAULT_SWEEP_INTERVAL_SECONDS,
        }
    }

    #[must_use]
    pub fn with_run_mode(mut self, run_mode: RunMode) -> Self {
        self.run_mode = run_mode;
        self
    }

    /// Providers are matched case-insensitively; blanks are dropped.
    #[must_use]
    pub fn with_oauth_providers<I, S>(mut self, providers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.oauth_providers = providers
            .into_iter()
            .map(|provider| provider.as_ref().trim().to_lowercase())
            .filter(|provider| !provider.is_empty())
            .collect();
        self
    }

    #[must_use]
    pub fn with_oauth_flow_ttl_seconds(mut self, seconds: u64) -> Self {
        self.oauth_flow_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_enforce_health_gate(mut self, enforce: bool) -> Self {
        self.enforce_health_gate = enforce;
        self
    }

    #[must_use]
    pub fn with_sweep_interval_seconds(mut self, seconds: u64) -> Self {
        self.sweep_interval_seconds = seconds;
        self
    }

    pub(crate) fn frontend_base_url(&self) -> &str {
        &self.frontend_base_url
    }

    pub(crate) fn public_base_url(&self) -> &str {
        &self.public_base_url
    }

    #[must_use]
    pub fn run_mode(&self) -> RunMode {
        self.run_mode
    }

    pub(crate) fn oauth_provider_allowed(&self, provider: &str) -> bool {
        self.oauth_providers
            .iter()
            .any(|allowed| allowed.eq_ignore_ascii_case(provider))
    }

    pub(crate) fn oauth_flow_ttl(&self) -> Duration {
        Duration::from_secs(self.oauth_flow_ttl_seconds)
    }

    #[must_use]
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_seconds.max(1))
    }

    pub(crate) fn refresh_cookie_secure(&self) -> bool {
        self.run_mode != RunMode::Development
    }

    pub(crate) fn expose_internal_errors(&self) -> bool {
        self.run_mode == RunMode::Development
    }
}

pub(crate) struct PendingFlow {
    pub(crate) provider: String,
    pub(crate) verifier: String,
    created_at: Instant,
}

/// Single-use PKCE state for OAuth flows in progress.
pub struct OAuthFlows {
    ttl: Duration,
    flows: Mutex<HashMap<Uuid, PendingFlow>>,
}

impl OAuthFlows {
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            flows: Mutex::new(HashMap::new()),
        }
    }

    pub(crate) async fn store(&self, provider: &str, verifier: String) -> Uuid {
        let flow_id = Uuid::new_v4();
        let mut flows = self.flows.lock().await;
        flows.retain(|_, flow| flow.created_at.elapsed() < self.ttl);
        flows.insert(
            flow_id,
            PendingFlow {
                provider: provider.to_string(),
                verifier,
                created_at: Instant::now(),
            },
        );
        flow_id
    }

    pub(crate) async fn take(&self, flow_id: Uuid) -> Option<PendingFlow> {
        let mut flows = self.flows.lock().await;
        flows
            .remove(&flow_id)
            .filter(|flow| flow.created_at.elapsed() < self.ttl)
    }

    /// Drop abandoned flows; returns how many were removed.
    pub async fn sweep(&self) -> usize {
        let mut flows = self.flows.lock().await;
        let before = flows.len();
        flows.retain(|_, flow| flow.created_at.elapsed() < self.ttl);
        before - flows.len()
    }
}

pub struct AuthState {
    config: AuthConfig,
    issuer: TokenIssuer,
    provider: Arc<dyn IdentityProvider>,
    sessions: RefreshSessionStore,
    rate_limiter: Arc<dyn RateLimiter>,
    audit: Arc<dyn AuditSink>,
    oauth_flows: OAuthFlows,
    health_gate: HealthGate,
}

impl AuthState {
    /// In-memory sessions, the window rate limiter and log-only audit unless
    /// overridden.
    pub fn new(config: AuthConfig, issuer: TokenIssuer, provider: Arc<dyn IdentityProvider>) -> Self {
        let oauth_flows = OAuthFlows::new(config.oauth_flow_ttl());
        let health_gate = HealthGate::new(HEALTH_CACHE_TTL, config.enforce_health_gate);
        Self {
            config,
            issuer,
            provider,
            sessions: RefreshSessionStore::memory(),
            rate_limiter: Arc::new(WindowRateLimiter::default()),
            audit: Arc::new(LogAuditSink),
            oauth_flows,
            health_gate,
        }
    }

    #[must_use]
    pub fn with_sessions(mut self, sessions: RefreshSessionStore) -> Self {
        self.sessions = sessions;
        self
    }

    #[must_use]
    pub fn with_rate_limiter(mut self, rate_limiter: Arc<dyn RateLimiter>) -> Self {
        self.rate_limiter = rate_limiter;
        self
    }

    #[must_use]
    pub fn with_audit(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = audit;
        self
    }

    #[must_use]
    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    pub(crate) fn issuer(&self) -> &TokenIssuer {
        &self.issuer
    }

    pub(crate) fn provider(&self) -> &dyn IdentityProvider {
        self.provider.as_ref()
    }

    #[must_use]
    pub fn sessions(&self) -> &RefreshSessionStore {
        &self.sessions
    }

    #[must_use]
    pub fn rate_limiter(&self) -> &dyn RateLimiter {
        self.rate_limiter.as_ref()
    }

    #[must_use]
    pub fn oauth_flows(&self) -> &OAuthFlows {
        &self.oauth_flows
    }

    pub(crate) fn health_gate(&self) -> &HealthGate {
        &self.health_gate
    }

    pub(crate) fn audit(&self, event: AuditEvent) {
        self.audit.record(event);
    }

    /// Internal error that echoes its detail only in development.
    pub(crate) fn internal_error(&self, detail: impl Into<String>) -> ApiError {
        ApiError::internal(detail, self.config.expose_internal_errors())
    }

    /// Map a token failure from issuing. Signing problems are internal errors
    /// carrying the run mode's exposure setting.
    pub(crate) fn token_failure(&self, err: TokenError) -> ApiError {
        match err {
            TokenError::Signing(detail) => self.internal_error(detail),
            other => ApiError::from(other),
        }
    }
}
