//! In-memory provider and audit doubles for handler tests.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use url::Url;

use super::audit::{AuditEvent, AuditSink};
use super::provider::{
    Capabilities, IdentityProvider, Identity, Profile, ProviderError, SignInOutcome,
};
use super::refresh_store::RefreshSessionStore;
use super::state::{AuthConfig, AuthState, RunMode};
use super::token::TokenIssuer;

pub(crate) const TEST_FRONTEND: &str = "https://app.example.com";
pub(crate) const TEST_PUBLIC: &str = "https://api.example.com";

#[derive(Default)]
pub(crate) struct FakeProvider {
    accounts: Mutex<HashMap<String, (Identity, String)>>,
    codes: Mutex<HashMap<String, String>>,
    pub(crate) healthy: AtomicBool,
    pub(crate) unavailable: AtomicBool,
    pub(crate) admin_lookup: AtomicBool,
    pub(crate) health_calls: AtomicUsize,
    pub(crate) sign_up_calls: AtomicUsize,
    pub(crate) signed_out: Mutex<Vec<String>>,
    pub(crate) last_verifier: Mutex<Option<String>>,
}

impl FakeProvider {
    pub(crate) fn new() -> Self {
        let provider = Self::default();
        provider.healthy.store(true, Ordering::SeqCst);
        provider
    }

    pub(crate) fn identity(&self, email: &str) -> Identity {
        Identity {
            id: format!("id-{email}"),
            email: email.to_string(),
            name: None,
            company: None,
        }
    }

    pub(crate) fn with_account(self, email: &str, password: &str) -> Self {
        self.add_account(email, password);
        self
    }

    pub(crate) fn add_account(&self, email: &str, password: &str) {
        let identity = self.identity(email);
        if let Ok(mut accounts) = self.accounts.lock() {
            accounts.insert(email.to_string(), (identity, password.to_string()));
        }
    }

    pub(crate) fn account_count(&self) -> usize {
        self.accounts.lock().map_or(0, |accounts| accounts.len())
    }

    /// Register an authorization code that exchanges into `email`'s identity.
    pub(crate) fn add_code(&self, code: &str, email: &str) {
        if let Ok(mut codes) = self.codes.lock() {
            codes.insert(code.to_string(), email.to_string());
        }
    }

    fn check_available(&self) -> Result<(), ProviderError> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(ProviderError::Unavailable("fake provider down".to_string()))
        } else {
            Ok(())
        }
    }

    fn find(&self, email: &str) -> Option<(Identity, String)> {
        self.accounts
            .lock()
            .ok()
            .and_then(|accounts| accounts.get(email).cloned())
    }
}

#[async_trait]
impl IdentityProvider for FakeProvider {
    async fn sign_in(&self, email: &str, password: &SecretString) -> Result<SignInOutcome, ProviderError> {
        self.check_available()?;
        match self.find(email) {
            Some((identity, stored)) if stored == password.expose_secret() => Ok(SignInOutcome {
                session: Some(format!("session-{}", identity.id)),
                identity,
            }),
            _ => Err(ProviderError::InvalidCredentials),
        }
    }

    async fn sign_up(
        &self,
        email: &str,
        password: &SecretString,
        profile: &Profile,
    ) -> Result<Identity, ProviderError> {
        self.check_available()?;
        self.sign_up_calls.fetch_add(1, Ordering::SeqCst);
        let mut accounts = self
            .accounts
            .lock()
            .map_err(|_| ProviderError::Unavailable("poisoned".to_string()))?;
        if accounts.contains_key(email) {
            return Err(ProviderError::AlreadyExists);
        }
        let identity = Identity {
            name: profile.name.clone(),
            company: profile.company.clone(),
            ..self.identity(email)
        };
        accounts.insert(
            email.to_string(),
            (identity.clone(), password.expose_secret().to_string()),
        );
        Ok(identity)
    }

    async fn sign_out(&self, session: &str) -> Result<(), ProviderError> {
        self.check_available()?;
        if let Ok(mut signed_out) = self.signed_out.lock() {
            signed_out.push(session.to_string());
        }
        Ok(())
    }

    async fn lookup_by_email(&self, email: &str) -> Result<Option<Identity>, ProviderError> {
        if !self.admin_lookup.load(Ordering::SeqCst) {
            return Ok(None);
        }
        self.check_available()?;
        Ok(self.find(email).map(|(identity, _)| identity))
    }

    async fn lookup_by_id(&self, id: &str) -> Result<Option<Identity>, ProviderError> {
        if !self.admin_lookup.load(Ordering::SeqCst) {
            return Ok(None);
        }
        self.check_available()?;
        Ok(self.accounts.lock().ok().and_then(|accounts| {
            accounts
                .values()
                .find(|(identity, _)| identity.id == id)
                .map(|(identity, _)| identity.clone())
        }))
    }

    fn authorize_url(
        &self,
        provider: &str,
        redirect_to: &str,
        code_challenge: &str,
    ) -> Result<Url, ProviderError> {
        let mut url = Url::parse("https://idp.example.com/auth/v1/authorize")
            .map_err(|err| ProviderError::Unavailable(err.to_string()))?;
        url.query_pairs_mut()
            .append_pair("provider", provider)
            .append_pair("redirect_to", redirect_to)
            .append_pair("code_challenge", code_challenge)
            .append_pair("code_challenge_method", "s256");
        Ok(url)
    }

    async fn exchange_code(&self, code: &str, code_verifier: &str) -> Result<SignInOutcome, ProviderError> {
        self.check_available()?;
        if let Ok(mut last) = self.last_verifier.lock() {
            *last = Some(code_verifier.to_string());
        }
        let email = self
            .codes
            .lock()
            .ok()
            .and_then(|mut codes| codes.remove(code))
            .ok_or(ProviderError::InvalidCredentials)?;
        let identity = self
            .find(&email)
            .map_or_else(|| self.identity(&email), |(identity, _)| identity);
        Ok(SignInOutcome {
            session: Some(format!("session-{}", identity.id)),
            identity,
        })
    }

    async fn health(&self) -> Result<(), ProviderError> {
        self.health_calls.fetch_add(1, Ordering::SeqCst);
        if self.healthy.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(ProviderError::Unavailable("fake provider unhealthy".to_string()))
        }
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            admin_lookup: self.admin_lookup.load(Ordering::SeqCst),
        }
    }
}

#[derive(Default)]
pub(crate) struct RecordingAuditSink {
    events: Mutex<Vec<AuditEvent>>,
}

impl RecordingAuditSink {
    pub(crate) fn actions(&self) -> Vec<String> {
        self.events.lock().map_or_else(
            |_| Vec::new(),
            |events| events.iter().map(|event| event.action.clone()).collect(),
        )
    }
}

impl AuditSink for RecordingAuditSink {
    fn record(&self, event: AuditEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}

pub(crate) fn test_config() -> AuthConfig {
    AuthConfig::new(TEST_FRONTEND.to_string(), TEST_PUBLIC.to_string()).with_run_mode(RunMode::Test)
}

pub(crate) struct Harness {
    pub(crate) state: Arc<AuthState>,
    pub(crate) provider: Arc<FakeProvider>,
    pub(crate) audit: Arc<RecordingAuditSink>,
}

pub(crate) fn harness_with(config: AuthConfig, provider: FakeProvider) -> Harness {
    harness_with_sessions(config, provider, RefreshSessionStore::memory())
}

pub(crate) fn harness_with_sessions(
    config: AuthConfig,
    provider: FakeProvider,
    sessions: RefreshSessionStore,
) -> Harness {
    let provider = Arc::new(provider);
    let audit = Arc::new(RecordingAuditSink::default());
    let state = AuthState::new(config, TokenIssuer::ephemeral(), provider.clone())
        .with_sessions(sessions)
        .with_audit(audit.clone());
    Harness {
        state: Arc::new(state),
        provider,
        audit,
    }
}

pub(crate) fn harness() -> Harness {
    harness_with(
        test_config(),
        FakeProvider::new().with_account("a@b.com", "Aa12345!"),
    )
}

pub(crate) fn test_state() -> (Arc<AuthState>, Arc<FakeProvider>) {
    let Harness { state, provider, .. } = harness();
    (state, provider)
}
