//! Auth handlers and supporting modules.
//!
//! This module coordinates credential checks against the identity provider,
//! locally signed access and refresh tokens, federated login, and the abuse
//! guards in front of all of it.
//!
//! ## Rate Limiting
//!
//! Two fixed windows of 15 minutes are kept per peer address:
//!
//! - **General:** 100 requests across every `/api` route.
//! - **Auth:** 5 failed attempts across login, registration and refresh.
//!   Successful attempts are refunded.
//!
//! ## Refresh Sessions
//!
//! Refresh tokens are only usable while their session record exists, has not
//! expired and has not been revoked. Records are keyed by the SHA-256 of the
//! token. Without a configured backend every refresh token is rejected.
//!
//! ## OAuth
//!
//! Federated login uses the provider's authorization code flow with PKCE. The
//! access token reaches the browser in the URL fragment of the dashboard
//! redirect, so it never appears in server logs or `Referer` headers.

pub(crate) mod audit;
pub(crate) mod error;
pub(crate) mod guard;
pub(crate) mod health_gate;
pub(crate) mod login;
pub(crate) mod oauth;
pub(crate) mod principal;
pub(crate) mod provider;
pub(crate) mod rate_limit;
pub(crate) mod refresh_store;
pub(crate) mod register;
pub(crate) mod rest;
pub(crate) mod session;
mod state;
pub(crate) mod token;
pub(crate) mod types;

#[cfg(test)]
pub(crate) mod test_support;

pub use audit::{AuditAction, AuditEvent, AuditSink, LogAuditSink, ProviderAuditSink};
pub use error::ApiError;
pub use health_gate::{HealthGate, HealthReport, HealthStatus, HEALTH_CACHE_TTL};
pub use principal::{require_auth, Principal};
pub use provider::{
    Capabilities, GoTrueProvider, Identity, IdentityProvider, Profile, ProviderError,
    SignInOutcome,
};
pub use rate_limit::{NoopRateLimiter, RateLimiter, RouteClass, WindowRateLimiter};
pub use refresh_store::{
    MemorySessionStore, ProviderSessionStore, RefreshSessionRecord, RefreshSessionStore,
    SessionStore,
};
pub use rest::RestClient;
pub use state::{AuthConfig, AuthState, OAuthFlows, RunMode};
pub use token::{Claims, TokenError, TokenIssuer, TokenKind};
