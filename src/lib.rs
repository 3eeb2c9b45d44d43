//! # Complyauth (credential and session service)
//!
//! `complyauth` fronts an external identity provider for the compliance
//! dashboard. It never stores passwords: credential checks, account creation
//! and federated login are delegated to the provider, and the service bridges
//! the provider's answer into locally signed tokens.
//!
//! ## Tokens
//!
//! - **Access tokens** are HS256 JWTs valid for one hour. They are stateless:
//!   signature and expiry are the only checks on protected routes.
//! - **Refresh tokens** are HS256 JWTs valid for seven days, handed out as an
//!   `HttpOnly` cookie when the caller asks for a persistent session. Each one
//!   has a server-side session record; revoking the record makes the token
//!   unusable even though it is still correctly signed.
//!
//! The signing secret has no built-in default. Outside `test` mode the server
//! refuses to start without one.
//!
//! ## Abuse protection
//!
//! Every `/api` route is limited to 100 requests per 15 minutes per peer
//! address. Login, registration and refresh are further limited to 5 failed
//! attempts per 15 minutes; successful attempts are not counted. Proxy address
//! headers are stripped before routing so they cannot be used to rotate the
//! effective address.
//!
//! ## Degraded modes
//!
//! The privileged provider credential is optional. Without it, duplicate-email
//! pre-checks and admin lookups are skipped rather than failing requests, and
//! the provider-backed session store and audit sink are unavailable.

pub mod api;
pub mod cli;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};

pub const APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"),);
