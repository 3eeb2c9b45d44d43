//! Federated login through the identity provider (authorization code + PKCE).
//!
//! Flow Overview:
//! 1) `GET /api/auth/{provider}` checks the provider against the allow-list,
//!    creates a PKCE verifier and a single-use flow id, and redirects to the
//!    provider's authorize URL. The callback URL carries the flow id.
//! 2) `GET /api/auth/callback/{provider}` takes the flow, exchanges the code
//!    with its verifier, mints an access token and redirects to the dashboard
//!    with the token in the URL fragment.
//!
//! Every failure on either leg is a redirect to the frontend login page with
//! `error=oauth_failed`; the browser never sees a 5xx from this flow.

use axum::{
    extract::{rejection::QueryRejection, ConnectInfo, Extension, Path, Query},
    http::{header::LOCATION, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use base64ct::{Base64UrlUnpadded, Encoding};
use rand::{rngs::OsRng, RngCore};
use sha2::{Digest, Sha256};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use super::audit::{AuditAction, AuditEvent};
use super::guard::check_query_param;
use super::rate_limit::client_addr;
use super::state::AuthState;
use super::types::OAuthCallbackQuery;

const OAUTH_ERROR_CODE: &str = "oauth_failed";

#[utoipa::path(
    get,
    path = "/api/auth/{provider}",
    params(
        ("provider" = String, Path, description = "OAuth provider name, e.g. google or github")
    ),
    responses(
        (status = 302, description = "Redirect to the provider, or to the login page on failure")
    ),
    tag = "oauth"
)]
#[instrument(skip(auth_state))]
pub async fn start(
    Path(provider): Path<String>,
    Extension(auth_state): Extension<Arc<AuthState>>,
) -> Response {
    match authorize_location(&provider, &auth_state).await {
        Ok(location) => found(&location, &auth_state),
        Err(reason) => {
            warn!("OAuth start failed: {reason}");
            error_redirect(&auth_state)
        }
    }
}

#[utoipa::path(
    get,
    path = "/api/auth/callback/{provider}",
    params(
        ("provider" = String, Path, description = "OAuth provider name"),
        ("code" = Option<String>, Query, description = "Authorization code from the provider"),
        ("flow" = Option<String>, Query, description = "Flow id issued when the login started")
    ),
    responses(
        (status = 302, description = "Redirect to the dashboard with the access token in the fragment, or to the login page on failure")
    ),
    tag = "oauth"
)]
#[instrument(skip(auth_state, connect_info, query))]
pub async fn callback(
    Path(provider): Path<String>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    Extension(auth_state): Extension<Arc<AuthState>>,
    query: Result<Query<OAuthCallbackQuery>, QueryRejection>,
) -> Response {
    let query = match query {
        Ok(Query(query)) => query,
        Err(rejection) => {
            warn!("OAuth callback query rejected: {rejection}");
            return error_redirect(&auth_state);
        }
    };

    match complete(&provider, query, &auth_state).await {
        Ok((access_token, identity_id)) => {
            info!(provider = %provider, "OAuth login completed");
            auth_state.audit(AuditEvent::new(
                &identity_id,
                AuditAction::OAuthLogin,
                &provider,
                client_addr(connect_info.as_ref()),
            ));
            let location = format!(
                "{}/dashboard#access_token={access_token}",
                auth_state.config().frontend_base_url()
            );
            found(&location, &auth_state)
        }
        Err(reason) => {
            warn!("OAuth callback failed: {reason}");
            error_redirect(&auth_state)
        }
    }
}

async fn authorize_location(provider: &str, auth_state: &AuthState) -> Result<String, String> {
    check_query_param("provider", provider).map_err(|_| "malformed provider".to_string())?;
    let provider = provider.trim().to_lowercase();
    if !auth_state.config().oauth_provider_allowed(&provider) {
        return Err(format!("provider {provider} is not enabled"));
    }

    let verifier = generate_code_verifier();
    let challenge = code_challenge(&verifier);
    let flow_id = auth_state.oauth_flows().store(&provider, verifier).await;
    let redirect_to = format!(
        "{}/api/auth/callback/{provider}?flow={flow_id}",
        auth_state.config().public_base_url()
    );

    auth_state
        .provider()
        .authorize_url(&provider, &redirect_to, &challenge)
        .map(String::from)
        .map_err(|err| err.to_string())
}

async fn complete(
    provider: &str,
    query: OAuthCallbackQuery,
    auth_state: &AuthState,
) -> Result<(String, String), String> {
    if let Some(error) = query.error.as_deref() {
        return Err(format!("provider returned error: {error}"));
    }
    check_query_param("provider", provider).map_err(|_| "malformed provider".to_string())?;
    let code = query.code.ok_or_else(|| "missing code".to_string())?;
    check_query_param("code", &code).map_err(|_| "malformed code".to_string())?;
    let flow = query.flow.ok_or_else(|| "missing flow".to_string())?;
    check_query_param("flow", &flow).map_err(|_| "malformed flow".to_string())?;
    let flow_id = Uuid::parse_str(flow.trim()).map_err(|_| "malformed flow".to_string())?;

    let pending = auth_state
        .oauth_flows()
        .take(flow_id)
        .await
        .ok_or_else(|| "unknown or expired flow".to_string())?;
    if !pending.provider.eq_ignore_ascii_case(provider.trim()) {
        return Err("provider does not match flow".to_string());
    }

    let outcome = auth_state
        .provider()
        .exchange_code(code.trim(), &pending.verifier)
        .await
        .map_err(|err| err.to_string())?;
    let access_token = auth_state
        .issuer()
        .issue_access(&outcome.identity)
        .map_err(|err| err.to_string())?;
    Ok((access_token, outcome.identity.id))
}

/// 43-character PKCE verifier from 32 random bytes.
fn generate_code_verifier() -> String {
    let mut bytes = [0u8; 32];
    OsRng.fill_bytes(&mut bytes);
    Base64UrlUnpadded::encode_string(&bytes)
}

/// S256 challenge for `verifier`.
fn code_challenge(verifier: &str) -> String {
    Base64UrlUnpadded::encode_string(&Sha256::digest(verifier.as_bytes()))
}

fn found(location: &str, auth_state: &AuthState) -> Response {
    match HeaderValue::from_str(location) {
        Ok(value) => (StatusCode::FOUND, [(LOCATION, value)]).into_response(),
        Err(err) => {
            warn!("Unusable redirect location: {err}");
            error_redirect(auth_state)
        }
    }
}

fn error_redirect(auth_state: &AuthState) -> Response {
    let location = format!(
        "{}/login?error={OAUTH_ERROR_CODE}",
        auth_state.config().frontend_base_url()
    );
    match HeaderValue::from_str(&location) {
        Ok(value) => (StatusCode::FOUND, [(LOCATION, value)]).into_response(),
        Err(_) => StatusCode::BAD_REQUEST.into_response(),
    }
}
