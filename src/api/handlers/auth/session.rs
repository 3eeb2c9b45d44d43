//! Bearer validation, logout, and the refresh cookie.

use axum::{
    extract::{ConnectInfo, Extension},
    http::{
        header::{COOKIE, SET_COOKIE},
        HeaderMap, HeaderValue, StatusCode,
    },
    response::{IntoResponse, Json},
};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{debug, instrument};

use super::audit::{AuditAction, AuditEvent};
use super::error::ApiError;
use super::principal::require_auth;
use super::rate_limit::client_addr;
use super::state::{AuthConfig, AuthState};
use super::token::REFRESH_TOKEN_TTL_SECONDS;
use super::types::{ErrorResponse, LogoutResponse, ValidateResponse};

pub(crate) const REFRESH_COOKIE_NAME: &str = "complyauth_refresh";
const REFRESH_COOKIE_PATH: &str = "/api/auth";

#[utoipa::path(
    post,
    path = "/api/auth/validate",
    responses(
        (status = 200, description = "Access token is valid", body = ValidateResponse),
        (status = 401, description = "Missing bearer token", body = ErrorResponse),
        (status = 403, description = "Invalid or expired token", body = ErrorResponse)
    ),
    security(("bearer" = [])),
    tag = "auth"
)]
pub async fn validate(
    headers: HeaderMap,
    Extension(auth_state): Extension<Arc<AuthState>>,
) -> Result<Json<ValidateResponse>, ApiError> {
    let principal = require_auth(&headers, &auth_state)?;
    Ok(Json(ValidateResponse {
        valid: true,
        identity: principal.identity,
    }))
}

#[utoipa::path(
    post,
    path = "/api/auth/logout",
    responses(
        (status = 200, description = "Session ended and refresh cookie cleared", body = LogoutResponse),
        (status = 401, description = "Missing bearer token", body = ErrorResponse),
        (status = 403, description = "Invalid or expired token", body = ErrorResponse)
    ),
    security(("bearer" = [])),
    tag = "auth"
)]
#[instrument(skip(headers, auth_state, connect_info))]
pub async fn logout(
    headers: HeaderMap,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    Extension(auth_state): Extension<Arc<AuthState>>,
) -> Result<impl IntoResponse, ApiError> {
    let principal = require_auth(&headers, &auth_state)?;

    if let Some(token) = extract_refresh_token(&headers) {
        match auth_state
            .sessions()
            .revoke_owned(&token, &principal.identity.id)
            .await
        {
            Some(record) => {
                if let Some(session) = record.provider_session {
                    if let Err(err) = auth_state.provider().sign_out(&session).await {
                        debug!("Provider sign-out failed: {err}");
                    }
                }
            }
            None => debug!("No refresh session revoked for this caller"),
        }
    }

    auth_state.audit(AuditEvent::new(
        &principal.identity.id,
        AuditAction::Logout,
        "",
        client_addr(connect_info.as_ref()),
    ));

    // Always clear the cookie, even if the session record was missing.
    let mut response_headers = HeaderMap::new();
    if let Ok(cookie) = clear_refresh_cookie(auth_state.config()) {
        response_headers.insert(SET_COOKIE, cookie);
    }
    Ok((
        StatusCode::OK,
        response_headers,
        Json(LogoutResponse { ok: true }),
    ))
}

/// Build the `HttpOnly` refresh cookie.
pub(super) fn refresh_cookie(config: &AuthConfig, token: &str) -> Result<HeaderValue, ApiError> {
    let mut cookie = format!(
        "{REFRESH_COOKIE_NAME}={token}; HttpOnly; SameSite=Strict; Path={REFRESH_COOKIE_PATH}; Max-Age={REFRESH_TOKEN_TTL_SECONDS}"
    );
    if config.refresh_cookie_secure() {
        cookie.push_str("; Secure");
    }
    HeaderValue::from_str(&cookie)
        .map_err(|err| {
        ApiError::internal(
            format!("invalid cookie header: {err}"),
            config.expose_internal_errors(),
        )
    })
}

pub(super) fn clear_refresh_cookie(
    config: &AuthConfig,
) -> Result<HeaderValue, axum::http::header::InvalidHeaderValue> {
    let mut cookie = format!(
        "{REFRESH_COOKIE_NAME}=; HttpOnly; SameSite=Strict; Path={REFRESH_COOKIE_PATH}; Max-Age=0"
    );
    if config.refresh_cookie_secure() {
        cookie.push_str("; Secure");
    }
    HeaderValue::from_str(&cookie)
}

pub(super) fn extract_refresh_token(headers: &HeaderMap) -> Option<String> {
    for header in headers.get_all(COOKIE) {
        let Ok(value) = header.to_str() else {
            continue;
        };
        for pair in value.split(';') {
            let Some((key, val)) = pair.trim().split_once('=') else {
                continue;
            };
            let val = val.trim();
            if key.trim() == REFRESH_COOKIE_NAME && !val.is_empty() {
                return Some(val.to_string());
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::handlers::auth::state::RunMode;
    use crate::api::handlers::auth::test_support::{harness, test_config};
    use anyhow::Result;
    use axum::{
        body::{to_bytes, Body},
        http::{header::AUTHORIZATION, Request},
        routing::post,
        Router,
    };
    use serde_json::Value;
    use std::sync::atomic::Ordering;
    use tower::ServiceExt;

    fn app(auth_state: Arc<AuthState>) -> Router {
        Router::new()
            .route("/api/auth/validate", post(validate))
            .route("/api/auth/logout", post(logout))
            .layer(Extension(auth_state))
    }

    #[test]
    fn refresh_cookie_attributes() -> Result<()> {
        let cookie = refresh_cookie(&test_config(), "tok")?;
        let cookie = cookie.to_str()?;
        assert!(cookie.starts_with("complyauth_refresh=tok;"));
        assert!(cookie.contains("HttpOnly"));
        assert!(cookie.contains("SameSite=Strict"));
        assert!(cookie.contains("Path=/api/auth"));
        assert!(cookie.contains("Max-Age=604800"));
        assert!(cookie.ends_with("; Secure"));

        let dev = test_config().with_run_mode(RunMode::Development);
        let cookie = refresh_cookie(&dev, "tok")?;
        assert!(!cookie.to_str()?.contains("Secure"));
        Ok(())
    }

    #[tokio::test]
    async fn cookie_failure_detail_is_shown_only_in_development() -> Result<()> {
        let dev = test_config().with_run_mode(RunMode::Development);
        let response = match refresh_cookie(&dev, "bad\nvalue") {
            Ok(_) => anyhow::bail!("cookie with a newline must be rejected"),
            Err(err) => err.into_response(),
        };
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body: Value = serde_json::from_slice(&to_bytes(response.into_body(), usize::MAX).await?)?;
        let message = body["error"].as_str().unwrap_or_default();
        assert!(message.starts_with("internal server error: invalid cookie header"));

        let response = match refresh_cookie(&test_config(), "bad\nvalue") {
            Ok(_) => anyhow::bail!("cookie with a newline must be rejected"),
            Err(err) => err.into_response(),
        };
        let body: Value = serde_json::from_slice(&to_bytes(response.into_body(), usize::MAX).await?)?;
        assert_eq!(body["error"], "internal server error");
        Ok(())
    }

    #[test]
    fn clear_cookie_expires_immediately() -> Result<()> {
        let cookie = clear_refresh_cookie(&test_config())?;
        assert!(cookie.to_str()?.contains("Max-Age=0"));
        Ok(())
    }

    #[test]
    fn refresh_token_is_read_from_cookie_header() -> Result<()> {
        let mut headers = HeaderMap::new();
        headers.insert(
            COOKIE,
            HeaderValue::from_static("theme=dark; complyauth_refresh=abc.def; other=1"),
        );
        assert_eq!(extract_refresh_token(&headers), Some("abc.def".to_string()));

        headers.insert(COOKIE, HeaderValue::from_static("complyauth_refresh="));
        assert_eq!(extract_refresh_token(&headers), None);
        Ok(())
    }

    #[tokio::test]
    async fn validate_without_header_is_401() -> Result<()> {
        let harness = harness();
        let response = app(harness.state)
            .oneshot(Request::post("/api/auth/validate").body(Body::empty())?)
            .await?;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let body: Value = serde_json::from_slice(&to_bytes(response.into_body(), usize::MAX).await?)?;
        assert_eq!(body["error"], "token required");
        Ok(())
    }

    #[tokio::test]
    async fn validate_with_token_returns_identity() -> Result<()> {
        let harness = harness();
        let identity = harness.provider.identity("a@b.com");
        let token = harness.state.issuer().issue_access(&identity)?;
        let response = app(harness.state)
            .oneshot(
                Request::post("/api/auth/validate")
                    .header(AUTHORIZATION, format!("Bearer {token}"))
                    .body(Body::empty())?,
            )
            .await?;
        assert_eq!(response.status(), StatusCode::OK);
        let body: Value = serde_json::from_slice(&to_bytes(response.into_body(), usize::MAX).await?)?;
        assert_eq!(body["valid"], true);
        assert_eq!(body["identity"]["email"], "a@b.com");
        Ok(())
    }

    #[tokio::test]
    async fn logout_revokes_session_and_signs_out_upstream() -> Result<()> {
        let harness = harness();
        let identity = harness.provider.identity("a@b.com");
        let access = harness.state.issuer().issue_access(&identity)?;
        let refresh = harness.state.issuer().issue_refresh(&identity)?;
        harness
            .state
            .sessions()
            .store(&identity.id, &refresh, Some("upstream-1".to_string()))
            .await;

        let response = app(harness.state.clone())
            .oneshot(
                Request::post("/api/auth/logout")
                    .header(AUTHORIZATION, format!("Bearer {access}"))
                    .header(COOKIE, format!("{REFRESH_COOKIE_NAME}={refresh}"))
                    .body(Body::empty())?,
            )
            .await?;
        assert_eq!(response.status(), StatusCode::OK);
        let cleared = response
            .headers()
            .get(SET_COOKIE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default()
            .to_string();
        assert!(cleared.contains("Max-Age=0"));
        let body: Value = serde_json::from_slice(&to_bytes(response.into_body(), usize::MAX).await?)?;
        assert_eq!(body["ok"], true);

        assert!(harness.state.sessions().is_revoked(&refresh).await);
        let signed_out = harness
            .provider
            .signed_out
            .lock()
            .map(|sessions| sessions.clone())
            .unwrap_or_default();
        assert_eq!(signed_out, vec!["upstream-1".to_string()]);
        assert_eq!(harness.audit.actions(), vec!["user.logout".to_string()]);
        Ok(())
    }

    #[tokio::test]
    async fn logout_does_not_revoke_someone_elses_session() -> Result<()> {
        let harness = harness();
        let caller = harness.provider.identity("a@b.com");
        let victim = harness.provider.identity("c@d.com");
        let access = harness.state.issuer().issue_access(&caller)?;
        let victim_refresh = harness.state.issuer().issue_refresh(&victim)?;
        harness
            .state
            .sessions()
            .store(&victim.id, &victim_refresh, Some("upstream-victim".to_string()))
            .await;

        let response = app(harness.state.clone())
            .oneshot(
                Request::post("/api/auth/logout")
                    .header(AUTHORIZATION, format!("Bearer {access}"))
                    .header(COOKIE, format!("{REFRESH_COOKIE_NAME}={victim_refresh}"))
                    .body(Body::empty())?,
            )
            .await?;
        assert_eq!(response.status(), StatusCode::OK);
        assert!(!harness.state.sessions().is_revoked(&victim_refresh).await);
        let signed_out = harness
            .provider
            .signed_out
            .lock()
            .map(|sessions| sessions.clone())
            .unwrap_or_default();
        assert!(signed_out.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn logout_tolerates_provider_failure() -> Result<()> {
        let harness = harness();
        harness.provider.unavailable.store(true, Ordering::SeqCst);
        let identity = harness.provider.identity("a@b.com");
        let access = harness.state.issuer().issue_access(&identity)?;
        let refresh = harness.state.issuer().issue_refresh(&identity)?;
        harness
            .state
            .sessions()
            .store(&identity.id, &refresh, Some("upstream-1".to_string()))
            .await;

        let response = app(harness.state)
            .oneshot(
                Request::post("/api/auth/logout")
                    .header(AUTHORIZATION, format!("Bearer {access}"))
                    .header(COOKIE, format!("{REFRESH_COOKIE_NAME}={refresh}"))
                    .body(Body::empty())?,
            )
            .await?;
        assert_eq!(response.status(), StatusCode::OK);
        Ok(())
    }

    #[tokio::test]
    async fn logout_with_foreign_token_is_403() -> Result<()> {
        let harness = harness();
        let foreign = crate::api::handlers::auth::token::TokenIssuer::ephemeral()
            .issue_access(&harness.provider.identity("a@b.com"))?;
        let response = app(harness.state)
            .oneshot(
                Request::post("/api/auth/logout")
                    .header(AUTHORIZATION, format!("Bearer {foreign}"))
                    .body(Body::empty())?,
            )
            .await?;
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        let body: Value = serde_json::from_slice(&to_bytes(response.into_body(), usize::MAX).await?)?;
        assert_eq!(body["reason"], "invalid");
        Ok(())
    }
}
