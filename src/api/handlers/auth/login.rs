//! Password login and refresh-token exchange.
//!
//! Flow Overview:
//! 1) Validate the payload (400 on failure, nothing else runs).
//! 2) Take an auth-class rate limit slot for the peer address (429).
//! 3) Ask the identity provider to check the credentials.
//! 4) Mint an access token; with `rememberMe`, also mint a refresh token,
//!    record its session and set it as an `HttpOnly` cookie.
//!
//! Successful attempts give their rate limit slot back, so only failures
//! count toward the auth limit.

use axum::{
    extract::{rejection::JsonRejection, ConnectInfo, Extension},
    http::{header::SET_COOKIE, HeaderMap, StatusCode},
    response::{IntoResponse, Json},
};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{debug, instrument, warn};

use super::audit::{AuditAction, AuditEvent};
use super::error::ApiError;
use super::guard::validate_login;
use super::provider::Identity;
use super::rate_limit::{client_addr, RateLimitDecision, RouteClass};
use super::session::{extract_refresh_token, refresh_cookie};
use super::state::AuthState;
use super::token::{TokenKind, ACCESS_TOKEN_TTL_SECONDS};
use super::types::{ErrorResponse, LoginRequest, TokenResponse};

#[utoipa::path(
    post,
    path = "/api/auth/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Signed in; refresh cookie set when rememberMe is true", body = TokenResponse),
        (status = 400, description = "Invalid payload", body = ErrorResponse),
        (status = 401, description = "Invalid email or password", body = ErrorResponse),
        (status = 429, description = "Too many failed attempts", body = ErrorResponse),
        (status = 503, description = "Identity provider unavailable", body = ErrorResponse)
    ),
    tag = "auth"
)]
#[instrument(skip(auth_state, connect_info, payload))]
pub async fn login(
    connect_info: Option<ConnectInfo<SocketAddr>>,
    Extension(auth_state): Extension<Arc<AuthState>>,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(request) = payload.map_err(|rejection| ApiError::BadRequest(rejection.body_text()))?;
    let credentials = validate_login(&request)?;

    let addr = client_addr(connect_info.as_ref());
    if auth_state.rate_limiter().check(addr, RouteClass::Auth) == RateLimitDecision::Limited {
        warn!(client = %addr, "auth rate limit exceeded on login");
        return Err(ApiError::RateLimited);
    }

    let outcome = auth_state
        .provider()
        .sign_in(&credentials.email, &credentials.password)
        .await?;
    auth_state.rate_limiter().refund(addr, RouteClass::Auth);

    let access_token = auth_state
        .issuer()
        .issue_access(&outcome.identity)
        .map_err(|err| auth_state.token_failure(err))?;

    let mut headers = HeaderMap::new();
    if credentials.remember_me {
        let refresh_token = auth_state
            .issuer()
            .issue_refresh(&outcome.identity)
            .map_err(|err| auth_state.token_failure(err))?;
        auth_state
            .sessions()
            .store(&outcome.identity.id, &refresh_token, outcome.session.clone())
            .await;
        headers.insert(SET_COOKIE, refresh_cookie(auth_state.config(), &refresh_token)?);
    }

    auth_state.audit(AuditEvent::new(
        &outcome.identity.id,
        AuditAction::Login,
        if credentials.remember_me { "password, persistent" } else { "password" },
        addr,
    ));

    Ok((
        StatusCode::OK,
        headers,
        Json(token_response(access_token, outcome.identity)),
    ))
}

#[utoipa::path(
    post,
    path = "/api/auth/refresh",
    responses(
        (status = 200, description = "New access token minted from the refresh cookie", body = TokenResponse),
        (status = 401, description = "Missing, invalid, expired or revoked refresh session", body = ErrorResponse),
        (status = 429, description = "Too many failed attempts", body = ErrorResponse)
    ),
    tag = "auth"
)]
#[instrument(skip(headers, auth_state, connect_info))]
pub async fn refresh(
    headers: HeaderMap,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    Extension(auth_state): Extension<Arc<AuthState>>,
) -> Result<Json<TokenResponse>, ApiError> {
    let addr = client_addr(connect_info.as_ref());
    if auth_state.rate_limiter().check(addr, RouteClass::Auth) == RateLimitDecision::Limited {
        warn!(client = %addr, "auth rate limit exceeded on refresh");
        return Err(ApiError::RateLimited);
    }

    let token = extract_refresh_token(&headers).ok_or(ApiError::Unauthenticated)?;
    let claims = auth_state
        .issuer()
        .verify(&token, TokenKind::Refresh)
        .map_err(|err| {
            debug!("Refresh token rejected: {err}");
            ApiError::SessionRevoked
        })?;

    if auth_state.sessions().is_revoked(&token).await {
        return Err(ApiError::SessionRevoked);
    }

    // Prefer fresh profile data; the refresh claims only carry id and email.
    let identity = match auth_state.provider().lookup_by_id(&claims.sub).await {
        Ok(Some(identity)) => identity,
        Ok(None) => claims.identity(),
        Err(err) => {
            debug!("Profile lookup failed during refresh, using token claims: {err}");
            claims.identity()
        }
    };
    auth_state.rate_limiter().refund(addr, RouteClass::Auth);

    let access_token = auth_state
        .issuer()
        .issue_access(&identity)
        .map_err(|err| auth_state.token_failure(err))?;
    Ok(Json(token_response(access_token, identity)))
}

pub(super) fn token_response(access_token: String, identity: Identity) -> TokenResponse {
    TokenResponse {
        access_token,
        token_type: "Bearer".to_string(),
        expires_in: ACCESS_TOKEN_TTL_SECONDS,
        identity,
    }
}
