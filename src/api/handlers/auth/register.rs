//! Account registration.
//!
//! Flow Overview:
//! 1) Validate and sanitize the payload (400).
//! 2) Take an auth-class rate limit slot (429).
//! 3) With the privileged capability, look the email up first and answer 409
//!    before creating anything. Without it, rely on the provider's own
//!    conflict answer.
//! 4) Create the account at the provider and return its identity (201).

use axum::{
    extract::{rejection::JsonRejection, ConnectInfo, Extension},
    http::StatusCode,
    response::{IntoResponse, Json},
};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{debug, instrument, warn};

use super::audit::{AuditAction, AuditEvent};
use super::error::ApiError;
use super::guard::validate_register;
use super::rate_limit::{client_addr, RateLimitDecision, RouteClass};
use super::state::AuthState;
use super::types::{ErrorResponse, RegisterRequest, RegisterResponse};

#[utoipa::path(
    post,
    path = "/api/auth/register",
    request_body = RegisterRequest,
    responses(
        (status = 201, description = "Account created", body = RegisterResponse),
        (status = 400, description = "Invalid payload", body = ErrorResponse),
        (status = 409, description = "Email already registered", body = ErrorResponse),
        (status = 429, description = "Too many failed attempts", body = ErrorResponse),
        (status = 503, description = "Identity provider unavailable", body = ErrorResponse)
    ),
    tag = "auth"
)]
#[instrument(skip(auth_state, connect_info, payload))]
pub async fn register(
    connect_info: Option<ConnectInfo<SocketAddr>>,
    Extension(auth_state): Extension<Arc<AuthState>>,
    payload: Result<Json<RegisterRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(request) = payload.map_err(|rejection| ApiError::BadRequest(rejection.body_text()))?;
    let registration = validate_register(&request)?;

    let addr = client_addr(connect_info.as_ref());
    if auth_state.rate_limiter().check(addr, RouteClass::Auth) == RateLimitDecision::Limited {
        warn!(client = %addr, "auth rate limit exceeded on register");
        return Err(ApiError::RateLimited);
    }

    let provider = auth_state.provider();
    if provider.capabilities().admin_lookup {
        match provider.lookup_by_email(&registration.email).await {
            Ok(Some(_)) => {
                return Err(ApiError::Conflict(
                    "an account with this email already exists".to_string(),
                ));
            }
            Ok(None) => {}
            Err(err) => debug!("Duplicate pre-check skipped: {err}"),
        }
    }

    let identity = provider
        .sign_up(&registration.email, &registration.password, &registration.profile)
        .await?;
    auth_state.rate_limiter().refund(addr, RouteClass::Auth);

    auth_state.audit(AuditEvent::new(
        &identity.id,
        AuditAction::Register,
        "password",
        addr,
    ));

    Ok((
        StatusCode::CREATED,
        Json(RegisterResponse {
            identity,
            message: "account created".to_string(),
        }),
    ))
}
