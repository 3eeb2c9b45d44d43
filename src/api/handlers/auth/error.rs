//! Error boundary for auth handlers.
//!
//! Handlers return `Result<_, ApiError>` and the status/body mapping lives
//! only here. Dependency and internal details are logged, never returned,
//! except for internal errors in development mode (redacted).

use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use thiserror::Error;
use tracing::{error, warn};

use super::guard::{FieldError, ValidationErrors};
use super::provider::ProviderError;
use super::token::TokenError;
use super::types::ErrorResponse;

/// Names whose presence in an error detail means it must not be echoed.
const SENSITIVE_MARKERS: [&str; 5] = [
    "token_secret",
    "service_key",
    "password",
    "secret",
    "apikey",
];

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("validation failed")]
    Validation(Vec<FieldError>),
    #[error("token required")]
    Unauthenticated,
    #[error("invalid or expired token")]
    Forbidden(TokenError),
    #[error("invalid email or password")]
    InvalidCredentials,
    #[error("refresh session is no longer valid")]
    SessionRevoked,
    #[error("{0}")]
    Conflict(String),
    #[error("{0}")]
    BadRequest(String),
    #[error("too many requests")]
    RateLimited,
    #[error("service temporarily unavailable")]
    DependencyUnavailable(String),
    #[error("internal server error")]
    Internal {
        detail: String,
        /// Echo the (redacted) detail in the response body.
        expose: bool,
    },
}

impl ApiError {
    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Validation(_) | Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Unauthenticated | Self::InvalidCredentials | Self::SessionRevoked => {
                StatusCode::UNAUTHORIZED
            }
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            Self::DependencyUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub(crate) fn internal(detail: impl Into<String>, expose: bool) -> Self {
        Self::Internal {
            detail: detail.into(),
            expose,
        }
    }
}

impl From<ValidationErrors> for ApiError {
    fn from(errors: ValidationErrors) -> Self {
        Self::Validation(errors.into_inner())
    }
}

impl From<TokenError> for ApiError {
    fn from(err: TokenError) -> Self {
        match err {
            TokenError::Signing(detail) => Self::internal(detail, false),
            other => Self::Forbidden(other),
        }
    }
}

impl From<ProviderError> for ApiError {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::InvalidCredentials => Self::InvalidCredentials,
            ProviderError::AlreadyExists => {
                Self::Conflict("an account with this email already exists".to_string())
            }
            ProviderError::NotFound => Self::InvalidCredentials,
            ProviderError::Rejected(detail) => Self::BadRequest(detail),
            ProviderError::Unavailable(detail) => Self::DependencyUnavailable(detail),
        }
    }
}

/// Replace a detail that mentions secret-bearing names.
pub(crate) fn redact(detail: &str) -> String {
    let lowered = detail.to_lowercase();
    if SENSITIVE_MARKERS.iter().any(|marker| lowered.contains(marker)) {
        "[redacted]".to_string()
    } else {
        detail.to_string()
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let mut body = ErrorResponse {
            error: self.to_string(),
            details: None,
            reason: None,
        };

        match self {
            Self::Validation(details) => body.details = Some(details),
            Self::Forbidden(reason) => {
                body.reason = Some(
                    match reason {
                        TokenError::Expired => "expired",
                        _ => "invalid",
                    }
                    .to_string(),
                );
            }
            Self::DependencyUnavailable(detail) => {
                warn!("Dependency unavailable: {detail}");
            }
            Self::Internal { detail, expose } => {
                error!("Internal error: {}", redact(&detail));
                if expose {
                    body.error = format!("internal server error: {}", redact(&detail));
                }
            }
            _ => {}
        }

        (status, Json(body)).into_response()
    }
}
