//! Authenticated principal extraction.
//!
//! Flow Overview: read the bearer token, verify it as an access token, and
//! return the identity it carries. No storage is consulted; the result
//! depends only on the header and the signing secret.

use axum::http::{header::AUTHORIZATION, HeaderMap};

use super::error::ApiError;
use super::provider::Identity;
use super::state::AuthState;
use super::token::{Claims, TokenKind};

/// Authenticated caller derived from an access token.
#[derive(Clone, Debug)]
pub struct Principal {
    pub identity: Identity,
    pub token_id: String,
    pub expires_at: u64,
}

impl From<Claims> for Principal {
    fn from(claims: Claims) -> Self {
        Self {
            identity: claims.identity(),
            token_id: claims.jti,
            expires_at: claims.exp,
        }
    }
}

/// Resolve the bearer token into a principal.
///
/// # Errors
/// `Unauthenticated` (401) when the header is missing or blank, `Forbidden`
/// (403) when the token is invalid or expired.
pub fn require_auth(headers: &HeaderMap, auth_state: &AuthState) -> Result<Principal, ApiError> {
    let token = extract_bearer_token(headers).ok_or(ApiError::Unauthenticated)?;
    let claims = auth_state.issuer().verify(&token, TokenKind::Access)?;
    Ok(claims.into())
}

pub(crate) fn extract_bearer_token(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let trimmed = value.trim();
    let (scheme, token) = trimmed.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    if token.is_empty() {
        None
    } else {
        Some(token.to_string())
    }
}
