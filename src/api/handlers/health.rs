//! Health probe handler.
//!
//! `/api/health` reports identity provider reachability through the cached
//! health gate, so frequent probes do not hammer the provider.

use crate::GIT_COMMIT_HASH;
use axum::{
    body::Body,
    extract::Extension,
    http::{HeaderMap, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Json},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, instrument};
use utoipa::ToSchema;

use super::auth::{AuthState, HealthStatus};

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct Health {
    status: HealthStatus,
    detail: String,
    commit: String,
    name: String,
    version: String,
}

#[utoipa::path(
    get,
    path= "/api/health",
    responses (
        (status = 200, description = "Identity provider is reachable", body = Health),
        (status = 503, description = "Identity provider is unreachable", body = Health)
    ),
    tag = "health",
)]
#[instrument(skip(auth_state))]
pub async fn health(
    method: Method,
    Extension(auth_state): Extension<Arc<AuthState>>,
) -> impl IntoResponse {
    let report = auth_state
        .health_gate()
        .check(auth_state.provider())
        .await;

    let health = Health {
        status: report.status,
        detail: report.detail,
        commit: GIT_COMMIT_HASH.to_string(),
        name: env!("CARGO_PKG_NAME").to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    };

    let short_hash = if health.commit.len() > 7 {
        &health.commit[0..7]
    } else {
        ""
    };

    let headers = format!("{}:{}:{}", health.name, health.version, short_hash)
        .parse::<HeaderValue>()
        .map(|x_app_header_value| {
            let mut headers = HeaderMap::new();
            headers.insert("X-App", x_app_header_value);
            headers
        })
        .map_err(|err| {
            debug!("Failed to parse X-App header: {}", err);
        })
        .unwrap_or_else(|()| HeaderMap::new());

    let status = if health.status == HealthStatus::Healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let body = if method == Method::GET {
        Json(&health).into_response()
    } else {
        Body::empty().into_response()
    };

    (status, headers, body)
}
