//! Cached dependency health and the gate in front of authenticated routes.

use axum::{
    body::Body,
    extract::{Extension, Request},
    middleware::Next,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::warn;
use utoipa::ToSchema;

use super::error::ApiError;
use super::provider::IdentityProvider;
use super::state::AuthState;

pub const HEALTH_CACHE_TTL: Duration = Duration::from_secs(30);

#[derive(ToSchema, Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub detail: String,
}

impl HealthReport {
    #[must_use]
    pub fn is_healthy(&self) -> bool {
        self.status == HealthStatus::Healthy
    }
}

pub struct HealthGate {
    ttl: Duration,
    enforce: bool,
    cached: Mutex<Option<(Instant, HealthReport)>>,
}

impl HealthGate {
    #[must_use]
    pub fn new(ttl: Duration, enforce: bool) -> Self {
        Self {
            ttl,
            enforce,
            cached: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn enforced(&self) -> bool {
        self.enforce
    }

    /// Return the cached report, probing the provider when it is stale.
    pub async fn check(&self, provider: &dyn IdentityProvider) -> HealthReport {
        let mut cached = self.cached.lock().await;
        if let Some((checked_at, report)) = cached.as_ref() {
            if checked_at.elapsed() < self.ttl {
                return report.clone();
            }
        }

        let report = match provider.health().await {
            Ok(()) => HealthReport {
                status: HealthStatus::Healthy,
                detail: "identity provider reachable".to_string(),
            },
            Err(err) => {
                warn!("Identity provider health check failed: {err}");
                HealthReport {
                    status: HealthStatus::Unhealthy,
                    detail: "identity provider unreachable".to_string(),
                }
            }
        };
        *cached = Some((Instant::now(), report.clone()));
        report
    }

    /// Last report, if any, without probing.
    pub async fn last(&self) -> Option<HealthReport> {
        self.cached.lock().await.as_ref().map(|(_, report)| report.clone())
    }
}

/// Runs the cached check ahead of every authenticated request. Advisory by
/// default: an unhealthy report is logged and the request proceeds. When
/// enforced, unhealthy answers 503.
pub async fn health_gate(
    Extension(auth_state): Extension<Arc<AuthState>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let gate = auth_state.health_gate();
    let report = gate.check(auth_state.provider()).await;
    if !report.is_healthy() {
        if gate.enforced() {
            return ApiError::DependencyUnavailable(report.detail).into_response();
        }
        warn!("Serving authenticated route while dependency is unhealthy: {}", report.detail);
    }
    next.run(request).await
}
