//! Append-only audit trail for account events.

use jsonwebtoken::get_current_timestamp;
use serde::Serialize;
use std::net::IpAddr;
use std::sync::Arc;
use tracing::{info, warn};

use super::rest::RestClient;

const AUDIT_TABLE: &str = "audit_logs";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AuditAction {
    Register,
    Login,
    OAuthLogin,
    Logout,
}

impl AuditAction {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Register => "user.register",
            Self::Login => "user.login",
            Self::OAuthLogin => "user.oauth_login",
            Self::Logout => "user.logout",
        }
    }
}

#[derive(Serialize, Clone, Debug, PartialEq, Eq)]
pub struct AuditEvent {
    pub actor_id: String,
    pub action: String,
    pub detail: String,
    pub address: String,
    pub created_at: u64,
}

impl AuditEvent {
    #[must_use]
    pub fn new(actor_id: &str, action: AuditAction, detail: impl Into<String>, address: IpAddr) -> Self {
        Self {
            actor_id: actor_id.to_string(),
            action: action.as_str().to_string(),
            detail: detail.into(),
            address: address.to_string(),
            created_at: get_current_timestamp(),
        }
    }
}

/// Audit delivery abstraction. Recording never fails the request.
pub trait AuditSink: Send + Sync {
    fn record(&self, event: AuditEvent);
}

/// Writes audit events to the structured log.
#[derive(Clone, Debug)]
pub struct LogAuditSink;

impl AuditSink for LogAuditSink {
    fn record(&self, event: AuditEvent) {
        info!(
            audit.actor = %event.actor_id,
            audit.action = %event.action,
            audit.address = %event.address,
            audit.detail = %event.detail,
            "audit event"
        );
    }
}

/// Appends audit events to the backend's `audit_logs` table in the background.
pub struct ProviderAuditSink {
    rest: Arc<RestClient>,
}

impl ProviderAuditSink {
    #[must_use]
    pub fn new(rest: RestClient) -> Self {
        Self {
            rest: Arc::new(rest),
        }
    }
}

impl AuditSink for ProviderAuditSink {
    fn record(&self, event: AuditEvent) {
        LogAuditSink.record(event.clone());
        let rest = self.rest.clone();
        tokio::spawn(async move {
            let row = match serde_json::to_value(&event) {
                Ok(row) => row,
                Err(err) => {
                    warn!("Failed to encode audit event: {err}");
                    return;
                }
            };
            if let Err(err) = rest.insert(AUDIT_TABLE, &row).await {
                warn!(audit.action = %event.action, "Failed to persist audit event: {err}");
            }
        });
    }
}
