//! Refresh session records.
//!
//! Flow Overview: every refresh token handed out gets a record keyed by the
//! SHA-256 of the token value, so raw tokens never reach storage. Exchange
//! and logout are the only readers. Writes are best effort; reads fail
//! closed, so a missing or unreachable backend means "revoked".

use async_trait::async_trait;
use base64ct::{Base64UrlUnpadded, Encoding};
use jsonwebtoken::get_current_timestamp;
use serde::{Deserialize, Serialize};
use serde_json::json;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::rest::{RestClient, RestError};
use super::token::REFRESH_TOKEN_TTL_SECONDS;

const SESSIONS_TABLE: &str = "refresh_sessions";

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct RefreshSessionRecord {
    pub token_hash: String,
    pub owner_id: String,
    pub created_at: u64,
    pub expires_at: u64,
    pub revoked: bool,
    #[serde(default)]
    pub provider_session: Option<String>,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("session store unavailable: {0}")]
    Unavailable(String),
}

impl From<RestError> for StoreError {
    fn from(err: RestError) -> Self {
        Self::Unavailable(err.to_string())
    }
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    fn name(&self) -> &'static str;

    async fn insert(&self, record: RefreshSessionRecord) -> Result<(), StoreError>;

    async fn find(&self, token_hash: &str) -> Result<Option<RefreshSessionRecord>, StoreError>;

    /// Flag the record as revoked and return it, if it exists.
    async fn mark_revoked(&self, token_hash: &str) -> Result<Option<RefreshSessionRecord>, StoreError>;

    async fn purge_expired(&self, now: u64) -> Result<usize, StoreError>;
}

#[derive(Default)]
pub struct MemorySessionStore {
    records: Mutex<HashMap<String, RefreshSessionRecord>>,
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn insert(&self, record: RefreshSessionRecord) -> Result<(), StoreError> {
        self.records
            .lock()
            .await
            .insert(record.token_hash.clone(), record);
        Ok(())
    }

    async fn find(&self, token_hash: &str) -> Result<Option<RefreshSessionRecord>, StoreError> {
        Ok(self.records.lock().await.get(token_hash).cloned())
    }

    async fn mark_revoked(&self, token_hash: &str) -> Result<Option<RefreshSessionRecord>, StoreError> {
        let mut records = self.records.lock().await;
        Ok(records.get_mut(token_hash).map(|record| {
            let before = record.clone();
            record.revoked = true;
            before
        }))
    }

    async fn purge_expired(&self, now: u64) -> Result<usize, StoreError> {
        let mut records = self.records.lock().await;
        let before = records.len();
        records.retain(|_, record| record.expires_at > now);
        Ok(before - records.len())
    }
}

/// Records kept in the backend's `refresh_sessions` table.
pub struct ProviderSessionStore {
    rest: RestClient,
}

impl ProviderSessionStore {
    #[must_use]
    pub fn new(rest: RestClient) -> Self {
        Self { rest }
    }
}

fn first_record(rows: Vec<serde_json::Value>) -> Result<Option<RefreshSessionRecord>, StoreError> {
    rows.into_iter()
        .next()
        .map(serde_json::from_value)
        .transpose()
        .map_err(|err| StoreError::Unavailable(format!("invalid session row: {err}")))
}

#[async_trait]
impl SessionStore for ProviderSessionStore {
    fn name(&self) -> &'static str {
        "provider"
    }

    async fn insert(&self, record: RefreshSessionRecord) -> Result<(), StoreError> {
        let row = serde_json::to_value(&record)
            .map_err(|err| StoreError::Unavailable(err.to_string()))?;
        self.rest.insert(SESSIONS_TABLE, &row).await?;
        Ok(())
    }

    async fn find(&self, token_hash: &str) -> Result<Option<RefreshSessionRecord>, StoreError> {
        let rows = self
            .rest
            .select_eq(SESSIONS_TABLE, "token_hash", token_hash)
            .await?;
        first_record(rows)
    }

    async fn mark_revoked(&self, token_hash: &str) -> Result<Option<RefreshSessionRecord>, StoreError> {
        let rows = self
            .rest
            .update_eq(
                SESSIONS_TABLE,
                "token_hash",
                token_hash,
                &json!({ "revoked": true }),
            )
            .await?;
        first_record(rows)
    }

    async fn purge_expired(&self, now: u64) -> Result<usize, StoreError> {
        Ok(self
            .rest
            .delete_lt(SESSIONS_TABLE, "expires_at", &now.to_string())
            .await?)
    }
}

/// Hash a refresh token for storage and lookup.
pub(crate) fn hash_refresh_token(token: &str) -> String {
    let digest = Sha256::digest(token.trim().as_bytes());
    Base64UrlUnpadded::encode_string(&digest)
}

/// Best-effort facade over an optional backend.
#[derive(Clone, Default)]
pub struct RefreshSessionStore {
    backend: Option<Arc<dyn SessionStore>>,
}

impl RefreshSessionStore {
    #[must_use]
    pub fn new(backend: Option<Arc<dyn SessionStore>>) -> Self {
        Self { backend }
    }

    #[must_use]
    pub fn memory() -> Self {
        let backend: Arc<dyn SessionStore> = Arc::new(MemorySessionStore::default());
        Self::new(Some(backend))
    }

    #[must_use]
    pub fn disabled() -> Self {
        Self::new(None)
    }

    #[must_use]
    pub fn backend_name(&self) -> &'static str {
        self.backend.as_ref().map_or("none", |backend| backend.name())
    }

    /// Record a freshly minted refresh token. Never fails the caller.
    pub async fn store(&self, owner_id: &str, token: &str, provider_session: Option<String>) {
        let Some(backend) = &self.backend else {
            warn!("No refresh session backend configured; refresh token will not be exchangeable");
            return;
        };
        let now = get_current_timestamp();
        let record = RefreshSessionRecord {
            token_hash: hash_refresh_token(token),
            owner_id: owner_id.to_string(),
            created_at: now,
            expires_at: now + REFRESH_TOKEN_TTL_SECONDS,
            revoked: false,
            provider_session,
        };
        if let Err(err) = backend.insert(record).await {
            warn!("Failed to store refresh session: {err}");
        }
    }

    /// Revoke the session behind `token`, returning the prior record if known.
    pub async fn revoke(&self, token: &str) -> Option<RefreshSessionRecord> {
        let backend = self.backend.as_ref()?;
        match backend.mark_revoked(&hash_refresh_token(token)).await {
            Ok(record) => record,
            Err(err) => {
                warn!("Failed to revoke refresh session: {err}");
                None
            }
        }
    }

    /// Revoke the session behind `token` only when it belongs to `owner_id`.
    /// A session owned by someone else is left untouched.
    pub async fn revoke_owned(&self, token: &str, owner_id: &str) -> Option<RefreshSessionRecord> {
        let backend = self.backend.as_ref()?;
        let token_hash = hash_refresh_token(token);
        match backend.find(&token_hash).await {
            Ok(Some(record)) if record.owner_id != owner_id => {
                warn!("Refusing to revoke a refresh session owned by a different subject");
                return None;
            }
            Ok(Some(_)) => {}
            Ok(None) => return None,
            Err(err) => {
                warn!("Failed to look up refresh session: {err}");
                return None;
            }
        }
        match backend.mark_revoked(&token_hash).await {
            Ok(record) => record,
            Err(err) => {
                warn!("Failed to revoke refresh session: {err}");
                None
            }
        }
    }

    /// True unless a live, unrevoked record exists for `token`.
    pub async fn is_revoked(&self, token: &str) -> bool {
        let Some(backend) = &self.backend else {
            return true;
        };
        match backend.find(&hash_refresh_token(token)).await {
            Ok(Some(record)) => record.revoked || record.expires_at <= get_current_timestamp(),
            Ok(None) => true,
            Err(err) => {
                warn!("Failed to look up refresh session: {err}");
                true
            }
        }
    }

    /// Drop expired records; returns how many were removed.
    pub async fn purge_expired(&self) -> usize {
        let Some(backend) = &self.backend else {
            return 0;
        };
        match backend.purge_expired(get_current_timestamp()).await {
            Ok(purged) => {
                debug!("Purged {purged} expired refresh sessions");
                purged
            }
            Err(err) => {
                warn!("Failed to purge refresh sessions: {err}");
                0
            }
        }
    }
}
