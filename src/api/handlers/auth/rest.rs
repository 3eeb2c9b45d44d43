//! Minimal client for the backend's REST table API (`/rest/v1/{table}`).
//!
//! Used by the provider-backed session store and audit sink. All calls use
//! the privileged key; callers must not construct this without one.

use anyhow::{Context, Result};
use reqwest::{Client, Method, RequestBuilder, Response};
use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;
use tracing::{info_span, Instrument};
use url::Url;

use crate::APP_USER_AGENT;

#[derive(Debug, Error)]
pub enum RestError {
    #[error("rest transport error: {0}")]
    Transport(String),
    #[error("rest request returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("rest response could not be decoded: {0}")]
    Decode(String),
}

#[derive(Clone)]
pub struct RestClient {
    base_url: String,
    service_key: SecretString,
    client: Client,
}

impl RestClient {
    /// # Errors
    /// Returns an error if the base URL is invalid or the HTTP client cannot be built.
    pub fn new(base_url: &str, service_key: SecretString, timeout: Duration) -> Result<Self> {
        Url::parse(base_url).with_context(|| format!("Invalid REST base URL: {base_url}"))?;
        let client = Client::builder()
            .user_agent(APP_USER_AGENT)
            .timeout(timeout)
            .build()
            .context("Failed to build REST HTTP client")?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            service_key,
            client,
        })
    }

    fn request(&self, method: Method, table: &str) -> RequestBuilder {
        self.client
            .request(method, format!("{}/rest/v1/{table}", self.base_url))
            .header("apikey", self.service_key.expose_secret())
            .bearer_auth(self.service_key.expose_secret())
    }

    async fn send(
        &self,
        operation: &'static str,
        table: &str,
        request: RequestBuilder,
    ) -> Result<Response, RestError> {
        let span = info_span!("rest.request", db.operation = operation, db.table = table);
        let response = request
            .send()
            .instrument(span)
            .await
            .map_err(|err| RestError::Transport(err.to_string()))?;
        let status = response.status();
        if status.is_success() {
            Ok(response)
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(RestError::Status {
                status: status.as_u16(),
                body,
            })
        }
    }

    async fn rows(response: Response) -> Result<Vec<Value>, RestError> {
        let text = response
            .text()
            .await
            .map_err(|err| RestError::Transport(err.to_string()))?;
        if text.trim().is_empty() {
            return Ok(Vec::new());
        }
        serde_json::from_str(&text).map_err(|err| RestError::Decode(err.to_string()))
    }

    /// # Errors
    /// Returns an error on transport failure or a non-success status.
    pub async fn insert(&self, table: &str, row: &Value) -> Result<(), RestError> {
        let request = self
            .request(Method::POST, table)
            .header("Prefer", "return=minimal")
            .json(row);
        self.send("INSERT", table, request).await.map(|_| ())
    }

    /// # Errors
    /// Returns an error on transport failure, a non-success status, or an undecodable body.
    pub async fn select_eq(&self, table: &str, column: &str, value: &str) -> Result<Vec<Value>, RestError> {
        let request = self
            .request(Method::GET, table)
            .query(&[("select", "*".to_string()), (column, format!("eq.{value}"))]);
        let response = self.send("SELECT", table, request).await?;
        Self::rows(response).await
    }

    /// Patch matching rows and return them as updated.
    ///
    /// # Errors
    /// Returns an error on transport failure, a non-success status, or an undecodable body.
    pub async fn update_eq(
        &self,
        table: &str,
        column: &str,
        value: &str,
        patch: &Value,
    ) -> Result<Vec<Value>, RestError> {
        let request = self
            .request(Method::PATCH, table)
            .query(&[(column, format!("eq.{value}"))])
            .header("Prefer", "return=representation")
            .json(patch);
        let response = self.send("UPDATE", table, request).await?;
        Self::rows(response).await
    }

    /// Delete rows whose `column` is below `value`; returns the deleted count.
    ///
    /// # Errors
    /// Returns an error on transport failure, a non-success status, or an undecodable body.
    pub async fn delete_lt(&self, table: &str, column: &str, value: &str) -> Result<usize, RestError> {
        let request = self
            .request(Method::DELETE, table)
            .query(&[(column, format!("lt.{value}"))])
            .header("Prefer", "return=representation");
        let response = self.send("DELETE", table, request).await?;
        Ok(Self::rows(response).await?.len())
    }
}
