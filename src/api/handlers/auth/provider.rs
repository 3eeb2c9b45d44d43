//! Identity provider adapter.
//!
//! Flow Overview: handlers never talk HTTP to the provider directly. They go
//! through `IdentityProvider`, which normalizes every provider answer into an
//! `Identity` or a `ProviderError`. `GoTrueProvider` is the production
//! implementation and speaks the hosted auth REST API (`/auth/v1/*`).
//!
//! The privileged (service) key is optional. Without it the adapter reports
//! `Capabilities { admin_lookup: false }` and admin lookups answer `None`
//! instead of failing.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info_span, Instrument};
use url::Url;
use utoipa::ToSchema;

use crate::APP_USER_AGENT;

/// A provider-owned account, as carried inside issued tokens.
#[derive(ToSchema, Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    pub id: String,
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub company: Option<String>,
}

/// Optional, already sanitized profile data sent on sign-up.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Profile {
    pub name: Option<String>,
    pub company: Option<String>,
}

/// Successful credential or code exchange.
#[derive(Clone, Debug)]
pub struct SignInOutcome {
    pub identity: Identity,
    /// Provider session reference, used to sign out upstream.
    pub session: Option<String>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Capabilities {
    /// Privileged lookups by email/id are available.
    pub admin_lookup: bool,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProviderError {
    #[error("invalid credentials")]
    InvalidCredentials,
    #[error("account already exists")]
    AlreadyExists,
    #[error("not found")]
    NotFound,
    /// The provider understood the request and refused it for a reason other
    /// than a conflict (weak password by its own policy, disabled signups).
    #[error("rejected by identity provider: {0}")]
    Rejected(String),
    #[error("identity provider unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn sign_in(&self, email: &str, password: &SecretString) -> Result<SignInOutcome, ProviderError>;

    async fn sign_up(
        &self,
        email: &str,
        password: &SecretString,
        profile: &Profile,
    ) -> Result<Identity, ProviderError>;

    async fn sign_out(&self, session: &str) -> Result<(), ProviderError>;

    async fn lookup_by_email(&self, email: &str) -> Result<Option<Identity>, ProviderError>;

    async fn lookup_by_id(&self, id: &str) -> Result<Option<Identity>, ProviderError>;

    /// Build the provider URL that starts a federated login.
    fn authorize_url(
        &self,
        provider: &str,
        redirect_to: &str,
        code_challenge: &str,
    ) -> Result<Url, ProviderError>;

    async fn exchange_code(&self, code: &str, code_verifier: &str) -> Result<SignInOutcome, ProviderError>;

    async fn health(&self) -> Result<(), ProviderError>;

    fn capabilities(&self) -> Capabilities;
}

/// Hosted auth REST API client.
pub struct GoTrueProvider {
    base_url: String,
    public_key: SecretString,
    service_key: Option<SecretString>,
    client: Client,
}

impl GoTrueProvider {
    /// # Errors
    /// Returns an error if the base URL is invalid or the HTTP client cannot be built.
    pub fn new(
        base_url: &str,
        public_key: SecretString,
        service_key: Option<SecretString>,
        timeout: Duration,
    ) -> Result<Self> {
        let parsed = Url::parse(base_url)
            .with_context(|| format!("Invalid identity provider URL: {base_url}"))?;
        if parsed.host_str().is_none() {
            anyhow::bail!("Identity provider URL must include a host: {base_url}");
        }
        let client = Client::builder()
            .user_agent(APP_USER_AGENT)
            .timeout(timeout)
            .build()
            .context("Failed to build identity provider HTTP client")?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            public_key,
            service_key: service_key.filter(|key| !key.expose_secret().trim().is_empty()),
            client,
        })
    }

    /// Base URL without a trailing slash; shared with the REST table clients.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.client
            .request(method, self.endpoint(path))
            .header("apikey", self.public_key.expose_secret())
    }

    fn admin_request(&self, method: Method, path: &str) -> Option<RequestBuilder> {
        let service_key = self.service_key.as_ref()?;
        Some(
            self.client
                .request(method, self.endpoint(path))
                .header("apikey", service_key.expose_secret())
                .bearer_auth(service_key.expose_secret()),
        )
    }

    async fn send(&self, operation: &'static str, request: RequestBuilder) -> Result<Response, ProviderError> {
        let span = info_span!("idp.request", idp.operation = operation);
        request
            .send()
            .instrument(span)
            .await
            .map_err(transport_error)
    }
}

#[async_trait]
impl IdentityProvider for GoTrueProvider {
    async fn sign_in(&self, email: &str, password: &SecretString) -> Result<SignInOutcome, ProviderError> {
        let request = self
            .request(Method::POST, "/auth/v1/token?grant_type=password")
            .json(&json!({
                "email": email,
                "password": password.expose_secret(),
            }));
        let response = self.send("sign_in", request).await?;
        let status = response.status();
        let body = read_body(response).await?;

        if status.is_success() {
            return session_outcome(&body);
        }
        Err(match status_error(status, &body) {
            ProviderError::Rejected(_) | ProviderError::NotFound => ProviderError::InvalidCredentials,
            other => other,
        })
    }

    async fn sign_up(
        &self,
        email: &str,
        password: &SecretString,
        profile: &Profile,
    ) -> Result<Identity, ProviderError> {
        let mut data = serde_json::Map::new();
        if let Some(name) = &profile.name {
            data.insert("name".to_string(), Value::String(name.clone()));
        }
        if let Some(company) = &profile.company {
            data.insert("company".to_string(), Value::String(company.clone()));
        }
        let request = self.request(Method::POST, "/auth/v1/signup").json(&json!({
            "email": email,
            "password": password.expose_secret(),
            "data": data,
        }));
        let response = self.send("sign_up", request).await?;
        let status = response.status();
        let body = read_body(response).await?;

        if !status.is_success() {
            return Err(status_error(status, &body));
        }

        // Either a session (auto-confirm) or a bare user (confirmation pending).
        let user = body.get("user").filter(|user| user.is_object()).unwrap_or(&body);

        // Repeated sign-ups for a confirmed address come back as a user with no identities.
        if user
            .get("identities")
            .and_then(Value::as_array)
            .is_some_and(Vec::is_empty)
        {
            return Err(ProviderError::AlreadyExists);
        }

        identity_from_user(user)
    }

    async fn sign_out(&self, session: &str) -> Result<(), ProviderError> {
        let request = self
            .request(Method::POST, "/auth/v1/logout")
            .bearer_auth(session);
        let response = self.send("sign_out", request).await?;
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let body = read_body(response).await?;
        Err(match status_error(status, &body) {
            ProviderError::Rejected(_) | ProviderError::InvalidCredentials => ProviderError::NotFound,
            other => other,
        })
    }

    async fn lookup_by_email(&self, email: &str) -> Result<Option<Identity>, ProviderError> {
        let Some(request) = self.admin_request(Method::GET, "/auth/v1/admin/users") else {
            return Ok(None);
        };
        let request = request.query(&[("email", email)]);
        let response = self.send("lookup_by_email", request).await?;
        let status = response.status();
        let body = read_body(response).await?;

        if !status.is_success() {
            return Err(status_error(status, &body));
        }

        // The listing endpoint may ignore the filter; match on our side.
        let users = body
            .get("users")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        for user in &users {
            let matches = user
                .get("email")
                .and_then(Value::as_str)
                .is_some_and(|candidate| candidate.eq_ignore_ascii_case(email));
            if matches {
                return identity_from_user(user).map(Some);
            }
        }
        Ok(None)
    }

    async fn lookup_by_id(&self, id: &str) -> Result<Option<Identity>, ProviderError> {
        let path = format!("/auth/v1/admin/users/{id}");
        let Some(request) = self.admin_request(Method::GET, &path) else {
            return Ok(None);
        };
        let response = self.send("lookup_by_id", request).await?;
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let body = read_body(response).await?;
        if !status.is_success() {
            return Err(status_error(status, &body));
        }
        identity_from_user(&body).map(Some)
    }

    fn authorize_url(
        &self,
        provider: &str,
        redirect_to: &str,
        code_challenge: &str,
    ) -> Result<Url, ProviderError> {
        let mut url = Url::parse(&self.endpoint("/auth/v1/authorize"))
            .map_err(|err| ProviderError::Unavailable(format!("invalid authorize url: {err}")))?;
        url.query_pairs_mut()
            .append_pair("provider", provider)
            .append_pair("redirect_to", redirect_to)
            .append_pair("code_challenge", code_challenge)
            .append_pair("code_challenge_method", "s256");
        Ok(url)
    }

    async fn exchange_code(&self, code: &str, code_verifier: &str) -> Result<SignInOutcome, ProviderError> {
        let request = self
            .request(Method::POST, "/auth/v1/token?grant_type=pkce")
            .json(&json!({
                "auth_code": code,
                "code_verifier": code_verifier,
            }));
        let response = self.send("exchange_code", request).await?;
        let status = response.status();
        let body = read_body(response).await?;

        if status.is_success() {
            return session_outcome(&body);
        }
        Err(match status_error(status, &body) {
            ProviderError::Rejected(_) | ProviderError::NotFound => ProviderError::InvalidCredentials,
            other => other,
        })
    }

    async fn health(&self) -> Result<(), ProviderError> {
        let request = self.request(Method::GET, "/auth/v1/health");
        let response = self.send("health", request).await?;
        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(ProviderError::Unavailable(format!("health returned {status}")))
        }
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            admin_lookup: self.service_key.is_some(),
        }
    }
}

fn transport_error(err: reqwest::Error) -> ProviderError {
    if err.is_timeout() {
        ProviderError::Unavailable("request timed out".to_string())
    } else {
        ProviderError::Unavailable(format!("transport error: {err}"))
    }
}

async fn read_body(response: Response) -> Result<Value, ProviderError> {
    let text = response.text().await.map_err(transport_error)?;
    if text.trim().is_empty() {
        return Ok(Value::Null);
    }
    Ok(serde_json::from_str(&text).unwrap_or(Value::String(text)))
}

/// Collect the provider's error wording from the various shapes it uses.
fn error_text(body: &Value) -> String {
    ["error_code", "error", "error_description", "msg", "message"]
        .iter()
        .filter_map(|key| body.get(*key).and_then(Value::as_str))
        .collect::<Vec<_>>()
        .join(" ")
}

fn status_error(status: StatusCode, body: &Value) -> ProviderError {
    let text = error_text(body);
    debug!("identity provider answered {status}: {text}");

    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        return ProviderError::Unavailable(format!("identity provider returned {status}"));
    }

    let lowered = text.to_lowercase();
    if lowered.contains("user_already_exists")
        || lowered.contains("email_exists")
        || lowered.contains("already registered")
        || lowered.contains("already exists")
    {
        return ProviderError::AlreadyExists;
    }
    if lowered.contains("invalid_grant") || lowered.contains("invalid_credentials") {
        return ProviderError::InvalidCredentials;
    }

    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ProviderError::InvalidCredentials,
        StatusCode::NOT_FOUND => ProviderError::NotFound,
        StatusCode::CONFLICT => ProviderError::AlreadyExists,
        _ if text.is_empty() => ProviderError::Rejected(status.to_string()),
        _ => ProviderError::Rejected(text),
    }
}

fn session_outcome(body: &Value) -> Result<SignInOutcome, ProviderError> {
    let user = body
        .get("user")
        .ok_or_else(|| ProviderError::Unavailable("session response without user".to_string()))?;
    Ok(SignInOutcome {
        identity: identity_from_user(user)?,
        session: body
            .get("access_token")
            .and_then(Value::as_str)
            .map(str::to_string),
    })
}

fn metadata_str(user: &Value, keys: &[&str]) -> Option<String> {
    let metadata = user.get("user_metadata")?;
    keys.iter()
        .filter_map(|key| metadata.get(*key).and_then(Value::as_str))
        .map(str::trim)
        .find(|value| !value.is_empty())
        .map(str::to_string)
}

fn identity_from_user(user: &Value) -> Result<Identity, ProviderError> {
    let id = user
        .get("id")
        .and_then(Value::as_str)
        .filter(|id| !id.is_empty())
        .ok_or_else(|| ProviderError::Unavailable("user payload without id".to_string()))?;
    let email = user
        .get("email")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_lowercase();

    Ok(Identity {
        id: id.to_string(),
        email,
        name: metadata_str(user, &["name", "full_name"]),
        company: metadata_str(user, &["company"]),
    })
}
