//! HS256 token issuance and verification.
//!
//! Access tokens are stateless and live for one hour. Refresh tokens live for
//! seven days and are only honored while their session record is live (see
//! `refresh_store`). Both kinds share one secret; the `kind` claim keeps them
//! from being used in place of each other.

use base64ct::{Base64UrlUnpadded, Encoding};
use jsonwebtoken::{
    decode, encode, errors::ErrorKind, get_current_timestamp, Algorithm, DecodingKey, EncodingKey,
    Header, Validation,
};
use rand::{rngs::OsRng, RngCore};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use super::provider::Identity;

pub const ACCESS_TOKEN_TTL_SECONDS: u64 = 60 * 60;
pub const REFRESH_TOKEN_TTL_SECONDS: u64 = 7 * 24 * 60 * 60;

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    Access,
    Refresh,
}

impl TokenKind {
    #[must_use]
    pub fn ttl_seconds(self) -> u64 {
        match self {
            Self::Access => ACCESS_TOKEN_TTL_SECONDS,
            Self::Refresh => REFRESH_TOKEN_TTL_SECONDS,
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Claims {
    pub sub: String,
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub company: Option<String>,
    pub kind: TokenKind,
    pub iat: u64,
    pub exp: u64,
    pub jti: String,
}

impl Claims {
    #[must_use]
    pub fn identity(&self) -> Identity {
        Identity {
            id: self.sub.clone(),
            email: self.email.clone(),
            name: self.name.clone(),
            company: self.company.clone(),
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TokenError {
    /// Correctly signed, but `exp` has passed.
    #[error("token expired")]
    Expired,
    #[error("token invalid")]
    Invalid,
    #[error("failed to sign token: {0}")]
    Signing(String),
}

pub struct TokenIssuer {
    encoding: EncodingKey,
    decoding: DecodingKey,
}

impl TokenIssuer {
    /// # Errors
    /// Returns an error when the secret is empty.
    pub fn new(secret: &SecretString) -> anyhow::Result<Self> {
        let secret = secret.expose_secret();
        if secret.trim().is_empty() {
            anyhow::bail!("token secret must not be empty");
        }
        Ok(Self::from_bytes(secret.as_bytes()))
    }

    /// Random per-process secret; tokens do not survive a restart.
    #[must_use]
    pub fn ephemeral() -> Self {
        let mut bytes = [0u8; 32];
        OsRng.fill_bytes(&mut bytes);
        Self::from_bytes(Base64UrlUnpadded::encode_string(&bytes).as_bytes())
    }

    fn from_bytes(secret: &[u8]) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
        }
    }

    /// # Errors
    /// Returns `TokenError::Signing` if encoding fails.
    pub fn issue_access(&self, identity: &Identity) -> Result<String, TokenError> {
        self.issue_at(TokenKind::Access, identity, get_current_timestamp())
    }

    /// Refresh tokens only carry the subject and email; profile data is
    /// re-read on exchange.
    ///
    /// # Errors
    /// Returns `TokenError::Signing` if encoding fails.
    pub fn issue_refresh(&self, identity: &Identity) -> Result<String, TokenError> {
        let identity = Identity {
            name: None,
            company: None,
            ..identity.clone()
        };
        self.issue_at(TokenKind::Refresh, &identity, get_current_timestamp())
    }

    pub(crate) fn issue_at(
        &self,
        kind: TokenKind,
        identity: &Identity,
        now: u64,
    ) -> Result<String, TokenError> {
        let claims = Claims {
            sub: identity.id.clone(),
            email: identity.email.clone(),
            name: identity.name.clone(),
            company: identity.company.clone(),
            kind,
            iat: now,
            exp: now + kind.ttl_seconds(),
            jti: Uuid::new_v4().to_string(),
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|err| TokenError::Signing(err.to_string()))
    }

    /// # Errors
    /// `Expired` for a good signature past `exp`; `Invalid` for anything else,
    /// including a token of the wrong kind.
    pub fn verify(&self, token: &str, kind: TokenKind) -> Result<Claims, TokenError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.validate_exp = true;
        validation.set_required_spec_claims(&["exp", "iat", "sub"]);

        let data = decode::<Claims>(token.trim(), &self.decoding, &validation).map_err(|err| {
            match err.kind() {
                ErrorKind::ExpiredSignature => TokenError::Expired,
                _ => TokenError::Invalid,
            }
        })?;

        if data.claims.kind != kind || data.claims.sub.is_empty() {
            return Err(TokenError::Invalid);
        }
        Ok(data.claims)
    }
}
