//! Identity gate in front of the HTTP surface
//!
//! The orchestrator only needs a yes/no answer plus an identity string, so
//! verification sits behind a small trait. The built-in verifier maps static
//! bearer tokens from configuration to identities.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

use crate::config::AuthConfig;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("Missing bearer credential")]
    MissingCredential,

    #[error("Malformed authorization header")]
    Malformed,

    #[error("Invalid bearer credential")]
    InvalidCredential,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub subject: String,
}

impl Identity {
    pub fn new(subject: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
        }
    }

    pub fn anonymous() -> Self {
        Self::new("anonymous")
    }
}

#[async_trait]
pub trait IdentityVerifier: Send + Sync {
    /// Validate an optional bearer token
    async fn verify(&self, bearer: Option<&str>) -> Result<Identity, AuthError>;
}

pub struct StaticTokenVerifier {
    enabled: bool,
    tokens: HashMap<String, String>,
}

impl StaticTokenVerifier {
    pub fn new(tokens: HashMap<String, String>) -> Self {
        Self {
            enabled: true,
            tokens,
        }
    }

    /// Accepts every request as the anonymous identity
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            tokens: HashMap::new(),
        }
    }

    pub fn from_config(config: &AuthConfig) -> Self {
        if config.enabled {
            Self::new(config.tokens.clone())
        } else {
            Self::disabled()
        }
    }
}

#[async_trait]
impl IdentityVerifier for StaticTokenVerifier {
    async fn verify(&self, bearer: Option<&str>) -> Result<Identity, AuthError> {
        if !self.enabled {
            return Ok(Identity::anonymous());
        }

        let token = bearer.ok_or(AuthError::MissingCredential)?;
        self.tokens
            .get(token)
            .map(Identity::new)
            .ok_or(AuthError::InvalidCredential)
    }
}

/// Extract the token from an `Authorization: Bearer <token>` header value
pub fn bearer_token(header: Option<&str>) -> Result<Option<&str>, AuthError> {
    let Some(value) = header else {
        return Ok(None);
    };

    let mut parts = value.trim().splitn(2, ' ');
    match (parts.next(), parts.next().map(str::trim)) {
        (Some(scheme), Some(token)) if scheme.eq_ignore_ascii_case("bearer") && !token.is_empty() => {
            Ok(Some(token))
        }
        _ => Err(AuthError::Malformed),
    }
}
