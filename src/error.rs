use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::advisor::AdvisorError;
use crate::auth::AuthError;
use crate::policy::PolicyError;
use crate::store::StoreError;

/// Caller-facing error classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidRequest,
    Unauthorized,
    NotFound,
    SchedulingFailure,
    UpstreamTimeout,
    AdvisorUnavailable,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::InvalidRequest => "invalid_request",
            ErrorKind::Unauthorized => "unauthorized",
            ErrorKind::NotFound => "not_found",
            ErrorKind::SchedulingFailure => "scheduling_failure",
            ErrorKind::UpstreamTimeout => "upstream_timeout",
            ErrorKind::AdvisorUnavailable => "advisor_unavailable",
            ErrorKind::Internal => "internal",
        }
    }

    pub fn status_code(&self) -> u16 {
        match self {
            ErrorKind::InvalidRequest => 400,
            ErrorKind::Unauthorized => 401,
            ErrorKind::NotFound => 404,
            ErrorKind::SchedulingFailure => 503,
            ErrorKind::UpstreamTimeout => 504,
            ErrorKind::AdvisorUnavailable => 502,
            ErrorKind::Internal => 500,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Scheduling failure: {0}")]
    SchedulingFailure(String),

    #[error("Upstream timeout: {0}")]
    UpstreamTimeout(String),

    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Advisor(#[from] AdvisorError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Policy error: {0}")]
    Policy(#[from] PolicyError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::InvalidRequest(_) => ErrorKind::InvalidRequest,
            Error::NotFound(_) => ErrorKind::NotFound,
            Error::SchedulingFailure(_) => ErrorKind::SchedulingFailure,
            Error::UpstreamTimeout(_) => ErrorKind::UpstreamTimeout,
            Error::Auth(_) => ErrorKind::Unauthorized,
            Error::Advisor(AdvisorError::InvalidResponse(_)) => ErrorKind::AdvisorUnavailable,
            Error::Advisor(AdvisorError::Unavailable(_)) => ErrorKind::AdvisorUnavailable,
            Error::Advisor(AdvisorError::NotConfigured) => ErrorKind::AdvisorUnavailable,
            Error::Store(StoreError::NotFound(_)) => ErrorKind::NotFound,
            Error::Store(_) | Error::Policy(_) | Error::Internal(_) => ErrorKind::Internal,
        }
    }

    pub fn status_code(&self) -> u16 {
        self.kind().status_code()
    }

    /// JSON body returned to callers
    pub fn body(&self) -> ErrorBody {
        let kind = self.kind();
        ErrorBody {
            error: kind,
            message: self.to_string(),
            status: kind.status_code(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: ErrorKind,
    pub message: String,
    pub status: u16,
}

pub type Result<T> = std::result::Result<T, Error>;
