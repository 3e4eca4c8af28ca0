//! Advisor collaborator
//!
//! The Advisor turns a natural-language prompt into prose plus untyped
//! recommendation payloads. Its reasoning is opaque here; only the structured
//! records are consumed, after [`normalize_records`].

pub mod http;
pub mod normalize;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

pub use http::HttpAdvisor;
pub use normalize::{normalize_records, NormalizeError};

#[derive(Debug, Error)]
pub enum AdvisorError {
    #[error("Advisor is not configured")]
    NotConfigured,

    #[error("Advisor unavailable: {0}")]
    Unavailable(String),

    #[error("Advisor returned an invalid response: {0}")]
    InvalidResponse(String),
}

/// What the Advisor said, and any recommendation payload it attached
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AdvisorReply {
    pub message: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub recommendations: Vec<Value>,
}

#[async_trait]
pub trait Advisor: Send + Sync {
    async fn analyze(
        &self,
        prompt: &str,
        session_id: &str,
        bearer: Option<&str>,
    ) -> Result<AdvisorReply, AdvisorError>;
}

/// Pull message and recommendations out of the Advisor's loosely shaped body.
///
/// Accepts `{completion: "..."}`, `{completion: {message, recommendations}}`
/// and a flat `{message|response, recommendations}`.
pub fn parse_reply(body: &Value) -> Result<AdvisorReply, AdvisorError> {
    let envelope = match body.get("completion") {
        Some(Value::String(message)) => {
            return Ok(AdvisorReply {
                message: message.clone(),
                recommendations: Vec::new(),
            })
        }
        Some(inner @ Value::Object(_)) => inner,
        _ => body,
    };

    let message = ["message", "response"]
        .iter()
        .find_map(|key| envelope.get(*key).and_then(Value::as_str))
        .map(str::to_string);
    let recommendations = envelope
        .get("recommendations")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();

    match message {
        Some(message) => Ok(AdvisorReply {
            message,
            recommendations,
        }),
        None if !recommendations.is_empty() => Ok(AdvisorReply {
            message: String::new(),
            recommendations,
        }),
        None => Err(AdvisorError::InvalidResponse(
            "no message or recommendations in response".to_string(),
        )),
    }
}
