use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

use super::{parse_reply, Advisor, AdvisorError, AdvisorReply};

#[derive(Debug, Serialize)]
struct AdvisorRequest<'a> {
    goal: &'a str,
    #[serde(rename = "sessionId")]
    session_id: &'a str,
}

/// Advisor reached over HTTP; the caller's bearer token is forwarded
pub struct HttpAdvisor {
    client: Client,
    endpoint: String,
}

impl HttpAdvisor {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self, AdvisorError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AdvisorError::Unavailable(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }
}

#[async_trait]
impl Advisor for HttpAdvisor {
    async fn analyze(
        &self,
        prompt: &str,
        session_id: &str,
        bearer: Option<&str>,
    ) -> Result<AdvisorReply, AdvisorError> {
        let mut request = self.client.post(&self.endpoint).json(&AdvisorRequest {
            goal: prompt,
            session_id,
        });
        if let Some(token) = bearer {
            request = request.bearer_auth(token);
        }

        debug!("Invoking advisor for session {}", session_id);
        let response = request
            .send()
            .await
            .map_err(|e| AdvisorError::Unavailable(format!("Advisor request failed: {}", e)))?;

        match response.status() {
            StatusCode::OK => {
                let body: Value = response.json().await.map_err(|e| {
                    AdvisorError::InvalidResponse(format!("Failed to parse response: {}", e))
                })?;
                parse_reply(&body)
            }
            status => {
                let error_text = response.text().await.unwrap_or_default();
                Err(AdvisorError::Unavailable(format!(
                    "Advisor error {}: {}",
                    status, error_text
                )))
            }
        }
    }
}
