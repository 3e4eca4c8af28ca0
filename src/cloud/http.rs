//! Cloud-control collaborator reached over HTTP
//!
//! Each resource kind is served under `{endpoint}/{kind}/{resource_id}`:
//! `GET` reads the live state, `POST .../stop`, `POST .../start` and
//! `POST .../modify` perform the mutations.

use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde::Serialize;
use std::time::Duration;

use super::{CloudControl, CloudError, CloudResult, ResourceSnapshot};
use crate::model::{Configuration, ResourceKind};

#[derive(Debug, Serialize)]
struct ModifyRequest<'a> {
    changes: &'a Configuration,
}

pub struct HttpCloudControl {
    client: Client,
    endpoint: String,
    kind: ResourceKind,
}

impl HttpCloudControl {
    pub fn new(endpoint: &str, kind: ResourceKind, timeout: Duration) -> CloudResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| CloudError::Permanent(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            kind,
        })
    }

    fn url(&self, resource_id: &str, action: Option<&str>) -> String {
        match action {
            Some(action) => format!(
                "{}/{}/{}/{}",
                self.endpoint,
                self.kind.as_str(),
                resource_id,
                action
            ),
            None => format!("{}/{}/{}", self.endpoint, self.kind.as_str(), resource_id),
        }
    }

    async fn post(&self, resource_id: &str, action: &str, body: Option<&ModifyRequest<'_>>) -> CloudResult<()> {
        let mut request = self.client.post(self.url(resource_id, Some(action)));
        if let Some(body) = body {
            request = request.json(body);
        }
        let response = request.send().await.map_err(transport_error)?;
        check_status(resource_id, response).await.map(|_| ())
    }
}

fn transport_error(error: reqwest::Error) -> CloudError {
    if error.is_timeout() || error.is_connect() || error.is_request() {
        CloudError::Transient(format!("Cloud request failed: {}", error))
    } else {
        CloudError::Permanent(format!("Cloud request failed: {}", error))
    }
}

async fn check_status(resource_id: &str, response: Response) -> CloudResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    match status {
        StatusCode::NOT_FOUND => Err(CloudError::NotFound(resource_id.to_string())),
        StatusCode::TOO_MANY_REQUESTS | StatusCode::REQUEST_TIMEOUT => Err(CloudError::Transient(
            format!("Control plane returned {}: {}", status, body),
        )),
        s if s.is_server_error() => Err(CloudError::Transient(format!(
            "Control plane returned {}: {}",
            status, body
        ))),
        _ => Err(CloudError::Permanent(format!(
            "Control plane returned {}: {}",
            status, body
        ))),
    }
}

#[async_trait]
impl CloudControl for HttpCloudControl {
    async fn read_state(&self, resource_id: &str) -> CloudResult<ResourceSnapshot> {
        let response = self
            .client
            .get(self.url(resource_id, None))
            .send()
            .await
            .map_err(transport_error)?;
        let response = check_status(resource_id, response).await?;

        response
            .json::<ResourceSnapshot>()
            .await
            .map_err(|e| CloudError::Permanent(format!("Failed to parse resource state: {}", e)))
    }

    async fn stop(&self, resource_id: &str) -> CloudResult<()> {
        self.post(resource_id, "stop", None).await
    }

    async fn start(&self, resource_id: &str) -> CloudResult<()> {
        self.post(resource_id, "start", None).await
    }

    async fn modify(&self, resource_id: &str, changes: &Configuration) -> CloudResult<()> {
        self.post(resource_id, "modify", Some(&ModifyRequest { changes }))
            .await
    }
}
