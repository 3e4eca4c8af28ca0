use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{header::AUTHORIZATION, HeaderMap, StatusCode},
    response::Json,
};
use chrono::Utc;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

use super::response::DispatchResponse;
use super::AppState;
use crate::advisor::{normalize_records, Advisor, AdvisorError};
use crate::auth::{bearer_token, AuthError, Identity, IdentityVerifier};
use crate::error::{Error, Result};
use crate::model::{Execution, ExecutionSummary};
use crate::store::ExecutionStore;

pub(super) async fn health() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "timestamp": Utc::now().to_rfc3339(),
    }))
}

pub(super) async fn dispatch(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, Json<DispatchResponse>)> {
    let identity = authenticate(&state, &headers).await?;
    let body = parse_body(&body)?;

    let action = body
        .get("action")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|a| !a.is_empty())
        .ok_or_else(|| Error::InvalidRequest("action is required".to_string()))?
        .to_string();

    let raw_records = match body.get("context").and_then(|c| c.get("recommendations")) {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(items)) => items.clone(),
        Some(_) => {
            return Err(Error::InvalidRequest(
                "context.recommendations must be an array".to_string(),
            ))
        }
    };
    let records = normalize_records(&raw_records).map_err(|e| Error::InvalidRequest(e.to_string()))?;

    // Past the deadline only the answer is dropped; the dispatch task runs on.
    let dispatcher = state.dispatcher.clone();
    let requested_by = Some(identity.subject);
    let task = tokio::spawn(async move { dispatcher.dispatch(records, &action, requested_by).await });

    let receipt = match tokio::time::timeout(state.request_timeout, task).await {
        Ok(Ok(result)) => result?,
        Ok(Err(join_err)) => return Err(Error::Internal(format!("dispatch task failed: {join_err}"))),
        Err(_) => {
            warn!(
                "Dispatch did not answer within {:?}; it continues in the background",
                state.request_timeout
            );
            return Err(Error::UpstreamTimeout(format!(
                "dispatch exceeded {:?}",
                state.request_timeout
            )));
        }
    };

    Ok((StatusCode::ACCEPTED, Json(receipt.into())))
}

pub(super) async fn chat(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>> {
    authenticate(&state, &headers).await?;
    let body = parse_body(&body)?;

    let prompt = ["prompt", "goal"]
        .iter()
        .find_map(|key| body.get(*key).and_then(Value::as_str))
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .ok_or_else(|| Error::InvalidRequest("prompt is required".to_string()))?;

    let session_id = body
        .get("sessionId")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| format!("session-{}", Uuid::new_v4()));

    let advisor = state
        .advisor
        .as_ref()
        .ok_or(Error::Advisor(AdvisorError::NotConfigured))?;
    let bearer = header_bearer(&headers)?;

    debug!("Forwarding analysis request for session {}", session_id);
    let reply = advisor.analyze(prompt, &session_id, bearer).await?;

    let mut response = json!({
        "response": reply.message,
        "sessionId": session_id,
        "timestamp": Utc::now().to_rfc3339(),
    });
    if !reply.recommendations.is_empty() {
        response["recommendations"] = Value::Array(reply.recommendations);
    }
    Ok(Json(response))
}

pub(super) async fn list_executions(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<Vec<ExecutionSummary>>> {
    authenticate(&state, &headers).await?;
    Ok(Json(state.store.list().await?))
}

pub(super) async fn get_execution(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<Execution>> {
    authenticate(&state, &headers).await?;
    state
        .store
        .get(&id)
        .await?
        .map(Json)
        .ok_or_else(|| Error::NotFound(format!("execution {id}")))
}

fn header_bearer(headers: &HeaderMap) -> Result<Option<&str>> {
    let header = match headers.get(AUTHORIZATION) {
        Some(value) => Some(value.to_str().map_err(|_| AuthError::Malformed)?),
        None => None,
    };
    Ok(bearer_token(header)?)
}

async fn authenticate(state: &AppState, headers: &HeaderMap) -> Result<Identity> {
    let bearer = header_bearer(headers)?;
    Ok(state.verifier.verify(bearer).await?)
}

fn parse_body(body: &[u8]) -> Result<Value> {
    if body.is_empty() {
        return Err(Error::InvalidRequest("request body is required".to_string()));
    }
    let value: Value = serde_json::from_slice(body)
        .map_err(|e| Error::InvalidRequest(format!("malformed JSON body: {e}")))?;
    if !value.is_object() {
        return Err(Error::InvalidRequest("request body must be a JSON object".to_string()));
    }
    Ok(value)
}
