use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::{Deserialize, Serialize};
use tracing::{error, warn};

use crate::dispatch::DispatchReceipt;
use crate::error::Error;

/// Body of a 202 dispatch answer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchResponse {
    pub status: String,
    pub execution_id: String,
    pub result: DispatchResult,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchResult {
    /// Rendered plan text
    pub message: String,
    pub recommendations_processed: usize,
    pub status: String,
}

impl From<DispatchReceipt> for DispatchResponse {
    fn from(receipt: DispatchReceipt) -> Self {
        Self {
            status: "accepted".to_string(),
            execution_id: receipt.execution_id,
            result: DispatchResult {
                recommendations_processed: receipt.plan.total_records(),
                message: receipt.plan.text,
                status: "in_progress".to_string(),
            },
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let body = self.body();
        let status = StatusCode::from_u16(body.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        if status.is_server_error() {
            error!("Request failed: {}", body.message);
        } else {
            warn!("Request rejected: {}", body.message);
        }

        (status, Json(body)).into_response()
    }
}
