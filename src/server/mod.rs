//! HTTP surface for dispatch, analysis and execution polling

mod handlers;
mod response;

use anyhow::{Context, Result};
use axum::{
    routing::{get, post},
    Router,
};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::CorsLayer;
use tracing::info;

use crate::advisor::Advisor;
use crate::auth::IdentityVerifier;
use crate::dispatch::Dispatcher;
use crate::store::ExecutionStore;

pub use response::{DispatchResponse, DispatchResult};

/// Shared state behind every handler
pub struct AppState {
    pub dispatcher: Arc<Dispatcher>,
    pub store: Arc<dyn ExecutionStore>,
    pub advisor: Option<Arc<dyn Advisor>>,
    pub verifier: Arc<dyn IdentityVerifier>,
    /// Deadline for answering a dispatch request
    pub request_timeout: Duration,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(handlers::health))
        .route("/v1/automation", post(handlers::dispatch))
        .route("/v1/chat", post(handlers::chat))
        .route("/v1/executions", get(handlers::list_executions))
        .route("/v1/executions/{id}", get(handlers::get_execution))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Serve until `shutdown` resolves
pub async fn serve(
    bind: &str,
    state: Arc<AppState>,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .with_context(|| format!("Failed to bind {}", bind))?;

    info!("Listening on {}", listener.local_addr()?);
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await?;

    Ok(())
}
