//! HTTP host for one-shot execution.

mod handlers;
mod response;

use anyhow::{Context, Result};
use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use runbox_services::ExecutionService;

#[derive(Clone)]
pub struct AppState {
    pub executions: Arc<ExecutionService>,
}

pub fn router(executions: Arc<ExecutionService>) -> Router {
    Router::new()
        .route("/execute", post(handlers::execute))
        .route(
            "/executions/:execution_id/files/*filename",
            get(handlers::get_execution_file),
        )
        .route("/health", get(handlers::health))
        .layer(TraceLayer::new_for_http())
        .with_state(AppState { executions })
}

/// Bind `listen` and serve until Ctrl-C.
pub async fn serve(listen: &str, executions: Arc<ExecutionService>) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(listen)
        .await
        .with_context(|| format!("Failed to bind {}", listen))?;
    tracing::info!(listen = %listen, "runbox listening");
    axum::serve(listener, router(executions))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Shutting down");
        })
        .await
        .context("HTTP server failed")
}
