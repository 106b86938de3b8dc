use axum::{
    body::{Body, Bytes},
    extract::{Path, State},
    http::{header, StatusCode},
    response::{AppendHeaders, IntoResponse, Json as ResponseJson, Response},
};
use serde_json::json;
use tokio_util::io::ReaderStream;
use tracing::info;

use runbox_services::{ExecuteRequest, ServiceError};

use super::response::ApiError;
use super::AppState;

/// POST /execute
pub async fn execute(State(state): State<AppState>, body: Bytes) -> Result<Response, ApiError> {
    let request = ExecuteRequest::parse(&body, state.executions.config().max_timeout_ms)?;
    info!(
        code_len = request.code.len(),
        timeout_ms = ?request.timeout_ms,
        upload = request.upload.is_some(),
        "Execute request"
    );
    let result = state.executions.execute(request).await?;
    Ok((StatusCode::OK, ResponseJson(result)).into_response())
}

/// GET /executions/:execution_id/files/*filename
pub async fn get_execution_file(
    State(state): State<AppState>,
    Path((execution_id, filename)): Path<(String, String)>,
) -> Result<Response, ApiError> {
    let filename = filename.trim_start_matches('/');
    let path = state.executions.get_file(&execution_id, filename)?;
    let file = tokio::fs::File::open(&path)
        .await
        .map_err(|_| ServiceError::NotFound(format!("{}/{}", execution_id, filename)))?;
    let mut headers = vec![(header::CONTENT_TYPE, "application/octet-stream".to_string())];
    if let Ok(meta) = file.metadata().await {
        headers.push((header::CONTENT_LENGTH, meta.len().to_string()));
    }
    let body = Body::from_stream(ReaderStream::new(file));
    Ok((StatusCode::OK, AppendHeaders(headers), body).into_response())
}

/// GET /health
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let available = state.executions.sandbox_available().await;
    let reason = state.executions.probe().unavailable_reason().map(str::to_string);
    ResponseJson(json!({
        "status": "ok",
        "sandbox": { "available": available, "reason": reason },
    }))
}
