//! One-shot execution of untrusted Python in a throwaway directory.
//!
//! Every run gets a fresh work dir, is snapshotted into
//! `bucket/executions/<executionId>/` whatever its outcome, and has its
//! work dir removed before the envelope is returned. Crashes of the
//! executed code are data (exit code and stderr), never errors.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use runbox_artifact::{ArtifactUploader, UploadConfig, UploadResult};
use runbox_core::config::RuntimeConfig;
use runbox_core::observability;
use runbox_core::protocol::BucketKind;
use runbox_sandbox::{CommandSpec, IsolationConfig, SandboxManager, SandboxProbe};

use crate::bucket;
use crate::error::{Result, ServiceError};
use crate::process::run_child;

/// Validated `POST /execute` body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecuteRequest {
    pub code: String,
    pub timeout_ms: Option<u64>,
    pub upload: Option<UploadConfig>,
}

impl ExecuteRequest {
    pub fn new(code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            timeout_ms: None,
            upload: None,
        }
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    pub fn with_upload(mut self, upload: UploadConfig) -> Self {
        self.upload = Some(upload);
        self
    }

    /// Decode and validate a raw JSON body. Field-level problems are
    /// reported as [`ServiceError::Validation`] naming the wire field.
    pub fn parse(body: &[u8], max_timeout_ms: u64) -> Result<Self> {
        let value: Value = serde_json::from_slice(body)
            .map_err(|e| ServiceError::validation("body", format!("malformed JSON: {}", e)))?;
        let Value::Object(obj) = value else {
            return Err(ServiceError::validation("body", "expected a JSON object"));
        };

        let code = match obj.get("code") {
            Some(Value::String(s)) => s.clone(),
            Some(_) => return Err(ServiceError::validation("code", "must be a string")),
            None => return Err(ServiceError::validation("code", "is required")),
        };

        let timeout_ms = match obj.get("timeoutMs") {
            None | Some(Value::Null) => None,
            Some(v) => Some(v.as_u64().ok_or_else(|| {
                ServiceError::validation("timeoutMs", "must be a positive integer")
            })?),
        };

        let upload_token = optional_string(&obj, "uploadToken")?;
        let file_upload_url = optional_string(&obj, "fileUploadUrl")?;
        let public = match obj.get("public") {
            None | Some(Value::Null) => false,
            Some(Value::Bool(b)) => *b,
            Some(_) => return Err(ServiceError::validation("public", "must be a boolean")),
        };

        let upload = match (upload_token, file_upload_url) {
            (None, None) => None,
            (Some(_), None) => {
                return Err(ServiceError::validation(
                    "fileUploadUrl",
                    "is required when uploadToken is set",
                ))
            }
            (None, Some(_)) => {
                return Err(ServiceError::validation(
                    "uploadToken",
                    "is required when fileUploadUrl is set",
                ))
            }
            (Some(upload_token), Some(file_upload_url)) => Some(UploadConfig {
                upload_token,
                file_upload_url,
                public,
            }),
        };

        let request = Self {
            code,
            timeout_ms,
            upload,
        };
        request.validate(max_timeout_ms)?;
        Ok(request)
    }

    /// Checks that hold for typed callers as well as HTTP bodies.
    pub fn validate(&self, max_timeout_ms: u64) -> Result<()> {
        if self.code.trim().is_empty() {
            return Err(ServiceError::validation("code", "must not be empty"));
        }
        if let Some(ms) = self.timeout_ms {
            if ms == 0 {
                return Err(ServiceError::validation("timeoutMs", "must be a positive integer"));
            }
            if ms > max_timeout_ms {
                return Err(ServiceError::validation(
                    "timeoutMs",
                    format!("must not exceed {}", max_timeout_ms),
                ));
            }
        }
        if let Some(ref upload) = self.upload {
            if upload.upload_token.trim().is_empty() {
                return Err(ServiceError::validation("uploadToken", "must not be empty"));
            }
            let url = reqwest::Url::parse(&upload.file_upload_url).map_err(|e| {
                ServiceError::validation("fileUploadUrl", format!("invalid URL: {}", e))
            })?;
            if !matches!(url.scheme(), "http" | "https") {
                return Err(ServiceError::validation(
                    "fileUploadUrl",
                    "must be an http or https URL",
                ));
            }
        }
        Ok(())
    }
}

fn optional_string(obj: &Map<String, Value>, field: &str) -> Result<Option<String>> {
    match obj.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(_) => Err(ServiceError::validation(field, "must be a string")),
    }
}

/// Envelope returned for every run that got as far as spawning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    pub execution_id: String,
    pub exit_code: Option<i32>,
    pub signal: Option<String>,
    pub stdout: String,
    pub stderr: String,
    pub uploads: Vec<UploadResult>,
}

#[derive(Debug)]
pub struct ExecutionService {
    config: RuntimeConfig,
    isolation: IsolationConfig,
    sandbox: Arc<SandboxManager>,
    probe: Arc<SandboxProbe>,
    uploader: ArtifactUploader,
}

impl ExecutionService {
    pub fn new(config: RuntimeConfig, isolation: IsolationConfig, sandbox: Arc<SandboxManager>) -> Self {
        let probe = Arc::new(SandboxProbe::new(Arc::clone(&sandbox), isolation.clone()));
        Self {
            config,
            isolation,
            sandbox,
            probe,
            uploader: ArtifactUploader::default(),
        }
    }

    pub fn with_uploader(mut self, uploader: ArtifactUploader) -> Self {
        self.uploader = uploader;
        self
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn probe(&self) -> &SandboxProbe {
        &self.probe
    }

    /// Run the probe off the async threads; memoized after the first call.
    pub async fn sandbox_available(&self) -> bool {
        if let Some(outcome) = self.probe.cached() {
            return outcome.available;
        }
        let probe = Arc::clone(&self.probe);
        tokio::task::spawn_blocking(move || probe.is_available())
            .await
            .unwrap_or(false)
    }

    pub async fn execute(&self, request: ExecuteRequest) -> Result<ExecutionResult> {
        request.validate(self.config.max_timeout_ms)?;
        self.sandbox
            .initialize(&self.isolation)
            .map_err(ServiceError::setup)?;

        let execution_id = uuid::Uuid::new_v4().to_string();
        let work_dir = self.allocate_work_dir(&execution_id).await?;
        tracing::info!(execution_id = %execution_id, work_dir = %work_dir.display(), "Execution started");

        let outcome = self.run_in(&execution_id, &work_dir, &request).await;
        remove_work_dir(&work_dir).await;
        let result = outcome?;

        tracing::info!(
            execution_id = %result.execution_id,
            exit_code = ?result.exit_code,
            signal = ?result.signal,
            uploads = result.uploads.len(),
            "Execution finished"
        );
        Ok(result)
    }

    /// Path of a snapshotted artifact, for `GET /executions/:id/files/*`.
    pub fn get_file(&self, execution_id: &str, filename: &str) -> Result<PathBuf> {
        bucket::resolve_file(&self.config.bucket_dir, BucketKind::Executions, execution_id, filename)
    }

    async fn allocate_work_dir(&self, execution_id: &str) -> Result<PathBuf> {
        tokio::fs::create_dir_all(&self.config.work_dir).await.map_err(|e| {
            ServiceError::Setup(format!(
                "Failed to create work root {}: {}",
                self.config.work_dir.display(),
                e
            ))
        })?;
        let dir = self.config.work_dir.join(format!("runbox-exec-{}", execution_id));
        // create_dir (not _all): an existing dir means the id collided.
        tokio::fs::create_dir(&dir).await.map_err(|e| {
            ServiceError::Setup(format!("Failed to create work dir {}: {}", dir.display(), e))
        })?;
        Ok(dir)
    }

    async fn run_in(
        &self,
        execution_id: &str,
        work_dir: &Path,
        request: &ExecuteRequest,
    ) -> Result<ExecutionResult> {
        let mut command = CommandSpec::new(&self.config.python)
            .args(["-u", "-"])
            .env("PYTHONUNBUFFERED", "1")
            .current_dir(work_dir);

        let mut fallback_note = None;
        if self.sandbox_available().await {
            command = self
                .sandbox
                .wrap_with_sandbox(command)
                .map_err(ServiceError::setup)?;
        } else {
            let reason = self.probe.unavailable_reason().unwrap_or("unknown");
            observability::security_sandbox_fallback(execution_id, reason);
            fallback_note = Some(self.probe.unavailable_note());
        }

        observability::audit_execution_started(
            execution_id,
            &command.display_program(),
            command.sandboxed,
            &work_dir.to_string_lossy(),
        );
        let started = Instant::now();
        let timeout = request.timeout_ms.map(Duration::from_millis);
        let output = run_child(&command, request.code.clone().into_bytes(), timeout)
            .await
            .map_err(ServiceError::setup)?;
        observability::audit_execution_completed(
            execution_id,
            output.exit_code,
            output.signal.as_deref(),
            started.elapsed().as_millis() as u64,
            output.stdout.len(),
        );

        let mut stderr = self
            .sandbox
            .annotate_stderr_with_sandbox_failures(&command, &output.stderr);
        if let Some(note) = fallback_note {
            if !stderr.is_empty() && !stderr.ends_with('\n') {
                stderr.push('\n');
            }
            stderr.push_str(&note);
        }

        let snapshot_dir = bucket::slot_dir(&self.config.bucket_dir, BucketKind::Executions, execution_id);
        let cached = {
            let (work_dir, snapshot_dir) = (work_dir.to_path_buf(), snapshot_dir.clone());
            blocking(move || runbox_fs::cache_to_local_bucket(&work_dir, &snapshot_dir, None)).await?
        };
        tracing::debug!(execution_id = %execution_id, files = cached.len(), "Execution snapshot cached");

        let uploads = match request.upload {
            Some(ref upload) if !cached.is_empty() => self
                .uploader
                .upload_files(&snapshot_dir, upload, None)
                .await
                .map_err(|e| ServiceError::Upload(format!("{:#}", e)))?,
            _ => Vec::new(),
        };

        Ok(ExecutionResult {
            execution_id: execution_id.to_string(),
            exit_code: output.exit_code,
            signal: output.signal,
            stdout: output.stdout,
            stderr,
            uploads,
        })
    }
}

/// Run synchronous filesystem work on the blocking pool.
pub(crate) async fn blocking<T, F>(work: F) -> Result<T>
where
    F: FnOnce() -> anyhow::Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| ServiceError::Setup(format!("Blocking task failed: {}", e)))?
        .map_err(ServiceError::setup)
}

/// Best-effort recursive removal; failures are logged, never returned.
pub(crate) async fn remove_work_dir(dir: &Path) {
    if let Err(e) = tokio::fs::remove_dir_all(dir).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            tracing::warn!(dir = %dir.display(), error = %e, "Failed to remove work dir");
        }
    }
}
