//! Persistent deployments: a directory of code plus an entrypoint, invoked
//! as a fresh short-lived process per call.
//!
//! The registry lives in memory only; a restart forgets every deployment.
//! Invocations of one deployment share its directory and are not
//! serialized against each other.

use futures_util::future::try_join_all;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use runbox_artifact::{ArtifactUploader, UploadConfig, UploadResult};
use runbox_core::config::RuntimeConfig;
use runbox_core::observability;
use runbox_core::path_validation::{resolve_relative, resolve_writable_under_root};
use runbox_core::protocol::{BucketKind, Manifest, PatchChange};
use runbox_sandbox::{CommandSpec, IsolationConfig, SandboxManager};

use crate::bucket;
use crate::error::{Result, ServiceError};
use crate::execution::{blocking, remove_work_dir};
use crate::process::run_child;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Deployment {
    pub sandbox_id: String,
    pub work_dir: PathBuf,
    /// Entrypoint, relative to `work_dir`
    pub entry: String,
    pub namespace: Option<String>,
    pub meta_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeployResult {
    pub sandbox_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvokeResult {
    pub execution_id: String,
    /// Trimmed stdout of the entrypoint
    pub result: String,
    pub uploads: Vec<UploadResult>,
}

#[derive(Debug)]
pub struct DeploymentManager {
    config: RuntimeConfig,
    isolation: IsolationConfig,
    sandbox: Arc<SandboxManager>,
    http: reqwest::Client,
    uploader: ArtifactUploader,
    registry: RwLock<HashMap<String, Deployment>>,
}

impl DeploymentManager {
    pub fn new(config: RuntimeConfig, isolation: IsolationConfig, sandbox: Arc<SandboxManager>) -> Self {
        let http = reqwest::Client::new();
        Self {
            config,
            isolation,
            sandbox,
            uploader: ArtifactUploader::new(http.clone()),
            http,
            registry: RwLock::new(HashMap::new()),
        }
    }

    pub fn with_http_client(mut self, http: reqwest::Client) -> Self {
        self.uploader = ArtifactUploader::new(http.clone());
        self.http = http;
        self
    }

    /// Fetch the manifest at `meta_url`, materialize its files in a fresh
    /// directory and register the result.
    pub async fn deploy(&self, meta_url: &str, namespace: Option<&str>) -> Result<DeployResult> {
        let manifest = self.fetch_manifest(meta_url).await?;
        let entry = manifest
            .entry
            .as_deref()
            .map(str::trim)
            .filter(|e| !e.is_empty())
            .ok_or_else(|| ServiceError::Manifest(format!("{} has no entry", meta_url)))?
            .to_string();

        let sandbox_id = uuid::Uuid::new_v4().to_string();
        let work_dir = self.config.work_dir.join(format!("deploy-{}", sandbox_id));

        resolve_relative(&work_dir, &entry)
            .map_err(|e| ServiceError::Manifest(format!("entry: {}", e)))?;
        let targets = manifest
            .files
            .iter()
            .map(|file| {
                resolve_relative(&work_dir, &file.path)
                    .map(|dest| (dest, file.url.as_str()))
                    .map_err(|e| ServiceError::Manifest(e.to_string()))
            })
            .collect::<Result<Vec<_>>>()?;

        tokio::fs::create_dir_all(&work_dir).await.map_err(|e| {
            ServiceError::Setup(format!("Failed to create {}: {}", work_dir.display(), e))
        })?;
        let downloads = try_join_all(targets.iter().map(|(dest, url)| self.download(url, dest))).await;
        if let Err(e) = downloads {
            remove_work_dir(&work_dir).await;
            return Err(e);
        }

        let deployment = Deployment {
            sandbox_id: sandbox_id.clone(),
            work_dir,
            entry,
            namespace: namespace.map(str::to_string),
            meta_url: meta_url.to_string(),
        };
        tracing::info!(
            sandbox_id = %sandbox_id,
            meta_url = %meta_url,
            files = targets.len(),
            "Deployment registered"
        );
        observability::audit_deployment_registered(&sandbox_id, meta_url, targets.len());
        self.write_registry().insert(sandbox_id.clone(), deployment);
        Ok(DeployResult { sandbox_id })
    }

    /// Run the entrypoint with `data` as JSON on stdin. Files absent before
    /// the run are cached under `bucket/invokes/<executionId>/` and
    /// uploaded when `upload` is given. No timeout applies.
    pub async fn invoke(
        &self,
        sandbox_id: &str,
        data: &serde_json::Value,
        upload: Option<&UploadConfig>,
    ) -> Result<InvokeResult> {
        let deployment = self
            .get_deployment(sandbox_id)
            .ok_or_else(|| ServiceError::NotFound(format!("deployment {}", sandbox_id)))?;
        self.sandbox
            .initialize(&self.isolation)
            .map_err(ServiceError::setup)?;

        let before = {
            let work_dir = deployment.work_dir.clone();
            blocking(move || runbox_fs::walk_set(&work_dir)).await?
        };

        let mut command = CommandSpec::new(&self.config.python)
            .arg("-u")
            .arg(&deployment.entry)
            .env("SANDBOX_ID", sandbox_id)
            .env("PYTHONUNBUFFERED", "1")
            .current_dir(&deployment.work_dir);
        if self.sandbox.is_sandboxing_enabled() {
            command = self
                .sandbox
                .wrap_with_sandbox(command)
                .map_err(ServiceError::setup)?;
        }

        let input = serde_json::to_vec(data)
            .map_err(|e| ServiceError::validation("data", e.to_string()))?;
        let execution_id = uuid::Uuid::new_v4().to_string();
        tracing::info!(sandbox_id = %sandbox_id, execution_id = %execution_id, sandboxed = command.sandboxed, "Invoking deployment");
        let output = run_child(&command, input, None)
            .await
            .map_err(ServiceError::setup)?;
        let stderr = self
            .sandbox
            .annotate_stderr_with_sandbox_failures(&command, &output.stderr);

        if output.exit_code != Some(0) {
            tracing::warn!(
                sandbox_id = %sandbox_id,
                execution_id = %execution_id,
                exit_code = ?output.exit_code,
                signal = ?output.signal,
                "Deployment entrypoint failed"
            );
            observability::audit_deployment_invoked(sandbox_id, &execution_id, output.exit_code, 0);
            return Err(ServiceError::Process {
                exit_code: output.exit_code,
                signal: output.signal,
                stderr,
            });
        }

        let slot = bucket::slot_dir(&self.config.bucket_dir, BucketKind::Invokes, &execution_id);
        let cached = {
            let (work_dir, slot) = (deployment.work_dir.clone(), slot.clone());
            blocking(move || runbox_fs::cache_to_local_bucket(&work_dir, &slot, Some(&before))).await?
        };
        observability::audit_deployment_invoked(sandbox_id, &execution_id, output.exit_code, cached.len());

        let uploads = match upload {
            Some(cfg) if !cached.is_empty() => self
                .uploader
                .upload_files(&slot, cfg, None)
                .await
                .map_err(|e| ServiceError::Upload(format!("{:#}", e)))?,
            _ => Vec::new(),
        };

        Ok(InvokeResult {
            execution_id,
            result: output.stdout.trim().to_string(),
            uploads,
        })
    }

    /// Apply `changes` in order to the live directory. `reload` has no
    /// effect: there is no resident process to restart.
    pub async fn patch(&self, sandbox_id: &str, changes: &[PatchChange], reload: bool) -> Result<()> {
        let deployment = self
            .get_deployment(sandbox_id)
            .ok_or_else(|| ServiceError::NotFound(format!("deployment {}", sandbox_id)))?;

        for (i, change) in changes.iter().enumerate() {
            let field = format!("changes[{}].path", i);
            let target = {
                let (work_dir, path) = (deployment.work_dir.clone(), change.path().to_string());
                tokio::task::spawn_blocking(move || resolve_writable_under_root(&work_dir, &path))
                    .await
                    .map_err(|e| ServiceError::Setup(format!("Blocking task failed: {}", e)))?
                    .map_err(|e| ServiceError::validation(&field, e.to_string()))?
            };
            match change {
                // remove_file on a symlink removes the link, not its target.
                PatchChange::Delete { .. } => remove_if_present(&target).await.map_err(|e| {
                    ServiceError::Setup(format!("Failed to delete {}: {}", change.path(), e))
                })?,
                PatchChange::Add { url, .. } | PatchChange::Modify { url, .. } => {
                    let is_link = tokio::fs::symlink_metadata(&target)
                        .await
                        .is_ok_and(|meta| meta.file_type().is_symlink());
                    if is_link {
                        remove_if_present(&target).await.map_err(|e| {
                            ServiceError::Setup(format!("Failed to replace link {}: {}", change.path(), e))
                        })?;
                    }
                    self.download(url, &target).await?;
                }
            }
            tracing::debug!(sandbox_id = %sandbox_id, change = ?change, "Patch applied");
        }

        if reload {
            tracing::debug!(sandbox_id = %sandbox_id, "Reload requested; no resident process, ignored");
        }
        observability::audit_deployment_patched(sandbox_id, changes.len(), reload);
        Ok(())
    }

    /// Registered deployments, ordered by id.
    pub fn list_deployments(&self) -> Vec<Deployment> {
        let mut all: Vec<Deployment> = self.read_registry().values().cloned().collect();
        all.sort_by(|a, b| a.sandbox_id.cmp(&b.sandbox_id));
        all
    }

    pub fn get_deployment(&self, sandbox_id: &str) -> Option<Deployment> {
        self.read_registry().get(sandbox_id).cloned()
    }

    /// Unregister, then remove the directory (best-effort). Returns whether
    /// the deployment existed. Invokes already running are not cancelled.
    pub async fn delete_deployment(&self, sandbox_id: &str) -> bool {
        let removed = self.write_registry().remove(sandbox_id);
        let Some(deployment) = removed else {
            return false;
        };
        remove_work_dir(&deployment.work_dir).await;
        tracing::info!(sandbox_id = %sandbox_id, "Deployment deleted");
        observability::audit_deployment_deleted(sandbox_id);
        true
    }

    /// Path of a cached artifact in `bucket/invokes/` or `bucket/executions/`.
    pub fn get_file(&self, execution_id: &str, filename: &str, kind: BucketKind) -> Result<PathBuf> {
        bucket::resolve_file(&self.config.bucket_dir, kind, execution_id, filename)
    }

    async fn fetch_manifest(&self, meta_url: &str) -> Result<Manifest> {
        let response = self
            .http
            .get(meta_url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| ServiceError::Setup(format!("Failed to fetch manifest {}: {}", meta_url, e)))?;
        response
            .json::<Manifest>()
            .await
            .map_err(|e| ServiceError::Manifest(format!("{} is not a valid manifest: {}", meta_url, e)))
    }

    async fn download(&self, url: &str, dest: &Path) -> Result<()> {
        let setup = |what: &str, e: &dyn std::fmt::Display| {
            ServiceError::Setup(format!("{} {}: {}", what, url, e))
        };
        let bytes = self
            .http
            .get(url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| setup("Failed to download", &e))?
            .bytes()
            .await
            .map_err(|e| setup("Failed to read", &e))?;
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| setup("Failed to create parent dir for", &e))?;
        }
        tokio::fs::write(dest, &bytes)
            .await
            .map_err(|e| setup("Failed to write", &e))?;
        tracing::debug!(url = %url, dest = %dest.display(), bytes = bytes.len(), "Downloaded file");
        Ok(())
    }

    fn read_registry(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, Deployment>> {
        self.registry.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write_registry(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<String, Deployment>> {
        self.registry.write().unwrap_or_else(|e| e.into_inner())
    }
}

async fn remove_if_present(path: &Path) -> std::io::Result<()> {
    match tokio::fs::remove_file(path).await {
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}
