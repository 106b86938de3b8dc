//! Remote artifact upload.
//!
//! Pushes files from a bucket slot to an HTTP endpoint, one multipart POST
//! per file, authenticated with a bearer token.

use anyhow::{Context, Result};
use futures_util::future::try_join_all;
use reqwest::multipart::{Form, Part};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// Where and how to upload artifacts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadConfig {
    /// Bearer token sent as `Authorization`
    pub upload_token: String,
    /// Endpoint receiving the multipart POST
    pub file_upload_url: String,
    /// Visibility flag forwarded to the endpoint
    #[serde(default)]
    pub public: bool,
}

/// One successfully uploaded artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadResult {
    /// Path relative to the uploaded directory
    pub filename: String,
    /// HTTP status returned by the endpoint
    pub status: u16,
    /// Endpoint response body; `null` when it was not JSON
    pub response: serde_json::Value,
}

/// HTTP client for the file upload endpoint.
#[derive(Debug, Clone, Default)]
pub struct ArtifactUploader {
    http: reqwest::Client,
}

impl ArtifactUploader {
    pub fn new(http: reqwest::Client) -> Self {
        Self { http }
    }

    /// Upload every file under `dir` whose relative path is not in `exclude`.
    ///
    /// Files go up concurrently; the first failure aborts the batch.
    /// Results keep the sorted order of [`runbox_fs::walk`].
    pub async fn upload_files(
        &self,
        dir: &Path,
        config: &UploadConfig,
        exclude: Option<&HashSet<PathBuf>>,
    ) -> Result<Vec<UploadResult>> {
        let files: Vec<PathBuf> = runbox_fs::walk(dir)?
            .into_iter()
            .filter(|rel| !exclude.is_some_and(|ex| ex.contains(rel)))
            .collect();
        if files.is_empty() {
            return Ok(Vec::new());
        }
        tracing::info!(
            dir = %dir.display(),
            files = files.len(),
            public = config.public,
            "Uploading artifacts"
        );
        try_join_all(files.iter().map(|rel| self.upload_one(dir, rel, config))).await
    }

    async fn upload_one(&self, dir: &Path, rel: &Path, config: &UploadConfig) -> Result<UploadResult> {
        let filename = rel.to_string_lossy().replace('\\', "/");
        let bytes = tokio::fs::read(dir.join(rel))
            .await
            .with_context(|| format!("Failed to read artifact {}", filename))?;

        let part = Part::bytes(bytes).file_name(filename.clone());
        let form = Form::new()
            .part("file", part)
            .text("path", filename.clone())
            .text("public", config.public.to_string());

        let resp = self
            .http
            .post(&config.file_upload_url)
            .bearer_auth(&config.upload_token)
            .multipart(form)
            .send()
            .await
            .with_context(|| format!("Upload request failed for {}", filename))?;

        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        if !status.is_success() {
            anyhow::bail!(
                "Upload of {} rejected with HTTP {}: {}",
                filename,
                status.as_u16(),
                truncate(&body, 200)
            );
        }
        Ok(UploadResult {
            filename,
            status: status.as_u16(),
            response: serde_json::from_str(&body).unwrap_or(serde_json::Value::Null),
        })
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
