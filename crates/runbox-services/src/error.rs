//! Error taxonomy of the service layer.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServiceError {
    /// Malformed request, rejected before any process or directory exists.
    #[error("Invalid request field '{field}': {message}")]
    Validation { field: String, message: String },

    /// Isolation init, spawn, manifest fetch, download or filesystem setup.
    #[error("Setup failed: {0}")]
    Setup(String),

    /// Manifest missing `entry` or declaring unsafe paths.
    #[error("Invalid manifest: {0}")]
    Manifest(String),

    /// Entrypoint exited non-zero or was killed during invoke.
    #[error("Process failed ({}): {stderr}", describe_exit(*exit_code, signal.as_deref()))]
    Process {
        exit_code: Option<i32>,
        signal: Option<String>,
        stderr: String,
    },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Upload failed: {0}")]
    Upload(String),
}

fn describe_exit(exit_code: Option<i32>, signal: Option<&str>) -> String {
    match (exit_code, signal) {
        (Some(code), _) => format!("exit code {}", code),
        (None, Some(sig)) => format!("killed by {}", sig),
        (None, None) => "no exit status".to_string(),
    }
}

impl ServiceError {
    pub fn validation(field: &str, message: impl Into<String>) -> Self {
        Self::Validation {
            field: field.to_string(),
            message: message.into(),
        }
    }

    /// Setup error carrying the whole `anyhow` context chain.
    pub fn setup(err: anyhow::Error) -> Self {
        Self::Setup(format!("{:#}", err))
    }

    /// HTTP status an outer layer should answer with.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Validation { .. } => 400,
            Self::NotFound(_) => 404,
            Self::Setup(_) | Self::Manifest(_) | Self::Process { .. } | Self::Upload(_) => 500,
        }
    }
}

pub type Result<T> = std::result::Result<T, ServiceError>;
