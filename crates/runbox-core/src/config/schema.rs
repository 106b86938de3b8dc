//! Config structs grouped by concern, loaded from the environment.

use super::env_keys::{observability as obv_keys, runtime as rt_keys, server as srv_keys};
use super::loader::{env_bool, env_optional, env_or, env_parse, load_dotenv};
use std::path::PathBuf;

/// Default upper bound for one-shot execution timeouts (10 minutes).
pub const DEFAULT_MAX_TIMEOUT_MS: u64 = 600_000;

/// Default HTTP listen address.
pub const DEFAULT_LISTEN_ADDR: &str = "127.0.0.1:8787";

/// Interpreter and directory layout shared by the execution service and
/// the deployment manager.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Python interpreter used for both one-shot runs and deployments
    pub python: PathBuf,
    /// Content bucket root; artifacts land in `executions/` and `invokes/`
    pub bucket_dir: PathBuf,
    /// Parent of per-run temp dirs and deployment dirs
    pub work_dir: PathBuf,
    /// Optional JSON file with the isolation backend config
    pub sandbox_config: Option<PathBuf>,
    /// Largest `timeoutMs` a request may ask for
    pub max_timeout_ms: u64,
}

impl RuntimeConfig {
    pub fn from_env() -> Self {
        load_dotenv();
        let python = env_optional(rt_keys::RUNBOX_PYTHON, rt_keys::PYTHON_ALIASES)
            .map(PathBuf::from)
            .unwrap_or_else(default_python);
        let bucket_dir = env_optional(rt_keys::RUNBOX_BUCKET_DIR, &[])
            .map(PathBuf::from)
            .unwrap_or_else(default_bucket_dir);
        let work_dir = env_optional(rt_keys::RUNBOX_WORK_DIR, &[])
            .map(PathBuf::from)
            .unwrap_or_else(std::env::temp_dir);
        let sandbox_config = env_optional(rt_keys::RUNBOX_SANDBOX_CONFIG, &[]).map(PathBuf::from);
        let max_timeout_ms = env_parse(rt_keys::RUNBOX_MAX_TIMEOUT_MS, &[], DEFAULT_MAX_TIMEOUT_MS);
        Self {
            python,
            bucket_dir,
            work_dir,
            sandbox_config,
            max_timeout_ms,
        }
    }

    /// Config rooted at explicit directories (tests, embedding).
    pub fn with_dirs(bucket_dir: impl Into<PathBuf>, work_dir: impl Into<PathBuf>) -> Self {
        Self {
            python: default_python(),
            bucket_dir: bucket_dir.into(),
            work_dir: work_dir.into(),
            sandbox_config: None,
            max_timeout_ms: DEFAULT_MAX_TIMEOUT_MS,
        }
    }
}

/// `python3` on PATH, falling back to the bare name so spawn errors name it.
fn default_python() -> PathBuf {
    which::which("python3")
        .or_else(|_| which::which("python"))
        .unwrap_or_else(|_| PathBuf::from("python3"))
}

fn default_bucket_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(".runbox")
        .join("bucket")
}

/// HTTP server settings
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub listen: String,
}

impl ServerConfig {
    pub fn from_env() -> Self {
        load_dotenv();
        Self {
            listen: env_or(srv_keys::RUNBOX_LISTEN, srv_keys::LISTEN_ALIASES, || {
                DEFAULT_LISTEN_ADDR.to_string()
            }),
        }
    }
}

/// Observability: quiet, log_level, log_json, audit_log
#[derive(Debug, Clone)]
pub struct ObservabilityConfig {
    pub quiet: bool,
    pub log_level: String,
    pub log_json: bool,
    pub audit_log: Option<String>,
}

impl ObservabilityConfig {
    pub fn from_env() -> &'static Self {
        use std::sync::OnceLock;
        static CACHE: OnceLock<ObservabilityConfig> = OnceLock::new();
        CACHE.get_or_init(|| {
            load_dotenv();
            Self {
                quiet: env_bool(obv_keys::RUNBOX_QUIET, &[], false),
                log_level: env_or(
                    obv_keys::RUNBOX_LOG_LEVEL,
                    obv_keys::LOG_LEVEL_ALIASES,
                    || "runbox=info".to_string(),
                ),
                log_json: env_bool(obv_keys::RUNBOX_LOG_JSON, &[], false),
                audit_log: env_optional(obv_keys::RUNBOX_AUDIT_LOG, &[]),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_with_dirs_uses_defaults() {
        let cfg = RuntimeConfig::with_dirs("/tmp/bucket", "/tmp/work");
        assert_eq!(cfg.bucket_dir, PathBuf::from("/tmp/bucket"));
        assert_eq!(cfg.work_dir, PathBuf::from("/tmp/work"));
        assert_eq!(cfg.max_timeout_ms, DEFAULT_MAX_TIMEOUT_MS);
        assert!(cfg.sandbox_config.is_none());
        assert!(!cfg.python.as_os_str().is_empty());
    }
}
