//! Isolation backend configuration.
//!
//! Loaded from the JSON file named by `RUNBOX_SANDBOX_CONFIG`; every field
//! has a default so `{}` is a valid file.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Home-relative paths hidden from sandboxed code by default.
const SENSITIVE_HOME_PATHS: &[&str] = &[
    ".ssh",
    ".aws",
    ".gnupg",
    ".kube",
    ".docker",
    ".netrc",
    ".npmrc",
    ".pypirc",
    ".bash_history",
    ".zsh_history",
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct IsolationConfig {
    /// Master switch; `false` disables wrapping entirely
    pub enabled: bool,
    /// Fail initialization when no backend is installed
    pub required: bool,
    pub network: NetworkPolicy,
    pub filesystem: FilesystemPolicy,
}

impl Default for IsolationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            required: false,
            network: NetworkPolicy::default(),
            filesystem: FilesystemPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NetworkPolicy {
    /// Share the host network namespace with the child
    pub allow_outbound: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FilesystemPolicy {
    /// Paths masked from the child; a leading `~/` expands to $HOME
    pub deny_read: Vec<String>,
    /// Writable paths in addition to the command's working directory
    pub allow_write: Vec<PathBuf>,
}

impl Default for FilesystemPolicy {
    fn default() -> Self {
        Self {
            deny_read: SENSITIVE_HOME_PATHS
                .iter()
                .map(|p| format!("~/{}", p))
                .collect(),
            allow_write: Vec::new(),
        }
    }
}

impl FilesystemPolicy {
    /// `deny_read` with `~/` expanded. Entries whose home cannot be
    /// resolved are dropped.
    pub fn resolved_deny_read(&self) -> Vec<PathBuf> {
        let home = dirs::home_dir();
        self.deny_read
            .iter()
            .filter_map(|p| match p.strip_prefix("~/") {
                Some(rest) => home.as_ref().map(|h| h.join(rest)),
                None => Some(PathBuf::from(p)),
            })
            .collect()
    }
}

impl IsolationConfig {
    /// Config with wrapping switched off.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    /// Read the config file, or the defaults when no path is given.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read sandbox config {}", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("Invalid sandbox config {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_object_gives_defaults() {
        let cfg: IsolationConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(cfg, IsolationConfig::default());
        assert!(cfg.enabled);
        assert!(!cfg.network.allow_outbound);
        assert!(cfg.filesystem.deny_read.contains(&"~/.ssh".to_string()));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sandbox.json");
        std::fs::write(
            &path,
            r#"{"enabled":false,"network":{"allowOutbound":true},"filesystem":{"denyRead":["/etc/shadow"]}}"#,
        )
        .unwrap();
        let cfg = IsolationConfig::load(Some(&path)).unwrap();
        assert!(!cfg.enabled);
        assert!(cfg.network.allow_outbound);
        assert_eq!(
            cfg.filesystem.resolved_deny_read(),
            vec![PathBuf::from("/etc/shadow")]
        );
    }

    #[test]
    fn test_load_rejects_bad_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sandbox.json");
        std::fs::write(&path, "{not json").unwrap();
        assert!(IsolationConfig::load(Some(&path)).is_err());
    }
}
