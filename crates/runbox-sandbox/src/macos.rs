#![cfg(target_os = "macos")]

//! macOS isolation via Seatbelt (`sandbox-exec -p <profile>`).

use anyhow::Result;
use std::ffi::OsString;
use std::path::{Path, PathBuf};

use crate::backend::IsolationBackend;
use crate::command::CommandSpec;
use crate::config::IsolationConfig;

const SANDBOX_EXEC: &str = "/usr/bin/sandbox-exec";

#[derive(Debug, Clone)]
pub struct SeatbeltBackend {
    sandbox_exec: PathBuf,
}

impl SeatbeltBackend {
    pub fn detect() -> std::result::Result<Self, String> {
        let path = PathBuf::from(SANDBOX_EXEC);
        if path.exists() {
            Ok(Self { sandbox_exec: path })
        } else {
            which::which("sandbox-exec")
                .map(|p| Self { sandbox_exec: p })
                .map_err(|_| "sandbox-exec not available".to_string())
        }
    }
}

/// Quote a path for a Seatbelt string literal.
fn sb_quote(path: &Path) -> String {
    let raw = path.to_string_lossy();
    format!("\"{}\"", raw.replace('\\', "\\\\").replace('"', "\\\""))
}

/// Seatbelt resolves symlinks (/tmp -> /private/tmp), so rules use
/// canonical paths when they exist.
fn canonical(path: &Path) -> PathBuf {
    path.canonicalize().unwrap_or_else(|_| path.to_path_buf())
}

pub(crate) fn build_profile(cwd: Option<&Path>, config: &IsolationConfig) -> String {
    let mut profile = String::from("(version 1)\n(allow default)\n");

    profile.push_str("(deny file-write*)\n(allow file-write*\n");
    if let Some(cwd) = cwd {
        profile.push_str(&format!("    (subpath {})\n", sb_quote(&canonical(cwd))));
    }
    for path in &config.filesystem.allow_write {
        profile.push_str(&format!("    (subpath {})\n", sb_quote(&canonical(path))));
    }
    profile.push_str("    (subpath \"/private/tmp\")\n");
    profile.push_str("    (subpath \"/private/var/folders\")\n");
    profile.push_str("    (literal \"/dev/null\"))\n");

    for path in config.filesystem.resolved_deny_read() {
        profile.push_str(&format!(
            "(deny file-read* (subpath {}))\n",
            sb_quote(&canonical(&path))
        ));
    }

    if !config.network.allow_outbound {
        profile.push_str("(deny network*)\n");
    }
    profile
}

impl IsolationBackend for SeatbeltBackend {
    fn name(&self) -> &str {
        "seatbelt"
    }

    fn wrap(&self, command: CommandSpec, config: &IsolationConfig) -> Result<CommandSpec> {
        let profile = build_profile(command.cwd.as_deref(), config);
        let mut args: Vec<OsString> = vec!["-p".into(), profile.into()];
        args.push(command.program.into_os_string());
        args.extend(command.args);
        Ok(CommandSpec {
            program: self.sandbox_exec.clone(),
            args,
            env: command.env,
            cwd: command.cwd,
            sandboxed: true,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_profile_denies_network_by_default() {
        let profile = build_profile(Some(Path::new("/private/tmp/x")), &IsolationConfig::default());
        assert!(profile.contains("(deny network*)"));
        assert!(profile.contains("(deny file-write*)"));
    }

    #[test]
    fn test_profile_allows_network_when_configured() {
        let mut config = IsolationConfig::default();
        config.network.allow_outbound = true;
        assert!(!build_profile(None, &config).contains("(deny network*)"));
    }

    #[test]
    fn test_quote_escapes() {
        assert_eq!(sb_quote(Path::new("/a\"b")), "\"/a\\\"b\"");
    }
}
