//! SandboxManager: process-wide handle on the isolation backend.
//!
//! `initialize` is idempotent; the first successful call fixes the backend
//! and config for the lifetime of the manager.

use anyhow::{bail, Result};
use std::sync::{Arc, Mutex};

use crate::backend::{detect_native_backend, IsolationBackend};
use crate::command::CommandSpec;
use crate::config::IsolationConfig;

/// Stderr fragments that indicate the sandbox, not the program, refused
/// an operation.
const VIOLATION_PATTERNS: &[&str] = &[
    "Operation not permitted",
    "Permission denied",
    "Read-only file system",
    "bwrap:",
    "sandbox-exec:",
];

#[derive(Debug)]
struct ActiveSandbox {
    backend: Option<Box<dyn IsolationBackend>>,
    config: IsolationConfig,
    disabled_reason: Option<String>,
}

#[derive(Debug, Default)]
pub struct SandboxManager {
    state: Mutex<Option<Arc<ActiveSandbox>>>,
}

impl SandboxManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Detect and activate the platform backend. Later calls are no-ops.
    pub fn initialize(&self, config: &IsolationConfig) -> Result<()> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| anyhow::anyhow!("sandbox manager lock poisoned"))?;
        if state.is_some() {
            return Ok(());
        }

        let active = if !config.enabled {
            tracing::debug!("Sandboxing disabled by configuration");
            ActiveSandbox {
                backend: None,
                config: config.clone(),
                disabled_reason: Some("sandboxing disabled by configuration".to_string()),
            }
        } else {
            match detect_native_backend() {
                Ok(backend) => {
                    tracing::info!(backend = backend.name(), "Sandbox backend initialized");
                    ActiveSandbox {
                        backend: Some(backend),
                        config: config.clone(),
                        disabled_reason: None,
                    }
                }
                Err(reason) if config.required => {
                    bail!("Sandbox required but unavailable: {}", reason);
                }
                Err(reason) => {
                    tracing::warn!(reason = %reason, "No sandbox backend; commands run unwrapped");
                    ActiveSandbox {
                        backend: None,
                        config: config.clone(),
                        disabled_reason: Some(reason),
                    }
                }
            }
        };
        *state = Some(Arc::new(active));
        Ok(())
    }

    fn active(&self) -> Option<Arc<ActiveSandbox>> {
        self.state.lock().ok().and_then(|s| s.clone())
    }

    pub fn is_initialized(&self) -> bool {
        self.active().is_some()
    }

    pub fn is_sandboxing_enabled(&self) -> bool {
        self.active().is_some_and(|a| a.backend.is_some())
    }

    /// Why commands run unwrapped, if they do.
    pub fn disabled_reason(&self) -> Option<String> {
        match self.active() {
            None => Some("sandbox not initialized".to_string()),
            Some(a) => a.disabled_reason.clone(),
        }
    }

    /// Wrap `command` with the active backend. Fails when no backend is
    /// active; callers check [`SandboxManager::is_sandboxing_enabled`].
    pub fn wrap_with_sandbox(&self, command: CommandSpec) -> Result<CommandSpec> {
        let Some(active) = self.active() else {
            bail!("Sandbox manager not initialized");
        };
        let Some(ref backend) = active.backend else {
            bail!(
                "Sandboxing is not enabled: {}",
                active.disabled_reason.as_deref().unwrap_or("no backend")
            );
        };
        backend.wrap(command, &active.config)
    }

    /// Append a `<sandbox_violations>` block listing stderr lines that look
    /// like sandbox denials. Unwrapped commands pass through unchanged.
    pub fn annotate_stderr_with_sandbox_failures(
        &self,
        command: &CommandSpec,
        stderr: &str,
    ) -> String {
        if !command.sandboxed {
            return stderr.to_string();
        }
        let violations: Vec<&str> = stderr
            .lines()
            .filter(|line| VIOLATION_PATTERNS.iter().any(|p| line.contains(p)))
            .collect();
        if violations.is_empty() {
            return stderr.to_string();
        }

        let mut out = stderr.to_string();
        if !out.is_empty() && !out.ends_with('\n') {
            out.push('\n');
        }
        out.push_str("<sandbox_violations>\n");
        for line in violations {
            out.push_str(line);
            out.push('\n');
        }
        out.push_str("</sandbox_violations>");
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct EchoBackend;

    impl IsolationBackend for EchoBackend {
        fn name(&self) -> &str {
            "echo"
        }

        fn wrap(&self, command: CommandSpec, _config: &IsolationConfig) -> Result<CommandSpec> {
            let mut wrapped = CommandSpec::new("echo").arg(command.program.into_os_string());
            wrapped.args.extend(command.args);
            wrapped.env = command.env;
            wrapped.cwd = command.cwd;
            wrapped.sandboxed = true;
            Ok(wrapped)
        }
    }

    fn manager_with(backend: Box<dyn IsolationBackend>) -> SandboxManager {
        let manager = SandboxManager::new();
        *manager.state.lock().unwrap() = Some(Arc::new(ActiveSandbox {
            backend: Some(backend),
            config: IsolationConfig::default(),
            disabled_reason: None,
        }));
        manager
    }

    #[test]
    fn test_disabled_config_initializes_without_backend() {
        let manager = SandboxManager::new();
        assert!(!manager.is_initialized());
        manager.initialize(&IsolationConfig::disabled()).unwrap();
        assert!(manager.is_initialized());
        assert!(!manager.is_sandboxing_enabled());
        assert!(manager.wrap_with_sandbox(CommandSpec::new("true")).is_err());
        assert!(manager.disabled_reason().unwrap().contains("disabled"));
    }

    #[test]
    fn test_initialize_is_idempotent() {
        let manager = SandboxManager::new();
        manager.initialize(&IsolationConfig::disabled()).unwrap();
        // A second call with a different config does not replace the first.
        let _ = manager.initialize(&IsolationConfig::default());
        assert!(!manager.is_sandboxing_enabled());
    }

    #[test]
    fn test_wrap_delegates_to_backend() {
        let manager = manager_with(Box::new(EchoBackend));
        let wrapped = manager
            .wrap_with_sandbox(CommandSpec::new("python3").arg("-u").current_dir("/tmp"))
            .unwrap();
        assert!(wrapped.sandboxed);
        assert_eq!(wrapped.display_program(), "echo");
        assert_eq!(wrapped.cwd.as_deref(), Some(std::path::Path::new("/tmp")));
    }

    #[test]
    fn test_annotate_only_wrapped_commands() {
        let manager = SandboxManager::new();
        let stderr = "open('/etc/x'): Permission denied\nother line";

        let plain = CommandSpec::new("python3");
        assert_eq!(manager.annotate_stderr_with_sandbox_failures(&plain, stderr), stderr);

        let mut wrapped = CommandSpec::new("bwrap");
        wrapped.sandboxed = true;
        let annotated = manager.annotate_stderr_with_sandbox_failures(&wrapped, stderr);
        assert!(annotated.starts_with(stderr));
        assert!(annotated.contains("<sandbox_violations>\nopen('/etc/x'): Permission denied\n</sandbox_violations>"));
        assert!(!annotated.contains("<sandbox_violations>\nother line"));
    }

    #[test]
    fn test_annotate_leaves_clean_stderr_alone() {
        let manager = SandboxManager::new();
        let mut wrapped = CommandSpec::new("bwrap");
        wrapped.sandboxed = true;
        let stderr = "Traceback (most recent call last):\nValueError: bad";
        assert_eq!(manager.annotate_stderr_with_sandbox_failures(&wrapped, stderr), stderr);
    }
}
