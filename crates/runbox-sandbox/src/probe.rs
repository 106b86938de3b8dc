//! One-time check that wrapped commands actually start.
//!
//! A backend binary can be installed yet unusable (unprivileged user
//! namespaces disabled, nested containers). The probe runs `true` through
//! the wrapper once and remembers the answer.

use std::process::Stdio;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use crate::command::CommandSpec;
use crate::common::wait_with_timeout;
use crate::config::IsolationConfig;
use crate::manager::SandboxManager;

pub const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeOutcome {
    pub available: bool,
    pub reason: Option<String>,
}

#[derive(Debug)]
pub struct SandboxProbe {
    manager: Arc<SandboxManager>,
    config: IsolationConfig,
    outcome: OnceLock<ProbeOutcome>,
}

impl SandboxProbe {
    pub fn new(manager: Arc<SandboxManager>, config: IsolationConfig) -> Self {
        Self {
            manager,
            config,
            outcome: OnceLock::new(),
        }
    }

    /// Blocking on first call (up to [`PROBE_TIMEOUT`]); memoized after.
    pub fn is_available(&self) -> bool {
        self.outcome().available
    }

    pub fn outcome(&self) -> &ProbeOutcome {
        self.outcome.get_or_init(|| {
            let outcome = match self.run() {
                Ok(()) => ProbeOutcome {
                    available: true,
                    reason: None,
                },
                Err(reason) => ProbeOutcome {
                    available: false,
                    reason: Some(reason),
                },
            };
            tracing::info!(
                available = outcome.available,
                reason = outcome.reason.as_deref().unwrap_or(""),
                "Sandbox availability probed"
            );
            outcome
        })
    }

    /// Memoized outcome if the probe already ran.
    pub fn cached(&self) -> Option<&ProbeOutcome> {
        self.outcome.get()
    }

    pub fn unavailable_reason(&self) -> Option<&str> {
        self.outcome().reason.as_deref()
    }

    /// Line appended to stderr of runs that went ahead unsandboxed.
    pub fn unavailable_note(&self) -> String {
        format!(
            "[runbox] sandbox unavailable, code ran without isolation: {}",
            self.unavailable_reason().unwrap_or("unknown reason")
        )
    }

    fn run(&self) -> Result<(), String> {
        self.manager
            .initialize(&self.config)
            .map_err(|e| e.to_string())?;
        if !self.manager.is_sandboxing_enabled() {
            return Err(self
                .manager
                .disabled_reason()
                .unwrap_or_else(|| "sandboxing disabled".to_string()));
        }

        let cwd = std::env::temp_dir();
        let wrapped = self
            .manager
            .wrap_with_sandbox(CommandSpec::new("true").current_dir(&cwd))
            .map_err(|e| e.to_string())?;
        let mut child = wrapped
            .std_command()
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| format!("failed to start {}: {}", wrapped.display_program(), e))?;
        let output = wait_with_timeout(&mut child, PROBE_TIMEOUT).map_err(|e| e.to_string())?;

        if output.exit_code == Some(0) {
            return Ok(());
        }
        let detail = [output.stderr.trim(), output.stdout.trim()]
            .into_iter()
            .find(|s| !s.is_empty())
            .map(str::to_string);
        Err(detail.unwrap_or_else(|| match (output.exit_code, output.signal) {
            (_, Some(sig)) => format!("probe command killed by {}", sig),
            (Some(code), None) => format!("probe command exited with code {}", code),
            (None, None) => "probe command failed".to_string(),
        }))
    }
}
