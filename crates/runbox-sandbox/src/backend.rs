//! IsolationBackend trait: extension point for sandbox implementations.
//!
//! The default backend is selected by platform: bubblewrap on Linux,
//! Seatbelt (`sandbox-exec`) on macOS. Other platforms have none and run
//! unwrapped.

use anyhow::Result;

use crate::command::CommandSpec;
use crate::config::IsolationConfig;

/// Turns a plain command into one that runs under OS isolation.
pub trait IsolationBackend: Send + Sync + std::fmt::Debug {
    /// Backend name for logging and diagnostics.
    fn name(&self) -> &str;

    /// Wrap `command`. The command's cwd is the only writable location
    /// besides `config.filesystem.allow_write` and a private /tmp.
    fn wrap(&self, command: CommandSpec, config: &IsolationConfig) -> Result<CommandSpec>;
}

/// Locate the platform backend. `Err` carries the reason none is usable.
pub fn detect_native_backend() -> std::result::Result<Box<dyn IsolationBackend>, String> {
    #[cfg(target_os = "linux")]
    return crate::linux::BubblewrapBackend::detect()
        .map(|b| Box::new(b) as Box<dyn IsolationBackend>);

    #[cfg(target_os = "macos")]
    return crate::macos::SeatbeltBackend::detect()
        .map(|b| Box::new(b) as Box<dyn IsolationBackend>);

    #[cfg(not(any(target_os = "linux", target_os = "macos")))]
    Err("no sandbox backend for this platform".to_string())
}
