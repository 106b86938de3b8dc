//! Isolation wrapper for untrusted code.
//!
//! - [`SandboxManager`]: initializes the platform backend once, wraps
//!   commands, annotates stderr with sandbox denials
//! - [`SandboxProbe`]: memoized check that wrapping actually works here
//! - [`common`]: process-group kill, signal names, bounded synchronous wait

pub mod backend;
pub mod command;
pub mod common;
pub mod config;
pub mod manager;
pub mod probe;

#[cfg(target_os = "linux")]
pub mod linux;

#[cfg(target_os = "macos")]
pub mod macos;

pub use backend::IsolationBackend;
pub use command::CommandSpec;
pub use config::{FilesystemPolicy, IsolationConfig, NetworkPolicy};
pub use manager::SandboxManager;
pub use probe::{ProbeOutcome, SandboxProbe};
