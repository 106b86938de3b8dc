//! Environment variable keys and aliases.
//!
//! Primary keys use the `RUNBOX_*` prefix; aliases are consulted in order.

/// Interpreter, bucket and work directories
pub mod runtime {
    pub const RUNBOX_PYTHON: &str = "RUNBOX_PYTHON";
    pub const PYTHON_ALIASES: &[&str] = &["PYTHON"];

    /// Root of the local content bucket (`executions/`, `invokes/`)
    pub const RUNBOX_BUCKET_DIR: &str = "RUNBOX_BUCKET_DIR";

    /// Parent directory for per-run temp dirs and deployment dirs
    pub const RUNBOX_WORK_DIR: &str = "RUNBOX_WORK_DIR";

    /// JSON file holding the isolation backend configuration
    pub const RUNBOX_SANDBOX_CONFIG: &str = "RUNBOX_SANDBOX_CONFIG";

    /// Upper bound accepted for `timeoutMs` on one-shot executions
    pub const RUNBOX_MAX_TIMEOUT_MS: &str = "RUNBOX_MAX_TIMEOUT_MS";
}

/// HTTP server
pub mod server {
    pub const RUNBOX_LISTEN: &str = "RUNBOX_LISTEN";
    pub const LISTEN_ALIASES: &[&str] = &["LISTEN_ADDR"];
}

/// Observability and logging
pub mod observability {
    pub const RUNBOX_QUIET: &str = "RUNBOX_QUIET";

    pub const RUNBOX_LOG_LEVEL: &str = "RUNBOX_LOG_LEVEL";
    pub const LOG_LEVEL_ALIASES: &[&str] = &["LOG_LEVEL"];

    pub const RUNBOX_LOG_JSON: &str = "RUNBOX_LOG_JSON";

    pub const RUNBOX_AUDIT_LOG: &str = "RUNBOX_AUDIT_LOG";
}
