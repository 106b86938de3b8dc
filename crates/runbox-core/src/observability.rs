//! Observability: tracing init and the JSONL audit log.
//!
//! Uses config::ObservabilityConfig for RUNBOX_QUIET, RUNBOX_LOG_LEVEL,
//! RUNBOX_LOG_JSON and RUNBOX_AUDIT_LOG.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use std::sync::OnceLock;

use chrono::Utc;
use serde_json::json;
use tracing_subscriber::{prelude::*, EnvFilter};

/// Initialize tracing. Call once at process startup.
/// When RUNBOX_QUIET=1 only WARN and above are logged.
pub fn init_tracing() {
    let cfg = crate::config::ObservabilityConfig::from_env();
    let level = if cfg.quiet {
        "runbox=warn".to_string()
    } else {
        cfg.log_level.clone()
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&level));

    let _ = if cfg.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_target(true)
                    .with_thread_ids(false),
            )
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(true)
                    .with_thread_ids(false),
            )
            .try_init()
    };
}

fn audit_path() -> Option<&'static str> {
    static PATH: OnceLock<Option<String>> = OnceLock::new();
    PATH.get_or_init(|| {
        let path = crate::config::ObservabilityConfig::from_env()
            .audit_log
            .clone()
            .filter(|p| !p.is_empty())?;
        if let Some(parent) = Path::new(&path).parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        Some(path)
    })
    .as_deref()
}

fn append_jsonl(path: &str, record: &serde_json::Value) {
    if let Ok(mut f) = OpenOptions::new().create(true).append(true).open(path) {
        if let Ok(line) = serde_json::to_string(record) {
            let _ = writeln!(f, "{}", line);
        }
    }
}

fn audit(event: &str, fields: serde_json::Value) {
    let Some(path) = audit_path() else {
        return;
    };
    let mut record = json!({
        "ts": Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
        "event": event,
    });
    if let (Some(obj), serde_json::Value::Object(extra)) = (record.as_object_mut(), fields) {
        obj.extend(extra);
    }
    append_jsonl(path, &record);
}

/// Audit: execution_started (right before spawn)
pub fn audit_execution_started(execution_id: &str, program: &str, sandboxed: bool, cwd: &str) {
    audit(
        "execution_started",
        json!({
            "execution_id": execution_id,
            "program": program,
            "sandboxed": sandboxed,
            "cwd": cwd,
        }),
    );
}

/// Audit: execution_completed
pub fn audit_execution_completed(
    execution_id: &str,
    exit_code: Option<i32>,
    signal: Option<&str>,
    duration_ms: u64,
    stdout_len: usize,
) {
    audit(
        "execution_completed",
        json!({
            "execution_id": execution_id,
            "exit_code": exit_code,
            "signal": signal,
            "duration_ms": duration_ms,
            "stdout_len": stdout_len,
            "success": exit_code == Some(0),
        }),
    );
}

/// Audit: deployment_registered
pub fn audit_deployment_registered(sandbox_id: &str, meta_url: &str, files: usize) {
    audit(
        "deployment_registered",
        json!({ "sandbox_id": sandbox_id, "meta_url": meta_url, "files": files }),
    );
}

/// Audit: deployment_invoked
pub fn audit_deployment_invoked(
    sandbox_id: &str,
    execution_id: &str,
    exit_code: Option<i32>,
    new_files: usize,
) {
    audit(
        "deployment_invoked",
        json!({
            "sandbox_id": sandbox_id,
            "execution_id": execution_id,
            "exit_code": exit_code,
            "new_files": new_files,
        }),
    );
}

/// Audit: deployment_patched
pub fn audit_deployment_patched(sandbox_id: &str, changes: usize, reload: bool) {
    audit(
        "deployment_patched",
        json!({ "sandbox_id": sandbox_id, "changes": changes, "reload": reload }),
    );
}

/// Audit: deployment_deleted
pub fn audit_deployment_deleted(sandbox_id: &str) {
    audit("deployment_deleted", json!({ "sandbox_id": sandbox_id }));
}

/// Security event: sandbox fallback (backend unavailable, running unwrapped)
pub fn security_sandbox_fallback(execution_id: &str, reason: &str) {
    tracing::warn!(
        execution_id = %execution_id,
        reason = %reason,
        "Security: sandbox unavailable, running without isolation"
    );
    audit(
        "sandbox_fallback",
        json!({ "execution_id": execution_id, "reason": reason }),
    );
}
