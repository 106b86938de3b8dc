//! Async child runner shared by one-shot executions and deployment invokes.

use anyhow::{Context, Result};
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};

use runbox_sandbox::common::{kill_process_group, signal_name, ProcessOutput};
use runbox_sandbox::CommandSpec;

/// How long output readers may keep draining once the child is gone.
/// Descendants that escaped the group kill can hold the pipes open.
pub const READER_DRAIN_LIMIT: Duration = Duration::from_secs(2);

type SharedBuf = Arc<Mutex<Vec<u8>>>;

/// Spawn `command`, feed `input` on stdin and close it, collect output.
///
/// With a `timeout`, expiry SIGKILLs the child's whole process group. The
/// child is spawned as its own group leader by [`CommandSpec::tokio_command`].
pub async fn run_child(
    command: &CommandSpec,
    input: Vec<u8>,
    timeout: Option<Duration>,
) -> Result<ProcessOutput> {
    let mut child = command
        .tokio_command()
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .with_context(|| format!("Failed to spawn {}", command.display_program()))?;
    let pid = child.id();

    let stdout_buf = SharedBuf::default();
    let stderr_buf = SharedBuf::default();
    let readers = [
        child.stdout.take().map(|r| spawn_reader(r, Arc::clone(&stdout_buf))),
        child.stderr.take().map(|r| spawn_reader(r, Arc::clone(&stderr_buf))),
    ];

    if let Some(mut stdin) = child.stdin.take() {
        // A child that exits without reading its input closes the pipe;
        // the resulting write error is not a failure of the run.
        tokio::spawn(async move {
            if let Err(e) = stdin.write_all(&input).await {
                tracing::debug!(error = %e, "Child stdin closed early");
            }
            let _ = stdin.shutdown().await;
        });
    }

    let (status, timed_out) = match timeout {
        Some(limit) => match tokio::time::timeout(limit, child.wait()).await {
            Ok(status) => (status.context("Failed to wait for child")?, false),
            Err(_) => {
                tracing::warn!(pid = ?pid, timeout_ms = limit.as_millis() as u64, "Execution timed out, killing process group");
                if let Some(pid) = pid {
                    if let Err(e) = kill_process_group(pid) {
                        tracing::warn!(error = %e, "Process group kill failed");
                    }
                }
                let _ = child.start_kill();
                (child.wait().await.context("Failed to reap child")?, true)
            }
        },
        None => (child.wait().await.context("Failed to wait for child")?, false),
    };

    for reader in readers.into_iter().flatten() {
        let abort = reader.abort_handle();
        if tokio::time::timeout(READER_DRAIN_LIMIT, reader).await.is_err() {
            abort.abort();
            tracing::debug!("Output reader still open after child exit, abandoned");
        }
    }

    let mut stderr = take_string(&stderr_buf);
    if timed_out {
        if !stderr.is_empty() && !stderr.ends_with('\n') {
            stderr.push('\n');
        }
        stderr.push_str(&format!(
            "Process killed: exceeded timeout of {} ms",
            timeout.map(|t| t.as_millis()).unwrap_or_default()
        ));
    }

    Ok(ProcessOutput {
        stdout: take_string(&stdout_buf),
        stderr,
        exit_code: status.code(),
        signal: signal_name(&status),
        timed_out,
    })
}

fn spawn_reader<R>(mut reader: R, buf: SharedBuf) -> tokio::task::JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut chunk = [0u8; 8192];
        loop {
            match reader.read(&mut chunk).await {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    if let Ok(mut b) = buf.lock() {
                        b.extend_from_slice(&chunk[..n]);
                    }
                }
            }
        }
    })
}

fn take_string(buf: &SharedBuf) -> String {
    let bytes = buf
        .lock()
        .map(|mut b| std::mem::take(&mut *b))
        .unwrap_or_default();
    String::from_utf8_lossy(&bytes).into_owned()
}
