//! Process helpers shared by the probe and the services: group kill,
//! signal naming, and a blocking wait with timeout.

use anyhow::Result;
use std::io::Read;
use std::process::{Child, ExitStatus};
use std::thread;
use std::time::{Duration, Instant};

/// Poll interval of [`wait_with_timeout`].
pub const WAIT_POLL_INTERVAL_MS: u64 = 20;

/// Outcome of a child process run to completion or killed on timeout.
#[derive(Debug, Clone, Default)]
pub struct ProcessOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
    pub signal: Option<String>,
    pub timed_out: bool,
}

/// SIGKILL the process group led by `pid`. A group that is already gone
/// is not an error.
#[cfg(unix)]
pub fn kill_process_group(pid: u32) -> Result<()> {
    use nix::errno::Errno;
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    let pgid = i32::try_from(pid).map_err(|_| anyhow::anyhow!("pid {} out of range", pid))?;
    match killpg(Pid::from_raw(pgid), Signal::SIGKILL) {
        Ok(()) | Err(Errno::ESRCH) => Ok(()),
        Err(e) => Err(anyhow::anyhow!("Failed to kill process group {}: {}", pid, e)),
    }
}

#[cfg(not(unix))]
pub fn kill_process_group(_pid: u32) -> Result<()> {
    Ok(())
}

/// Name of the signal that terminated the process, e.g. `SIGKILL`.
#[cfg(unix)]
pub fn signal_name(status: &ExitStatus) -> Option<String> {
    use std::os::unix::process::ExitStatusExt;

    let raw = status.signal()?;
    Some(
        nix::sys::signal::Signal::try_from(raw)
            .map(|s| s.as_str().to_string())
            .unwrap_or_else(|_| format!("SIG{}", raw)),
    )
}

#[cfg(not(unix))]
pub fn signal_name(_status: &ExitStatus) -> Option<String> {
    None
}

/// Wait for `child`, draining stdout/stderr on background threads so a
/// chatty child never blocks on a full pipe. On timeout the child's whole
/// process group is killed.
pub fn wait_with_timeout(child: &mut Child, timeout: Duration) -> Result<ProcessOutput> {
    let start = Instant::now();
    let poll = Duration::from_millis(WAIT_POLL_INTERVAL_MS);

    let stdout_handle = child.stdout.take().map(|mut out| {
        thread::spawn(move || {
            let mut buf = Vec::new();
            let _ = out.read_to_end(&mut buf);
            String::from_utf8_lossy(&buf).into_owned()
        })
    });
    let stderr_handle = child.stderr.take().map(|mut err| {
        thread::spawn(move || {
            let mut buf = Vec::new();
            let _ = err.read_to_end(&mut buf);
            String::from_utf8_lossy(&buf).into_owned()
        })
    });

    let join = |h: Option<thread::JoinHandle<String>>| {
        h.map(|h| h.join().unwrap_or_default()).unwrap_or_default()
    };

    loop {
        match child.try_wait() {
            Ok(Some(status)) => {
                return Ok(ProcessOutput {
                    stdout: join(stdout_handle),
                    stderr: join(stderr_handle),
                    exit_code: status.code(),
                    signal: signal_name(&status),
                    timed_out: false,
                });
            }
            Ok(None) => {}
            Err(e) => {
                let _ = kill_process_group(child.id());
                let _ = child.wait();
                return Err(anyhow::anyhow!("Failed to wait for process: {}", e));
            }
        }

        if start.elapsed() > timeout {
            let _ = kill_process_group(child.id());
            let _ = child.kill();
            let status = child.wait().ok();
            let mut stderr = join(stderr_handle);
            if !stderr.is_empty() && !stderr.ends_with('\n') {
                stderr.push('\n');
            }
            stderr.push_str(&format!(
                "Process killed: exceeded timeout of {} ms",
                timeout.as_millis()
            ));
            return Ok(ProcessOutput {
                stdout: join(stdout_handle),
                stderr,
                exit_code: status.and_then(|s| s.code()),
                signal: status.as_ref().and_then(signal_name),
                timed_out: true,
            });
        }

        thread::sleep(poll);
    }
}
