#![cfg(target_os = "linux")]

//! Linux isolation via bubblewrap (`bwrap`).
//!
//! The host root is mounted read-only; the command's working directory is
//! the only writable bind. All namespaces are unshared, with the network
//! namespace shared back only when the policy allows outbound traffic.

use anyhow::Result;
use std::ffi::{OsStr, OsString};
use std::path::PathBuf;

use crate::backend::IsolationBackend;
use crate::command::CommandSpec;
use crate::config::IsolationConfig;

#[derive(Debug, Clone)]
pub struct BubblewrapBackend {
    bwrap: PathBuf,
}

impl BubblewrapBackend {
    pub fn new(bwrap: impl Into<PathBuf>) -> Self {
        Self { bwrap: bwrap.into() }
    }

    /// Find `bwrap` on PATH.
    pub fn detect() -> std::result::Result<Self, String> {
        which::which("bwrap")
            .map(Self::new)
            .map_err(|_| "bubblewrap (bwrap) not found on PATH; install it with: apt install bubblewrap".to_string())
    }

    fn build_args(&self, command: &CommandSpec, config: &IsolationConfig) -> Vec<OsString> {
        let mut args: Vec<OsString> = Vec::new();
        let flag = |args: &mut Vec<OsString>, parts: &[&OsStr]| {
            args.extend(parts.iter().map(|p| p.to_os_string()));
        };

        flag(&mut args, &[os("--ro-bind"), os("/"), os("/")]);
        flag(&mut args, &[os("--dev"), os("/dev")]);
        flag(&mut args, &[os("--proc"), os("/proc")]);
        // Private /tmp first: a cwd below /tmp is bound on top of it.
        flag(&mut args, &[os("--tmpfs"), os("/tmp")]);

        for path in config.filesystem.resolved_deny_read() {
            if path.is_dir() {
                flag(&mut args, &[os("--tmpfs"), path.as_os_str()]);
            } else if path.exists() {
                flag(&mut args, &[os("--ro-bind"), os("/dev/null"), path.as_os_str()]);
            }
        }

        for path in &config.filesystem.allow_write {
            if path.exists() {
                flag(&mut args, &[os("--bind"), path.as_os_str(), path.as_os_str()]);
            }
        }

        if let Some(ref cwd) = command.cwd {
            flag(&mut args, &[os("--bind"), cwd.as_os_str(), cwd.as_os_str()]);
            flag(&mut args, &[os("--chdir"), cwd.as_os_str()]);
        }

        flag(&mut args, &[os("--unshare-all")]);
        if config.network.allow_outbound {
            flag(&mut args, &[os("--share-net")]);
        }
        flag(&mut args, &[os("--die-with-parent")]);
        flag(&mut args, &[os("--setenv"), os("RUNBOX_SANDBOX"), os("1")]);
        flag(&mut args, &[os("--"), command.program.as_os_str()]);
        args.extend(command.args.iter().cloned());
        args
    }
}

fn os(s: &str) -> &OsStr {
    OsStr::new(s)
}

impl IsolationBackend for BubblewrapBackend {
    fn name(&self) -> &str {
        "bubblewrap"
    }

    fn wrap(&self, command: CommandSpec, config: &IsolationConfig) -> Result<CommandSpec> {
        let args = self.build_args(&command, config);
        Ok(CommandSpec {
            program: self.bwrap.clone(),
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

    fn strings(args: &[OsString]) -> Vec<String> {
        args.iter().map(|a| a.to_string_lossy().to_string()).collect()
    }

    #[test]
    fn test_wrap_binds_cwd_and_appends_command() {
        let backend = BubblewrapBackend::new("/usr/bin/bwrap");
        let cmd = CommandSpec::new("/usr/bin/python3")
            .args(["-u", "-"])
            .env("SANDBOX_ID", "x")
            .current_dir("/tmp/runbox-exec-1");
        let wrapped = backend.wrap(cmd, &IsolationConfig::disabled()).unwrap();

        assert!(wrapped.sandboxed);
        assert_eq!(wrapped.program, PathBuf::from("/usr/bin/bwrap"));
        assert_eq!(wrapped.env, vec![("SANDBOX_ID".to_string(), "x".to_string())]);

        let args = strings(&wrapped.args);
        let joined = args.join(" ");
        assert!(joined.contains("--bind /tmp/runbox-exec-1 /tmp/runbox-exec-1"));
        assert!(joined.contains("--chdir /tmp/runbox-exec-1"));
        assert!(joined.contains("--unshare-all"));
        assert!(!joined.contains("--share-net"));
        assert!(joined.ends_with("-- /usr/bin/python3 -u -"));

        let tmpfs = args.iter().position(|a| a == "/tmp").unwrap();
        let bind = args.iter().position(|a| a == "/tmp/runbox-exec-1").unwrap();
        assert!(tmpfs < bind, "private /tmp must be mounted before the cwd bind");
    }

    #[test]
    fn test_wrap_shares_network_when_allowed() {
        let backend = BubblewrapBackend::new("bwrap");
        let mut config = IsolationConfig::default();
        config.network.allow_outbound = true;
        let wrapped = backend.wrap(CommandSpec::new("true"), &config).unwrap();
        assert!(strings(&wrapped.args).contains(&"--share-net".to_string()));
    }
}
