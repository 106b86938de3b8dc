//! Structured command passed through the isolation wrapper.
//!
//! Commands are never flattened into a shell string, so arguments and
//! paths need no escaping on the way to the child.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: PathBuf,
    pub args: Vec<OsString>,
    /// Extra environment on top of the inherited one
    pub env: Vec<(String, String)>,
    pub cwd: Option<PathBuf>,
    /// Set by the wrapper once the command runs under a sandbox
    pub sandboxed: bool,
}

impl CommandSpec {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
            cwd: None,
            sandboxed: false,
        }
    }

    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn current_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.cwd = Some(dir.as_ref().to_path_buf());
        self
    }

    /// Program name for logs and audit records.
    pub fn display_program(&self) -> String {
        self.program.to_string_lossy().to_string()
    }

    /// Blocking `std::process::Command`, placed in its own process group on
    /// unix so the whole tree can be killed at once.
    pub fn std_command(&self) -> std::process::Command {
        let mut cmd = std::process::Command::new(&self.program);
        cmd.args(&self.args);
        cmd.envs(self.env.iter().map(|(k, v)| (k.as_str(), v.as_str())));
        if let Some(ref cwd) = self.cwd {
            cmd.current_dir(cwd);
        }
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            cmd.process_group(0);
        }
        cmd
    }

    /// Async counterpart of [`CommandSpec::std_command`]; the child is
    /// killed if its handle is dropped.
    pub fn tokio_command(&self) -> tokio::process::Command {
        let mut cmd = tokio::process::Command::new(&self.program);
        cmd.args(&self.args);
        cmd.envs(self.env.iter().map(|(k, v)| (k.as_str(), v.as_str())));
        if let Some(ref cwd) = self.cwd {
            cmd.current_dir(cwd);
        }
        #[cfg(unix)]
        cmd.process_group(0);
        cmd.kill_on_drop(true);
        cmd
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_collects_parts() {
        let cmd = CommandSpec::new("python3")
            .args(["-u", "-"])
            .env("SANDBOX_ID", "abc")
            .current_dir("/tmp/run");
        assert_eq!(cmd.args, vec![OsString::from("-u"), OsString::from("-")]);
        assert_eq!(cmd.env, vec![("SANDBOX_ID".to_string(), "abc".to_string())]);
        assert_eq!(cmd.cwd, Some(PathBuf::from("/tmp/run")));
        assert!(!cmd.sandboxed);
        assert_eq!(cmd.display_program(), "python3");
    }
}
