use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// runbox - run untrusted Python under OS-native isolation
#[derive(Parser, Debug)]
#[command(name = "runbox")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Serve the HTTP API (POST /execute, GET /executions/:id/files/*, GET /health)
    #[cfg(feature = "http")]
    Serve {
        /// Listen address (default: RUNBOX_LISTEN or 127.0.0.1:8787)
        #[arg(long, value_name = "ADDR")]
        listen: Option<String>,
    },

    /// Execute a Python file once and print the result envelope as JSON
    Exec {
        /// Python source file; "-" reads the code from stdin
        #[arg(value_name = "FILE")]
        file: PathBuf,

        /// Kill the run after this many milliseconds
        #[arg(long, value_name = "MS")]
        timeout_ms: Option<u64>,
    },

    /// Report whether sandboxed execution works on this host
    Probe,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_exec() {
        let cli = Cli::parse_from(["runbox", "exec", "job.py", "--timeout-ms", "2500"]);
        match cli.command {
            Commands::Exec { file, timeout_ms } => {
                assert_eq!(file, PathBuf::from("job.py"));
                assert_eq!(timeout_ms, Some(2500));
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[cfg(feature = "http")]
    #[test]
    fn test_parse_serve_listen() {
        let cli = Cli::parse_from(["runbox", "serve", "--listen", "0.0.0.0:9000"]);
        assert!(matches!(
            cli.command,
            Commands::Serve { listen: Some(ref addr) } if addr == "0.0.0.0:9000"
        ));
    }
}
