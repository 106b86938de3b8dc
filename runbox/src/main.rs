mod cli;
#[cfg(feature = "http")]
mod server;

use anyhow::{Context, Result};
use clap::Parser;
use serde_json::json;
use std::io::Read;
use std::path::Path;
use std::sync::Arc;

use cli::{Cli, Commands};
use runbox_core::config::RuntimeConfig;
use runbox_core::observability;
use runbox_sandbox::{IsolationConfig, SandboxManager};
use runbox_services::{ExecuteRequest, ExecutionService};

#[tokio::main]
async fn main() -> Result<()> {
    observability::init_tracing();
    let cli = Cli::parse();

    match cli.command {
        #[cfg(feature = "http")]
        Commands::Serve { listen } => {
            let listen = listen.unwrap_or_else(|| runbox_core::config::ServerConfig::from_env().listen);
            server::serve(&listen, Arc::new(build_execution_service()?)).await?;
        }
        Commands::Exec { file, timeout_ms } => {
            let code = read_code(&file)?;
            let mut request = ExecuteRequest::new(code);
            if let Some(ms) = timeout_ms {
                request = request.with_timeout_ms(ms);
            }
            let result = build_execution_service()?.execute(request).await?;
            println!("{}", serde_json::to_string_pretty(&result)?);
            if result.exit_code != Some(0) {
                std::process::exit(1);
            }
        }
        Commands::Probe => {
            let service = build_execution_service()?;
            let available = service.sandbox_available().await;
            let report = json!({
                "available": available,
                "reason": service.probe().unavailable_reason(),
            });
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }
    Ok(())
}

/// Service wired from RUNBOX_* env vars and the optional sandbox config file.
fn build_execution_service() -> Result<ExecutionService> {
    let config = RuntimeConfig::from_env();
    let isolation = IsolationConfig::load(config.sandbox_config.as_deref())?;
    tracing::debug!(
        python = %config.python.display(),
        bucket = %config.bucket_dir.display(),
        work = %config.work_dir.display(),
        sandbox_enabled = isolation.enabled,
        "Runtime configured"
    );
    Ok(ExecutionService::new(config, isolation, Arc::new(SandboxManager::new())))
}

fn read_code(file: &Path) -> Result<String> {
    if file == Path::new("-") {
        let mut code = String::new();
        std::io::stdin()
            .read_to_string(&mut code)
            .context("Failed to read code from stdin")?;
        return Ok(code);
    }
    std::fs::read_to_string(file).with_context(|| format!("Failed to read {}", file.display()))
}
