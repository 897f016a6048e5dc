//! agentdeploy: provision interdependent agents in dependency order
//!
//! Usage:
//!   agentdeploy deploy                  → deploy every descriptor
//!   agentdeploy deploy router --recreate → reprovision one agent
//!   agentdeploy deploy --simulate       → run against the in-memory plane
//!   agentdeploy plan                    → show order, no remote calls
//!   agentdeploy status                  → print the state file
//!   agentdeploy init-config             → print default agentdeploy.toml

use agentdeploy::cli::Cli;
use agentdeploy::{commands, logging};
use clap::Parser;
use std::process::ExitCode;

/// Exit code for configuration and graph errors.
const EXIT_CONFIG_ERROR: u8 = 2;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let _guard = match logging::init_tracing(cli.log_format, cli.log_file.as_deref()) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("error: {e:#}");
            return ExitCode::from(EXIT_CONFIG_ERROR);
        }
    };

    match commands::run(cli).await {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            tracing::error!(error = %format!("{e:#}"), "agentdeploy failed");
            eprintln!("error: {e:#}");
            ExitCode::from(EXIT_CONFIG_ERROR)
        }
    }
}
