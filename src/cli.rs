//! Command-line interface

use crate::logging::LogFormat;
use agentdeploy_core::config::DEFAULT_CONFIG_FILE;
use agentdeploy_core::{Result, Settings};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "agentdeploy",
    about = "Dependency-ordered provisioning of remote agents",
    version = env!("CARGO_PKG_VERSION"),
    long_about = "agentdeploy provisions interdependent agent resources in dependency order.\n\
                  Descriptors declare dependencies and placeholder references; every\n\
                  successful resource is recorded in the state file immediately."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Path to the TOML config file
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Descriptor directory (overrides paths.descriptors_dir)
    #[arg(long, global = true)]
    pub descriptors: Option<PathBuf>,

    /// State file (overrides paths.state_file)
    #[arg(long, global = true)]
    pub state_file: Option<PathBuf>,

    /// Log output format on stderr
    #[arg(long, value_enum, default_value_t = LogFormat::Text, global = true)]
    pub log_format: LogFormat,

    /// Also write logs to this file
    #[arg(long, global = true)]
    pub log_file: Option<PathBuf>,
}

#[derive(Subcommand, Debug, PartialEq)]
pub enum Command {
    /// Provision resources in dependency order
    Deploy {
        /// Resources to deploy (default: all)
        names: Vec<String>,
        /// Reprovision resources that already have a record
        #[arg(long)]
        recreate: bool,
        /// Do not pick up unrequested resources that become resolvable
        #[arg(long)]
        no_rescan: bool,
        /// Run against the in-memory simulated control plane
        #[arg(long)]
        simulate: bool,
    },
    /// Show the deploy order without calling the control plane
    Plan {
        names: Vec<String>,
    },
    /// Print the state file
    Status,
    /// Print the default configuration as TOML
    InitConfig,
}

impl Cli {
    /// Load settings from the config file and apply flag overrides.
    pub fn settings(&self) -> Result<Settings> {
        let path = self
            .config
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));
        let mut settings = Settings::load(&expand_tilde(&path))?;
        if let Some(dir) = &self.descriptors {
            settings.paths.descriptors_dir = expand_tilde(dir);
        }
        if let Some(file) = &self.state_file {
            settings.paths.state_file = expand_tilde(file);
        }
        if let Command::Deploy {
            recreate, no_rescan, ..
        } = &self.command
        {
            if *recreate {
                settings.deploy.redeploy = agentdeploy_core::RedeployPolicy::Recreate;
            }
            if *no_rescan {
                settings.deploy.rescan = false;
            }
        }
        Ok(settings)
    }
}

pub fn expand_tilde(path: &std::path::Path) -> PathBuf {
    if let Ok(stripped) = path.strip_prefix("~") {
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home).join(stripped);
        }
    }
    path.to_path_buf()
}
