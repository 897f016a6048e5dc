//! Deployment configuration
//!
//! All tunable parameters in one place. Loaded from `agentdeploy.toml`,
//! falls back to defaults if no config file exists.

use crate::error::{Error, Result};
use crate::types::RedeployPolicy;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_CONFIG_FILE: &str = "agentdeploy.toml";

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Where descriptors, state and run artifacts live.
    pub paths: PathsConfig,
    /// Remote control plane connection.
    pub control_plane: ControlPlaneConfig,
    /// Readiness polling.
    pub polling: PollingConfig,
    /// Alias created for every provisioned agent.
    pub alias: AliasConfig,
    /// Invoke-permission document maintenance.
    pub policy: PolicyConfig,
    /// Orchestrator behavior.
    pub deploy: DeployConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Directory holding one descriptor per agent plus `placeholders.yaml`.
    pub descriptors_dir: PathBuf,
    /// JSON state file: resource name -> provisioned record.
    pub state_file: PathBuf,
    /// Run manifests, reports and event streams.
    pub runs_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlPlaneConfig {
    /// Base URL of the control plane API. Required unless simulating.
    pub endpoint: Option<String>,
    pub region: String,
    pub account: String,
    /// Per-request timeout in seconds.
    pub request_timeout_secs: u64,
    /// Environment variable holding the bearer token.
    pub token_env: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PollingConfig {
    /// Fixed sleep between status polls, in milliseconds.
    pub interval_ms: u64,
    /// Max polls while waiting for a created agent to become ready.
    pub ready_attempts: u32,
    /// Max polls while waiting for a prepare to finish.
    pub prepare_attempts: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AliasConfig {
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    /// Permission document to maintain. Disabled when unset.
    pub policy_id: Option<String>,
    /// Max versions the remote store retains.
    pub ceiling: usize,
    /// Action that identifies the granting statement.
    pub action: String,
    /// Reference granted for each aliased agent.
    /// Variables: {region}, {account}, {resourceId}, {aliasId}.
    pub alias_reference_template: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeployConfig {
    /// What to do with requested resources that already have a record.
    pub redeploy: RedeployPolicy,
    /// Pick up unrequested resources that become resolvable during a run.
    pub rescan: bool,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            descriptors_dir: PathBuf::from("agents"),
            state_file: PathBuf::from(".agentdeploy/state.json"),
            runs_dir: PathBuf::from(".agentdeploy/runs"),
        }
    }
}

impl Default for ControlPlaneConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            region: "us-east-1".into(),
            account: String::new(),
            request_timeout_secs: 30,
            token_env: "AGENTDEPLOY_API_TOKEN".into(),
        }
    }
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            interval_ms: 5000,
            ready_attempts: 24,
            prepare_attempts: 24,
        }
    }
}

impl Default for AliasConfig {
    fn default() -> Self {
        Self {
            name: "live".into(),
        }
    }
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            policy_id: None,
            ceiling: 5,
            action: "bedrock:InvokeAgent".into(),
            alias_reference_template:
                "arn:aws:bedrock:{region}:{account}:agent-alias/{resourceId}/{aliasId}".into(),
        }
    }
}

impl Default for DeployConfig {
    fn default() -> Self {
        Self {
            redeploy: RedeployPolicy::Skip,
            rescan: true,
        }
    }
}

// ============================================================
// Loading
// ============================================================

impl Settings {
    /// Load config from a TOML file. A missing file yields defaults;
    /// a file that fails to parse is an error.
    pub fn load(path: &Path) -> Result<Self> {
        let settings = match std::fs::read_to_string(path) {
            Ok(content) => {
                let settings: Self = toml::from_str(&content)
                    .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
                tracing::info!("Loaded config from {}", path.display());
                settings
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!("No config at {}, using defaults", path.display());
                Self::default()
            }
            Err(e) => return Err(Error::Config(format!("{}: {}", path.display(), e))),
        };
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        if self.policy.ceiling == 0 {
            return Err(Error::Config("policy.ceiling must be at least 1".into()));
        }
        if self.polling.ready_attempts == 0 || self.polling.prepare_attempts == 0 {
            return Err(Error::Config("polling attempts must be at least 1".into()));
        }
        if self.alias.name.trim().is_empty() {
            return Err(Error::Config("alias.name must not be empty".into()));
        }
        Ok(())
    }

    /// Write the current config as TOML (for generating a default config file).
    pub fn to_toml(&self) -> String {
        toml::to_string_pretty(self).unwrap_or_default()
    }

    /// Variables available to every template: `{region}`, `{account}`.
    pub fn template_vars(&self) -> BTreeMap<String, String> {
        let mut vars = BTreeMap::new();
        vars.insert("region".to_string(), self.control_plane.region.clone());
        vars.insert("account".to_string(), self.control_plane.account.clone());
        vars
    }
}

impl PollingConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}
