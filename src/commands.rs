//! Subcommand implementations

use crate::cli::{Cli, Command};
use agentdeploy_core::{DescriptorSet, Settings};
use agentdeploy_graph::{
    plan, DeployOptions, LocalFsDriver, Orchestrator, PolicyVersionManager, RunManifest,
    StateStore,
};
use agentdeploy_plane::{
    ControlPlane, HttpControlPlane, HttpPolicyStore, PolicyDocument, PolicyStore, SimulatedPlane,
    SimulatedPolicyStore,
};
use anyhow::Context;
use std::sync::Arc;
use tracing::info;

/// Run the parsed command; returns the process exit code.
pub async fn run(cli: Cli) -> anyhow::Result<u8> {
    if cli.command == Command::InitConfig {
        print!("{}", settings_template());
        return Ok(0);
    }
    let settings = cli.settings()?;
    match cli.command {
        Command::Deploy {
            names, simulate, ..
        } => {
            let manifest = deploy(&settings, names, simulate).await?;
            println!("{}", manifest.status_table());
            println!("run {} ({})", manifest.run_id, manifest.outcome);
            Ok(manifest.exit_code())
        }
        Command::Plan { names } => {
            print!("{}", render_plan(&settings, &names).await?);
            Ok(0)
        }
        Command::Status => {
            print!("{}", render_status(&settings).await?);
            Ok(0)
        }
        Command::InitConfig => Ok(0),
    }
}

fn load_descriptors(settings: &Settings) -> anyhow::Result<DescriptorSet> {
    let dir = &settings.paths.descriptors_dir;
    let set = DescriptorSet::load_dir(dir)
        .with_context(|| format!("loading descriptors from {}", dir.display()))?;
    info!(dir = %dir.display(), resources = set.len(), "descriptors loaded");
    Ok(set)
}

fn backends(
    settings: &Settings,
    simulate: bool,
) -> anyhow::Result<(Arc<dyn ControlPlane>, Arc<dyn PolicyStore>)> {
    if simulate {
        let mut store = SimulatedPolicyStore::new(settings.policy.ceiling);
        if let Some(policy_id) = &settings.policy.policy_id {
            store = store.with_policy(policy_id, PolicyDocument::default(), 1);
        }
        return Ok((Arc::new(SimulatedPlane::new()), Arc::new(store)));
    }
    let plane = HttpControlPlane::from_config(&settings.control_plane)
        .context("control plane client")?;
    let store = HttpPolicyStore::from_config(&settings.control_plane)
        .context("policy store client")?;
    Ok((Arc::new(plane), Arc::new(store)))
}

pub async fn deploy(
    settings: &Settings,
    names: Vec<String>,
    simulate: bool,
) -> anyhow::Result<RunManifest> {
    let descriptors = load_descriptors(settings)?;
    let mut state = StateStore::load(&settings.paths.state_file).await?;
    let (plane, store) = backends(settings, simulate)?;
    let driver = Arc::new(LocalFsDriver::new(&settings.paths.runs_dir));

    let mut orchestrator = Orchestrator::new(plane, driver, settings);
    if let Some(manager) = PolicyVersionManager::from_settings(store, settings) {
        orchestrator = orchestrator.with_policy(manager);
    }
    let options = DeployOptions {
        requested: names,
        ..DeployOptions::from_settings(settings)
    };
    Ok(orchestrator.deploy(&descriptors, &mut state, &options).await?)
}

pub async fn render_plan(settings: &Settings, names: &[String]) -> anyhow::Result<String> {
    let descriptors = load_descriptors(settings)?;
    let state = StateStore::load(&settings.paths.state_file).await?;
    let entries = plan(&descriptors, &state, names)?;
    let mut out = String::new();
    for (i, entry) in entries.iter().enumerate() {
        let deps = if entry.dependencies.is_empty() {
            "-".to_string()
        } else {
            entry
                .dependencies
                .iter()
                .map(|d| {
                    let mut label = d.clone();
                    if entry.external.contains(d) {
                        label.push_str(" (external)");
                    }
                    if !state.contains(d) {
                        label.push('*');
                    }
                    label
                })
                .collect::<Vec<_>>()
                .join(", ")
        };
        let recorded = if entry.recorded { "recorded" } else { "new" };
        out.push_str(&format!("{:>3}. {:<24} {:<9} deps: {}\n", i + 1, entry.name, recorded, deps));
    }
    if entries.iter().any(|e| e.dependencies.iter().any(|d| !state.contains(d))) {
        out.push_str("\n* no record yet\n");
    }
    Ok(out)
}

pub async fn render_status(settings: &Settings) -> anyhow::Result<String> {
    let state = StateStore::load(&settings.paths.state_file).await?;
    if state.is_empty() {
        return Ok(format!("no records in {}\n", state.path().display()));
    }
    let mut out = String::new();
    for (name, record) in state.snapshot() {
        out.push_str(&format!(
            "{:<24} {:<16} {:<12} {}\n",
            name,
            record.resource_id,
            record.alias_id,
            record.created_at.to_rfc3339()
        ));
    }
    Ok(out)
}

pub fn settings_template() -> String {
    Settings::default().to_toml()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn template_parses_back() {
        let parsed: Settings = toml_roundtrip(&settings_template());
        assert_eq!(parsed.policy.ceiling, 5);
        assert_eq!(parsed.alias.name, "live");
    }

    #[tokio::test]
    async fn plan_marks_external_dependencies() {
        let tmp = tempfile::tempdir().unwrap();
        let agents = tmp.path().join("agents");
        std::fs::create_dir(&agents).unwrap();
        std::fs::write(agents.join("router.yaml"), "dependencies: [shared]\n").unwrap();
        let mut settings = Settings::default();
        settings.paths.descriptors_dir = agents;
        settings.paths.state_file = tmp.path().join("state.json");

        let out = render_plan(&settings, &[]).await.unwrap();
        assert!(out.contains("router"));
        assert!(out.contains("deps: shared (external)*"));
        assert!(out.contains("* no record yet"));
    }

    fn toml_roundtrip(s: &str) -> Settings {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("agentdeploy.toml");
        std::fs::write(&path, s).unwrap();
        Settings::load(&path).unwrap()
    }
}
