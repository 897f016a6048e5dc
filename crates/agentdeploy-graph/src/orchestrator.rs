//! Deploy orchestrator: dependency-ordered, best-effort provisioning.
//!
//! For each resource in order: validate dependency records, resolve
//! placeholders, drive the provisioner, persist the record, then grant the
//! alias in the invoke policy. A failure marks the resource and skips its
//! dependents; independent resources still proceed.

use crate::graph::DeploymentGraph;
use crate::manifest::{ErrorSummary, Outcome, RunManifest};
use crate::policy::{GrantOutcome, PolicyVersionManager};
use crate::provisioner::{Provisioner, ProvisionerConfig};
use crate::resolver::Resolver;
use crate::resource::{Artifact, RunDriver, RunEvent};
use crate::state::StateStore;
use crate::validator::validate_dependencies;
use agentdeploy_core::{
    DescriptorSet, Error, PlaceholderTable, ProvisionedRecord, RedeployPolicy,
    ResourceDefinition, ResourceStatus, Result, Settings,
};
use agentdeploy_plane::ControlPlane;
use chrono::Utc;
use serde_json::json;
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use tracing::{info, warn};

/// Per-run options, usually taken from settings and CLI flags.
#[derive(Clone, Debug, Default)]
pub struct DeployOptions {
    /// Resources to deploy; empty means every declared resource.
    pub requested: Vec<String>,
    pub redeploy: RedeployPolicy,
    pub rescan: bool,
}

impl DeployOptions {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            requested: Vec::new(),
            redeploy: settings.deploy.redeploy,
            rescan: settings.deploy.rescan,
        }
    }
}

/// One line of `agentdeploy plan`.
#[derive(Clone, Debug, PartialEq)]
pub struct PlanEntry {
    pub name: String,
    pub dependencies: Vec<String>,
    /// Dependencies with no descriptor; only an existing record satisfies them.
    pub external: Vec<String>,
    pub recorded: bool,
}

/// Check the graph and return the run order without touching the plane.
pub fn plan(
    descriptors: &DescriptorSet,
    state: &StateStore,
    requested: &[String],
) -> Result<Vec<PlanEntry>> {
    let graph = DeploymentGraph::build(descriptors)?;
    Ok(graph
        .order(requested)?
        .into_iter()
        .filter_map(|name| {
            let def = descriptors.get(&name)?;
            Some(PlanEntry {
                recorded: state.contains(&name),
                external: def
                    .dependencies
                    .iter()
                    .filter(|d| !graph.is_declared(d))
                    .cloned()
                    .collect(),
                dependencies: def.dependencies.clone(),
                name,
            })
        })
        .collect())
}

enum Handled {
    Provisioned,
    Reused,
}

pub struct Orchestrator {
    plane: Arc<dyn ControlPlane>,
    driver: Arc<dyn RunDriver>,
    policy: Option<PolicyVersionManager>,
    provisioner: ProvisionerConfig,
    vars: BTreeMap<String, String>,
}

impl Orchestrator {
    pub fn new(plane: Arc<dyn ControlPlane>, driver: Arc<dyn RunDriver>, settings: &Settings) -> Self {
        Self {
            plane,
            driver,
            policy: None,
            provisioner: ProvisionerConfig::from(settings),
            vars: settings.template_vars(),
        }
    }

    pub fn with_policy(mut self, manager: PolicyVersionManager) -> Self {
        self.policy = Some(manager);
        self
    }

    /// Execute a full deploy run.
    ///
    /// Graph errors (cycles, unknown names) are returned before any remote
    /// call. Per-resource failures are recorded in the manifest instead.
    pub async fn deploy(
        &self,
        descriptors: &DescriptorSet,
        state: &mut StateStore,
        options: &DeployOptions,
    ) -> Result<RunManifest> {
        let graph = DeploymentGraph::build(descriptors)?;
        let order = graph.order(&options.requested)?;
        let external = graph.undeclared();
        if !external.is_empty() {
            warn!(external = ?external, "dependencies without a descriptor must already have records");
        }

        let run_id = format!(
            "{}-{}",
            Utc::now().format("%Y%m%dT%H%M%S"),
            &uuid::Uuid::new_v4().simple().to_string()[..8]
        );
        let mut manifest = RunManifest::new(&run_id, &options.requested, options.redeploy);
        for name in &order {
            manifest.add_resource(name, None);
        }
        self.write_manifest(&manifest).await?;
        info!(run_id, resources = order.len(), plane = self.plane.name(), "run started");
        self.emit(
            &run_id,
            None,
            "run_started",
            json!({"order": order, "redeploy": options.redeploy, "rescan": options.rescan}),
        )
        .await;

        let mut queue: VecDeque<String> = order.into();
        while let Some(name) = queue.pop_front() {
            if manifest.is_handled(&name) {
                continue;
            }
            let Some(def) = descriptors.get(&name) else {
                continue;
            };
            manifest.start_resource(&name);
            self.emit(&run_id, Some(&name), "resource_started", json!({})).await;

            match self
                .handle(def, descriptors.placeholders(), state, options, &mut manifest)
                .await
            {
                Ok(handled) => {
                    manifest.finish_resource(&name, ResourceStatus::Done, None);
                    info!(run_id, resource = %name, "done");
                    self.emit(&run_id, Some(&name), "resource_done", json!({})).await;
                    if matches!(handled, Handled::Provisioned) && options.rescan {
                        let admitted = self.rescan(&name, descriptors, state, &manifest);
                        for candidate in admitted.iter().rev() {
                            manifest.add_resource(candidate, Some(&name));
                            queue.push_front(candidate.clone());
                        }
                        if !admitted.is_empty() {
                            info!(run_id, resource = %name, admitted = ?admitted, "re-scan admitted resources");
                            self.emit(&run_id, Some(&name), "rescan_admitted", json!({"admitted": admitted}))
                                .await;
                        }
                    }
                }
                Err(e) => {
                    let status = if matches!(e, Error::MissingDependency { .. }) {
                        ResourceStatus::SkippedDependencyFailure
                    } else {
                        ResourceStatus::Failed
                    };
                    warn!(run_id, resource = %name, status = %status, error = %e, "resource not deployed");
                    manifest.finish_resource(&name, status, Some(ErrorSummary::from(&e)));
                    self.emit(
                        &run_id,
                        Some(&name),
                        "resource_failed",
                        json!({"status": status, "kind": e.kind(), "error": e.to_string()}),
                    )
                    .await;
                    self.skip_dependents(&run_id, &graph, &name, status, &mut manifest)
                        .await;
                }
            }
            if let Err(e) = self.write_manifest(&manifest).await {
                warn!(run_id, error = %e, "failed to update manifest");
            }
        }

        manifest.finalize();
        self.write_manifest(&manifest).await?;
        let report = build_report(&manifest);
        self.driver
            .write_artifact(&run_id, Artifact::Report, report.as_bytes())
            .await?;
        self.emit(
            &run_id,
            None,
            "run_complete",
            json!({"outcome": manifest.outcome, "line": manifest.run_log_line()}),
        )
        .await;
        info!(
            run_id,
            outcome = %manifest.outcome,
            location = %self.driver.run_location(&run_id),
            "run complete"
        );
        Ok(manifest)
    }

    async fn handle(
        &self,
        def: &ResourceDefinition,
        placeholders: &PlaceholderTable,
        state: &mut StateStore,
        options: &DeployOptions,
        manifest: &mut RunManifest,
    ) -> Result<Handled> {
        let name = def.name.as_str();
        let run_id = manifest.run_id.clone();

        if options.redeploy == RedeployPolicy::Skip {
            if let Some(record) = state.get(name).cloned() {
                info!(run_id, resource = name, resource_id = %record.resource_id, "existing record, not reprovisioning");
                manifest.mark_reused(name);
                manifest.set_ids(name, &record.resource_id, &record.alias_id);
                self.ensure_grant(&run_id, name, &record).await?;
                return Ok(Handled::Reused);
            }
        }

        if let Some(previous) = state.get(name) {
            warn!(run_id, resource = name, previous = %previous.resource_id, "recreating; previous remote agent is not removed");
        }

        validate_dependencies(def, state.snapshot())?;
        let resolved = Resolver::new(placeholders, state.snapshot())
            .with_vars(self.vars.clone())
            .resolve_definition(def)?;

        let run = Provisioner::new(self.plane.as_ref(), &self.provisioner)
            .provision(&resolved)
            .await;
        for change in &run.trace {
            manifest.set_state(name, change.to);
            self.emit(
                &run_id,
                Some(name),
                "transition",
                serde_json::to_value(change).unwrap_or_default(),
            )
            .await;
        }
        let record = run.outcome?;
        manifest.set_ids(name, &record.resource_id, &record.alias_id);
        state.record(name, record.clone()).await?;
        self.ensure_grant(&run_id, name, &record).await?;
        Ok(Handled::Provisioned)
    }

    async fn ensure_grant(&self, run_id: &str, name: &str, record: &ProvisionedRecord) -> Result<()> {
        let Some(policy) = &self.policy else {
            return Ok(());
        };
        let reference = policy.reference_for(record);
        match policy.grant(&reference).await? {
            GrantOutcome::AlreadyGranted => {}
            GrantOutcome::Granted {
                version_id,
                evicted,
            } => {
                self.emit(
                    run_id,
                    Some(name),
                    "policy_granted",
                    json!({
                        "policy": policy.policy_id(),
                        "reference": reference,
                        "version": version_id,
                        "evicted": evicted,
                    }),
                )
                .await;
            }
        }
        Ok(())
    }

    /// Unplanned resources that reference `provisioned` and are now resolvable.
    ///
    /// A reference that belongs to this run must have reached DONE; an older
    /// record of a resource that failed or is still queued does not count.
    fn rescan(
        &self,
        provisioned: &str,
        descriptors: &DescriptorSet,
        state: &StateStore,
        manifest: &RunManifest,
    ) -> Vec<String> {
        let resolver = Resolver::new(descriptors.placeholders(), state.snapshot());
        descriptors
            .definitions()
            .filter(|def| !manifest.contains(&def.name) && !state.contains(&def.name))
            .filter(|def| {
                let refs = resolver.definition_references(def);
                refs.contains(provisioned)
                    && refs.iter().all(|r| {
                        state.contains(r)
                            && (!manifest.contains(r)
                                || manifest.status(r) == Some(ResourceStatus::Done))
                    })
            })
            .map(|def| def.name.clone())
            .collect()
    }

    async fn skip_dependents(
        &self,
        run_id: &str,
        graph: &DeploymentGraph,
        failed: &str,
        status: ResourceStatus,
        manifest: &mut RunManifest,
    ) {
        for dependent in graph.dependents(failed) {
            if !manifest.contains(&dependent) || manifest.is_handled(&dependent) {
                continue;
            }
            let summary = ErrorSummary {
                kind: "DependencyFailure".into(),
                message: format!("{dependent}: dependency '{failed}' ended {status}"),
            };
            info!(run_id, resource = %dependent, cause = failed, "skipping dependent");
            manifest.finish_resource(
                &dependent,
                ResourceStatus::SkippedDependencyFailure,
                Some(summary),
            );
            self.emit(
                run_id,
                Some(&dependent),
                "resource_skipped",
                json!({"cause": failed}),
            )
            .await;
        }
    }

    async fn write_manifest(&self, manifest: &RunManifest) -> Result<()> {
        self.driver
            .write_artifact(
                &manifest.run_id,
                Artifact::Manifest,
                manifest.to_yaml().as_bytes(),
            )
            .await
    }

    async fn emit(&self, run_id: &str, resource: Option<&str>, event: &str, data: serde_json::Value) {
        let event = RunEvent {
            ts: Utc::now(),
            run_id: run_id.into(),
            resource: resource.map(String::from),
            event: event.into(),
            data,
        };
        if let Err(e) = self.driver.emit_event(event).await {
            warn!(run_id, error = %e, "failed to emit run event");
        }
    }
}

fn build_report(manifest: &RunManifest) -> String {
    let mut report = format!(
        "# Deploy Run Report: {}\n\n## Outcome: {}\n\n## Resources\n",
        manifest.run_id, manifest.outcome,
    );
    for name in &manifest.order {
        let Some(entry) = manifest.resources.get(name) else {
            continue;
        };
        let icon = match entry.status {
            Some(ResourceStatus::Done) => "✓",
            Some(ResourceStatus::Failed) => "✗",
            Some(ResourceStatus::SkippedDependencyFailure) => "↷",
            None => "○",
        };
        let mut line = format!("{icon} {name}");
        if let Some(by) = &entry.admitted_by {
            line.push_str(&format!(" (re-scan after {by})"));
        }
        if let Some(err) = &entry.error {
            line.push_str(&format!(": {} {}", err.kind, err.message));
        }
        report.push_str(&line);
        report.push('\n');
    }
    report.push_str(&format!("\n## Status\n```\n{}```\n", manifest.status_table()));
    report.push_str(&format!(
        "\n## Totals\n- Done: {}\n- Failed: {}\n- Skipped: {}\n- Wall: {}ms\n",
        manifest.count(ResourceStatus::Done),
        manifest.count(ResourceStatus::Failed),
        manifest.count(ResourceStatus::SkippedDependencyFailure),
        manifest.total_wall_ms,
    ));
    if manifest.outcome == Outcome::Failure {
        report.push_str("\nRe-run after fixing the errors above; completed resources keep their records.\n");
    }
    report
}
