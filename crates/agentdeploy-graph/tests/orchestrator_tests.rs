//! End-to-end deploy runs against the simulated control plane

use agentdeploy_core::*;
use agentdeploy_graph::*;
use agentdeploy_plane::{PlaneCall, PolicyDocument, PolicyStore, SimulatedPlane, SimulatedPolicyStore};
use serde_json::json;
use std::sync::Arc;
use tempfile::TempDir;

const ALIAS_ARN: &str = "arn:aws:bedrock:{region}:{account}:agent-alias/{resourceId}/{aliasId}";

fn settings() -> Settings {
    let mut s = Settings::default();
    s.polling.interval_ms = 1;
    s.polling.ready_attempts = 3;
    s.polling.prepare_attempts = 3;
    s.control_plane.account = "123456789012".into();
    s
}

struct Harness {
    tmp: TempDir,
    plane: Arc<SimulatedPlane>,
    driver: Arc<LocalFsDriver>,
    settings: Settings,
}

impl Harness {
    fn new(plane: SimulatedPlane) -> Self {
        let tmp = tempfile::tempdir().unwrap();
        let driver = Arc::new(LocalFsDriver::new(tmp.path().join("runs")));
        Self {
            tmp,
            plane: Arc::new(plane),
            driver,
            settings: settings(),
        }
    }

    async fn state(&self) -> StateStore {
        StateStore::load(self.tmp.path().join("state.json")).await.unwrap()
    }

    fn orchestrator(&self) -> Orchestrator {
        Orchestrator::new(self.plane.clone(), self.driver.clone(), &self.settings)
    }

    async fn deploy(&self, descriptors: &DescriptorSet, options: DeployOptions) -> RunManifest {
        let mut state = self.state().await;
        self.orchestrator()
            .deploy(descriptors, &mut state, &options)
            .await
            .unwrap()
    }
}

fn options(requested: &[&str]) -> DeployOptions {
    DeployOptions {
        requested: requested.iter().map(|s| s.to_string()).collect(),
        redeploy: RedeployPolicy::Skip,
        rescan: true,
    }
}

fn descriptors(defs: Vec<ResourceDefinition>) -> DescriptorSet {
    DescriptorSet::new(defs, PlaceholderTable::new()).unwrap()
}

fn error_kind(m: &RunManifest, name: &str) -> String {
    m.resources[name].error.as_ref().unwrap().kind.clone()
}

// ===========================================================================
// Dependency validation
// ===========================================================================

#[tokio::test]
async fn requesting_only_dependent_reports_missing_dependency() {
    let h = Harness::new(SimulatedPlane::new());
    let set = descriptors(vec![
        ResourceDefinition::new("A"),
        ResourceDefinition::new("B").with_dependencies(["A"]),
    ]);
    let m = h.deploy(&set, options(&["B"])).await;

    assert_eq!(m.status("B"), Some(ResourceStatus::SkippedDependencyFailure));
    assert_eq!(error_kind(&m, "B"), "MissingDependencyError");
    assert!(m.resources["B"].error.as_ref().unwrap().message.contains("A"));
    assert!(!m.contains("A"));
    assert!(h.plane.calls().await.is_empty());
    assert_eq!(m.exit_code(), 1);
}

#[tokio::test]
async fn dependency_record_exists_before_dependent_is_created() {
    let h = Harness::new(SimulatedPlane::new().with_ready_after(2));
    let set = descriptors(vec![
        ResourceDefinition::new("router").with_dependencies(["billing", "search"]),
        ResourceDefinition::new("billing").with_dependencies(["search"]),
        ResourceDefinition::new("search"),
    ]);
    let m = h.deploy(&set, options(&[])).await;
    assert!(m.all_done());

    let created = h.plane.created_names().await;
    let pos = |n: &str| created.iter().position(|c| c == n).unwrap();
    assert!(pos("search") < pos("billing"));
    assert!(pos("billing") < pos("router"));

    // every dependency finished its alias before the dependent's create
    let calls = h.plane.calls().await;
    let create_router = calls
        .iter()
        .position(|c| *c == PlaneCall::Create { name: "router".into() })
        .unwrap();
    let aliases_before = calls[..create_router]
        .iter()
        .filter(|c| matches!(c, PlaneCall::CreateAlias { .. }))
        .count();
    assert_eq!(aliases_before, 2);
}

// ===========================================================================
// Placeholder resolution
// ===========================================================================

#[tokio::test]
async fn composed_alias_reference_reaches_the_plane() {
    let h = Harness::new(SimulatedPlane::new());
    let mut table = PlaceholderTable::new();
    table.insert("REF_A_ALIAS_ARN".into(), PlaceholderMapping::composed("A", ALIAS_ARN));
    let set = DescriptorSet::new(
        vec![
            ResourceDefinition::new("A"),
            ResourceDefinition::new("B")
                .with_dependencies(["A"])
                .with_sub_resource(SubResourceSpec::new(
                    SubResourceKind::Collaborator,
                    "a-collab",
                    json!({"aliasArn": "REF_A_ALIAS_ARN", "instruction": "delegate"}),
                )),
        ],
        table,
    )
    .unwrap();

    let m = h.deploy(&set, options(&[])).await;
    assert!(m.all_done(), "{}", m.status_table());

    let state = h.state().await;
    let a = state.get("A").unwrap();
    let (_, b) = h.plane.agent_by_name("B").await.unwrap();
    let arn = b.attachments[0].config["aliasArn"].as_str().unwrap();
    assert_eq!(
        arn,
        format!(
            "arn:aws:bedrock:us-east-1:123456789012:agent-alias/{}/{}",
            a.resource_id, a.alias_id
        )
    );
    assert!(!b.attachments[0].config.to_string().contains("REF_"));
}

#[tokio::test]
async fn bare_collaborator_reference_fails_before_create() {
    let h = Harness::new(SimulatedPlane::new());
    let set = descriptors(vec![
        ResourceDefinition::new("A"),
        ResourceDefinition::new("B")
            .with_dependencies(["A"])
            .with_sub_resource(SubResourceSpec::new(
                SubResourceKind::Collaborator,
                "a-collab",
                json!({"aliasArn": "${A.resourceId}"}),
            )),
    ]);
    let m = h.deploy(&set, options(&[])).await;
    assert_eq!(m.status("A"), Some(ResourceStatus::Done));
    assert_eq!(m.status("B"), Some(ResourceStatus::Failed));
    assert_eq!(error_kind(&m, "B"), "FormatError");
    assert_eq!(h.plane.created_names().await, vec!["A"]);
}

// ===========================================================================
// Failure propagation
// ===========================================================================

#[tokio::test]
async fn ready_timeout_skips_dependents_but_not_independents() {
    let h = Harness::new(SimulatedPlane::new().never_ready("A"));
    let set = descriptors(vec![
        ResourceDefinition::new("A"),
        ResourceDefinition::new("B").with_dependencies(["A"]),
        ResourceDefinition::new("C").with_dependencies(["B"]),
        ResourceDefinition::new("D"),
    ]);
    let m = h.deploy(&set, options(&[])).await;

    assert_eq!(m.status("A"), Some(ResourceStatus::Failed));
    assert_eq!(error_kind(&m, "A"), "ReadyTimeoutError");
    assert_eq!(m.resources["A"].state, Some(ProvisionState::Failed));
    assert_eq!(m.status("B"), Some(ResourceStatus::SkippedDependencyFailure));
    assert_eq!(m.status("C"), Some(ResourceStatus::SkippedDependencyFailure));
    assert_eq!(m.status("D"), Some(ResourceStatus::Done));
    assert_eq!(m.outcome, Outcome::Failure);

    let created = h.plane.created_names().await;
    assert!(!created.contains(&"B".to_string()));
    assert!(created.contains(&"D".to_string()));
    assert!(!h.state().await.contains("A"));
}

#[tokio::test]
async fn cycle_is_rejected_before_any_remote_call() {
    let h = Harness::new(SimulatedPlane::new());
    let set = descriptors(vec![
        ResourceDefinition::new("A").with_dependencies(["B"]),
        ResourceDefinition::new("B").with_dependencies(["A"]),
        ResourceDefinition::new("C"),
    ]);
    let mut state = h.state().await;
    let err = h
        .orchestrator()
        .deploy(&set, &mut state, &options(&["C"]))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "CyclicDependencyError");
    assert!(h.plane.calls().await.is_empty());
    assert!(!h.tmp.path().join("runs").exists());
}

#[tokio::test]
async fn unknown_requested_name_is_rejected() {
    let h = Harness::new(SimulatedPlane::new());
    let set = descriptors(vec![ResourceDefinition::new("A")]);
    let mut state = h.state().await;
    let err = h
        .orchestrator()
        .deploy(&set, &mut state, &options(&["nope"]))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::UnknownResource(n) if n == "nope"));
    assert!(h.plane.calls().await.is_empty());
}

// ===========================================================================
// Redeploy and re-scan
// ===========================================================================

#[tokio::test]
async fn rerun_with_skip_makes_no_remote_calls() {
    let h = Harness::new(SimulatedPlane::new());
    let set = descriptors(vec![
        ResourceDefinition::new("A"),
        ResourceDefinition::new("B").with_dependencies(["A"]),
    ]);
    h.deploy(&set, options(&[])).await;
    let calls_after_first = h.plane.calls().await.len();

    let m = h.deploy(&set, options(&[])).await;
    assert!(m.all_done());
    assert!(m.resources["A"].reused && m.resources["B"].reused);
    assert_eq!(h.plane.calls().await.len(), calls_after_first);
}

#[tokio::test]
async fn recreate_overwrites_record_on_success() {
    let h = Harness::new(SimulatedPlane::new());
    let set = descriptors(vec![ResourceDefinition::new("A")]);
    h.deploy(&set, options(&[])).await;
    let first = h.state().await.get("A").cloned().unwrap();

    let mut opts = options(&[]);
    opts.redeploy = RedeployPolicy::Recreate;
    let m = h.deploy(&set, opts).await;
    assert!(m.all_done());
    let second = h.state().await.get("A").cloned().unwrap();
    assert_ne!(first.resource_id, second.resource_id);
    assert_eq!(h.plane.created_names().await, vec!["A", "A"]);
}

#[tokio::test]
async fn failed_recreate_keeps_previous_record() {
    let h = Harness::new(SimulatedPlane::new().fail_attach("tools"));
    let set = descriptors(vec![ResourceDefinition::new("A")]);
    h.deploy(&set, options(&[])).await;
    let first = h.state().await.get("A").cloned().unwrap();

    let with_tools = descriptors(vec![ResourceDefinition::new("A").with_sub_resource(
        SubResourceSpec::new(SubResourceKind::ActionGroup, "tools", json!({})),
    )]);
    let mut opts = options(&[]);
    opts.redeploy = RedeployPolicy::Recreate;
    let m = h.deploy(&with_tools, opts).await;
    assert_eq!(error_kind(&m, "A"), "SubresourceAttachError");
    assert_eq!(h.state().await.get("A"), Some(&first));
}

#[tokio::test]
async fn rescan_admits_newly_resolvable_resources() {
    let h = Harness::new(SimulatedPlane::new());
    let set = descriptors(vec![
        ResourceDefinition::new("A"),
        ResourceDefinition::new("B")
            .with_dependencies(["A"])
            .with_base_config(json!({"instruction": "peer of ${A.aliasId}"})),
        ResourceDefinition::new("C"),
    ]);
    let m = h.deploy(&set, options(&["A"])).await;

    assert_eq!(m.order, vec!["A", "B"]);
    assert_eq!(m.resources["B"].admitted_by.as_deref(), Some("A"));
    assert!(m.all_done());
    let (_, b) = h.plane.agent_by_name("B").await.unwrap();
    let alias = h.state().await.get("A").unwrap().alias_id.clone();
    assert_eq!(b.config["instruction"], format!("peer of {alias}"));
}

#[tokio::test]
async fn rescan_ignores_stale_record_of_failed_dependency() {
    let h = Harness::new(SimulatedPlane::new().fail_attach("tools"));
    let first = descriptors(vec![ResourceDefinition::new("F"), ResourceDefinition::new("P")]);
    assert!(h.deploy(&first, options(&[])).await.all_done());

    let second = descriptors(vec![
        ResourceDefinition::new("F").with_sub_resource(SubResourceSpec::new(
            SubResourceKind::ActionGroup,
            "tools",
            json!({}),
        )),
        ResourceDefinition::new("P"),
        ResourceDefinition::new("X")
            .with_dependencies(["F", "P"])
            .with_base_config(json!({"instruction": "use ${F.resourceId}"})),
    ]);
    let mut opts = options(&["F", "P"]);
    opts.redeploy = RedeployPolicy::Recreate;
    let m = h.deploy(&second, opts).await;

    assert_eq!(m.status("F"), Some(ResourceStatus::Failed));
    assert_eq!(m.status("P"), Some(ResourceStatus::Done));
    assert!(!m.contains("X"));
    assert!(!h.plane.created_names().await.contains(&"X".to_string()));
    assert!(h.state().await.get("X").is_none());
}

#[tokio::test]
async fn rescan_waits_for_queued_dependency_to_be_recreated() {
    let h = Harness::new(SimulatedPlane::new());
    let first = descriptors(vec![ResourceDefinition::new("P"), ResourceDefinition::new("Z")]);
    h.deploy(&first, options(&[])).await;
    let old_z = h.state().await.get("Z").cloned().unwrap();

    let second = descriptors(vec![
        ResourceDefinition::new("P"),
        ResourceDefinition::new("X")
            .with_dependencies(["P", "Z"])
            .with_base_config(json!({"instruction": "use ${Z.resourceId}"})),
        ResourceDefinition::new("Z"),
    ]);
    let mut opts = options(&["P", "Z"]);
    opts.redeploy = RedeployPolicy::Recreate;
    let m = h.deploy(&second, opts).await;

    assert!(m.all_done());
    assert_eq!(m.order, vec!["P", "Z", "X"]);
    assert_eq!(m.resources["X"].admitted_by.as_deref(), Some("Z"));
    let new_z = h.state().await.get("Z").cloned().unwrap();
    assert_ne!(new_z.resource_id, old_z.resource_id);
    let (_, x) = h.plane.agent_by_name("X").await.unwrap();
    assert_eq!(x.config["instruction"], format!("use {}", new_z.resource_id));
}

#[tokio::test]
async fn rescan_can_be_disabled() {
    let h = Harness::new(SimulatedPlane::new());
    let set = descriptors(vec![
        ResourceDefinition::new("A"),
        ResourceDefinition::new("B").with_dependencies(["A"]),
    ]);
    let mut opts = options(&["A"]);
    opts.rescan = false;
    let m = h.deploy(&set, opts).await;
    assert_eq!(m.order, vec!["A"]);
    assert_eq!(h.plane.created_names().await, vec!["A"]);
}

// ===========================================================================
// Policy maintenance
// ===========================================================================

#[tokio::test]
async fn grant_at_ceiling_evicts_oldest_non_default() {
    let store = Arc::new(SimulatedPolicyStore::new(5).with_policy("invoke", PolicyDocument::default(), 5));
    assert_eq!(store.version_ids("invoke").await, vec!["v1", "v2", "v3", "v4", "v5"]);

    let mgr = PolicyVersionManager::new(store.clone(), "invoke", 5);
    match mgr.grant("arn:new").await.unwrap() {
        GrantOutcome::Granted { version_id, evicted } => {
            assert_eq!(evicted, vec!["v1"]);
            assert_eq!(store.get_default("invoke").await.unwrap().1, version_id);
        }
        other => panic!("unexpected {other:?}"),
    }
    let ids = store.version_ids("invoke").await;
    assert_eq!(ids.len(), 5);
    assert!(!ids.contains(&"v1".to_string()));
}

#[tokio::test]
async fn old_default_is_never_evicted() {
    let store = Arc::new(
        SimulatedPolicyStore::new(5)
            .with_policy("invoke", PolicyDocument::default(), 5)
            .with_default("invoke", "v1"),
    );
    let mgr = PolicyVersionManager::new(store.clone(), "invoke", 5);
    mgr.grant("arn:new").await.unwrap();
    let ids = store.version_ids("invoke").await;
    assert!(ids.contains(&"v1".to_string()));
    assert!(!ids.contains(&"v2".to_string()));
    assert_eq!(ids.len(), 5);
}

#[tokio::test]
async fn deploy_grants_every_alias_within_ceiling() {
    let mut h = Harness::new(SimulatedPlane::new());
    h.settings.policy.policy_id = Some("invoke".into());
    h.settings.policy.ceiling = 3;
    let store = Arc::new(SimulatedPolicyStore::new(3).with_policy("invoke", PolicyDocument::default(), 3));
    let set = descriptors(vec![
        ResourceDefinition::new("A"),
        ResourceDefinition::new("B"),
        ResourceDefinition::new("C"),
        ResourceDefinition::new("D"),
    ]);
    let mgr = PolicyVersionManager::from_settings(store.clone(), &h.settings).unwrap();
    let mut state = h.state().await;
    let m = h
        .orchestrator()
        .with_policy(mgr)
        .deploy(&set, &mut state, &options(&[]))
        .await
        .unwrap();
    assert!(m.all_done());

    assert_eq!(store.version_ids("invoke").await.len(), 3);
    let doc = store.default_document("invoke").await.unwrap();
    for name in ["A", "B", "C", "D"] {
        let rec = state.get(name).unwrap();
        let reference = format!(
            "arn:aws:bedrock:us-east-1:123456789012:agent-alias/{}/{}",
            rec.resource_id, rec.alias_id
        );
        assert!(doc.grants("bedrock:InvokeAgent", &reference), "{name} not granted");
    }
}

#[tokio::test]
async fn grant_failure_marks_failed_and_keeps_record() {
    let mut h = Harness::new(SimulatedPlane::new());
    h.settings.policy.policy_id = Some("invoke".into());
    h.settings.policy.ceiling = 1;
    let store = Arc::new(SimulatedPolicyStore::new(1).with_policy("invoke", PolicyDocument::default(), 1));
    let set = descriptors(vec![
        ResourceDefinition::new("A"),
        ResourceDefinition::new("B").with_dependencies(["A"]),
    ]);
    let mgr = PolicyVersionManager::from_settings(store, &h.settings).unwrap();
    let mut state = h.state().await;
    let m = h
        .orchestrator()
        .with_policy(mgr)
        .deploy(&set, &mut state, &options(&[]))
        .await
        .unwrap();

    assert_eq!(m.status("A"), Some(ResourceStatus::Failed));
    assert_eq!(error_kind(&m, "A"), "PolicyVersionCeilingError");
    assert!(state.contains("A"));
    assert_eq!(m.status("B"), Some(ResourceStatus::SkippedDependencyFailure));
}

// ===========================================================================
// Run artifacts
// ===========================================================================

#[tokio::test]
async fn run_artifacts_are_written() {
    let h = Harness::new(SimulatedPlane::new());
    let set = descriptors(vec![ResourceDefinition::new("A")]);
    let m = h.deploy(&set, options(&[])).await;

    let manifest = h.driver.read_artifact(&m.run_id, Artifact::Manifest).await.unwrap();
    let parsed: RunManifest = serde_yaml::from_slice(&manifest).unwrap();
    assert_eq!(parsed.outcome, Outcome::Success);

    let report = h.driver.read_artifact(&m.run_id, Artifact::Report).await.unwrap();
    assert!(String::from_utf8(report).unwrap().contains("✓ A"));

    let events = h.driver.read_artifact(&m.run_id, Artifact::Events).await.unwrap();
    let events: Vec<serde_json::Value> = String::from_utf8(events)
        .unwrap()
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect();
    assert_eq!(events.first().unwrap()["event"], "run_started");
    assert_eq!(events.last().unwrap()["event"], "run_complete");
    assert!(events
        .iter()
        .any(|e| e["event"] == "transition" && e["to"] == "CREATING"));
}

#[tokio::test]
async fn plan_reports_order_and_records() {
    let h = Harness::new(SimulatedPlane::new());
    let set = descriptors(vec![
        ResourceDefinition::new("A"),
        ResourceDefinition::new("B").with_dependencies(["A"]),
    ]);
    h.deploy(&set, options(&["A"])).await;
    let state = h.state().await;
    let entries = plan(&set, &state, &[]).unwrap();
    assert_eq!(entries[0].name, "A");
    assert!(entries[0].recorded);
    assert_eq!(entries[1].dependencies, vec!["A"]);
    assert!(entries[1].external.is_empty());
}

#[tokio::test]
async fn plan_flags_dependencies_without_descriptor() {
    let h = Harness::new(SimulatedPlane::new());
    let set = descriptors(vec![ResourceDefinition::new("B").with_dependencies(["A", "shared"])]);
    let entries = plan(&set, &h.state().await, &[]).unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].external, vec!["A", "shared"]);
}
