//! agentdeploy-graph: dependency-ordered provisioning
//!
//! Builds the deployment graph from descriptors and drives every resource
//! through validation, placeholder resolution, provisioning and policy
//! maintenance, recording run artifacts through a pluggable driver.

pub mod graph;
pub mod manifest;
pub mod orchestrator;
pub mod policy;
pub mod provisioner;
pub mod resolver;
pub mod resource;
pub mod state;
pub mod validator;

pub use graph::DeploymentGraph;
pub use manifest::{ErrorSummary, Outcome, ResourceEntry, RunManifest};
pub use orchestrator::{plan, DeployOptions, Orchestrator, PlanEntry};
pub use policy::{GrantOutcome, PolicyVersionManager, VersionHistory};
pub use provisioner::{ProvisionRun, Provisioner, ProvisionerConfig, StateChange};
pub use resolver::{ResolvedDefinition, Resolver};
pub use resource::{Artifact, LocalFsDriver, RunDriver, RunEvent};
pub use state::{StateSnapshot, StateStore};
pub use validator::validate_dependencies;
