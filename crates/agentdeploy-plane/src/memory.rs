//! Deterministic in-process control plane and policy store.
//!
//! Backs `agentdeploy deploy --simulate` and the test suites. Agents become
//! ready after a configurable number of status polls, so callers exercise the
//! same polling paths they use against a real, eventually-consistent backend.

use crate::plane::{ControlPlane, PlaneError, PlaneResult, PolicyStore};
use crate::types::{AgentStatus, AliasSummary, PolicyDocument, PolicyVersion};
use agentdeploy_core::SubResourceSpec;
use chrono::{DateTime, Duration, TimeZone, Utc};
use std::collections::{BTreeMap, HashSet};
use tokio::sync::Mutex;

/// A remote call as observed by the simulated plane.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PlaneCall {
    Create { name: String },
    Status { resource_id: String },
    Attach { resource_id: String, sub_resource: String },
    Prepare { resource_id: String },
    ListAliases { resource_id: String },
    CreateAlias { resource_id: String, alias: String },
}

/// Snapshot of a simulated agent.
#[derive(Clone, Debug)]
pub struct SimAgent {
    pub name: String,
    pub config: serde_json::Value,
    pub status: AgentStatus,
    pub attachments: Vec<SubResourceSpec>,
    pub aliases: Vec<AliasSummary>,
    polls: u32,
}

#[derive(Default)]
struct PlaneState {
    next_id: u64,
    agents: BTreeMap<String, SimAgent>,
    calls: Vec<PlaneCall>,
    transient_status_errors: u32,
}

pub struct SimulatedPlane {
    state: Mutex<PlaneState>,
    ready_after_polls: u32,
    prepared_after_polls: u32,
    never_ready: HashSet<String>,
    never_prepared: HashSet<String>,
    existing_aliases: BTreeMap<String, Vec<String>>,
    fail_create: HashSet<String>,
    fail_attach: HashSet<String>,
    fail_alias: HashSet<String>,
}

impl Default for SimulatedPlane {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedPlane {
    /// Agents become ready on the first status poll.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(PlaneState::default()),
            ready_after_polls: 1,
            prepared_after_polls: 1,
            never_ready: HashSet::new(),
            never_prepared: HashSet::new(),
            existing_aliases: BTreeMap::new(),
            fail_create: HashSet::new(),
            fail_attach: HashSet::new(),
            fail_alias: HashSet::new(),
        }
    }

    /// Number of status polls before a created agent accepts attachments,
    /// and before a prepare completes.
    pub fn with_ready_after(mut self, polls: u32) -> Self {
        self.ready_after_polls = polls;
        self.prepared_after_polls = polls;
        self
    }

    /// Agents with this name stay in CREATING forever.
    pub fn never_ready(mut self, agent_name: &str) -> Self {
        self.never_ready.insert(agent_name.into());
        self
    }

    /// Agents with this name stay in PREPARING after a prepare request.
    pub fn never_prepared(mut self, agent_name: &str) -> Self {
        self.never_prepared.insert(agent_name.into());
        self
    }

    /// Agents with this name are created already carrying `alias_name`.
    pub fn with_existing_alias(mut self, agent_name: &str, alias_name: &str) -> Self {
        self.existing_aliases
            .entry(agent_name.into())
            .or_default()
            .push(alias_name.into());
        self
    }

    pub fn fail_create(mut self, agent_name: &str) -> Self {
        self.fail_create.insert(agent_name.into());
        self
    }

    /// Attaching a sub-resource with this name is rejected.
    pub fn fail_attach(mut self, sub_resource_name: &str) -> Self {
        self.fail_attach.insert(sub_resource_name.into());
        self
    }

    pub fn fail_alias(mut self, agent_name: &str) -> Self {
        self.fail_alias.insert(agent_name.into());
        self
    }

    /// The next `count` status polls fail with a throttling error.
    pub fn with_transient_status_errors(mut self, count: u32) -> Self {
        self.state.get_mut().transient_status_errors = count;
        self
    }

    pub async fn calls(&self) -> Vec<PlaneCall> {
        self.state.lock().await.calls.clone()
    }

    /// Names passed to `create_agent`, in call order.
    pub async fn created_names(&self) -> Vec<String> {
        self.state
            .lock()
            .await
            .calls
            .iter()
            .filter_map(|c| match c {
                PlaneCall::Create { name } => Some(name.clone()),
                _ => None,
            })
            .collect()
    }

    pub async fn agent(&self, resource_id: &str) -> Option<SimAgent> {
        self.state.lock().await.agents.get(resource_id).cloned()
    }

    pub async fn agent_by_name(&self, name: &str) -> Option<(String, SimAgent)> {
        self.state
            .lock()
            .await
            .agents
            .iter()
            .rev()
            .find(|(_, a)| a.name == name)
            .map(|(id, a)| (id.clone(), a.clone()))
    }
}

fn not_found(resource_id: &str) -> PlaneError {
    PlaneError::NotFound(format!("agent {resource_id}"))
}

#[async_trait::async_trait]
impl ControlPlane for SimulatedPlane {
    fn name(&self) -> &str {
        "simulated"
    }

    async fn create_agent(&self, name: &str, config: &serde_json::Value) -> PlaneResult<String> {
        let mut state = self.state.lock().await;
        state.calls.push(PlaneCall::Create { name: name.into() });
        if self.fail_create.contains(name) {
            return Err(PlaneError::RequestFailed(format!(
                "400: agent configuration for '{name}' rejected"
            )));
        }
        state.next_id += 1;
        let id = format!("AG{:06}", state.next_id);
        let aliases = self
            .existing_aliases
            .get(name)
            .into_iter()
            .flatten()
            .enumerate()
            .map(|(i, alias_name)| AliasSummary {
                alias_id: format!("AL{:04}", i + 1),
                alias_name: alias_name.clone(),
            })
            .collect();
        state.agents.insert(
            id.clone(),
            SimAgent {
                name: name.into(),
                config: config.clone(),
                status: AgentStatus::Creating,
                attachments: Vec::new(),
                aliases,
                polls: 0,
            },
        );
        Ok(id)
    }

    async fn agent_status(&self, resource_id: &str) -> PlaneResult<AgentStatus> {
        let mut state = self.state.lock().await;
        state.calls.push(PlaneCall::Status {
            resource_id: resource_id.into(),
        });
        if state.transient_status_errors > 0 {
            state.transient_status_errors -= 1;
            return Err(PlaneError::Throttled { retry_after_ms: 0 });
        }
        let agent = state
            .agents
            .get_mut(resource_id)
            .ok_or_else(|| not_found(resource_id))?;
        agent.polls += 1;
        match agent.status {
            AgentStatus::Creating
                if !self.never_ready.contains(&agent.name)
                    && agent.polls >= self.ready_after_polls =>
            {
                agent.status = AgentStatus::NotPrepared;
            }
            AgentStatus::Preparing
                if !self.never_prepared.contains(&agent.name)
                    && agent.polls >= self.prepared_after_polls =>
            {
                agent.status = AgentStatus::Prepared;
            }
            _ => {}
        }
        Ok(agent.status.clone())
    }

    async fn attach(&self, resource_id: &str, spec: &SubResourceSpec) -> PlaneResult<String> {
        let mut state = self.state.lock().await;
        state.calls.push(PlaneCall::Attach {
            resource_id: resource_id.into(),
            sub_resource: spec.name.clone(),
        });
        let agent = state
            .agents
            .get_mut(resource_id)
            .ok_or_else(|| not_found(resource_id))?;
        if !agent.status.accepts_attachments() {
            return Err(PlaneError::Conflict(format!(
                "agent {resource_id} is {}",
                agent.status
            )));
        }
        if self.fail_attach.contains(&spec.name) {
            return Err(PlaneError::RequestFailed(format!(
                "400: invalid {} '{}'",
                spec.kind, spec.name
            )));
        }
        agent.attachments.push(spec.clone());
        agent.status = AgentStatus::NotPrepared;
        Ok(format!("{}-{}", spec.kind, agent.attachments.len()))
    }

    async fn prepare(&self, resource_id: &str) -> PlaneResult<()> {
        let mut state = self.state.lock().await;
        state.calls.push(PlaneCall::Prepare {
            resource_id: resource_id.into(),
        });
        let agent = state
            .agents
            .get_mut(resource_id)
            .ok_or_else(|| not_found(resource_id))?;
        agent.status = AgentStatus::Preparing;
        agent.polls = 0;
        Ok(())
    }

    async fn list_aliases(&self, resource_id: &str) -> PlaneResult<Vec<AliasSummary>> {
        let mut state = self.state.lock().await;
        state.calls.push(PlaneCall::ListAliases {
            resource_id: resource_id.into(),
        });
        let agent = state
            .agents
            .get(resource_id)
            .ok_or_else(|| not_found(resource_id))?;
        Ok(agent.aliases.clone())
    }

    async fn create_alias(&self, resource_id: &str, alias_name: &str) -> PlaneResult<String> {
        let mut state = self.state.lock().await;
        state.calls.push(PlaneCall::CreateAlias {
            resource_id: resource_id.into(),
            alias: alias_name.into(),
        });
        let agent = state
            .agents
            .get_mut(resource_id)
            .ok_or_else(|| not_found(resource_id))?;
        if self.fail_alias.contains(&agent.name) {
            return Err(PlaneError::RequestFailed(format!(
                "400: alias '{alias_name}' rejected"
            )));
        }
        if !agent.status.is_prepared() {
            return Err(PlaneError::Conflict(format!(
                "agent {resource_id} is {}",
                agent.status
            )));
        }
        if agent.aliases.iter().any(|a| a.alias_name == alias_name) {
            return Err(PlaneError::Conflict(format!("alias {alias_name} exists")));
        }
        let alias_id = format!("AL{:04}", agent.aliases.len() + 1);
        agent.aliases.push(AliasSummary {
            alias_id: alias_id.clone(),
            alias_name: alias_name.into(),
        });
        Ok(alias_id)
    }
}

// ============================================================
// Policy store
// ============================================================

#[derive(Clone, Debug)]
struct StoredVersion {
    version: PolicyVersion,
    document: PolicyDocument,
}

#[derive(Default)]
struct PolicyState {
    next_seq: i64,
    policies: BTreeMap<String, Vec<StoredVersion>>,
}

/// Versioned policy store that refuses to hold more than `ceiling` versions.
pub struct SimulatedPolicyStore {
    ceiling: usize,
    epoch: DateTime<Utc>,
    state: Mutex<PolicyState>,
}

impl SimulatedPolicyStore {
    pub fn new(ceiling: usize) -> Self {
        Self {
            ceiling,
            epoch: Utc
                .with_ymd_and_hms(2024, 1, 1, 0, 0, 0)
                .single()
                .unwrap_or_else(Utc::now),
            state: Mutex::new(PolicyState::default()),
        }
    }

    /// Seed a policy with `versions` stored documents; the newest is default.
    pub fn with_policy(mut self, policy_id: &str, document: PolicyDocument, versions: usize) -> Self {
        let epoch = self.epoch;
        let state = self.state.get_mut();
        let mut stored = Vec::new();
        for i in 0..versions.max(1) {
            state.next_seq += 1;
            stored.push(StoredVersion {
                version: PolicyVersion {
                    version_id: format!("v{}", state.next_seq),
                    is_default: i + 1 == versions.max(1),
                    created_at: epoch + Duration::seconds(state.next_seq),
                },
                document: document.clone(),
            });
        }
        state.policies.insert(policy_id.into(), stored);
        self
    }

    /// Mark an existing version as default (seeding helper).
    pub fn with_default(mut self, policy_id: &str, version_id: &str) -> Self {
        if let Some(versions) = self.state.get_mut().policies.get_mut(policy_id) {
            for v in versions.iter_mut() {
                v.version.is_default = v.version.version_id == version_id;
            }
        }
        self
    }

    pub async fn version_ids(&self, policy_id: &str) -> Vec<String> {
        self.state
            .lock()
            .await
            .policies
            .get(policy_id)
            .map(|vs| vs.iter().map(|v| v.version.version_id.clone()).collect())
            .unwrap_or_default()
    }

    pub async fn default_document(&self, policy_id: &str) -> Option<PolicyDocument> {
        self.state
            .lock()
            .await
            .policies
            .get(policy_id)
            .and_then(|vs| vs.iter().find(|v| v.version.is_default))
            .map(|v| v.document.clone())
    }
}

fn no_policy(policy_id: &str) -> PlaneError {
    PlaneError::NotFound(format!("policy {policy_id}"))
}

#[async_trait::async_trait]
impl PolicyStore for SimulatedPolicyStore {
    async fn get_default(&self, policy_id: &str) -> PlaneResult<(PolicyDocument, String)> {
        let state = self.state.lock().await;
        let versions = state.policies.get(policy_id).ok_or_else(|| no_policy(policy_id))?;
        versions
            .iter()
            .find(|v| v.version.is_default)
            .map(|v| (v.document.clone(), v.version.version_id.clone()))
            .ok_or_else(|| PlaneError::InvalidResponse(format!("policy {policy_id} has no default")))
    }

    async fn list_versions(&self, policy_id: &str) -> PlaneResult<Vec<PolicyVersion>> {
        let state = self.state.lock().await;
        let versions = state.policies.get(policy_id).ok_or_else(|| no_policy(policy_id))?;
        Ok(versions.iter().map(|v| v.version.clone()).collect())
    }

    async fn delete_version(&self, policy_id: &str, version_id: &str) -> PlaneResult<()> {
        let mut state = self.state.lock().await;
        let versions = state
            .policies
            .get_mut(policy_id)
            .ok_or_else(|| no_policy(policy_id))?;
        let idx = versions
            .iter()
            .position(|v| v.version.version_id == version_id)
            .ok_or_else(|| PlaneError::NotFound(format!("version {version_id}")))?;
        if versions[idx].version.is_default {
            return Err(PlaneError::Conflict(format!(
                "cannot delete default version {version_id}"
            )));
        }
        versions.remove(idx);
        Ok(())
    }

    async fn create_version(
        &self,
        policy_id: &str,
        document: &PolicyDocument,
        set_as_default: bool,
    ) -> PlaneResult<String> {
        let mut state = self.state.lock().await;
        state.next_seq += 1;
        let seq = state.next_seq;
        let ceiling = self.ceiling;
        let versions = state
            .policies
            .get_mut(policy_id)
            .ok_or_else(|| no_policy(policy_id))?;
        if versions.len() >= ceiling {
            return Err(PlaneError::LimitExceeded(format!(
                "policy {policy_id} already has {} versions",
                versions.len()
            )));
        }
        if set_as_default {
            for v in versions.iter_mut() {
                v.version.is_default = false;
            }
        }
        let version_id = format!("v{seq}");
        versions.push(StoredVersion {
            version: PolicyVersion {
                version_id: version_id.clone(),
                is_default: set_as_default,
                created_at: self.epoch + Duration::seconds(seq),
            },
            document: document.clone(),
        });
        Ok(version_id)
    }
}
