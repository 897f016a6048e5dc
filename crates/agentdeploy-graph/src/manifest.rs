//! Run manifest: structured metadata for every deploy run.

use agentdeploy_core::{Error, ProvisionState, RedeployPolicy, ResourceStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct RunManifest {
    pub run_id: String,
    pub started: DateTime<Utc>,
    pub ended: Option<DateTime<Utc>>,
    pub outcome: Outcome,
    pub redeploy: RedeployPolicy,
    pub requested: Vec<String>,
    pub order: Vec<String>,
    pub total_wall_ms: u64,
    pub resources: BTreeMap<String, ResourceEntry>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Pending,
    Success,
    Failure,
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Success => write!(f, "success"),
            Self::Failure => write!(f, "failure"),
        }
    }
}

/// First concrete error recorded for a resource.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ErrorSummary {
    pub kind: String,
    pub message: String,
}

impl From<&Error> for ErrorSummary {
    fn from(e: &Error) -> Self {
        Self {
            kind: e.kind().to_string(),
            message: e.to_string(),
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct ResourceEntry {
    /// Terminal status; `None` until the resource has been handled.
    pub status: Option<ResourceStatus>,
    /// Last provisioning state reached in this run.
    pub state: Option<ProvisionState>,
    pub resource_id: Option<String>,
    pub alias_id: Option<String>,
    /// Reported DONE from an existing record without remote calls.
    #[serde(default)]
    pub reused: bool,
    /// Added by re-scan after this resource completed.
    pub admitted_by: Option<String>,
    pub error: Option<ErrorSummary>,
    pub started: Option<DateTime<Utc>>,
    pub ended: Option<DateTime<Utc>>,
    pub wall_ms: u64,
}

impl RunManifest {
    pub fn new(run_id: &str, requested: &[String], redeploy: RedeployPolicy) -> Self {
        Self {
            run_id: run_id.into(),
            started: Utc::now(),
            ended: None,
            outcome: Outcome::Pending,
            redeploy,
            requested: requested.to_vec(),
            order: Vec::new(),
            total_wall_ms: 0,
            resources: BTreeMap::new(),
        }
    }

    pub fn add_resource(&mut self, name: &str, admitted_by: Option<&str>) {
        self.order.push(name.into());
        self.resources.insert(
            name.into(),
            ResourceEntry {
                admitted_by: admitted_by.map(String::from),
                ..Default::default()
            },
        );
    }

    pub fn contains(&self, name: &str) -> bool {
        self.resources.contains_key(name)
    }

    /// Handled resources have a terminal status.
    pub fn is_handled(&self, name: &str) -> bool {
        self.resources
            .get(name)
            .is_some_and(|r| r.status.is_some())
    }

    pub fn status(&self, name: &str) -> Option<ResourceStatus> {
        self.resources.get(name).and_then(|r| r.status)
    }

    pub fn start_resource(&mut self, name: &str) {
        if let Some(r) = self.resources.get_mut(name) {
            r.started = Some(Utc::now());
        }
    }

    pub fn set_state(&mut self, name: &str, state: ProvisionState) {
        if let Some(r) = self.resources.get_mut(name) {
            r.state = Some(state);
        }
    }

    pub fn set_ids(&mut self, name: &str, resource_id: &str, alias_id: &str) {
        if let Some(r) = self.resources.get_mut(name) {
            r.resource_id = Some(resource_id.into());
            r.alias_id = Some(alias_id.into());
        }
    }

    pub fn mark_reused(&mut self, name: &str) {
        if let Some(r) = self.resources.get_mut(name) {
            r.reused = true;
        }
    }

    /// Record the terminal status. The first error recorded is kept.
    pub fn finish_resource(&mut self, name: &str, status: ResourceStatus, error: Option<ErrorSummary>) {
        if let Some(r) = self.resources.get_mut(name) {
            r.status = Some(status);
            if r.error.is_none() {
                r.error = error;
            }
            let ended = Utc::now();
            r.ended = Some(ended);
            if let Some(start) = r.started {
                r.wall_ms = (ended - start).num_milliseconds().max(0) as u64;
            }
        }
    }

    pub fn all_done(&self) -> bool {
        self.resources
            .values()
            .all(|r| r.status == Some(ResourceStatus::Done))
    }

    pub fn count(&self, status: ResourceStatus) -> usize {
        self.resources
            .values()
            .filter(|r| r.status == Some(status))
            .count()
    }

    pub fn finalize(&mut self) {
        self.outcome = if self.all_done() {
            Outcome::Success
        } else {
            Outcome::Failure
        };
        let ended = Utc::now();
        self.ended = Some(ended);
        self.total_wall_ms = (ended - self.started).num_milliseconds().max(0) as u64;
    }

    /// Process exit code: 0 only when every resource is DONE.
    pub fn exit_code(&self) -> u8 {
        if self.all_done() {
            0
        } else {
            1
        }
    }

    pub fn to_yaml(&self) -> String {
        serde_yaml::to_string(self).unwrap_or_default()
    }

    /// Status table in run order, with the first error of each non-DONE resource.
    pub fn status_table(&self) -> String {
        let width = self
            .order
            .iter()
            .map(String::len)
            .max()
            .unwrap_or(0)
            .max("RESOURCE".len());
        let mut out = format!("{:<width$}  {:<26}  DETAIL\n", "RESOURCE", "STATUS");
        for name in &self.order {
            let Some(entry) = self.resources.get(name) else {
                continue;
            };
            let status = entry
                .status
                .map(|s| s.to_string())
                .unwrap_or_else(|| "NOT_ATTEMPTED".into());
            let detail = match (&entry.error, entry.status) {
                (Some(e), _) => format!("{}: {}", e.kind, e.message),
                (None, Some(ResourceStatus::Done)) if entry.reused => "existing record".to_string(),
                (None, Some(ResourceStatus::Done)) => entry
                    .resource_id
                    .as_deref()
                    .map(|id| format!("{} / {}", id, entry.alias_id.as_deref().unwrap_or("-")))
                    .unwrap_or_default(),
                _ => String::new(),
            };
            out.push_str(&format!("{:<width$}  {:<26}  {}\n", name, status, detail));
        }
        out
    }

    pub fn run_log_line(&self) -> String {
        format!(
            "| {} | {} | {} | {} done | {} failed | {} skipped |",
            self.run_id,
            self.started.format("%Y-%m-%dT%H:%M:%S"),
            self.outcome,
            self.count(ResourceStatus::Done),
            self.count(ResourceStatus::Failed),
            self.count(ResourceStatus::SkippedDependencyFailure),
        )
    }
}
