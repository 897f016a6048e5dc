//! Invoke-permission document maintenance with a bounded version history.

use agentdeploy_core::{render_template, Error, ProvisionedRecord, Result, Settings};
use agentdeploy_plane::{PlaneError, PolicyStore, PolicyVersion};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info};

/// Stored versions ordered oldest first, with a fixed capacity.
#[derive(Clone, Debug)]
pub struct VersionHistory {
    versions: Vec<PolicyVersion>,
    ceiling: usize,
}

impl VersionHistory {
    pub fn new(mut versions: Vec<PolicyVersion>, ceiling: usize) -> Self {
        versions.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.version_id.cmp(&b.version_id))
        });
        Self { versions, ceiling }
    }

    pub fn len(&self) -> usize {
        self.versions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.versions.is_empty()
    }

    /// Adding one more version would exceed the ceiling.
    pub fn is_full(&self) -> bool {
        self.versions.len() >= self.ceiling
    }

    /// The oldest version that is not the default.
    pub fn eviction_candidate(&self) -> Option<&PolicyVersion> {
        self.versions.iter().find(|v| !v.is_default)
    }

    fn remove(&mut self, version_id: &str) {
        self.versions.retain(|v| v.version_id != version_id);
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GrantOutcome {
    AlreadyGranted,
    Granted {
        version_id: String,
        evicted: Vec<String>,
    },
}

pub struct PolicyVersionManager {
    store: Arc<dyn PolicyStore>,
    policy_id: String,
    ceiling: usize,
    action: String,
    reference_template: String,
    vars: BTreeMap<String, String>,
}

fn store_error(e: PlaneError) -> Error {
    Error::PolicyStore(e.to_string())
}

impl PolicyVersionManager {
    pub fn new(store: Arc<dyn PolicyStore>, policy_id: impl Into<String>, ceiling: usize) -> Self {
        let defaults = Settings::default();
        Self {
            store,
            policy_id: policy_id.into(),
            ceiling,
            action: defaults.policy.action.clone(),
            reference_template: defaults.policy.alias_reference_template.clone(),
            vars: defaults.template_vars(),
        }
    }

    /// Manager for the configured policy, or `None` when maintenance is disabled.
    pub fn from_settings(store: Arc<dyn PolicyStore>, settings: &Settings) -> Option<Self> {
        let policy_id = settings.policy.policy_id.clone()?;
        Some(Self {
            store,
            policy_id,
            ceiling: settings.policy.ceiling,
            action: settings.policy.action.clone(),
            reference_template: settings.policy.alias_reference_template.clone(),
            vars: settings.template_vars(),
        })
    }

    pub fn policy_id(&self) -> &str {
        &self.policy_id
    }

    /// Reference granted for a provisioned resource's alias.
    pub fn reference_for(&self, record: &ProvisionedRecord) -> String {
        let mut vars = self.vars.clone();
        vars.extend(record.template_vars());
        render_template(&self.reference_template, &vars)
    }

    /// Ensure `reference` is in the granting statement, publishing a new
    /// default version if needed. The stored version count never exceeds
    /// the ceiling.
    pub async fn grant(&self, reference: &str) -> Result<GrantOutcome> {
        let (mut document, current) = self
            .store
            .get_default(&self.policy_id)
            .await
            .map_err(store_error)?;
        if document.grants(&self.action, reference) {
            debug!(policy = %self.policy_id, reference, "already granted");
            return Ok(GrantOutcome::AlreadyGranted);
        }

        let versions = self
            .store
            .list_versions(&self.policy_id)
            .await
            .map_err(store_error)?;
        let mut history = VersionHistory::new(versions, self.ceiling);
        let mut evicted = Vec::new();
        while history.is_full() {
            let victim = history
                .eviction_candidate()
                .map(|v| v.version_id.clone())
                .ok_or_else(|| self.ceiling_error(history.len()))?;
            self.store
                .delete_version(&self.policy_id, &victim)
                .await
                .map_err(store_error)?;
            info!(policy = %self.policy_id, version = %victim, "evicted policy version");
            history.remove(&victim);
            evicted.push(victim);
        }

        document
            .granting_statement_mut(&self.action)
            .resource
            .push(reference.to_string());
        let version_id = self
            .store
            .create_version(&self.policy_id, &document, true)
            .await
            .map_err(|e| match e {
                PlaneError::LimitExceeded(_) => self.ceiling_error(history.len()),
                other => store_error(other),
            })?;
        info!(
            policy = %self.policy_id,
            previous = %current,
            version = %version_id,
            reference,
            "granted"
        );
        Ok(GrantOutcome::Granted {
            version_id,
            evicted,
        })
    }

    fn ceiling_error(&self, versions: usize) -> Error {
        Error::PolicyVersionCeiling {
            policy_id: self.policy_id.clone(),
            versions,
            ceiling: self.ceiling,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentdeploy_plane::{PolicyDocument, SimulatedPolicyStore};
    use chrono::{TimeZone, Utc};

    fn version(id: &str, secs: i64, is_default: bool) -> PolicyVersion {
        PolicyVersion {
            version_id: id.into(),
            is_default,
            created_at: Utc.timestamp_opt(secs, 0).unwrap(),
        }
    }

    #[test]
    fn history_orders_by_creation_time() {
        let h = VersionHistory::new(
            vec![version("v3", 30, false), version("v1", 10, true), version("v2", 20, false)],
            3,
        );
        assert!(h.is_full());
        assert_eq!(h.eviction_candidate().unwrap().version_id, "v2");
    }

    #[test]
    fn only_default_means_no_candidate() {
        let h = VersionHistory::new(vec![version("v1", 10, true)], 1);
        assert!(h.eviction_candidate().is_none());
    }

    #[tokio::test]
    async fn grant_is_idempotent() {
        let store = Arc::new(SimulatedPolicyStore::new(5).with_policy("p", PolicyDocument::default(), 1));
        let mgr = PolicyVersionManager::new(store.clone(), "p", 5);
        assert!(matches!(mgr.grant("arn:x").await.unwrap(), GrantOutcome::Granted { .. }));
        assert_eq!(mgr.grant("arn:x").await.unwrap(), GrantOutcome::AlreadyGranted);
        assert_eq!(store.version_ids("p").await.len(), 2);
    }

    #[tokio::test]
    async fn ceiling_with_only_default_fails() {
        let store = Arc::new(SimulatedPolicyStore::new(1).with_policy("p", PolicyDocument::default(), 1));
        let mgr = PolicyVersionManager::new(store, "p", 1);
        let err = mgr.grant("arn:x").await.unwrap_err();
        assert_eq!(err.kind(), "PolicyVersionCeilingError");
    }

    #[test]
    fn reference_uses_template() {
        let mut settings = Settings::default();
        settings.policy.policy_id = Some("p".into());
        settings.control_plane.account = "123".into();
        let store = Arc::new(SimulatedPolicyStore::new(5));
        let mgr = PolicyVersionManager::from_settings(store, &settings).unwrap();
        let rec = ProvisionedRecord::new("r-1", "al-1");
        assert_eq!(
            mgr.reference_for(&rec),
            "arn:aws:bedrock:us-east-1:123:agent-alias/r-1/al-1"
        );
    }

    #[test]
    fn disabled_without_policy_id() {
        let store = Arc::new(SimulatedPolicyStore::new(5));
        assert!(PolicyVersionManager::from_settings(store, &Settings::default()).is_none());
    }
}
