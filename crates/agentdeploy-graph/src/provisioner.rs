//! Per-resource provisioning state machine.
//!
//! `PENDING -> CREATING -> WAITING_READY -> ATTACHING_SUBRESOURCES ->
//! FINALIZING -> ALIASED -> DONE`, with `FAILED` reachable from every live
//! state. Every step is checked against the core transition table and kept
//! in a trace the orchestrator turns into run events.

use crate::resolver::ResolvedDefinition;
use agentdeploy_core::{
    validate_transition, Error, ProvisionState, ProvisionedRecord, Result, Settings,
};
use agentdeploy_plane::{AgentStatus, ControlPlane};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Polling and alias parameters.
#[derive(Clone, Debug)]
pub struct ProvisionerConfig {
    pub poll_interval: Duration,
    pub ready_attempts: u32,
    pub prepare_attempts: u32,
    pub alias_name: String,
}

impl From<&Settings> for ProvisionerConfig {
    fn from(settings: &Settings) -> Self {
        Self {
            poll_interval: settings.polling.interval(),
            ready_attempts: settings.polling.ready_attempts,
            prepare_attempts: settings.polling.prepare_attempts,
            alias_name: settings.alias.name.clone(),
        }
    }
}

/// One recorded state change.
#[derive(Clone, Debug, Serialize)]
pub struct StateChange {
    pub from: ProvisionState,
    pub to: ProvisionState,
    pub at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource_id: Option<String>,
}

/// Result of one provisioning attempt.
#[derive(Debug)]
pub struct ProvisionRun {
    pub trace: Vec<StateChange>,
    pub outcome: Result<ProvisionedRecord>,
}

impl ProvisionRun {
    pub fn final_state(&self) -> ProvisionState {
        self.trace
            .last()
            .map(|c| c.to)
            .unwrap_or(ProvisionState::Pending)
    }

    pub fn entered(&self, state: ProvisionState) -> bool {
        self.trace.iter().any(|c| c.to == state)
    }
}

struct Tracker<'a> {
    resource: &'a str,
    state: ProvisionState,
    resource_id: Option<String>,
    trace: Vec<StateChange>,
}

impl<'a> Tracker<'a> {
    fn new(resource: &'a str) -> Self {
        Self {
            resource,
            state: ProvisionState::Pending,
            resource_id: None,
            trace: Vec::new(),
        }
    }

    fn advance(&mut self, to: ProvisionState) -> Result<()> {
        validate_transition(self.state, to)?;
        info!(resource = self.resource, from = %self.state, state = %to, "transition");
        self.trace.push(StateChange {
            from: self.state,
            to,
            at: Utc::now(),
            resource_id: self.resource_id.clone(),
        });
        self.state = to;
        Ok(())
    }
}

pub struct Provisioner<'a> {
    plane: &'a dyn ControlPlane,
    config: &'a ProvisionerConfig,
}

impl<'a> Provisioner<'a> {
    pub fn new(plane: &'a dyn ControlPlane, config: &'a ProvisionerConfig) -> Self {
        Self { plane, config }
    }

    /// Drive one resolved definition to DONE or FAILED.
    pub async fn provision(&self, def: &ResolvedDefinition) -> ProvisionRun {
        let mut tracker = Tracker::new(&def.name);
        let outcome = self.drive(def, &mut tracker).await;
        if let Err(e) = &outcome {
            warn!(resource = %def.name, state = %tracker.state, error = %e, "provisioning failed");
            if !tracker.state.is_terminal() {
                let from = tracker.state;
                tracker.trace.push(StateChange {
                    from,
                    to: ProvisionState::Failed,
                    at: Utc::now(),
                    resource_id: tracker.resource_id.clone(),
                });
                tracker.state = ProvisionState::Failed;
            }
        }
        ProvisionRun {
            trace: tracker.trace,
            outcome,
        }
    }

    async fn drive(&self, def: &ResolvedDefinition, t: &mut Tracker<'_>) -> Result<ProvisionedRecord> {
        let name = def.name.as_str();

        t.advance(ProvisionState::Creating)?;
        let resource_id = self
            .plane
            .create_agent(name, &def.base_config)
            .await
            .map_err(|e| Error::CreateRequest {
                resource: name.into(),
                message: e.to_string(),
            })?;
        debug!(resource = name, resource_id = %resource_id, "create accepted");
        t.resource_id = Some(resource_id.clone());

        t.advance(ProvisionState::WaitingReady)?;
        self.wait_for(
            name,
            &resource_id,
            ProvisionState::WaitingReady,
            self.config.ready_attempts,
            AgentStatus::accepts_attachments,
        )
        .await?;

        t.advance(ProvisionState::AttachingSubresources)?;
        for spec in &def.sub_resources {
            let id = self
                .plane
                .attach(&resource_id, spec)
                .await
                .map_err(|e| Error::SubresourceAttach {
                    resource: name.into(),
                    sub_resource: spec.name.clone(),
                    message: e.to_string(),
                })?;
            debug!(resource = name, kind = %spec.kind, sub_resource = %spec.name, id = %id, "attached");
        }

        t.advance(ProvisionState::Finalizing)?;
        self.plane
            .prepare(&resource_id)
            .await
            .map_err(|e| Error::CreateRequest {
                resource: name.into(),
                message: format!("prepare rejected: {e}"),
            })?;
        self.wait_for(
            name,
            &resource_id,
            ProvisionState::Finalizing,
            self.config.prepare_attempts,
            AgentStatus::is_prepared,
        )
        .await?;

        t.advance(ProvisionState::Aliased)?;
        let alias_id = self.ensure_alias(name, &resource_id).await?;

        t.advance(ProvisionState::Done)?;
        Ok(ProvisionedRecord::new(resource_id, alias_id))
    }

    /// Poll until `ready` holds, a remote failure is reported, or attempts run out.
    /// Transient errors consume an attempt and are otherwise ignored.
    async fn wait_for(
        &self,
        name: &str,
        resource_id: &str,
        phase: ProvisionState,
        max_attempts: u32,
        ready: fn(&AgentStatus) -> bool,
    ) -> Result<()> {
        let attempts = max_attempts.max(1);
        for attempt in 1..=attempts {
            match self.plane.agent_status(resource_id).await {
                Ok(status) if ready(&status) => {
                    debug!(resource = name, state = %phase, attempt, status = %status, "ready");
                    return Ok(());
                }
                Ok(status) if status.is_failed() => {
                    return Err(Error::CreateRequest {
                        resource: name.into(),
                        message: format!("remote status FAILED during {phase}"),
                    });
                }
                Ok(status) => {
                    debug!(resource = name, state = %phase, attempt, status = %status, "not ready");
                }
                Err(e) if e.is_transient() => {
                    warn!(resource = name, state = %phase, attempt, error = %e, "transient poll error");
                }
                Err(e) => {
                    return Err(Error::CreateRequest {
                        resource: name.into(),
                        message: format!("status poll failed during {phase}: {e}"),
                    });
                }
            }
            if attempt < attempts {
                tokio::time::sleep(self.config.poll_interval).await;
            }
        }
        Err(Error::ReadyTimeout {
            resource: name.into(),
            phase,
            attempts,
        })
    }

    /// Reuse the configured alias if it exists, otherwise create it.
    async fn ensure_alias(&self, name: &str, resource_id: &str) -> Result<String> {
        let alias = self.config.alias_name.as_str();
        let to_error = |e: agentdeploy_plane::PlaneError| Error::AliasCreation {
            resource: name.into(),
            alias: alias.into(),
            message: e.to_string(),
        };
        let existing = self.plane.list_aliases(resource_id).await.map_err(to_error)?;
        if let Some(found) = existing.into_iter().find(|a| a.alias_name == alias) {
            debug!(resource = name, alias_id = %found.alias_id, "reusing alias");
            return Ok(found.alias_id);
        }
        self.plane
            .create_alias(resource_id, alias)
            .await
            .map_err(to_error)
    }
}
