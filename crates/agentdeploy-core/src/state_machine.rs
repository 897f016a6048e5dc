use crate::error::{Error, Result};
use crate::types::ProvisionState;

/// Validates a provisioning state transition.
pub fn validate_transition(from: ProvisionState, to: ProvisionState) -> Result<()> {
    if allowed(from, to) {
        Ok(())
    } else {
        Err(Error::IllegalTransition { from, to })
    }
}

pub fn allowed_transitions(from: ProvisionState) -> Vec<ProvisionState> {
    use ProvisionState::*;
    match from {
        Pending => vec![Creating, Failed],
        Creating => vec![WaitingReady, Failed],
        WaitingReady => vec![AttachingSubresources, Failed],
        AttachingSubresources => vec![Finalizing, Failed],
        Finalizing => vec![Aliased, Failed],
        Aliased => vec![Done, Failed],
        Done => vec![],
        Failed => vec![],
    }
}

fn allowed(from: ProvisionState, to: ProvisionState) -> bool {
    allowed_transitions(from).into_iter().any(|s| s == to)
}
