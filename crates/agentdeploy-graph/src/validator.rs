//! Dependency precondition check.

use crate::state::StateSnapshot;
use agentdeploy_core::{Error, ResourceDefinition, Result};

/// Confirm every declared dependency has a provisioned record.
///
/// All missing names are collected into a single error. Success only means
/// a creation record exists; the dependency's health is not checked.
pub fn validate_dependencies(def: &ResourceDefinition, state: &StateSnapshot) -> Result<()> {
    let missing: Vec<String> = def
        .dependencies
        .iter()
        .filter(|dep| !state.contains_key(dep.as_str()))
        .cloned()
        .collect();
    if missing.is_empty() {
        Ok(())
    } else {
        Err(Error::missing_dependency(&def.name, missing))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentdeploy_core::ProvisionedRecord;

    #[test]
    fn collects_every_missing_dependency() {
        let def = ResourceDefinition::new("router").with_dependencies(["a", "b", "c"]);
        let mut state = StateSnapshot::new();
        state.insert("b".into(), ProvisionedRecord::new("r-b", "al-b"));
        match validate_dependencies(&def, &state).unwrap_err() {
            Error::MissingDependency { resource, missing } => {
                assert_eq!(resource, "router");
                assert_eq!(missing, vec!["a", "c"]);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn no_dependencies_always_passes() {
        let def = ResourceDefinition::new("leaf");
        assert!(validate_dependencies(&def, &StateSnapshot::new()).is_ok());
    }
}
