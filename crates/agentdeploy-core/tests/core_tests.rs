//! Tests for agentdeploy-core: types, error kinds, descriptor wire format

use agentdeploy_core::*;
use serde_json::json;

// ===========================================================================
// Error kinds
// ===========================================================================

#[test]
fn missing_dependency_lists_every_name() {
    let err = Error::missing_dependency("router", vec!["billing".into(), "search".into()]);
    assert_eq!(err.kind(), "MissingDependencyError");
    let msg = err.to_string();
    assert!(msg.contains("router"));
    assert!(msg.contains("billing, search"));
}

#[test]
fn ready_timeout_names_phase() {
    let err = Error::ReadyTimeout {
        resource: "a".into(),
        phase: ProvisionState::WaitingReady,
        attempts: 3,
    };
    assert_eq!(err.kind(), "ReadyTimeoutError");
    assert!(err.to_string().contains("WAITING_READY"));
}

#[test]
fn cycle_error_renders_path() {
    let err = Error::CyclicDependency {
        cycle: vec!["a".into(), "b".into(), "a".into()],
    };
    assert_eq!(err.to_string(), "dependency cycle: a -> b -> a");
}

#[test]
fn io_errors_convert() {
    fn read() -> Result<String> {
        Ok(std::fs::read_to_string("/nonexistent/agentdeploy/file")?)
    }
    assert_eq!(read().unwrap_err().kind(), "IoError");
}

// ===========================================================================
// ResourceDefinition
// ===========================================================================

#[test]
fn definition_builder() {
    let def = ResourceDefinition::new("router")
        .with_dependencies(["billing"])
        .with_base_config(json!({"instruction": "route"}))
        .with_sub_resource(SubResourceSpec::new(
            SubResourceKind::Collaborator,
            "billing",
            json!({"aliasArn": "REF_BILLING"}),
        ));
    assert!(def.depends_on("billing"));
    assert!(!def.depends_on("search"));
    assert_eq!(def.sub_resource_specs.len(), 1);
}

#[test]
fn definition_wire_format_is_camel_case() {
    let def: ResourceDefinition = serde_json::from_value(json!({
        "name": "a",
        "dependencies": ["b"],
        "baseConfig": {"model": "m"},
        "subResourceSpecs": [{"kind": "knowledge_base", "name": "docs", "config": {"id": "kb-1"}}]
    }))
    .unwrap();
    assert_eq!(def.base_config["model"], "m");
    assert_eq!(def.sub_resource_specs[0].kind, SubResourceKind::KnowledgeBase);
}

// ===========================================================================
// Placeholder mappings
// ===========================================================================

#[test]
fn placeholder_mapping_yaml() {
    let table: PlaceholderTable = serde_yaml::from_str(
        "REF_A_ID:\n  dependency: A\n  attribute: resourceId\n\
         REF_A_ALIAS_ARN:\n  dependency: A\n  attribute: aliasId\n  template: \"x/{resourceId}/{aliasId}\"\n",
    )
    .unwrap();
    assert_eq!(table["REF_A_ID"], PlaceholderMapping::attribute("A", RecordAttribute::ResourceId));
    assert_eq!(table["REF_A_ALIAS_ARN"].template.as_deref(), Some("x/{resourceId}/{aliasId}"));
}

// ===========================================================================
// Settings
// ===========================================================================

#[test]
fn settings_template_vars() {
    let mut s = Settings::default();
    s.control_plane.account = "123456789012".into();
    let vars = s.template_vars();
    let rendered = render_template(&s.policy.alias_reference_template, &vars);
    assert_eq!(
        rendered,
        "arn:aws:bedrock:us-east-1:123456789012:agent-alias/{resourceId}/{aliasId}"
    );
}
