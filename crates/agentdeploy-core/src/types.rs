//! Core types for agentdeploy

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// A declared agent resource, loaded once per run from its descriptor.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceDefinition {
    pub name: String,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub base_config: serde_json::Value,
    #[serde(default)]
    pub sub_resource_specs: Vec<SubResourceSpec>,
}

impl ResourceDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            dependencies: Vec::new(),
            base_config: serde_json::Value::Object(Default::default()),
            sub_resource_specs: Vec::new(),
        }
    }

    pub fn with_dependencies<I, S>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependencies = deps.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_base_config(mut self, config: serde_json::Value) -> Self {
        self.base_config = config;
        self
    }

    pub fn with_sub_resource(mut self, spec: SubResourceSpec) -> Self {
        self.sub_resource_specs.push(spec);
        self
    }

    pub fn depends_on(&self, name: &str) -> bool {
        self.dependencies.iter().any(|d| d == name)
    }
}

/// Kind of attachment submitted after the agent exists.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubResourceKind {
    ActionGroup,
    KnowledgeBase,
    Collaborator,
}

impl fmt::Display for SubResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ActionGroup => write!(f, "action_group"),
            Self::KnowledgeBase => write!(f, "knowledge_base"),
            Self::Collaborator => write!(f, "collaborator"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SubResourceSpec {
    pub kind: SubResourceKind,
    pub name: String,
    #[serde(default)]
    pub config: serde_json::Value,
}

impl SubResourceSpec {
    pub fn new(kind: SubResourceKind, name: impl Into<String>, config: serde_json::Value) -> Self {
        Self {
            kind,
            name: name.into(),
            config,
        }
    }
}

/// The durable fact that a resource completed its lifecycle.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProvisionedRecord {
    pub resource_id: String,
    pub alias_id: String,
    pub created_at: DateTime<Utc>,
}

impl ProvisionedRecord {
    pub fn new(resource_id: impl Into<String>, alias_id: impl Into<String>) -> Self {
        Self {
            resource_id: resource_id.into(),
            alias_id: alias_id.into(),
            created_at: Utc::now(),
        }
    }

    pub fn attribute(&self, attr: RecordAttribute) -> String {
        match attr {
            RecordAttribute::ResourceId => self.resource_id.clone(),
            RecordAttribute::AliasId => self.alias_id.clone(),
            RecordAttribute::CreatedAt => self.created_at.to_rfc3339(),
        }
    }

    /// Template variables exposing this record: `{resourceId}`, `{aliasId}`, `{createdAt}`.
    pub fn template_vars(&self) -> BTreeMap<String, String> {
        RecordAttribute::ALL
            .iter()
            .map(|a| (a.as_str().to_string(), self.attribute(*a)))
            .collect()
    }
}

/// Attribute path into a [`ProvisionedRecord`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RecordAttribute {
    #[serde(rename = "resourceId")]
    ResourceId,
    #[serde(rename = "aliasId")]
    AliasId,
    #[serde(rename = "createdAt")]
    CreatedAt,
}

impl RecordAttribute {
    pub const ALL: [RecordAttribute; 3] = [Self::ResourceId, Self::AliasId, Self::CreatedAt];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ResourceId => "resourceId",
            Self::AliasId => "aliasId",
            Self::CreatedAt => "createdAt",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|a| a.as_str() == s)
    }
}

/// How a placeholder token maps onto a dependency's record.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaceholderMapping {
    pub dependency: String,
    pub attribute: RecordAttribute,
    /// Composition template, e.g. `arn:...:agent-alias/{resourceId}/{aliasId}`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template: Option<String>,
}

impl PlaceholderMapping {
    pub fn attribute(dependency: impl Into<String>, attribute: RecordAttribute) -> Self {
        Self {
            dependency: dependency.into(),
            attribute,
            template: None,
        }
    }

    pub fn composed(dependency: impl Into<String>, template: impl Into<String>) -> Self {
        Self {
            dependency: dependency.into(),
            attribute: RecordAttribute::ResourceId,
            template: Some(template.into()),
        }
    }
}

/// Token -> mapping table, loaded from `placeholders.yaml`.
pub type PlaceholderTable = BTreeMap<String, PlaceholderMapping>;

/// Per-resource provisioning lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProvisionState {
    Pending,
    Creating,
    WaitingReady,
    AttachingSubresources,
    Finalizing,
    Aliased,
    Done,
    Failed,
}

impl ProvisionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }
}

impl fmt::Display for ProvisionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "PENDING"),
            Self::Creating => write!(f, "CREATING"),
            Self::WaitingReady => write!(f, "WAITING_READY"),
            Self::AttachingSubresources => write!(f, "ATTACHING_SUBRESOURCES"),
            Self::Finalizing => write!(f, "FINALIZING"),
            Self::Aliased => write!(f, "ALIASED"),
            Self::Done => write!(f, "DONE"),
            Self::Failed => write!(f, "FAILED"),
        }
    }
}

/// Terminal status of a resource within one run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResourceStatus {
    Done,
    Failed,
    SkippedDependencyFailure,
}

impl fmt::Display for ResourceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Done => write!(f, "DONE"),
            Self::Failed => write!(f, "FAILED"),
            Self::SkippedDependencyFailure => write!(f, "SKIPPED_DEPENDENCY_FAILURE"),
        }
    }
}

/// What to do with a requested resource that already has a record.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RedeployPolicy {
    #[default]
    Skip,
    Recreate,
}

impl fmt::Display for RedeployPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Skip => write!(f, "skip"),
            Self::Recreate => write!(f, "recreate"),
        }
    }
}

/// Replace `{key}` occurrences in `template` with the matching values.
/// Unknown keys are left in place.
pub fn render_template(template: &str, vars: &BTreeMap<String, String>) -> String {
    let mut s = template.to_string();
    for (k, v) in vars {
        s = s.replace(&format!("{{{}}}", k), v);
    }
    s
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_serializes_camel_case() {
        let rec = ProvisionedRecord::new("r-1", "al-1");
        let json = serde_json::to_value(&rec).unwrap();
        assert_eq!(json["resourceId"], "r-1");
        assert_eq!(json["aliasId"], "al-1");
        assert!(json["createdAt"].is_string());
    }

    #[test]
    fn record_template_vars() {
        let rec = ProvisionedRecord::new("r-1", "al-1");
        let vars = rec.template_vars();
        assert_eq!(
            render_template("agent-alias/{resourceId}/{aliasId}", &vars),
            "agent-alias/r-1/al-1"
        );
    }

    #[test]
    fn render_template_leaves_unknown_keys() {
        let mut vars = BTreeMap::new();
        vars.insert("region".to_string(), "eu-west-1".to_string());
        assert_eq!(
            render_template("{region}/{account}", &vars),
            "eu-west-1/{account}"
        );
    }

    #[test]
    fn provision_state_wire_names() {
        let s = serde_json::to_string(&ProvisionState::AttachingSubresources).unwrap();
        assert_eq!(s, r#""ATTACHING_SUBRESOURCES""#);
        assert_eq!(ProvisionState::WaitingReady.to_string(), "WAITING_READY");
    }

    #[test]
    fn record_attribute_parse() {
        assert_eq!(RecordAttribute::parse("aliasId"), Some(RecordAttribute::AliasId));
        assert_eq!(RecordAttribute::parse("arn"), None);
    }
}
