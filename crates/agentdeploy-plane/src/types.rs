//! Wire types shared by every control plane and policy store backend.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// Remote lifecycle status of an agent.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AgentStatus {
    Creating,
    NotPrepared,
    Preparing,
    Prepared,
    Failed,
    #[serde(other)]
    Unknown,
}

impl AgentStatus {
    /// The draft exists and accepts attachments.
    pub fn accepts_attachments(&self) -> bool {
        matches!(self, Self::NotPrepared | Self::Prepared)
    }

    pub fn is_prepared(&self) -> bool {
        matches!(self, Self::Prepared)
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed)
    }
}

impl std::fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Creating => write!(f, "CREATING"),
            Self::NotPrepared => write!(f, "NOT_PREPARED"),
            Self::Preparing => write!(f, "PREPARING"),
            Self::Prepared => write!(f, "PREPARED"),
            Self::Failed => write!(f, "FAILED"),
            Self::Unknown => write!(f, "UNKNOWN"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AliasSummary {
    pub alias_id: String,
    pub alias_name: String,
}

/// One stored version of a permission document.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyVersion {
    pub version_id: String,
    pub is_default: bool,
    pub created_at: DateTime<Utc>,
}

pub const POLICY_LANGUAGE_VERSION: &str = "2012-10-17";

/// IAM-style permission document.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PolicyDocument {
    #[serde(rename = "Version", alias = "version", default = "default_language_version")]
    pub version: String,
    #[serde(rename = "Statement", alias = "statement", default)]
    pub statement: Vec<Statement>,
}

fn default_language_version() -> String {
    POLICY_LANGUAGE_VERSION.to_string()
}

impl Default for PolicyDocument {
    fn default() -> Self {
        Self {
            version: default_language_version(),
            statement: Vec::new(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Statement {
    #[serde(rename = "Sid", default, skip_serializing_if = "Option::is_none")]
    pub sid: Option<String>,
    #[serde(rename = "Effect")]
    pub effect: String,
    #[serde(rename = "Action", deserialize_with = "one_or_many")]
    pub action: Vec<String>,
    #[serde(rename = "Resource", deserialize_with = "one_or_many", default)]
    pub resource: Vec<String>,
}

impl Statement {
    pub fn allow(action: impl Into<String>) -> Self {
        Self {
            sid: None,
            effect: "Allow".into(),
            action: vec![action.into()],
            resource: Vec::new(),
        }
    }

    pub fn grants_action(&self, action: &str) -> bool {
        self.effect.eq_ignore_ascii_case("allow") && self.action.iter().any(|a| a == action)
    }

    pub fn has_resource(&self, reference: &str) -> bool {
        self.resource.iter().any(|r| r == reference)
    }
}

impl PolicyDocument {
    /// The first Allow statement for `action`.
    pub fn granting_statement(&self, action: &str) -> Option<&Statement> {
        self.statement.iter().find(|s| s.grants_action(action))
    }

    /// The first Allow statement for `action`, appended if absent.
    pub fn granting_statement_mut(&mut self, action: &str) -> &mut Statement {
        let idx = match self.statement.iter().position(|s| s.grants_action(action)) {
            Some(idx) => idx,
            None => {
                self.statement.push(Statement::allow(action));
                self.statement.len() - 1
            }
        };
        &mut self.statement[idx]
    }

    pub fn grants(&self, action: &str, reference: &str) -> bool {
        self.granting_statement(action)
            .is_some_and(|s| s.has_resource(reference))
    }
}

fn one_or_many<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }
    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(s) => vec![s],
        OneOrMany::Many(v) => v,
    })
}
