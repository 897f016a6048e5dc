//! Error types for agentdeploy

use crate::types::ProvisionState;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("{resource}: missing dependency records: {}", missing.join(", "))]
    MissingDependency {
        resource: String,
        missing: Vec<String>,
    },

    #[error("{resource}: cannot resolve '{token}': no record for dependency '{missing_dependency}'")]
    PlaceholderResolution {
        resource: String,
        token: String,
        missing_dependency: String,
    },

    #[error("{resource}: bad reference at {path}: {message}")]
    Format {
        resource: String,
        path: String,
        message: String,
    },

    #[error("{resource}: create request failed: {message}")]
    CreateRequest { resource: String, message: String },

    #[error("{resource}: not ready after {attempts} attempts ({phase})")]
    ReadyTimeout {
        resource: String,
        phase: ProvisionState,
        attempts: u32,
    },

    #[error("{resource}: attaching '{sub_resource}' failed: {message}")]
    SubresourceAttach {
        resource: String,
        sub_resource: String,
        message: String,
    },

    #[error("{resource}: alias '{alias}' failed: {message}")]
    AliasCreation {
        resource: String,
        alias: String,
        message: String,
    },

    #[error("policy {policy_id}: {versions} versions at ceiling {ceiling} and none can be evicted")]
    PolicyVersionCeiling {
        policy_id: String,
        versions: usize,
        ceiling: usize,
    },

    #[error("policy store error: {0}")]
    PolicyStore(String),

    #[error("dependency cycle: {}", cycle.join(" -> "))]
    CyclicDependency { cycle: Vec<String> },

    #[error("unknown resource: {0}")]
    UnknownResource(String),

    #[error("descriptor {path}: {message}")]
    Descriptor { path: String, message: String },

    #[error("config error: {0}")]
    Config(String),

    #[error("state store error: {0}")]
    StateStore(String),

    #[error("illegal state transition {from} -> {to}")]
    IllegalTransition {
        from: ProvisionState,
        to: ProvisionState,
    },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn missing_dependency(resource: impl Into<String>, missing: Vec<String>) -> Self {
        Self::MissingDependency {
            resource: resource.into(),
            missing,
        }
    }

    pub fn format(
        resource: impl Into<String>,
        path: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::Format {
            resource: resource.into(),
            path: path.into(),
            message: message.into(),
        }
    }

    pub fn descriptor(path: impl std::fmt::Display, message: impl Into<String>) -> Self {
        Self::Descriptor {
            path: path.to_string(),
            message: message.into(),
        }
    }

    /// Operator-facing name of the error kind, as printed in the run summary.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::MissingDependency { .. } => "MissingDependencyError",
            Self::PlaceholderResolution { .. } => "PlaceholderResolutionError",
            Self::Format { .. } => "FormatError",
            Self::CreateRequest { .. } => "CreateRequestError",
            Self::ReadyTimeout { .. } => "ReadyTimeoutError",
            Self::SubresourceAttach { .. } => "SubresourceAttachError",
            Self::AliasCreation { .. } => "AliasCreationError",
            Self::PolicyVersionCeiling { .. } => "PolicyVersionCeilingError",
            Self::PolicyStore(_) => "PolicyStoreError",
            Self::CyclicDependency { .. } => "CyclicDependencyError",
            Self::UnknownResource(_) => "UnknownResourceError",
            Self::Descriptor { .. } => "DescriptorError",
            Self::Config(_) => "ConfigError",
            Self::StateStore(_) => "StateStoreError",
            Self::IllegalTransition { .. } => "IllegalTransitionError",
            Self::Io(_) => "IoError",
            Self::Json(_) => "JsonError",
            Self::Yaml(_) => "YamlError",
        }
    }
}
