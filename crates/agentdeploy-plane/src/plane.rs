//! Control plane and policy store traits

use crate::types::{AgentStatus, AliasSummary, PolicyDocument, PolicyVersion};
use agentdeploy_core::SubResourceSpec;

/// Result type for remote operations
pub type PlaneResult<T> = Result<T, PlaneError>;

/// Remote error types
#[derive(Debug, thiserror::Error)]
pub enum PlaneError {
    #[error("request failed: {0}")]
    RequestFailed(String),

    #[error("authentication failed: {0}")]
    AuthFailed(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("limit exceeded: {0}")]
    LimitExceeded(String),

    #[error("throttled: retry after {retry_after_ms}ms")]
    Throttled { retry_after_ms: u64 },

    #[error("server error {status}: {message}")]
    Server { status: u16, message: String },

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("network error: {0}")]
    NetworkError(#[from] reqwest::Error),
}

impl PlaneError {
    /// Worth retrying while polling.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Throttled { .. } | Self::Server { .. } => true,
            Self::NetworkError(e) => e.is_timeout() || e.is_connect(),
            _ => false,
        }
    }
}

/// Remote agent control plane.
///
/// Every operation is asynchronous on the remote side: a successful
/// `create_agent` or `prepare` only means the request was accepted, and
/// callers poll `agent_status` for readiness.
#[async_trait::async_trait]
pub trait ControlPlane: Send + Sync {
    fn name(&self) -> &str;

    /// Submit a create request; returns the new resource id.
    async fn create_agent(&self, name: &str, config: &serde_json::Value) -> PlaneResult<String>;

    async fn agent_status(&self, resource_id: &str) -> PlaneResult<AgentStatus>;

    /// Attach a fully resolved sub-resource; returns its remote id.
    async fn attach(&self, resource_id: &str, spec: &SubResourceSpec) -> PlaneResult<String>;

    /// Start preparing the draft so attachments take effect.
    async fn prepare(&self, resource_id: &str) -> PlaneResult<()>;

    async fn list_aliases(&self, resource_id: &str) -> PlaneResult<Vec<AliasSummary>>;

    /// Create an alias pointing at the latest prepared version; returns the alias id.
    async fn create_alias(&self, resource_id: &str, alias_name: &str) -> PlaneResult<String>;
}

/// Versioned permission-document store with a bounded history.
#[async_trait::async_trait]
pub trait PolicyStore: Send + Sync {
    /// The default version's document and its version id.
    async fn get_default(&self, policy_id: &str) -> PlaneResult<(PolicyDocument, String)>;

    async fn list_versions(&self, policy_id: &str) -> PlaneResult<Vec<PolicyVersion>>;

    async fn delete_version(&self, policy_id: &str, version_id: &str) -> PlaneResult<()>;

    /// Store a new version; returns its id.
    async fn create_version(
        &self,
        policy_id: &str,
        document: &PolicyDocument,
        set_as_default: bool,
    ) -> PlaneResult<String>;
}
