//! JSON/HTTP control plane and policy store client

use crate::plane::{ControlPlane, PlaneError, PlaneResult, PolicyStore};
use crate::types::{AgentStatus, AliasSummary, PolicyDocument, PolicyVersion};
use agentdeploy_core::config::ControlPlaneConfig;
use agentdeploy_core::{SubResourceKind, SubResourceSpec};
use reqwest::header::RETRY_AFTER;
use reqwest::{Client, Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

const DEFAULT_RETRY_AFTER_MS: u64 = 1000;

#[derive(Clone)]
struct ApiClient {
    client: Client,
    base_url: String,
    token: Option<String>,
}

impl ApiClient {
    fn new(base_url: &str, token: Option<String>, timeout: Duration) -> PlaneResult<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
        })
    }

    fn from_config(config: &ControlPlaneConfig) -> PlaneResult<Self> {
        let endpoint = config
            .endpoint
            .as_deref()
            .ok_or_else(|| PlaneError::RequestFailed("no control plane endpoint configured".into()))?;
        let token = std::env::var(&config.token_env).ok();
        if token.is_none() {
            warn!("{} not set, sending unauthenticated requests", config.token_env);
        }
        Self::new(
            endpoint,
            token,
            Duration::from_secs(config.request_timeout_secs),
        )
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}/{}", self.base_url, path);
        debug!("{} {}", method, url);
        let builder = self.client.request(method, url);
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn send<T: DeserializeOwned>(&self, builder: RequestBuilder) -> PlaneResult<T> {
        let response = check(builder.send().await?).await?;
        response
            .json::<T>()
            .await
            .map_err(|e| PlaneError::InvalidResponse(e.to_string()))
    }

    async fn send_empty(&self, builder: RequestBuilder) -> PlaneResult<()> {
        check(builder.send().await?).await?;
        Ok(())
    }
}

async fn check(response: Response) -> PlaneResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let retry_after_ms = response
        .headers()
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok())
        .map(|secs| secs.saturating_mul(1000))
        .unwrap_or(DEFAULT_RETRY_AFTER_MS);
    let error_text = response.text().await.unwrap_or_default();
    warn!("control plane error {}: {}", status, error_text);

    Err(match status.as_u16() {
        401 | 403 => PlaneError::AuthFailed(error_text),
        404 => PlaneError::NotFound(error_text),
        409 => PlaneError::Conflict(error_text),
        429 => PlaneError::Throttled { retry_after_ms },
        code if code >= 500 => PlaneError::Server {
            status: code,
            message: error_text,
        },
        code => PlaneError::RequestFailed(format!("{}: {}", code, error_text)),
    })
}

fn attachment_path(kind: SubResourceKind) -> &'static str {
    match kind {
        SubResourceKind::ActionGroup => "action-groups",
        SubResourceKind::KnowledgeBase => "knowledge-bases",
        SubResourceKind::Collaborator => "collaborators",
    }
}

// ============================================================
// Wire bodies
// ============================================================

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateAgentRequest<'a> {
    agent_name: &'a str,
    config: &'a serde_json::Value,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateAgentResponse {
    agent_id: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AgentResponse {
    agent_status: AgentStatus,
}

#[derive(Serialize)]
struct AttachRequest<'a> {
    name: &'a str,
    config: &'a serde_json::Value,
}

#[derive(Deserialize)]
struct AttachResponse {
    id: String,
}

#[derive(Deserialize)]
struct AliasListResponse {
    #[serde(default)]
    aliases: Vec<AliasSummary>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateAliasRequest<'a> {
    alias_name: &'a str,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateAliasResponse {
    alias_id: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PolicyResponse {
    document: PolicyDocument,
    version_id: String,
}

#[derive(Deserialize)]
struct VersionsResponse {
    #[serde(default)]
    versions: Vec<PolicyVersion>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateVersionRequest<'a> {
    document: &'a PolicyDocument,
    set_as_default: bool,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateVersionResponse {
    version_id: String,
}

// ============================================================
// Control plane
// ============================================================

pub struct HttpControlPlane {
    api: ApiClient,
}

impl HttpControlPlane {
    pub fn new(base_url: &str, token: Option<String>, timeout: Duration) -> PlaneResult<Self> {
        Ok(Self {
            api: ApiClient::new(base_url, token, timeout)?,
        })
    }

    pub fn from_config(config: &ControlPlaneConfig) -> PlaneResult<Self> {
        Ok(Self {
            api: ApiClient::from_config(config)?,
        })
    }
}

#[async_trait::async_trait]
impl ControlPlane for HttpControlPlane {
    fn name(&self) -> &str {
        "http"
    }

    async fn create_agent(&self, name: &str, config: &serde_json::Value) -> PlaneResult<String> {
        let body = CreateAgentRequest {
            agent_name: name,
            config,
        };
        let resp: CreateAgentResponse = self
            .api
            .send(self.api.request(Method::POST, "agents").json(&body))
            .await?;
        Ok(resp.agent_id)
    }

    async fn agent_status(&self, resource_id: &str) -> PlaneResult<AgentStatus> {
        let resp: AgentResponse = self
            .api
            .send(self.api.request(Method::GET, &format!("agents/{resource_id}")))
            .await?;
        Ok(resp.agent_status)
    }

    async fn attach(&self, resource_id: &str, spec: &SubResourceSpec) -> PlaneResult<String> {
        let path = format!("agents/{}/{}", resource_id, attachment_path(spec.kind));
        let body = AttachRequest {
            name: &spec.name,
            config: &spec.config,
        };
        let resp: AttachResponse = self
            .api
            .send(self.api.request(Method::POST, &path).json(&body))
            .await?;
        Ok(resp.id)
    }

    async fn prepare(&self, resource_id: &str) -> PlaneResult<()> {
        self.api
            .send_empty(
                self.api
                    .request(Method::POST, &format!("agents/{resource_id}/prepare"))
                    .json(&serde_json::json!({})),
            )
            .await
    }

    async fn list_aliases(&self, resource_id: &str) -> PlaneResult<Vec<AliasSummary>> {
        let resp: AliasListResponse = self
            .api
            .send(
                self.api
                    .request(Method::GET, &format!("agents/{resource_id}/aliases")),
            )
            .await?;
        Ok(resp.aliases)
    }

    async fn create_alias(&self, resource_id: &str, alias_name: &str) -> PlaneResult<String> {
        let resp: CreateAliasResponse = self
            .api
            .send(
                self.api
                    .request(Method::POST, &format!("agents/{resource_id}/aliases"))
                    .json(&CreateAliasRequest { alias_name }),
            )
            .await?;
        Ok(resp.alias_id)
    }
}

// ============================================================
// Policy store
// ============================================================

pub struct HttpPolicyStore {
    api: ApiClient,
}

impl HttpPolicyStore {
    pub fn new(base_url: &str, token: Option<String>, timeout: Duration) -> PlaneResult<Self> {
        Ok(Self {
            api: ApiClient::new(base_url, token, timeout)?,
        })
    }

    pub fn from_config(config: &ControlPlaneConfig) -> PlaneResult<Self> {
        Ok(Self {
            api: ApiClient::from_config(config)?,
        })
    }
}

#[async_trait::async_trait]
impl PolicyStore for HttpPolicyStore {
    async fn get_default(&self, policy_id: &str) -> PlaneResult<(PolicyDocument, String)> {
        let resp: PolicyResponse = self
            .api
            .send(self.api.request(Method::GET, &format!("policies/{policy_id}")))
            .await?;
        Ok((resp.document, resp.version_id))
    }

    async fn list_versions(&self, policy_id: &str) -> PlaneResult<Vec<PolicyVersion>> {
        let resp: VersionsResponse = self
            .api
            .send(
                self.api
                    .request(Method::GET, &format!("policies/{policy_id}/versions")),
            )
            .await?;
        Ok(resp.versions)
    }

    async fn delete_version(&self, policy_id: &str, version_id: &str) -> PlaneResult<()> {
        self.api
            .send_empty(self.api.request(
                Method::DELETE,
                &format!("policies/{policy_id}/versions/{version_id}"),
            ))
            .await
    }

    async fn create_version(
        &self,
        policy_id: &str,
        document: &PolicyDocument,
        set_as_default: bool,
    ) -> PlaneResult<String> {
        let body = CreateVersionRequest {
            document,
            set_as_default,
        };
        let resp: CreateVersionResponse = self
            .api
            .send(
                self.api
                    .request(Method::POST, &format!("policies/{policy_id}/versions"))
                    .json(&body),
            )
            .await?;
        Ok(resp.version_id)
    }
}
