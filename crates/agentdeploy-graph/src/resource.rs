//! Run driver abstraction: pluggable backend for run artifacts.
//!
//! The orchestrator writes manifests, reports and events against a run id;
//! the driver decides where they land. The local filesystem driver writes
//! to `<runs_dir>/<run-id>/`.

use agentdeploy_core::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

/// Structured event emitted during a run, one JSON object per line.
#[derive(Serialize, Clone, Debug)]
pub struct RunEvent {
    pub ts: DateTime<Utc>,
    pub run_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource: Option<String>,
    pub event: String,
    #[serde(flatten)]
    pub data: serde_json::Value,
}

/// Artifact kinds written per run.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Artifact {
    /// manifest.yaml: run metadata and per-resource status
    Manifest,
    /// report.md: human-readable summary
    Report,
    /// events.jsonl: event stream
    Events,
}

impl Artifact {
    pub fn filename(&self) -> &'static str {
        match self {
            Self::Manifest => "manifest.yaml",
            Self::Report => "report.md",
            Self::Events => "events.jsonl",
        }
    }
}

#[async_trait::async_trait]
pub trait RunDriver: Send + Sync {
    async fn write_artifact(&self, run_id: &str, artifact: Artifact, content: &[u8]) -> Result<()>;

    async fn read_artifact(&self, run_id: &str, artifact: Artifact) -> Result<Vec<u8>>;

    async fn emit_event(&self, event: RunEvent) -> Result<()>;

    /// Physical location of a run, for operators.
    fn run_location(&self, run_id: &str) -> String;
}

pub struct LocalFsDriver {
    base_dir: PathBuf,
}

impl LocalFsDriver {
    pub fn new(base_dir: impl AsRef<Path>) -> Self {
        Self {
            base_dir: base_dir.as_ref().to_path_buf(),
        }
    }

    fn artifact_path(&self, run_id: &str, artifact: Artifact) -> PathBuf {
        self.base_dir.join(run_id).join(artifact.filename())
    }
}

#[async_trait::async_trait]
impl RunDriver for LocalFsDriver {
    async fn write_artifact(&self, run_id: &str, artifact: Artifact, content: &[u8]) -> Result<()> {
        let path = self.artifact_path(run_id, artifact);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, content).await?;
        tracing::debug!("wrote {} ({} bytes)", path.display(), content.len());
        Ok(())
    }

    async fn read_artifact(&self, run_id: &str, artifact: Artifact) -> Result<Vec<u8>> {
        Ok(tokio::fs::read(self.artifact_path(run_id, artifact)).await?)
    }

    async fn emit_event(&self, event: RunEvent) -> Result<()> {
        let path = self.artifact_path(&event.run_id, Artifact::Events);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut line = serde_json::to_string(&event)?;
        line.push('\n');
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        Ok(())
    }

    fn run_location(&self, run_id: &str) -> String {
        self.base_dir.join(run_id).display().to_string()
    }
}
