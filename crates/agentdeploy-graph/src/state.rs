//! Persisted resource-name -> provisioned-record map.
//!
//! Read once at the start of every invocation and rewritten after every
//! successful resource. Writes go to a sibling temp file first and are
//! renamed into place.

use agentdeploy_core::{Error, ProvisionedRecord, Result};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;

pub type StateSnapshot = BTreeMap<String, ProvisionedRecord>;

#[derive(Debug)]
pub struct StateStore {
    path: PathBuf,
    records: StateSnapshot,
}

impl StateStore {
    /// Load the store; a missing file is an empty store.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let records = match fs::read_to_string(&path).await {
            Ok(data) if data.trim().is_empty() => StateSnapshot::new(),
            Ok(data) => serde_json::from_str(&data).map_err(|e| {
                Error::StateStore(format!("{}: {}", path.display(), e))
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => StateSnapshot::new(),
            Err(e) => return Err(e.into()),
        };
        debug!(path = %path.display(), records = records.len(), "state loaded");
        Ok(Self { path, records })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get(&self, name: &str) -> Option<&ProvisionedRecord> {
        self.records.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.records.contains_key(name)
    }

    pub fn snapshot(&self) -> &StateSnapshot {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Insert or replace a record and persist immediately.
    pub async fn record(&mut self, name: &str, record: ProvisionedRecord) -> Result<()> {
        let previous = self.records.insert(name.to_string(), record);
        if let Err(e) = self.persist().await {
            match previous {
                Some(prev) => self.records.insert(name.to_string(), prev),
                None => self.records.remove(name),
            };
            return Err(e);
        }
        debug!(resource = name, path = %self.path.display(), "state recorded");
        Ok(())
    }

    async fn persist(&self) -> Result<()> {
        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir).await?;
        }
        let json = serde_json::to_string_pretty(&self.records)?;
        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);
        fs::write(&tmp, json).await?;
        fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| Error::StateStore(format!("rename {}: {}", tmp.display(), e)))
    }
}
