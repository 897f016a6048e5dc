//! Descriptor loading: one declarative document per agent resource.
//!
//! A descriptor directory looks like:
//!
//! ```text
//! agents/
//!   router.yaml          # {dependencies, baseConfig, subResourceSpecs}
//!   billing.json
//!   placeholders.yaml    # token table, not a resource
//! ```

use crate::error::{Error, Result};
use crate::types::{PlaceholderTable, ResourceDefinition, SubResourceSpec};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;

/// File stem reserved for the placeholder token table.
pub const PLACEHOLDER_FILE_STEM: &str = "placeholders";

#[derive(Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct DescriptorDoc {
    name: Option<String>,
    #[serde(default)]
    dependencies: Vec<String>,
    #[serde(default)]
    base_config: Option<serde_json::Value>,
    #[serde(default)]
    sub_resource_specs: Vec<SubResourceSpec>,
}

#[derive(Clone, Copy)]
enum DocFormat {
    Yaml,
    Json,
}

impl DocFormat {
    fn from_path(path: &Path) -> Option<Self> {
        match path.extension()?.to_str()? {
            "yaml" | "yml" => Some(Self::Yaml),
            "json" => Some(Self::Json),
            _ => None,
        }
    }

    fn parse<T: serde::de::DeserializeOwned>(&self, path: &Path, content: &str) -> Result<T> {
        match self {
            Self::Yaml => {
                serde_yaml::from_str(content).map_err(|e| Error::descriptor(path.display(), e.to_string()))
            }
            Self::Json => {
                serde_json::from_str(content).map_err(|e| Error::descriptor(path.display(), e.to_string()))
            }
        }
    }
}

/// All resource definitions of a project plus its placeholder table.
#[derive(Clone, Debug, Default)]
pub struct DescriptorSet {
    resources: BTreeMap<String, ResourceDefinition>,
    placeholders: PlaceholderTable,
}

impl DescriptorSet {
    pub fn new<I>(definitions: I, placeholders: PlaceholderTable) -> Result<Self>
    where
        I: IntoIterator<Item = ResourceDefinition>,
    {
        let mut resources = BTreeMap::new();
        for def in definitions {
            let name = def.name.clone();
            if resources.insert(name.clone(), def).is_some() {
                return Err(Error::descriptor(&name, "duplicate resource name"));
            }
        }
        Ok(Self {
            resources,
            placeholders,
        })
    }

    /// Load every `*.yaml`, `*.yml` and `*.json` document in `dir`.
    pub fn load_dir(dir: &Path) -> Result<Self> {
        let entries = std::fs::read_dir(dir)
            .map_err(|e| Error::descriptor(dir.display(), format!("cannot read directory: {e}")))?;

        let mut paths: Vec<_> = entries
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.is_file())
            .filter(|p| {
                !p.file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.starts_with('.'))
            })
            .collect();
        paths.sort();

        let mut definitions = Vec::new();
        let mut placeholders = PlaceholderTable::new();
        let mut seen: BTreeMap<String, String> = BTreeMap::new();

        for path in paths {
            let Some(format) = DocFormat::from_path(&path) else {
                tracing::debug!("ignoring {}", path.display());
                continue;
            };
            let stem = path
                .file_stem()
                .and_then(|s| s.to_str())
                .ok_or_else(|| Error::descriptor(path.display(), "file name is not valid UTF-8"))?
                .to_string();
            let content = std::fs::read_to_string(&path)
                .map_err(|e| Error::descriptor(path.display(), e.to_string()))?;

            if stem == PLACEHOLDER_FILE_STEM {
                let table: PlaceholderTable = format.parse(&path, &content)?;
                for (token, mapping) in table {
                    if mapping.dependency.trim().is_empty() {
                        return Err(Error::descriptor(
                            path.display(),
                            format!("token '{token}' has an empty dependency"),
                        ));
                    }
                    placeholders.insert(token, mapping);
                }
                continue;
            }

            let doc: DescriptorDoc = format.parse(&path, &content)?;
            let name = doc.name.unwrap_or(stem);
            if name.trim().is_empty() {
                return Err(Error::descriptor(path.display(), "empty resource name"));
            }
            if let Some(previous) = seen.insert(name.clone(), path.display().to_string()) {
                return Err(Error::descriptor(
                    path.display(),
                    format!("resource '{name}' already defined in {previous}"),
                ));
            }

            definitions.push(ResourceDefinition {
                name,
                dependencies: doc.dependencies,
                base_config: doc
                    .base_config
                    .unwrap_or_else(|| serde_json::Value::Object(Default::default())),
                sub_resource_specs: doc.sub_resource_specs,
            });
        }

        tracing::info!(
            dir = %dir.display(),
            resources = definitions.len(),
            tokens = placeholders.len(),
            "loaded descriptors"
        );
        Self::new(definitions, placeholders)
    }

    pub fn get(&self, name: &str) -> Option<&ResourceDefinition> {
        self.resources.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.resources.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.resources.keys().map(String::as_str)
    }

    pub fn definitions(&self) -> impl Iterator<Item = &ResourceDefinition> {
        self.resources.values()
    }

    pub fn placeholders(&self) -> &PlaceholderTable {
        &self.placeholders
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }
}
