//! Placeholder resolution over descriptor values.
//!
//! Two forms are recognised in string scalars:
//! - exact tokens (`REF_BILLING_ALIAS_ARN`) looked up in the placeholder table
//! - inline references (`${billing.aliasId}`) anywhere inside a string
//!
//! Resolved strings match neither form, so resolving twice is a no-op.

use crate::state::StateSnapshot;
use agentdeploy_core::{
    render_template, Error, PlaceholderMapping, PlaceholderTable, RecordAttribute,
    ResourceDefinition, Result, SubResourceKind, SubResourceSpec,
};
use regex::{Captures, Regex};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};

const INLINE_REFERENCE: &str = r"\$\{([A-Za-z0-9_.\-]+)\.(resourceId|aliasId|createdAt)\}";
const ALIAS_QUALIFIED: &str = r"agent-alias/[^/\s]+/[^/\s]+$";

/// Collaborator config field that must carry an alias-qualified reference.
pub const COLLABORATOR_ALIAS_FIELD: &str = "aliasArn";

/// A definition with every placeholder replaced.
#[derive(Clone, Debug, PartialEq)]
pub struct ResolvedDefinition {
    pub name: String,
    pub base_config: Value,
    pub sub_resources: Vec<SubResourceSpec>,
}

pub struct Resolver<'a> {
    placeholders: &'a PlaceholderTable,
    state: &'a StateSnapshot,
    vars: BTreeMap<String, String>,
    inline: Option<Regex>,
    alias_qualified: Option<Regex>,
}

impl<'a> Resolver<'a> {
    pub fn new(placeholders: &'a PlaceholderTable, state: &'a StateSnapshot) -> Self {
        Self {
            placeholders,
            state,
            vars: BTreeMap::new(),
            inline: Regex::new(INLINE_REFERENCE).ok(),
            alias_qualified: Regex::new(ALIAS_QUALIFIED).ok(),
        }
    }

    /// Extra template variables (`{region}`, `{account}`) for composed tokens.
    pub fn with_vars(mut self, vars: BTreeMap<String, String>) -> Self {
        self.vars = vars;
        self
    }

    /// Resolve the base config and every sub-resource spec of `def`.
    pub fn resolve_definition(&self, def: &ResourceDefinition) -> Result<ResolvedDefinition> {
        let base_config = self.resolve(&def.name, &def.base_config)?;
        let mut sub_resources = Vec::with_capacity(def.sub_resource_specs.len());
        for (i, spec) in def.sub_resource_specs.iter().enumerate() {
            let resolved = SubResourceSpec {
                kind: spec.kind,
                name: spec.name.clone(),
                config: self.resolve(&def.name, &spec.config)?,
            };
            self.check_format(&def.name, i, &resolved)?;
            sub_resources.push(resolved);
        }
        Ok(ResolvedDefinition {
            name: def.name.clone(),
            base_config,
            sub_resources,
        })
    }

    /// Recursively resolve every string scalar in `value`. Keys are untouched.
    pub fn resolve(&self, resource: &str, value: &Value) -> Result<Value> {
        Ok(match value {
            Value::String(s) => Value::String(self.resolve_str(resource, s)?),
            Value::Array(items) => Value::Array(
                items
                    .iter()
                    .map(|v| self.resolve(resource, v))
                    .collect::<Result<_>>()?,
            ),
            Value::Object(map) => {
                let mut out = serde_json::Map::with_capacity(map.len());
                for (k, v) in map {
                    out.insert(k.clone(), self.resolve(resource, v)?);
                }
                Value::Object(out)
            }
            other => other.clone(),
        })
    }

    fn resolve_str(&self, resource: &str, s: &str) -> Result<String> {
        if let Some(mapping) = self.placeholders.get(s) {
            return self.resolve_token(resource, s, mapping);
        }
        let Some(inline) = &self.inline else {
            return Ok(s.to_string());
        };
        if !inline.is_match(s) {
            return Ok(s.to_string());
        }
        let mut failure = None;
        let out = inline.replace_all(s, |caps: &Captures| {
            let dependency = &caps[1];
            match (self.state.get(dependency), RecordAttribute::parse(&caps[2])) {
                (Some(record), Some(attr)) => record.attribute(attr),
                _ => {
                    failure.get_or_insert_with(|| Error::PlaceholderResolution {
                        resource: resource.to_string(),
                        token: caps[0].to_string(),
                        missing_dependency: dependency.to_string(),
                    });
                    caps[0].to_string()
                }
            }
        });
        match failure {
            Some(err) => Err(err),
            None => Ok(out.into_owned()),
        }
    }

    fn resolve_token(&self, resource: &str, token: &str, mapping: &PlaceholderMapping) -> Result<String> {
        let record = self.state.get(&mapping.dependency).ok_or_else(|| {
            Error::PlaceholderResolution {
                resource: resource.to_string(),
                token: token.to_string(),
                missing_dependency: mapping.dependency.clone(),
            }
        })?;
        Ok(match &mapping.template {
            Some(template) => {
                let mut vars = self.vars.clone();
                vars.extend(record.template_vars());
                render_template(template, &vars)
            }
            None => record.attribute(mapping.attribute),
        })
    }

    fn check_format(&self, resource: &str, index: usize, spec: &SubResourceSpec) -> Result<()> {
        if spec.kind != SubResourceKind::Collaborator {
            return Ok(());
        }
        let path = format!("subResourceSpecs[{index}].config.{COLLABORATOR_ALIAS_FIELD}");
        let reference = spec
            .config
            .get(COLLABORATOR_ALIAS_FIELD)
            .and_then(Value::as_str)
            .ok_or_else(|| {
                Error::format(resource, &path, "collaborator requires an alias reference")
            })?;
        let qualified = self
            .alias_qualified
            .as_ref()
            .is_some_and(|re| re.is_match(reference));
        if qualified {
            Ok(())
        } else {
            Err(Error::format(
                resource,
                &path,
                format!(
                    "'{reference}' is not alias-qualified (expected .../agent-alias/<resourceId>/<aliasId>)"
                ),
            ))
        }
    }

    /// Dependency names a value mentions through tokens or inline references.
    pub fn references(&self, value: &Value) -> BTreeSet<String> {
        let mut out = BTreeSet::new();
        self.collect_references(value, &mut out);
        out
    }

    /// References across a whole definition, declared dependencies included.
    pub fn definition_references(&self, def: &ResourceDefinition) -> BTreeSet<String> {
        let mut out: BTreeSet<String> = def.dependencies.iter().cloned().collect();
        self.collect_references(&def.base_config, &mut out);
        for spec in &def.sub_resource_specs {
            self.collect_references(&spec.config, &mut out);
        }
        out
    }

    fn collect_references(&self, value: &Value, out: &mut BTreeSet<String>) {
        match value {
            Value::String(s) => {
                if let Some(mapping) = self.placeholders.get(s.as_str()) {
                    out.insert(mapping.dependency.clone());
                }
                if let Some(inline) = &self.inline {
                    for caps in inline.captures_iter(s) {
                        out.insert(caps[1].to_string());
                    }
                }
            }
            Value::Array(items) => items.iter().for_each(|v| self.collect_references(v, out)),
            Value::Object(map) => map.values().for_each(|v| self.collect_references(v, out)),
            _ => {}
        }
    }
}
