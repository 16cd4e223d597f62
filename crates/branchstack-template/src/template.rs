//! The template document
//!
//! A template is parameters + resources + outputs plus whatever other
//! sections the author wrote (`Mappings`, `Conditions`, SAM `Globals`, ...),
//! which are preserved verbatim. Maps are ordered so serialization is
//! canonical: the same document always produces the same bytes, which the
//! engine relies on when sizing the deployment payload.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::reference::{self, PSEUDO_PARAMETER_PREFIX};
use crate::resource::Resource;

/// Format version stamped on templates built programmatically.
pub const DEFAULT_FORMAT_VERSION: &str = "2010-09-09";

#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("`{referrer}` references `{target}`, which is not a declared resource or parameter")]
    UnknownReference { referrer: String, target: String },

    #[error("`{referrer}` depends on `{target}`, which is not a declared resource")]
    UnknownDependency { referrer: String, target: String },

    #[error("template JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// A parameter declaration. Validation constraints (`AllowedValues`,
/// `MinLength`, ...) ride along in `extra`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Parameter {
    #[serde(rename = "Type")]
    pub parameter_type: String,
    #[serde(rename = "Default", skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

impl Parameter {
    /// A `String` parameter with the given default.
    pub fn string(default: impl Into<String>) -> Self {
        Self {
            parameter_type: "String".to_string(),
            default: Some(Value::String(default.into())),
            extra: serde_json::Map::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Export {
    #[serde(rename = "Name")]
    pub name: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Output {
    #[serde(rename = "Value")]
    pub value: Value,
    #[serde(rename = "Export", skip_serializing_if = "Option::is_none")]
    pub export: Option<Export>,
    #[serde(rename = "Description", skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Template {
    #[serde(
        rename = "AWSTemplateFormatVersion",
        skip_serializing_if = "Option::is_none"
    )]
    pub format_version: Option<String>,
    #[serde(rename = "Transform", skip_serializing_if = "Option::is_none")]
    pub transform: Option<Value>,
    #[serde(rename = "Description", skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(
        rename = "Parameters",
        default,
        skip_serializing_if = "BTreeMap::is_empty"
    )]
    pub parameters: BTreeMap<String, Parameter>,
    #[serde(rename = "Resources", default)]
    pub resources: BTreeMap<String, Resource>,
    #[serde(
        rename = "Outputs",
        default,
        skip_serializing_if = "BTreeMap::is_empty"
    )]
    pub outputs: BTreeMap<String, Output>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

impl Template {
    /// An empty template with the standard format version.
    pub fn new() -> Self {
        Self {
            format_version: Some(DEFAULT_FORMAT_VERSION.to_string()),
            ..Self::default()
        }
    }

    pub fn from_json(body: &str) -> Result<Self, TemplateError> {
        Ok(serde_json::from_str(body)?)
    }

    /// Serialize to compact JSON.
    ///
    /// Output is byte-stable for a given document: sections are ordered maps,
    /// so insertion order never leaks into the serialized form.
    pub fn canonical_json(&self) -> Result<String, TemplateError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Check that every intrinsic reference and `DependsOn` targets a
    /// declared resource, a declared parameter, or a pseudo parameter.
    ///
    /// Only resource `Properties` and outputs are scanned; `Metadata` blocks
    /// frequently embed `${...}` text that is not template syntax (shell
    /// fragments, documentation) and must not be flagged.
    pub fn validate(&self) -> Result<(), TemplateError> {
        let declared: BTreeSet<&str> = self
            .parameters
            .keys()
            .chain(self.resources.keys())
            .map(String::as_str)
            .collect();
        let is_declared =
            |name: &str| name.starts_with(PSEUDO_PARAMETER_PREFIX) || declared.contains(name);

        for (logical_id, resource) in &self.resources {
            if let Some(properties) = &resource.properties {
                for target in reference::collect_references(properties) {
                    if !is_declared(&target) {
                        return Err(TemplateError::UnknownReference {
                            referrer: logical_id.clone(),
                            target,
                        });
                    }
                }
            }
            if let Some(depends_on) = &resource.depends_on {
                for target in depends_on.names() {
                    if !self.resources.contains_key(target) {
                        return Err(TemplateError::UnknownDependency {
                            referrer: logical_id.clone(),
                            target: target.to_string(),
                        });
                    }
                }
            }
        }

        for (name, output) in &self.outputs {
            let referrer = || format!("Outputs.{name}");
            for target in reference::collect_references(&output.value) {
                if !is_declared(&target) {
                    return Err(TemplateError::UnknownReference {
                        referrer: referrer(),
                        target,
                    });
                }
            }
            if let Some(export) = &output.export {
                for target in reference::collect_references(&export.name) {
                    if !is_declared(&target) {
                        return Err(TemplateError::UnknownReference {
                            referrer: referrer(),
                            target,
                        });
                    }
                }
            }
        }

        Ok(())
    }
}
