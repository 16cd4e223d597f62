//! Template resource nodes and resource-kind detection
//!
//! The engine only needs to recognize a handful of resource types (functions
//! get log groups and environment variables injected, buckets get emptied
//! before stack deletion); everything else passes through untouched.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// CloudFormation type identifier for SAM functions.
pub const SERVERLESS_FUNCTION_TYPE: &str = "AWS::Serverless::Function";
/// CloudFormation type identifier for plain Lambda functions.
pub const LAMBDA_FUNCTION_TYPE: &str = "AWS::Lambda::Function";
/// CloudFormation type identifier for S3 buckets.
pub const BUCKET_TYPE: &str = "AWS::S3::Bucket";
/// CloudFormation type identifier for CloudWatch log groups.
pub const LOG_GROUP_TYPE: &str = "AWS::Logs::LogGroup";

/// Resource-level `Metadata` key marking a function as deployed to the edge.
///
/// Edge functions are replicated into regions the deploying account does not
/// control, so their log groups cannot be declared in the template and the
/// engine must not synthesize one.
pub const EDGE_FUNCTION_METADATA_KEY: &str = "EdgeFunction";

/// Resource types the engine treats specially.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    /// `AWS::Serverless::Function` or `AWS::Lambda::Function`
    Function,
    /// `AWS::S3::Bucket` (emptied before stack deletion)
    Bucket,
    /// `AWS::Logs::LogGroup`
    LogGroup,
    /// Everything else; passed through verbatim
    Other,
}

/// What CloudFormation does with a resource when its stack is deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeletionPolicy {
    Delete,
    Retain,
    RetainExceptOnCreate,
    Snapshot,
}

/// `DependsOn` accepts either a single logical id or a list of them.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DependsOn {
    One(String),
    Many(Vec<String>),
}

impl DependsOn {
    /// Iterate the referenced logical ids regardless of form.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        let slice: &[String] = match self {
            DependsOn::One(name) => std::slice::from_ref(name),
            DependsOn::Many(names) => names,
        };
        slice.iter().map(String::as_str)
    }
}

/// A single resource declaration.
///
/// Only the fields the engine inspects are modeled; any other attribute
/// (`Condition`, `UpdatePolicy`, provider extensions) is carried in `extra`
/// and round-trips untouched.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Resource {
    #[serde(rename = "Type")]
    pub resource_type: String,
    #[serde(rename = "DeletionPolicy", skip_serializing_if = "Option::is_none")]
    pub deletion_policy: Option<DeletionPolicy>,
    #[serde(rename = "DependsOn", skip_serializing_if = "Option::is_none")]
    pub depends_on: Option<DependsOn>,
    #[serde(rename = "Properties", skip_serializing_if = "Option::is_none")]
    pub properties: Option<Value>,
    #[serde(rename = "Metadata", skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

impl Resource {
    /// Create a resource of the given type with no properties.
    pub fn new(resource_type: impl Into<String>) -> Self {
        Self {
            resource_type: resource_type.into(),
            deletion_policy: None,
            depends_on: None,
            properties: None,
            metadata: None,
            extra: serde_json::Map::new(),
        }
    }

    pub fn kind(&self) -> ResourceKind {
        match self.resource_type.as_str() {
            SERVERLESS_FUNCTION_TYPE | LAMBDA_FUNCTION_TYPE => ResourceKind::Function,
            BUCKET_TYPE => ResourceKind::Bucket,
            LOG_GROUP_TYPE => ResourceKind::LogGroup,
            _ => ResourceKind::Other,
        }
    }

    pub fn is_function(&self) -> bool {
        self.kind() == ResourceKind::Function
    }

    pub fn is_bucket(&self) -> bool {
        self.kind() == ResourceKind::Bucket
    }

    pub fn is_log_group(&self) -> bool {
        self.kind() == ResourceKind::LogGroup
    }

    /// True for functions flagged with `Metadata.EdgeFunction: true`.
    pub fn is_edge_function(&self) -> bool {
        self.is_function()
            && self
                .metadata
                .as_ref()
                .and_then(|m| m.get(EDGE_FUNCTION_METADATA_KEY))
                .and_then(Value::as_bool)
                .unwrap_or(false)
    }
}
