//! Remote collaborator interfaces
//!
//! The engine reaches its two remote dependencies through narrow traits so
//! orchestration logic can be exercised against in-memory fakes: a
//! [`StackProvider`] (CloudFormation in production) and an [`ObjectStore`]
//! (S3). The trait surfaces mirror what the orchestration needs, not what
//! the SDK offers.

use std::future::Future;

use anyhow::Result;
use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;

use crate::config::Tag;
use crate::paginate::Page;
use crate::payload::TemplatePayload;

/// Capabilities requested with every submission. Templates routinely carry
/// IAM resources and transform macros, static detection of either is
/// unreliable, and the provider ignores capabilities it does not need.
pub const STACK_CAPABILITIES: &[&str] = &["CAPABILITY_NAMED_IAM", "CAPABILITY_AUTO_EXPAND"];

/// Everything a create or update submission carries.
#[derive(Debug, Clone)]
pub struct StackRequest {
    pub name: String,
    pub payload: TemplatePayload,
    pub parameters: Vec<(String, String)>,
    pub tags: Vec<Tag>,
    pub capabilities: Vec<String>,
}

/// Remote stack state, collapsed to the engine's view.
///
/// The provider distinguishes many more statuses (rollback phases, cleanup
/// phases, imports); each collapses to the lifecycle step it belongs to. A
/// create that is rolling back is still `Creating` until the rollback
/// settles, at which point it is `CreateFailed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StackState {
    /// No stack with this name exists
    Absent,
    Creating,
    CreateComplete,
    CreateFailed,
    Updating,
    UpdateComplete,
    UpdateFailed,
    /// Update submitted but the template and parameters were unchanged
    NoUpdatesNeeded,
    Deleting,
    DeleteComplete,
    DeleteFailed,
}

impl StackState {
    /// Collapse a provider status string.
    ///
    /// Unrecognized statuses are treated as still in progress; the poll
    /// timeout bounds how long that optimism can last.
    pub fn from_status(status: &str) -> Self {
        match status {
            "CREATE_IN_PROGRESS" | "REVIEW_IN_PROGRESS" | "ROLLBACK_IN_PROGRESS" => Self::Creating,
            "CREATE_COMPLETE" => Self::CreateComplete,
            "CREATE_FAILED" | "ROLLBACK_COMPLETE" | "ROLLBACK_FAILED" => Self::CreateFailed,
            "UPDATE_IN_PROGRESS"
            | "UPDATE_COMPLETE_CLEANUP_IN_PROGRESS"
            | "UPDATE_ROLLBACK_IN_PROGRESS"
            | "UPDATE_ROLLBACK_COMPLETE_CLEANUP_IN_PROGRESS"
            | "IMPORT_IN_PROGRESS"
            | "IMPORT_ROLLBACK_IN_PROGRESS" => Self::Updating,
            "UPDATE_COMPLETE" | "IMPORT_COMPLETE" => Self::UpdateComplete,
            "UPDATE_FAILED"
            | "UPDATE_ROLLBACK_COMPLETE"
            | "UPDATE_ROLLBACK_FAILED"
            | "IMPORT_ROLLBACK_COMPLETE"
            | "IMPORT_ROLLBACK_FAILED" => Self::UpdateFailed,
            "DELETE_IN_PROGRESS" => Self::Deleting,
            "DELETE_COMPLETE" => Self::DeleteComplete,
            "DELETE_FAILED" => Self::DeleteFailed,
            _ => Self::Creating,
        }
    }

    /// The operation is no longer moving.
    pub fn is_settled(self) -> bool {
        !matches!(self, Self::Creating | Self::Updating | Self::Deleting)
    }

    /// A failed terminal state.
    pub fn is_failure(self) -> bool {
        matches!(
            self,
            Self::CreateFailed | Self::UpdateFailed | Self::DeleteFailed
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackOutput {
    pub key: String,
    pub value: String,
    pub export_name: Option<String>,
}

/// What `describe` reports about an existing stack.
#[derive(Debug, Clone)]
pub struct StackDescription {
    pub name: String,
    pub state: StackState,
    pub status_reason: Option<String>,
    pub outputs: Vec<StackOutput>,
    pub termination_protection: bool,
}

impl StackDescription {
    /// Look up an output value by key.
    pub fn output(&self, key: &str) -> Option<&str> {
        self.outputs
            .iter()
            .find(|o| o.key == key)
            .map(|o| o.value.as_str())
    }
}

/// One entry from the stack's event log.
#[derive(Debug, Clone)]
pub struct StackEvent {
    pub timestamp: DateTime<Utc>,
    pub logical_id: String,
    pub resource_type: String,
    pub status: String,
    pub reason: Option<String>,
}

impl StackEvent {
    /// Events worth showing when an operation fails: a failed or rollback
    /// status carrying a human-readable reason. Informational transitions
    /// and reasonless failures are noise.
    pub fn is_failure_diagnostic(&self) -> bool {
        self.reason.is_some()
            && (self.status.contains("FAILED") || self.status.contains("ROLLBACK"))
    }
}

/// One resource belonging to a stack.
#[derive(Debug, Clone)]
pub struct ResourceSummary {
    pub logical_id: String,
    /// Provider-assigned id (bucket name, function ARN); absent while the
    /// resource is still being created.
    pub physical_id: Option<String>,
    pub resource_type: String,
}

/// What the provider did with an update submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateDispatch {
    /// An update operation is now running
    Started,
    /// Template and parameters matched what is deployed; nothing to do
    NoChanges,
}

/// The remote stack service.
///
/// Implemented by the CloudFormation client; faked in tests so orchestration
/// logic runs without AWS.
pub trait StackProvider: Send + Sync {
    /// Describe a stack. `Ok(None)` means no stack with this name exists.
    fn describe(
        &self,
        name: &str,
    ) -> impl Future<Output = Result<Option<StackDescription>>> + Send;

    /// Submit stack creation. Returns once the operation is accepted;
    /// completion is observed via [`StackProvider::wait_for_create`].
    fn create_stack(&self, request: &StackRequest) -> impl Future<Output = Result<()>> + Send;

    /// Submit a stack update, reporting whether there was anything to do.
    fn update_stack(
        &self,
        request: &StackRequest,
    ) -> impl Future<Output = Result<UpdateDispatch>> + Send;

    /// Submit stack deletion. Idempotent: deleting an absent stack succeeds.
    fn delete_stack(&self, name: &str) -> impl Future<Output = Result<()>> + Send;

    /// Poll until creation settles; `Err` carries the failed terminal state.
    fn wait_for_create(
        &self,
        name: &str,
        cancel: Option<&CancellationToken>,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Poll until an update settles.
    fn wait_for_update(
        &self,
        name: &str,
        cancel: Option<&CancellationToken>,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Poll until deletion settles (the stack no longer exists).
    fn wait_for_delete(
        &self,
        name: &str,
        cancel: Option<&CancellationToken>,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Stack events newer than `since`, newest first.
    fn list_events(
        &self,
        name: &str,
        since: DateTime<Utc>,
    ) -> impl Future<Output = Result<Vec<StackEvent>>> + Send;

    /// One page of the stack's resources.
    fn list_resources(
        &self,
        name: &str,
        token: Option<String>,
    ) -> impl Future<Output = Result<Page<ResourceSummary>>> + Send;

    /// Enable or disable termination protection on an existing stack.
    fn set_termination_protection(
        &self,
        name: &str,
        enabled: bool,
    ) -> impl Future<Output = Result<()>> + Send;
}

/// A version (or delete marker) of one object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectVersion {
    pub key: String,
    /// `None` on buckets that never had versioning enabled.
    pub version_id: Option<String>,
}

/// The remote object store, as needed for emptying versioned buckets.
pub trait ObjectStore: Send + Sync {
    /// One page of keys under `prefix` (all keys when `None`).
    fn list_keys(
        &self,
        bucket: &str,
        prefix: Option<&str>,
        token: Option<String>,
    ) -> impl Future<Output = Result<Page<String>>> + Send;

    /// Every historical version and delete marker of `key`.
    fn list_versions(
        &self,
        bucket: &str,
        key: &str,
    ) -> impl Future<Output = Result<Vec<ObjectVersion>>> + Send;

    /// Remove the given versions in one batch call.
    fn delete_versions(
        &self,
        bucket: &str,
        versions: &[ObjectVersion],
    ) -> impl Future<Output = Result<()>> + Send;
}

/// Where oversized templates go when they cannot be inlined.
pub trait TemplateStore: Send + Sync {
    /// Persist a template body; returns the URL to submit in its place.
    fn store_template(&self, body: &str) -> impl Future<Output = Result<String>> + Send;
}
