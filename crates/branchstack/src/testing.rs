//! Centralized test fixtures and helpers for engine tests.
//!
//! This module provides shared test utilities to avoid duplication across
//! test modules: in-memory fakes for the two remote traits, plus fixture
//! builders for metadata, templates, and stack descriptions.

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;

use crate::aws::error::StackError;
use crate::config::DeployParams;
use crate::paginate::Page;
use crate::project::ProjectMetadata;
use crate::provider::{
    ObjectStore, ObjectVersion, ResourceSummary, StackDescription, StackEvent, StackProvider,
    StackRequest, StackState, UpdateDispatch,
};
use crate::wait::WaitError;
use branchstack_template::{Resource, Template};

/// Scripted outcome for one fake wait call.
#[derive(Debug, Clone, Default)]
pub enum WaitScript {
    /// The operation settles successfully
    #[default]
    Settle,
    /// The operation reaches a failed terminal state with this reason
    Fail(String),
    /// The wait is cancelled mid-flight
    Cancel,
    /// The wait gives up before the operation settles
    TimeOut,
}

fn wait_result(script: WaitScript, name: &str, operation: &'static str) -> Result<()> {
    match script {
        WaitScript::Settle => Ok(()),
        WaitScript::Fail(reason) => Err(StackError::OperationFailed {
            stack: name.to_string(),
            operation,
            reason,
        }
        .into()),
        WaitScript::Cancel => Err(WaitError::Cancelled(format!("{operation} of {name}")).into()),
        WaitScript::TimeOut => Err(WaitError::TimedOut {
            name: format!("{operation} of {name}"),
            waited: Duration::from_secs(1),
            attempts: 1,
        }
        .into()),
    }
}

/// Everything a test scripts into, and reads back out of, a
/// [`FakeStackProvider`].
#[derive(Debug, Default)]
pub struct ProviderScript {
    /// Answers for successive `describe` calls; when exhausted, the stack
    /// reads as absent
    pub describes: VecDeque<Option<StackDescription>>,
    /// Outcome of `update_stack` (default `Started`)
    pub update_dispatch: Option<UpdateDispatch>,
    pub create_wait: WaitScript,
    pub update_wait: WaitScript,
    pub delete_wait: WaitScript,
    /// Event log served by `list_events`
    pub events: Vec<StackEvent>,
    /// Pages served by successive `list_resources` calls; when exhausted,
    /// an empty final page
    pub resource_pages: VecDeque<Page<ResourceSummary>>,
    /// First N create submissions are throttled
    pub throttle_creates: u32,
    /// `set_termination_protection` fails
    pub fail_protection: bool,
    /// Call log, e.g. `"create FrontendMain"`
    pub calls: Vec<String>,
}

/// In-memory [`StackProvider`] driven by a [`ProviderScript`].
#[derive(Debug, Default)]
pub struct FakeStackProvider {
    script: Mutex<ProviderScript>,
}

impl FakeStackProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// A provider that already has this stack.
    pub fn with_stack(description: StackDescription) -> Self {
        let provider = Self::new();
        provider.script().describes.push_back(Some(description));
        provider
    }

    /// Lock the script for setup or assertions.
    pub fn script(&self) -> MutexGuard<'_, ProviderScript> {
        self.script.lock().unwrap()
    }

    pub fn calls(&self) -> Vec<String> {
        self.script().calls.clone()
    }

    /// True if any logged call starts with `prefix`.
    pub fn called(&self, prefix: &str) -> bool {
        self.script()
            .calls
            .iter()
            .any(|call| call.starts_with(prefix))
    }
}

impl StackProvider for FakeStackProvider {
    async fn describe(&self, name: &str) -> Result<Option<StackDescription>> {
        let mut script = self.script();
        script.calls.push(format!("describe {name}"));
        Ok(script.describes.pop_front().unwrap_or(None))
    }

    async fn create_stack(&self, request: &StackRequest) -> Result<()> {
        let mut script = self.script();
        script.calls.push(format!("create {}", request.name));
        if script.throttle_creates > 0 {
            script.throttle_creates -= 1;
            return Err(StackError::Throttled.into());
        }
        Ok(())
    }

    async fn update_stack(&self, request: &StackRequest) -> Result<UpdateDispatch> {
        let mut script = self.script();
        script.calls.push(format!("update {}", request.name));
        Ok(script.update_dispatch.unwrap_or(UpdateDispatch::Started))
    }

    async fn delete_stack(&self, name: &str) -> Result<()> {
        self.script().calls.push(format!("delete {name}"));
        Ok(())
    }

    async fn wait_for_create(&self, name: &str, _cancel: Option<&CancellationToken>) -> Result<()> {
        let outcome = {
            let mut script = self.script();
            script.calls.push(format!("wait_for_create {name}"));
            script.create_wait.clone()
        };
        wait_result(outcome, name, "create")
    }

    async fn wait_for_update(&self, name: &str, _cancel: Option<&CancellationToken>) -> Result<()> {
        let outcome = {
            let mut script = self.script();
            script.calls.push(format!("wait_for_update {name}"));
            script.update_wait.clone()
        };
        wait_result(outcome, name, "update")
    }

    async fn wait_for_delete(&self, name: &str, _cancel: Option<&CancellationToken>) -> Result<()> {
        let outcome = {
            let mut script = self.script();
            script.calls.push(format!("wait_for_delete {name}"));
            script.delete_wait.clone()
        };
        wait_result(outcome, name, "delete")
    }

    async fn list_events(&self, name: &str, since: DateTime<Utc>) -> Result<Vec<StackEvent>> {
        let mut script = self.script();
        script.calls.push(format!("events {name}"));
        Ok(script
            .events
            .iter()
            .filter(|event| event.timestamp >= since)
            .cloned()
            .collect())
    }

    async fn list_resources(
        &self,
        name: &str,
        _token: Option<String>,
    ) -> Result<Page<ResourceSummary>> {
        let mut script = self.script();
        script.calls.push(format!("resources {name}"));
        Ok(script
            .resource_pages
            .pop_front()
            .unwrap_or_else(|| Page::last(Vec::new())))
    }

    async fn set_termination_protection(&self, name: &str, enabled: bool) -> Result<()> {
        let mut script = self.script();
        script.calls.push(format!("protect {name} {enabled}"));
        if script.fail_protection {
            anyhow::bail!("protection unavailable");
        }
        Ok(())
    }
}

/// Backing state of a [`FakeObjectStore`]: buckets of keys of versions.
#[derive(Debug, Default)]
pub struct StoreState {
    pub buckets: BTreeMap<String, BTreeMap<String, Vec<ObjectVersion>>>,
    /// Every `delete_versions` batch, in call order
    pub deleted_batches: Vec<(String, Vec<ObjectVersion>)>,
    /// Keys per listing page; 0 means everything on one page
    pub page_size: usize,
}

/// In-memory [`ObjectStore`]. Listing paginates the way S3 does: the
/// continuation token resumes after the last key served, so keys deleted
/// between pages are not re-listed and none are skipped.
#[derive(Debug, Default)]
pub struct FakeObjectStore {
    state: Mutex<StoreState>,
}

impl FakeObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a bucket with `count` versions (`v0`, `v1`, ...) per key.
    pub fn add_bucket(&self, bucket: &str, keys: &[(&str, usize)]) {
        let mut state = self.state();
        let bucket_map = state.buckets.entry(bucket.to_string()).or_default();
        for (key, count) in keys {
            let versions = (0..*count)
                .map(|i| ObjectVersion {
                    key: (*key).to_string(),
                    version_id: Some(format!("v{i}")),
                })
                .collect();
            bucket_map.insert((*key).to_string(), versions);
        }
    }

    pub fn state(&self) -> MutexGuard<'_, StoreState> {
        self.state.lock().unwrap()
    }
}

impl ObjectStore for FakeObjectStore {
    async fn list_keys(
        &self,
        bucket: &str,
        prefix: Option<&str>,
        token: Option<String>,
    ) -> Result<Page<String>> {
        let state = self.state();
        let Some(bucket_map) = state.buckets.get(bucket) else {
            return Err(StackError::NotFound {
                name: bucket.to_string(),
            }
            .into());
        };

        let keys: Vec<String> = bucket_map
            .keys()
            .filter(|key| prefix.map_or(true, |p| key.starts_with(p)))
            .filter(|key| token.as_deref().map_or(true, |t| key.as_str() > t))
            .cloned()
            .collect();

        let page_size = match state.page_size {
            0 => usize::MAX,
            n => n,
        };
        Ok(if keys.len() > page_size {
            let items = keys[..page_size].to_vec();
            let next = items[page_size - 1].clone();
            Page::partial(items, next)
        } else {
            Page::last(keys)
        })
    }

    async fn list_versions(&self, bucket: &str, key: &str) -> Result<Vec<ObjectVersion>> {
        let state = self.state();
        let Some(bucket_map) = state.buckets.get(bucket) else {
            return Err(StackError::NotFound {
                name: bucket.to_string(),
            }
            .into());
        };
        Ok(bucket_map.get(key).cloned().unwrap_or_default())
    }

    async fn delete_versions(&self, bucket: &str, versions: &[ObjectVersion]) -> Result<()> {
        let mut state = self.state();
        let Some(bucket_map) = state.buckets.get_mut(bucket) else {
            return Err(StackError::NotFound {
                name: bucket.to_string(),
            }
            .into());
        };
        for version in versions {
            if let Some(existing) = bucket_map.get_mut(&version.key) {
                existing.retain(|v| v.version_id != version.version_id);
                if existing.is_empty() {
                    bucket_map.remove(&version.key);
                }
            }
        }
        state
            .deleted_batches
            .push((bucket.to_string(), versions.to_vec()));
        Ok(())
    }
}

/// Metadata for a working copy with an active environment label.
pub fn test_meta() -> ProjectMetadata {
    ProjectMetadata {
        project: Some("frontend".to_string()),
        package: Some("@acme/frontend".to_string()),
        version: Some("1.4.2".to_string()),
        branch: Some("main".to_string()),
        environment: Some("staging".to_string()),
    }
}

/// Metadata for a plain branch checkout (no environment label).
pub fn branch_meta() -> ProjectMetadata {
    ProjectMetadata {
        environment: None,
        branch: Some("feature/log-retention".to_string()),
        ..test_meta()
    }
}

/// A minimal deployable template: one serverless function.
pub fn test_template() -> Template {
    let mut template = Template::new();
    let mut api = Resource::new(branchstack_template::resource::SERVERLESS_FUNCTION_TYPE);
    api.properties = Some(serde_json::json!({ "Handler": "index.handler" }));
    template.resources.insert("Api".to_string(), api);
    template
}

/// Empty caller params.
pub fn test_params() -> DeployParams {
    DeployParams::default()
}

/// A description in the given state with no outputs.
pub fn stack_description(name: &str, state: StackState) -> StackDescription {
    StackDescription {
        name: name.to_string(),
        state,
        status_reason: None,
        outputs: Vec::new(),
        termination_protection: false,
    }
}

/// A failure event with a reason, timestamped now.
pub fn failure_event(logical_id: &str, reason: &str) -> StackEvent {
    StackEvent {
        timestamp: Utc::now(),
        logical_id: logical_id.to_string(),
        resource_type: "AWS::Serverless::Function".to_string(),
        status: "CREATE_FAILED".to_string(),
        reason: Some(reason.to_string()),
    }
}
