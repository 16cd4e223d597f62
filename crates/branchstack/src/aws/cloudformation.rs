//! CloudFormation stack operations
//!
//! `CloudFormationClient` is the production [`StackProvider`]: submissions,
//! settle-polling, event listing, resource listing, and termination
//! protection. The two API quirks that cannot be classified by error code
//! alone (missing stack and no-op update, both `ValidationError`) are
//! resolved here at the call site through `aws::error`.

use anyhow::{Context, Result};
use aws_sdk_cloudformation::error::ProvideErrorMetadata;
use aws_sdk_cloudformation::primitives::DateTime as SdkDateTime;
use aws_sdk_cloudformation::types::{Capability, Parameter, Tag};
use aws_sdk_cloudformation::Client;
use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::aws::context::AwsContext;
use crate::aws::error::{self, StackError};
use crate::config;
use crate::paginate::{collect_pages, Page};
use crate::payload::TemplatePayload;
use crate::provider::{
    ResourceSummary, StackDescription, StackEvent, StackOutput, StackProvider, StackRequest,
    StackState, UpdateDispatch,
};
use crate::wait::{poll_until, WaitConfig};

/// CloudFormation client for the stack lifecycle
pub struct CloudFormationClient {
    client: Client,
    wait_mutation: WaitConfig,
    wait_delete: WaitConfig,
}

impl CloudFormationClient {
    /// Create a new CloudFormation client
    pub async fn new(region: &str) -> Result<Self> {
        let ctx = AwsContext::new(region).await;
        Ok(Self::from_context(&ctx))
    }

    /// Create a CloudFormation client from a pre-loaded AWS context
    pub fn from_context(ctx: &AwsContext) -> Self {
        Self {
            client: ctx.cloudformation_client(),
            wait_mutation: WaitConfig::for_stack_mutation(),
            wait_delete: WaitConfig::for_stack_delete(),
        }
    }

    /// Override the polling cadences (shorter bounds for tests).
    pub fn with_wait_configs(mut self, mutation: WaitConfig, delete: WaitConfig) -> Self {
        self.wait_mutation = mutation;
        self.wait_delete = delete;
        self
    }

    /// Describe a stack by name. `Ok(None)` means no such stack.
    pub async fn describe(&self, name: &str) -> Result<Option<StackDescription>> {
        debug!(stack = %name, "Describing stack");

        let response = match self.client.describe_stacks().stack_name(name).send().await {
            Ok(response) => response,
            Err(e) => {
                let meta = ProvideErrorMetadata::meta(&e);
                if error::is_stack_missing(meta.code(), meta.message()) {
                    return Ok(None);
                }
                return Err(e).context("Failed to describe stack");
            }
        };

        Ok(response.stacks().first().map(describe_from_stack))
    }

    /// Submit stack creation. Does not wait for completion.
    pub async fn create_stack(&self, request: &StackRequest) -> Result<()> {
        info!(stack = %request.name, "Creating stack");

        let call = self
            .client
            .create_stack()
            .stack_name(&request.name)
            .set_parameters(Some(build_parameters(&request.parameters)))
            .set_tags(Some(build_tags(&request.tags)))
            .set_capabilities(Some(build_capabilities(&request.capabilities)));

        let call = match &request.payload {
            TemplatePayload::Inline(body) => call.template_body(body),
            TemplatePayload::Reference(url) => call.template_url(url),
        };

        call.send().await.context("Failed to create stack")?;
        Ok(())
    }

    /// Submit a stack update. Does not wait for completion.
    pub async fn update_stack(&self, request: &StackRequest) -> Result<UpdateDispatch> {
        info!(stack = %request.name, "Updating stack");

        let call = self
            .client
            .update_stack()
            .stack_name(&request.name)
            .set_parameters(Some(build_parameters(&request.parameters)))
            .set_tags(Some(build_tags(&request.tags)))
            .set_capabilities(Some(build_capabilities(&request.capabilities)));

        let call = match &request.payload {
            TemplatePayload::Inline(body) => call.template_body(body),
            TemplatePayload::Reference(url) => call.template_url(url),
        };

        match call.send().await {
            Ok(_) => Ok(UpdateDispatch::Started),
            Err(e) => {
                let meta = ProvideErrorMetadata::meta(&e);
                if error::is_no_updates_needed(meta.code(), meta.message()) {
                    info!(stack = %request.name, "No updates to perform");
                    return Ok(UpdateDispatch::NoChanges);
                }
                Err(e).context("Failed to update stack")
            }
        }
    }

    /// Submit stack deletion. The API itself treats a missing stack as
    /// success, so this is naturally idempotent.
    pub async fn delete_stack(&self, name: &str) -> Result<()> {
        info!(stack = %name, "Deleting stack");

        self.client
            .delete_stack()
            .stack_name(name)
            .send()
            .await
            .context("Failed to delete stack")?;
        Ok(())
    }

    /// Poll until a create settles.
    pub async fn wait_for_create(
        &self,
        name: &str,
        cancel: Option<&CancellationToken>,
    ) -> Result<()> {
        let what = format!("create of {name}");
        poll_until(
            self.wait_mutation.clone(),
            cancel,
            || self.check_mutation(name, "create"),
            &what,
        )
        .await?;
        Ok(())
    }

    /// Poll until an update settles.
    pub async fn wait_for_update(
        &self,
        name: &str,
        cancel: Option<&CancellationToken>,
    ) -> Result<()> {
        let what = format!("update of {name}");
        poll_until(
            self.wait_mutation.clone(),
            cancel,
            || self.check_mutation(name, "update"),
            &what,
        )
        .await?;
        Ok(())
    }

    /// Poll until the stack no longer exists.
    pub async fn wait_for_delete(
        &self,
        name: &str,
        cancel: Option<&CancellationToken>,
    ) -> Result<()> {
        let what = format!("delete of {name}");
        poll_until(
            self.wait_delete.clone(),
            cancel,
            || async {
                match self.describe(name).await {
                    // Describe-by-name stops resolving once the delete lands.
                    Ok(None) => Ok(true),
                    Ok(Some(description)) => match description.state {
                        StackState::DeleteComplete => Ok(true),
                        StackState::DeleteFailed => Err(StackError::OperationFailed {
                            stack: name.to_string(),
                            operation: "delete",
                            reason: description
                                .status_reason
                                .unwrap_or_else(|| "stack reached DELETE_FAILED".to_string()),
                        }
                        .into()),
                        _ => Ok(false),
                    },
                    Err(e) if error::classify_anyhow_error(&e).is_retryable() => {
                        warn!(stack = %name, "Describe throttled, will poll again");
                        Ok(false)
                    }
                    Err(e) => Err(e),
                }
            },
            &what,
        )
        .await?;
        Ok(())
    }

    /// One describe round for a create/update poll.
    async fn check_mutation(&self, name: &str, operation: &'static str) -> Result<bool> {
        match self.describe(name).await {
            Ok(Some(description)) => {
                settle(operation, name, description.state, description.status_reason)
            }
            Ok(None) => Err(StackError::NotFound {
                name: name.to_string(),
            }
            .into()),
            Err(e) if error::classify_anyhow_error(&e).is_retryable() => {
                warn!(stack = %name, "Describe throttled, will poll again");
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    /// Stack events newer than `since`, newest first.
    ///
    /// The API returns events in reverse chronological order; pagination
    /// stops at the first event older than the cutoff.
    pub async fn list_events(&self, name: &str, since: DateTime<Utc>) -> Result<Vec<StackEvent>> {
        collect_pages(|token| async move {
            let response = self
                .client
                .describe_stack_events()
                .stack_name(name)
                .set_next_token(token)
                .send()
                .await
                .context("Failed to list stack events")?;

            let mut items = Vec::new();
            let mut reached_cutoff = false;
            for event in response.stack_events() {
                let event = event_from_sdk(event);
                if event.timestamp < since {
                    reached_cutoff = true;
                    break;
                }
                items.push(event);
            }

            Ok(match response.next_token() {
                Some(next) if !reached_cutoff => Page::partial(items, next),
                _ => Page::last(items),
            })
        })
        .await
    }

    /// One page of the stack's resources.
    pub async fn list_resources(
        &self,
        name: &str,
        token: Option<String>,
    ) -> Result<Page<ResourceSummary>> {
        let response = self
            .client
            .list_stack_resources()
            .stack_name(name)
            .set_next_token(token)
            .send()
            .await
            .context("Failed to list stack resources")?;

        let items = response
            .stack_resource_summaries()
            .iter()
            .map(|summary| ResourceSummary {
                logical_id: summary.logical_resource_id().unwrap_or_default().to_string(),
                physical_id: summary.physical_resource_id().map(str::to_string),
                resource_type: summary.resource_type().unwrap_or_default().to_string(),
            })
            .collect();

        Ok(match response.next_token() {
            Some(next) => Page::partial(items, next),
            None => Page::last(items),
        })
    }

    /// Enable or disable termination protection.
    pub async fn set_termination_protection(&self, name: &str, enabled: bool) -> Result<()> {
        info!(stack = %name, enabled, "Setting termination protection");

        self.client
            .update_termination_protection()
            .stack_name(name)
            .enable_termination_protection(enabled)
            .send()
            .await
            .context("Failed to set termination protection")?;
        Ok(())
    }
}

impl StackProvider for CloudFormationClient {
    async fn describe(&self, name: &str) -> Result<Option<StackDescription>> {
        CloudFormationClient::describe(self, name).await
    }

    async fn create_stack(&self, request: &StackRequest) -> Result<()> {
        CloudFormationClient::create_stack(self, request).await
    }

    async fn update_stack(&self, request: &StackRequest) -> Result<UpdateDispatch> {
        CloudFormationClient::update_stack(self, request).await
    }

    async fn delete_stack(&self, name: &str) -> Result<()> {
        CloudFormationClient::delete_stack(self, name).await
    }

    async fn wait_for_create(&self, name: &str, cancel: Option<&CancellationToken>) -> Result<()> {
        CloudFormationClient::wait_for_create(self, name, cancel).await
    }

    async fn wait_for_update(&self, name: &str, cancel: Option<&CancellationToken>) -> Result<()> {
        CloudFormationClient::wait_for_update(self, name, cancel).await
    }

    async fn wait_for_delete(&self, name: &str, cancel: Option<&CancellationToken>) -> Result<()> {
        CloudFormationClient::wait_for_delete(self, name, cancel).await
    }

    async fn list_events(&self, name: &str, since: DateTime<Utc>) -> Result<Vec<StackEvent>> {
        CloudFormationClient::list_events(self, name, since).await
    }

    async fn list_resources(
        &self,
        name: &str,
        token: Option<String>,
    ) -> Result<Page<ResourceSummary>> {
        CloudFormationClient::list_resources(self, name, token).await
    }

    async fn set_termination_protection(&self, name: &str, enabled: bool) -> Result<()> {
        CloudFormationClient::set_termination_protection(self, name, enabled).await
    }
}

/// Decide whether a create/update poll is finished.
fn settle(
    operation: &'static str,
    name: &str,
    state: StackState,
    reason: Option<String>,
) -> Result<bool> {
    if !state.is_settled() {
        return Ok(false);
    }
    if state.is_failure() {
        return Err(StackError::OperationFailed {
            stack: name.to_string(),
            operation,
            reason: reason.unwrap_or_else(|| format!("stack reached {state:?}")),
        }
        .into());
    }
    Ok(true)
}

fn describe_from_stack(stack: &aws_sdk_cloudformation::types::Stack) -> StackDescription {
    let outputs = stack
        .outputs()
        .iter()
        .filter_map(|output| {
            Some(StackOutput {
                key: output.output_key()?.to_string(),
                value: output.output_value()?.to_string(),
                export_name: output.export_name().map(str::to_string),
            })
        })
        .collect();

    // The SDK models name and status as optional even though the API always
    // sends them; an absent status reads as still in progress.
    StackDescription {
        name: stack.stack_name().unwrap_or_default().to_string(),
        state: StackState::from_status(
            stack.stack_status().map(|s| s.as_str()).unwrap_or_default(),
        ),
        status_reason: stack.stack_status_reason().map(str::to_string),
        outputs,
        termination_protection: stack.enable_termination_protection().unwrap_or(false),
    }
}

fn event_from_sdk(event: &aws_sdk_cloudformation::types::StackEvent) -> StackEvent {
    StackEvent {
        timestamp: event.timestamp().map(from_sdk_time).unwrap_or_default(),
        logical_id: event.logical_resource_id().unwrap_or_default().to_string(),
        resource_type: event.resource_type().unwrap_or_default().to_string(),
        status: event
            .resource_status()
            .map(|s| s.as_str().to_string())
            .unwrap_or_default(),
        reason: event.resource_status_reason().map(str::to_string),
    }
}

fn from_sdk_time(ts: &SdkDateTime) -> DateTime<Utc> {
    DateTime::from_timestamp(ts.secs(), ts.subsec_nanos()).unwrap_or_default()
}

fn build_parameters(parameters: &[(String, String)]) -> Vec<Parameter> {
    parameters
        .iter()
        .map(|(key, value)| {
            Parameter::builder()
                .parameter_key(key)
                .parameter_value(value)
                .build()
        })
        .collect()
}

fn build_tags(tags: &[config::Tag]) -> Vec<Tag> {
    tags.iter()
        .map(|tag| Tag::builder().key(&tag.key).value(&tag.value).build())
        .collect()
}

fn build_capabilities(capabilities: &[String]) -> Vec<Capability> {
    capabilities
        .iter()
        .map(|c| Capability::from(c.as_str()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use aws_sdk_cloudformation::types::{Output, ResourceStatus, Stack, StackStatus};

    #[test]
    fn test_stack_mapping() {
        let stack = Stack::builder()
            .stack_name("FrontendMain")
            .creation_time(SdkDateTime::from_secs(1_700_000_000))
            .stack_status(StackStatus::CreateComplete)
            .enable_termination_protection(true)
            .outputs(
                Output::builder()
                    .output_key("ApiUrl")
                    .output_value("https://example.com")
                    .build(),
            )
            .build();

        let description = describe_from_stack(&stack);
        assert_eq!(description.name, "FrontendMain");
        assert_eq!(description.state, StackState::CreateComplete);
        assert!(description.termination_protection);
        assert_eq!(description.output("ApiUrl"), Some("https://example.com"));
    }

    #[test]
    fn test_rolled_back_stack_maps_to_create_failed() {
        let stack = Stack::builder()
            .stack_name("FrontendBroken")
            .creation_time(SdkDateTime::from_secs(1_700_000_000))
            .stack_status(StackStatus::RollbackComplete)
            .stack_status_reason("The following resource(s) failed to create: [Api]")
            .build();

        let description = describe_from_stack(&stack);
        assert_eq!(description.state, StackState::CreateFailed);
        assert!(description
            .status_reason
            .as_deref()
            .unwrap()
            .contains("failed to create"));
        assert!(!description.termination_protection);
    }

    #[test]
    fn test_event_mapping() {
        let event = aws_sdk_cloudformation::types::StackEvent::builder()
            .stack_id("arn:aws:cloudformation:us-east-1:123:stack/FrontendMain/abc")
            .event_id("evt-1")
            .stack_name("FrontendMain")
            .timestamp(SdkDateTime::from_secs(1_700_000_123))
            .logical_resource_id("Api")
            .resource_type("AWS::Serverless::Function")
            .resource_status(ResourceStatus::CreateFailed)
            .resource_status_reason("Resource handler returned message: quota exceeded")
            .build();

        let mapped = event_from_sdk(&event);
        assert_eq!(mapped.timestamp.timestamp(), 1_700_000_123);
        assert_eq!(mapped.logical_id, "Api");
        assert_eq!(mapped.status, "CREATE_FAILED");
        assert!(mapped.is_failure_diagnostic());
    }

    #[test]
    fn test_mapping_tolerates_absent_optional_fields() {
        // The SDK types leave every member optional; mapping must not
        // assume the API filled them in.
        let description = describe_from_stack(&Stack::builder().build());
        assert_eq!(description.name, "");
        assert!(!description.state.is_settled(), "no status reads as in progress");
        assert!(!description.termination_protection);

        let mapped = event_from_sdk(&aws_sdk_cloudformation::types::StackEvent::builder().build());
        assert_eq!(mapped.timestamp.timestamp(), 0);
        assert_eq!(mapped.logical_id, "");
        assert!(!mapped.is_failure_diagnostic());
    }

    #[test]
    fn test_settle_decisions() {
        assert!(!settle("create", "S", StackState::Creating, None).unwrap());
        assert!(settle("create", "S", StackState::CreateComplete, None).unwrap());

        let err = settle(
            "create",
            "S",
            StackState::CreateFailed,
            Some("rollback requested by user".to_string()),
        )
        .unwrap_err();
        let classified = error::classify_anyhow_error(&err);
        assert!(matches!(classified, StackError::OperationFailed { .. }));
        assert!(err.to_string().contains("rollback requested by user"));
    }

    #[test]
    fn test_request_builders() {
        let parameters = build_parameters(&[("Environment".to_string(), "staging".to_string())]);
        assert_eq!(parameters[0].parameter_key(), Some("Environment"));
        assert_eq!(parameters[0].parameter_value(), Some("staging"));

        let tags = build_tags(&[config::Tag::new("branchstack:project", "frontend")]);
        assert_eq!(tags[0].key(), Some("branchstack:project"));
        assert_eq!(tags[0].value(), Some("frontend"));

        let capabilities = build_capabilities(&[
            "CAPABILITY_NAMED_IAM".to_string(),
            "CAPABILITY_AUTO_EXPAND".to_string(),
        ]);
        assert_eq!(capabilities[0], Capability::CapabilityNamedIam);
        assert_eq!(capabilities[1], Capability::CapabilityAutoExpand);
    }
}
