//! Stack deployment
//!
//! `DeployEngine` drives the create-or-update state machine: resolve the
//! name, inject defaults, validate, choose the payload, then reconcile
//! against what the provider already has. A failed create is diagnosed
//! (failure events logged) and the half-created stack removed; a failed
//! update is diagnosed but never deleted, since the stack pre-existed and
//! holds user data. A cancelled wait re-raises without cleanup: the remote
//! operation keeps running and the stack is left for inspection.

use std::time::Duration;

use anyhow::{Context, Result};
use backon::{ExponentialBuilder, Retryable};
use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use branchstack_template::Template;

use crate::aws::error::{classify_anyhow_error, StackError};
use crate::aws::s3::S3TemplateStore;
use crate::config::DeployParams;
use crate::defaults::apply_defaults;
use crate::name::resolve_stack_name;
use crate::payload::choose_payload;
use crate::project::ProjectMetadata;
use crate::provider::{
    StackDescription, StackProvider, StackRequest, StackState, TemplateStore, UpdateDispatch,
    STACK_CAPABILITIES,
};
use crate::wait::is_cancelled_error;

/// How far back to fetch events when diagnosing a failed operation.
const EVENT_LOOKBACK_MINUTES: i64 = 30;

/// The create-or-update engine over one [`StackProvider`].
pub struct DeployEngine<P: StackProvider, S: TemplateStore = S3TemplateStore> {
    provider: P,
    template_store: Option<S>,
    cancel: Option<CancellationToken>,
    submission_backoff: ExponentialBuilder,
}

impl<P: StackProvider> DeployEngine<P> {
    /// Engine over `provider`, without a template store: oversized templates
    /// fail with [`StackError::UploadUnavailable`].
    pub fn new(provider: P) -> Self {
        Self {
            provider,
            template_store: None,
            cancel: None,
            submission_backoff: default_submission_backoff(),
        }
    }
}

fn default_submission_backoff() -> ExponentialBuilder {
    ExponentialBuilder::default()
        .with_min_delay(Duration::from_secs(2))
        .with_max_delay(Duration::from_secs(30))
        .with_max_times(5)
}

impl<P: StackProvider, S: TemplateStore> DeployEngine<P, S> {
    /// Attach a store for templates over the inline size limit.
    pub fn with_template_store<S2: TemplateStore>(self, store: S2) -> DeployEngine<P, S2> {
        DeployEngine {
            provider: self.provider,
            template_store: Some(store),
            cancel: self.cancel,
            submission_backoff: self.submission_backoff,
        }
    }

    /// Attach a cancellation token observed by every wait.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = Some(cancel);
        self
    }

    /// Override the backoff used for throttled submissions.
    pub fn with_submission_backoff(mut self, backoff: ExponentialBuilder) -> Self {
        self.submission_backoff = backoff;
        self
    }

    /// Deploy `template` as the stack named for this working copy (or the
    /// pinned name in `params`), creating or updating as needed, and return
    /// the final description.
    pub async fn deploy(
        &self,
        mut params: DeployParams,
        mut template: Template,
        meta: &ProjectMetadata,
    ) -> Result<StackDescription> {
        let name = resolve_stack_name(meta, params.stack_name.as_deref());

        apply_defaults(&mut params, &mut template, meta);
        template
            .validate()
            .context("Template failed reference validation")?;
        let payload = choose_payload(&template, self.template_store.as_ref()).await?;

        let request = StackRequest {
            name: name.clone(),
            payload,
            parameters: params.parameters.clone(),
            tags: params.tags.clone(),
            capabilities: STACK_CAPABILITIES.iter().map(|c| (*c).to_string()).collect(),
        };

        let dispatch = match self.provider.describe(&name).await? {
            None => {
                self.create(&request).await?;
                None
            }
            Some(_) => Some(self.update(&request).await?),
        };

        if params.termination_protection || meta.environment_active() {
            if let Err(e) = self.provider.set_termination_protection(&name, true).await {
                warn!(stack = %name, error = %e, "Could not enable termination protection");
            }
        }

        let Some(mut description) = self.provider.describe(&name).await? else {
            return Err(StackError::NotFound { name }.into());
        };
        if dispatch == Some(UpdateDispatch::NoChanges) {
            description.state = StackState::NoUpdatesNeeded;
        }
        info!(stack = %name, state = ?description.state, "Deploy finished");
        Ok(description)
    }

    async fn create(&self, request: &StackRequest) -> Result<()> {
        let name = request.name.as_str();

        (|| async { self.provider.create_stack(request).await })
            .retry(self.submission_backoff.clone())
            .when(|e| classify_anyhow_error(e).is_retryable())
            .notify(|e, dur| {
                warn!(stack = %name, delay = ?dur, error = %e, "Create submission throttled, backing off...");
            })
            .await?;

        if let Err(e) = self.provider.wait_for_create(name, self.cancel.as_ref()).await {
            if is_cancelled_error(&e) {
                warn!(stack = %name, "Deploy cancelled mid-create; stack left for inspection");
                return Err(e);
            }
            error!(stack = %name, error = %e, "Create did not complete");
            report_failure_events(&self.provider, name).await;

            info!(stack = %name, "Removing the failed stack");
            if let Err(cleanup) =
                delete_stack_and_wait(&self.provider, name, self.cancel.as_ref()).await
            {
                warn!(stack = %name, error = %cleanup, "Could not remove the failed stack");
            }
            return Err(e);
        }

        info!(stack = %name, "Create complete");
        Ok(())
    }

    async fn update(&self, request: &StackRequest) -> Result<UpdateDispatch> {
        let name = request.name.as_str();

        let dispatch = (|| async { self.provider.update_stack(request).await })
            .retry(self.submission_backoff.clone())
            .when(|e| classify_anyhow_error(e).is_retryable())
            .notify(|e, dur| {
                warn!(stack = %name, delay = ?dur, error = %e, "Update submission throttled, backing off...");
            })
            .await?;

        if dispatch == UpdateDispatch::NoChanges {
            info!(stack = %name, "Stack is already up to date");
            return Ok(dispatch);
        }

        if let Err(e) = self.provider.wait_for_update(name, self.cancel.as_ref()).await {
            if is_cancelled_error(&e) {
                warn!(stack = %name, "Deploy cancelled mid-update; the operation continues remotely");
                return Err(e);
            }
            // The stack pre-existed: diagnose, never delete.
            error!(stack = %name, error = %e, "Update did not complete");
            report_failure_events(&self.provider, name).await;
            return Err(e);
        }

        info!(stack = %name, "Update complete");
        Ok(dispatch)
    }
}

/// Log the recent events that explain a failed operation. Best-effort: a
/// fetch failure is warned about, never raised over the original error.
pub(crate) async fn report_failure_events<P: StackProvider>(provider: &P, name: &str) {
    let since = Utc::now() - chrono::Duration::minutes(EVENT_LOOKBACK_MINUTES);
    let events = match provider.list_events(name, since).await {
        Ok(events) => events,
        Err(e) => {
            warn!(stack = %name, error = %e, "Could not fetch stack events");
            return;
        }
    };

    let mut reported = 0usize;
    for event in events.iter().filter(|e| e.is_failure_diagnostic()) {
        error!(
            stack = %name,
            resource = %event.logical_id,
            resource_type = %event.resource_type,
            status = %event.status,
            reason = %event.reason.as_deref().unwrap_or(""),
            "Stack event"
        );
        reported += 1;
    }
    if reported == 0 {
        warn!(stack = %name, "No failure events found in the lookback window");
    }
}

/// Submit a delete and poll until the stack is gone.
pub(crate) async fn delete_stack_and_wait<P: StackProvider>(
    provider: &P,
    name: &str,
    cancel: Option<&CancellationToken>,
) -> Result<()> {
    provider.delete_stack(name).await?;
    provider.wait_for_delete(name, cancel).await
}
