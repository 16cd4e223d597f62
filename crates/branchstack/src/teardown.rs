//! Guarded stack destruction
//!
//! Destroying a stack is the one operation here that cannot be taken back,
//! so it runs behind guards that each short-circuit: an active environment
//! label refuses outright (environment stacks are never destroyed by this
//! path), an absent stack is a no-op, and termination protection is
//! respected rather than silently disabled. Only then are the stack's
//! buckets emptied (the provider refuses to delete non-empty ones) and the
//! stack deleted. Guard refusals are outcomes, not errors.

use anyhow::Result;
use futures::future::join_all;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use branchstack_template::resource::BUCKET_TYPE;

use crate::deploy::{delete_stack_and_wait, report_failure_events};
use crate::paginate::collect_pages;
use crate::project::ProjectMetadata;
use crate::provider::{ObjectStore, StackProvider};
use crate::sweep::BucketSweeper;
use crate::wait::is_cancelled_error;

/// Why a destroy was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefusalReason {
    /// An environment label is active; environment stacks stay up
    EnvironmentActive,
    /// The stack has termination protection enabled
    TerminationProtection,
}

/// What a destroy call did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DestroyOutcome {
    /// The stack and its bucket contents are gone
    Destroyed,
    /// No stack with this name exists
    AlreadyAbsent,
    /// A guard stopped the destroy before any mutation
    Refused(RefusalReason),
}

/// Guarded destroy over a [`StackProvider`] and an [`ObjectStore`].
pub struct TeardownCoordinator<P: StackProvider, O: ObjectStore> {
    provider: P,
    sweeper: BucketSweeper<O>,
    cancel: Option<CancellationToken>,
}

impl<P: StackProvider, O: ObjectStore> TeardownCoordinator<P, O> {
    pub fn new(provider: P, store: O) -> Self {
        Self {
            provider,
            sweeper: BucketSweeper::new(store),
            cancel: None,
        }
    }

    /// Attach a cancellation token observed by the delete wait.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = Some(cancel);
        self
    }

    /// Destroy the named stack unless a guard refuses.
    pub async fn destroy(&self, name: &str, meta: &ProjectMetadata) -> Result<DestroyOutcome> {
        if meta.environment_active() {
            warn!(
                stack = %name,
                environment = %meta.resolved_environment(),
                "Refusing to destroy: environment label is active"
            );
            return Ok(DestroyOutcome::Refused(RefusalReason::EnvironmentActive));
        }

        let Some(description) = self.provider.describe(name).await? else {
            info!(stack = %name, "Stack does not exist, nothing to destroy");
            return Ok(DestroyOutcome::AlreadyAbsent);
        };

        if description.termination_protection {
            warn!(stack = %name, "Refusing to destroy: termination protection is enabled");
            return Ok(DestroyOutcome::Refused(RefusalReason::TerminationProtection));
        }

        let buckets = self.stack_buckets(name).await?;
        if !buckets.is_empty() {
            info!(stack = %name, buckets = buckets.len(), "Emptying stack-owned buckets");
            let sweeps = buckets.iter().map(|bucket| self.sweeper.empty(bucket, None));
            for result in join_all(sweeps).await {
                result?;
            }
        }

        info!(stack = %name, "Destroying stack");
        if let Err(e) = delete_stack_and_wait(&self.provider, name, self.cancel.as_ref()).await {
            if is_cancelled_error(&e) {
                warn!(stack = %name, "Destroy cancelled; the delete continues remotely");
                return Err(e);
            }
            error!(stack = %name, error = %e, "Delete did not complete");
            report_failure_events(&self.provider, name).await;
            return Err(e);
        }

        info!(stack = %name, "Stack destroyed");
        Ok(DestroyOutcome::Destroyed)
    }

    /// Physical ids of every bucket the stack owns. Buckets still being
    /// created have no physical id yet and are skipped.
    async fn stack_buckets(&self, name: &str) -> Result<Vec<String>> {
        let resources = collect_pages(|token| self.provider.list_resources(name, token)).await?;
        Ok(resources
            .into_iter()
            .filter(|r| r.resource_type == BUCKET_TYPE)
            .filter_map(|r| r.physical_id)
            .collect())
    }
}
