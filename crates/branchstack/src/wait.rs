//! Remote-operation polling with exponential backoff and cancellation.
//!
//! CloudFormation operations are long-running: the engine submits a mutation
//! and then polls `describe` until the stack reaches a terminal state. The
//! loop here owns the cadence (backoff between polls), the bound (per
//! operation timeout), and cancellation; callers supply only the check.

use std::future::Future;
use std::time::Duration;

use backon::{BackoffBuilder, ExponentialBuilder};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Why a poll loop stopped without the condition becoming true.
///
/// `Cancelled` is deliberately its own variant: a cancelled deploy must not
/// trigger the failure cleanup path (the remote operation is still running
/// and the stack may yet succeed), while a timeout or check failure must.
#[derive(Debug, Error)]
pub enum WaitError {
    #[error("Wait for {0} cancelled")]
    Cancelled(String),

    #[error("Timed out waiting for {name} after {waited:?} ({attempts} attempts)")]
    TimedOut {
        name: String,
        waited: Duration,
        attempts: u32,
    },

    #[error(transparent)]
    Check(#[from] anyhow::Error),
}

impl WaitError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, WaitError::Cancelled(_))
    }
}

/// Poll cadence and bound for one remote operation.
#[derive(Debug, Clone)]
pub struct WaitConfig {
    /// Initial delay between polls
    pub initial_delay: Duration,
    /// Maximum delay between polls (cap for exponential growth)
    pub max_delay: Duration,
    /// Maximum total time to wait before giving up
    pub timeout: Duration,
}

impl Default for WaitConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(30),
            timeout: Duration::from_secs(60 * 60),
        }
    }
}

impl WaitConfig {
    /// Cadence for stack create/update: an hour covers certificate
    /// validation and CloudFront distribution rollout.
    pub fn for_stack_mutation() -> Self {
        Self::default()
    }

    /// Cadence for stack delete: same polling, half the bound.
    pub fn for_stack_delete() -> Self {
        Self {
            timeout: Duration::from_secs(30 * 60),
            ..Self::default()
        }
    }
}

/// Poll `check` until it returns `Ok(true)`, with exponential backoff.
///
/// * `Ok(false)` means not finished yet; sleep and poll again.
/// * `Err` from the check propagates immediately (the check itself decides
///   whether a transient describe failure is worth tolerating).
/// * `what` names the operation for logs and error text, e.g.
///   `"create of FrontendMain"`.
pub async fn poll_until<F, Fut>(
    config: WaitConfig,
    cancel: Option<&CancellationToken>,
    check: F,
    what: &str,
) -> Result<(), WaitError>
where
    F: Fn() -> Fut,
    Fut: Future<Output = anyhow::Result<bool>>,
{
    let start = tokio::time::Instant::now();
    let deadline = start + config.timeout;
    let mut attempts = 0u32;

    let mut delays = ExponentialBuilder::default()
        .with_min_delay(config.initial_delay)
        .with_max_delay(config.max_delay)
        .with_factor(2.0)
        .build();

    loop {
        attempts += 1;

        if let Some(token) = cancel {
            if token.is_cancelled() {
                return Err(WaitError::Cancelled(what.to_string()));
            }
        }

        if tokio::time::Instant::now() >= deadline {
            return Err(WaitError::TimedOut {
                name: what.to_string(),
                waited: start.elapsed(),
                attempts,
            });
        }

        if check().await? {
            debug!(target = %what, attempts, "Finished");
            return Ok(());
        }

        let delay = delays.next().unwrap_or(config.max_delay);
        debug!(
            target = %what,
            attempt = attempts,
            delay_ms = delay.as_millis() as u64,
            "Not finished, polling again"
        );

        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = cancelled(cancel) => {
                return Err(WaitError::Cancelled(what.to_string()));
            }
        }
    }
}

async fn cancelled(cancel: Option<&CancellationToken>) {
    match cancel {
        Some(token) => token.cancelled().await,
        None => std::future::pending().await,
    }
}

/// True if `error` is (or wraps) a cancelled wait.
pub fn is_cancelled_error(error: &anyhow::Error) -> bool {
    error
        .chain()
        .filter_map(|cause| cause.downcast_ref::<WaitError>())
        .any(WaitError::is_cancelled)
}
