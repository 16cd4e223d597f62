//! Deployment payload strategy
//!
//! The provider accepts template bodies inline only up to a ceiling; bigger
//! bodies must already live in an object store and be submitted by URL. The
//! choice is made here, once, from the canonical serialization, so the size
//! that is checked is the size that is submitted.

use anyhow::{Context, Result};
use branchstack_template::Template;
use tracing::info;

use crate::aws::error::StackError;
use crate::provider::TemplateStore;

/// Largest template body the provider accepts inline, in bytes.
pub const TEMPLATE_SIZE_CEILING: usize = 51_200;

/// How the template body travels with a submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TemplatePayload {
    /// Body submitted inline
    Inline(String),
    /// Body uploaded to the template store; this URL is submitted instead
    Reference(String),
}

/// Serialize `template` canonically and choose how to submit it.
///
/// Bodies at or over the ceiling require a configured template store;
/// without one the deployment fails here, before anything was submitted,
/// with [`StackError::UploadUnavailable`].
pub async fn choose_payload<S: TemplateStore>(
    template: &Template,
    store: Option<&S>,
) -> Result<TemplatePayload> {
    let body = template
        .canonical_json()
        .context("Failed to serialize template")?;

    if body.len() < TEMPLATE_SIZE_CEILING {
        return Ok(TemplatePayload::Inline(body));
    }

    let Some(store) = store else {
        return Err(StackError::UploadUnavailable { size: body.len() }.into());
    };

    let url = store
        .store_template(&body)
        .await
        .context("Failed to upload oversized template")?;
    info!(size = body.len(), url = %url, "Template over the inline limit, submitting by URL");
    Ok(TemplatePayload::Reference(url))
}
