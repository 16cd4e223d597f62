//! AWS error classification and handling
//!
//! Provides typed errors for stack operations, classified from the SDK's
//! error metadata `.code()` rather than string matching on Debug output.
//!
//! CloudFormation forces two narrow message-text exceptions: a missing stack
//! and an update with no changes both surface as `ValidationError`, with
//! nothing but the message to tell them apart. Both checks live here and
//! nowhere else.

use thiserror::Error;

/// Error categories for stack and object-store operations.
#[derive(Debug, Error)]
pub enum StackError {
    /// Stack, bucket, or key does not exist (safe to skip in teardown)
    #[error("Not found: {name}")]
    NotFound { name: String },

    /// Update submitted with nothing to change (success, not failure)
    #[error("Stack is already up to date")]
    NoUpdates,

    /// Rate limit exceeded (retryable with backoff)
    #[error("Rate limit exceeded")]
    Throttled,

    /// The stack reached a failed terminal state while we were polling
    #[error("{operation} of stack '{stack}' did not complete: {reason}")]
    OperationFailed {
        stack: String,
        operation: &'static str,
        reason: String,
    },

    /// Template too large to inline and no template store is configured
    #[error(
        "Template body is {size} bytes, over the inline limit, and no template store is configured"
    )]
    UploadUnavailable { size: usize },

    /// Validation/permission failure or any other provider rejection (fatal,
    /// surfaced verbatim)
    #[error("Provider rejected the request: {message}")]
    Rejected {
        code: Option<String>,
        message: String,
    },
}

impl StackError {
    /// Check if this is a "not found" error
    pub fn is_not_found(&self) -> bool {
        matches!(self, StackError::NotFound { .. })
    }

    /// Check if this is the "nothing to update" outcome
    pub fn is_no_updates(&self) -> bool {
        matches!(self, StackError::NoUpdates)
    }

    /// Check if this is a retryable error
    pub fn is_retryable(&self) -> bool {
        matches!(self, StackError::Throttled)
    }
}

/// Known AWS error codes for "not found" conditions.
///
/// CloudFormation reports a missing stack as `ValidationError`, handled by
/// the message check below; these codes cover the object-store side.
const NOT_FOUND_CODES: &[&str] = &["NoSuchBucket", "NoSuchKey", "NoSuchVersion"];

/// Known AWS error codes for throttling/rate limiting
const THROTTLING_CODES: &[&str] = &["Throttling", "ThrottlingException", "RequestLimitExceeded"];

/// Message marker for a `ValidationError` that means the stack is absent.
const STACK_MISSING_MARKER: &str = "does not exist";

/// Message marker for a `ValidationError` that means an update had no work.
/// This is the full sentinel CloudFormation returns, minus the period.
const NO_UPDATES_MARKER: &str = "No updates are to be performed";

/// Classify an AWS SDK error using the error code.
///
/// Everything not recognized lands in [`StackError::Rejected`]: access
/// denials, capability failures, `AlreadyExistsException`, malformed
/// templates. Those are fatal and the caller surfaces them verbatim.
pub fn classify_aws_error(code: Option<&str>, message: Option<&str>) -> StackError {
    let message_text = message.unwrap_or("Unknown error");

    match code {
        Some(c) if THROTTLING_CODES.contains(&c) => StackError::Throttled,
        Some(c) if NOT_FOUND_CODES.contains(&c) => StackError::NotFound {
            name: message_text.to_string(),
        },
        Some("ValidationError") if message_text.contains(STACK_MISSING_MARKER) => {
            StackError::NotFound {
                name: message_text.to_string(),
            }
        }
        Some("ValidationError") if message_text.contains(NO_UPDATES_MARKER) => {
            StackError::NoUpdates
        }
        _ => StackError::Rejected {
            code: code.map(|s| s.to_string()),
            message: message_text.to_string(),
        },
    }
}

/// True if (code, message) mean the described stack does not exist.
pub fn is_stack_missing(code: Option<&str>, message: Option<&str>) -> bool {
    classify_aws_error(code, message).is_not_found()
}

/// True if (code, message) mean an update had nothing to do.
pub fn is_no_updates_needed(code: Option<&str>, message: Option<&str>) -> bool {
    classify_aws_error(code, message).is_no_updates()
}

/// Classify an error from an anyhow::Error by extracting the AWS error code.
///
/// Walks the error chain for a typed [`StackError`] first (our own raises and
/// anything the client wrappers already classified), then for the SDK
/// operation errors the engine submits, and finally falls back to string
/// matching on the Debug representation.
pub fn classify_anyhow_error(error: &anyhow::Error) -> StackError {
    use aws_sdk_cloudformation::error::ProvideErrorMetadata;

    for cause in error.chain() {
        if let Some(stack_err) = cause.downcast_ref::<StackError>() {
            return reclassify(stack_err);
        }
        if let Some(e) = cause.downcast_ref::<aws_sdk_cloudformation::error::SdkError<
            aws_sdk_cloudformation::operation::create_stack::CreateStackError,
        >>() {
            let meta = ProvideErrorMetadata::meta(e);
            return classify_aws_error(meta.code(), meta.message());
        }
        if let Some(e) = cause.downcast_ref::<aws_sdk_cloudformation::error::SdkError<
            aws_sdk_cloudformation::operation::update_stack::UpdateStackError,
        >>() {
            let meta = ProvideErrorMetadata::meta(e);
            return classify_aws_error(meta.code(), meta.message());
        }
        if let Some(e) = cause.downcast_ref::<aws_sdk_cloudformation::error::SdkError<
            aws_sdk_cloudformation::operation::delete_stack::DeleteStackError,
        >>() {
            let meta = ProvideErrorMetadata::meta(e);
            return classify_aws_error(meta.code(), meta.message());
        }
        if let Some(e) = cause.downcast_ref::<aws_sdk_cloudformation::error::SdkError<
            aws_sdk_cloudformation::operation::describe_stacks::DescribeStacksError,
        >>() {
            let meta = ProvideErrorMetadata::meta(e);
            return classify_aws_error(meta.code(), meta.message());
        }
        if let Some(e) = cause.downcast_ref::<aws_sdk_s3::error::SdkError<
            aws_sdk_s3::operation::delete_objects::DeleteObjectsError,
        >>() {
            let meta = ProvideErrorMetadata::meta(e);
            return classify_aws_error(meta.code(), meta.message());
        }
        if let Some(e) = cause.downcast_ref::<aws_sdk_s3::error::SdkError<
            aws_sdk_s3::operation::list_objects_v2::ListObjectsV2Error,
        >>() {
            let meta = ProvideErrorMetadata::meta(e);
            return classify_aws_error(meta.code(), meta.message());
        }
    }

    // Fallback: extract error code from debug string representation
    let debug_str = format!("{error:?}");
    if let Some(code) = extract_error_code(&debug_str) {
        return classify_aws_error(Some(&code), Some(&debug_str));
    }

    StackError::Rejected {
        code: None,
        message: error.to_string(),
    }
}

/// Rebuild an owned classification from a borrowed [`StackError`].
fn reclassify(err: &StackError) -> StackError {
    match err {
        StackError::NotFound { name } => StackError::NotFound { name: name.clone() },
        StackError::NoUpdates => StackError::NoUpdates,
        StackError::Throttled => StackError::Throttled,
        StackError::OperationFailed {
            stack,
            operation,
            reason,
        } => StackError::OperationFailed {
            stack: stack.clone(),
            operation,
            reason: reason.clone(),
        },
        StackError::UploadUnavailable { size } => StackError::UploadUnavailable { size: *size },
        StackError::Rejected { code, message } => StackError::Rejected {
            code: code.clone(),
            message: message.clone(),
        },
    }
}

/// All known AWS error codes for extraction from debug strings (flat list)
const ALL_KNOWN_CODES: &[&str] = &[
    // Not found
    "NoSuchBucket",
    "NoSuchKey",
    "NoSuchVersion",
    // Throttling
    "Throttling",
    "ThrottlingException",
    "RequestLimitExceeded",
    // Fatal rejections worth naming in diagnostics
    "AlreadyExistsException",
    "InsufficientCapabilitiesException",
    "AccessDenied",
    "ValidationError",
];

/// Extract an AWS error code from a debug string representation
fn extract_error_code(debug_str: &str) -> Option<String> {
    for code in ALL_KNOWN_CODES {
        if debug_str.contains(code) {
            return Some((*code).to_string());
        }
    }

    // Try to extract any code from `code: Some("...")` pattern
    if let Some(start) = debug_str.find("code: Some(\"") {
        let rest = &debug_str[start + 12..];
        if let Some(end) = rest.find('"') {
            return Some(rest[..end].to_string());
        }
    }

    None
}
