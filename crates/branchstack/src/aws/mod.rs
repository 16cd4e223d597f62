//! AWS client modules for the engine
//!
//! This module provides wrappers around AWS SDK clients for:
//! - CloudFormation: Stack lifecycle (submit, poll, events, protection)
//! - S3: Bucket emptying and oversized-template staging
//! - context: Shared SDK config for building both from one load

pub mod cloudformation;
pub mod context;
pub mod error;
pub mod s3;

// Core clients
pub use cloudformation::CloudFormationClient;
pub use context::AwsContext;
pub use s3::{S3Client, S3TemplateStore};

// Error handling
pub use error::{classify_anyhow_error, classify_aws_error, StackError};
