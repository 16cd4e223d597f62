//! branchstack - per-branch CloudFormation stack lifecycle engine
//!
//! This crate deploys and tears down one CloudFormation stack per
//! (project, branch/environment) pair: the stack name is derived from the
//! working copy, the template is augmented with standard parameters, tags,
//! and log groups, and the create-or-update decision is reconciled against
//! what the provider already has.
//!
//! ## Modules
//!
//! - [`deploy`]: The create/update state machine ([`DeployEngine`])
//! - [`teardown`]: Guarded destroy ([`TeardownCoordinator`])
//! - [`name`]: Stack name resolution from working-copy metadata
//! - [`project`]: Concurrent discovery of branch/environment/manifest facts
//! - [`defaults`]: Parameter, tag, log-group, and env-var injection
//! - [`payload`]: Inline-vs-uploaded template body selection
//! - [`sweep`]: Versioned-bucket emptying before stack deletion
//! - [`provider`]: The [`StackProvider`]/[`ObjectStore`] collaborator traits
//! - [`aws`]: Production CloudFormation and S3 clients

pub mod aws;
pub mod config;
pub mod defaults;
pub mod deploy;
pub mod name;
pub mod paginate;
pub mod payload;
pub mod project;
pub mod provider;
pub mod sweep;
pub mod tags;
pub mod teardown;
pub mod wait;

#[cfg(test)]
pub(crate) mod testing;

pub use config::{DeployParams, Tag};
pub use deploy::DeployEngine;
pub use project::ProjectMetadata;
pub use provider::{ObjectStore, StackDescription, StackProvider, StackState};
pub use teardown::{DestroyOutcome, TeardownCoordinator};
