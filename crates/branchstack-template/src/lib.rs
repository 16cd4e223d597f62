//! branchstack-template - CloudFormation template document model
//!
//! This crate provides the template types shared by the lifecycle engine and
//! its consumers, without any AWS SDK dependencies to keep it lightweight.
//!
//! Templates are plain serde documents: unknown sections and properties are
//! preserved verbatim through a parse/serialize round trip, so passing a
//! hand-written template through the engine never strips content the model
//! does not understand.
//!
//! ## Modules
//!
//! - [`template`]: The template document (parameters, resources, outputs)
//! - [`resource`]: Resource nodes and resource-kind detection
//! - [`reference`]: Intrinsic-reference scanning (`Ref`, `Fn::GetAtt`, `Fn::Sub`)

pub mod reference;
pub mod resource;
pub mod template;

// Re-export commonly used types
pub use resource::{DeletionPolicy, DependsOn, Resource, ResourceKind};
pub use template::{Export, Output, Parameter, Template, TemplateError};
