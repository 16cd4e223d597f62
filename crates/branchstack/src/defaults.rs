//! Defaults injection
//!
//! Between what the caller declared and what gets submitted, the engine
//! fills in its opinions: `Environment`/`Project` parameters, a log group
//! per function, the `DEPLOY_ENV` variable on every function, and the
//! standard tags. Injection never overwrites a parameter or tag the caller
//! declared; the one engine-owned value is the `DEPLOY_ENV` variable itself,
//! which is overwritten (only that key) so re-deploys converge.

use branchstack_template::resource::{DeletionPolicy, LOG_GROUP_TYPE};
use branchstack_template::{reference, Parameter, Resource, Template};
use serde_json::{json, Value};
use tracing::debug;

use crate::config::DeployParams;
use crate::project::{ProjectMetadata, ENVIRONMENT_VAR};
use crate::tags;

/// Retention for synthesized log groups, in days. Branch stacks are
/// short-lived; nobody wants their logs forever.
pub const DEFAULT_LOG_RETENTION_DAYS: u32 = 30;

/// Name of the injected environment parameter.
pub const ENVIRONMENT_PARAMETER: &str = "Environment";
/// Name of the injected project parameter.
pub const PROJECT_PARAMETER: &str = "Project";

/// Apply all defaults in place.
pub fn apply_defaults(params: &mut DeployParams, template: &mut Template, meta: &ProjectMetadata) {
    inject_parameters(params, template, meta);
    inject_log_groups(template);
    inject_function_environment(template, meta);
    inject_standard_tags(params, meta);
}

/// Declare `Environment` and `Project` in the template (so resources may
/// reference them without boilerplate) and append their values to the
/// submission, in both cases only where the caller has not already.
fn inject_parameters(params: &mut DeployParams, template: &mut Template, meta: &ProjectMetadata) {
    let environment = meta.resolved_environment().to_string();
    declare_parameter(template, ENVIRONMENT_PARAMETER, &environment);
    append_parameter(params, ENVIRONMENT_PARAMETER, &environment);

    if let Some(project) = meta.project.clone() {
        declare_parameter(template, PROJECT_PARAMETER, &project);
        append_parameter(params, PROJECT_PARAMETER, &project);
    }
}

fn declare_parameter(template: &mut Template, name: &str, default: &str) {
    template
        .parameters
        .entry(name.to_string())
        .or_insert_with(|| Parameter::string(default));
}

fn append_parameter(params: &mut DeployParams, key: &str, value: &str) {
    if !params.has_parameter(key) {
        params.parameters.push((key.to_string(), value.to_string()));
    }
}

/// Synthesize `{LogicalId}LogGroup` for every function that lacks one.
///
/// Without a declared group, the Lambda service creates one on first invoke
/// with unlimited retention and leaves it behind when the stack is deleted.
/// Edge-flagged functions are skipped: their logs land in regional groups
/// the template cannot own.
fn inject_log_groups(template: &mut Template) {
    let functions: Vec<String> = template
        .resources
        .iter()
        .filter(|(_, r)| r.is_function() && !r.is_edge_function())
        .map(|(id, _)| id.clone())
        .collect();

    for function_id in functions {
        let group_id = format!("{function_id}LogGroup");
        if template.resources.contains_key(&group_id) {
            // Caller declared something under that name; theirs wins.
            continue;
        }
        if has_log_group_for(template, &function_id) {
            continue;
        }
        debug!(function = %function_id, group = %group_id, "Synthesizing log group");
        template
            .resources
            .insert(group_id, log_group_for(&function_id));
    }
}

fn has_log_group_for(template: &Template, function_id: &str) -> bool {
    template.resources.values().any(|resource| {
        resource.is_log_group()
            && resource
                .properties
                .as_ref()
                .is_some_and(|props| reference::refers_to(props, function_id))
    })
}

fn log_group_for(function_id: &str) -> Resource {
    let mut group = Resource::new(LOG_GROUP_TYPE);
    group.deletion_policy = Some(DeletionPolicy::Delete);
    group.properties = Some(json!({
        "LogGroupName": { "Fn::Sub": format!("/aws/lambda/${{{function_id}}}") },
        "RetentionInDays": DEFAULT_LOG_RETENTION_DAYS,
    }));
    group
}

/// Ensure every ordinary function ships with `DEPLOY_ENV` set to the
/// resolved environment. Other variables are left alone.
fn inject_function_environment(template: &mut Template, meta: &ProjectMetadata) {
    let environment = meta.resolved_environment().to_string();

    for (logical_id, resource) in template.resources.iter_mut() {
        if !resource.is_function() || resource.is_edge_function() {
            continue;
        }
        let properties = resource.properties.get_or_insert_with(|| json!({}));
        let Some(properties) = properties.as_object_mut() else {
            debug!(function = %logical_id, "Properties is not an object, leaving it alone");
            continue;
        };
        let env_block = properties
            .entry("Environment".to_string())
            .or_insert_with(|| json!({}));
        let Some(env_block) = env_block.as_object_mut() else {
            continue;
        };
        let variables = env_block
            .entry("Variables".to_string())
            .or_insert_with(|| json!({}));
        let Some(variables) = variables.as_object_mut() else {
            continue;
        };
        variables.insert(
            ENVIRONMENT_VAR.to_string(),
            Value::String(environment.clone()),
        );
    }
}

fn inject_standard_tags(params: &mut DeployParams, meta: &ProjectMetadata) {
    for tag in tags::standard_tags(meta) {
        if !params.has_tag(&tag.key) {
            params.tags.push(tag);
        }
    }
}
