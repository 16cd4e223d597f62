//! Intrinsic-reference scanning
//!
//! Walks arbitrary template JSON and collects the logical names targeted by
//! `Ref`, `Fn::GetAtt`, and `Fn::Sub` expressions. Used by template
//! validation and by the engine to decide whether a function already has a
//! log group wired to it.

use std::collections::BTreeSet;

use serde_json::Value;

/// Names starting with this prefix are CloudFormation pseudo parameters
/// (`AWS::Region`, `AWS::AccountId`, ...) and are always considered declared.
pub const PSEUDO_PARAMETER_PREFIX: &str = "AWS::";

/// Collect every logical name referenced by intrinsics anywhere in `value`.
///
/// `Fn::Sub` handling follows the template grammar: `${Name}` and
/// `${Name.Attribute}` target `Name`, `${!Literal}` is an escape and targets
/// nothing, and in the two-element list form the local substitution map both
/// declares its keys (they shadow template names) and is itself scanned for
/// nested intrinsics.
pub fn collect_references(value: &Value) -> BTreeSet<String> {
    let mut out = BTreeSet::new();
    walk(value, &mut out);
    out
}

/// True if any intrinsic inside `value` targets `name`.
pub fn refers_to(value: &Value, name: &str) -> bool {
    collect_references(value).contains(name)
}

fn walk(value: &Value, out: &mut BTreeSet<String>) {
    match value {
        Value::Object(map) => {
            if map.len() == 1 {
                // Intrinsics are single-key objects; anything else is plain data.
                if let Some((key, inner)) = map.iter().next() {
                    match key.as_str() {
                        "Ref" => {
                            if let Some(target) = inner.as_str() {
                                out.insert(target.to_string());
                                return;
                            }
                        }
                        "Fn::GetAtt" => {
                            if collect_get_att(inner, out) {
                                return;
                            }
                        }
                        "Fn::Sub" => {
                            collect_sub(inner, out);
                            return;
                        }
                        _ => {}
                    }
                }
            }
            for inner in map.values() {
                walk(inner, out);
            }
        }
        Value::Array(items) => {
            for item in items {
                walk(item, out);
            }
        }
        _ => {}
    }
}

/// `Fn::GetAtt` takes `["Logical", "Attribute"]` or `"Logical.Attribute"`.
fn collect_get_att(inner: &Value, out: &mut BTreeSet<String>) -> bool {
    match inner {
        Value::String(joined) => {
            if let Some(target) = joined.split('.').next() {
                out.insert(target.to_string());
            }
            true
        }
        Value::Array(parts) => {
            if let Some(target) = parts.first().and_then(Value::as_str) {
                out.insert(target.to_string());
            }
            true
        }
        _ => false,
    }
}

fn collect_sub(inner: &Value, out: &mut BTreeSet<String>) {
    match inner {
        Value::String(text) => sub_targets(text, &BTreeSet::new(), out),
        Value::Array(parts) => {
            let locals: BTreeSet<String> = parts
                .get(1)
                .and_then(Value::as_object)
                .map(|vars| vars.keys().cloned().collect())
                .unwrap_or_default();
            if let Some(text) = parts.first().and_then(Value::as_str) {
                sub_targets(text, &locals, out);
            }
            // Substitution values may themselves contain intrinsics.
            if let Some(vars) = parts.get(1) {
                walk(vars, out);
            }
        }
        _ => {}
    }
}

/// Extract `${...}` variables from a substitution string.
fn sub_targets(text: &str, locals: &BTreeSet<String>, out: &mut BTreeSet<String>) {
    let mut rest = text;
    while let Some(start) = rest.find("${") {
        let after = &rest[start + 2..];
        let Some(end) = after.find('}') else { break };
        let var = &after[..end];
        if !var.starts_with('!') {
            let target = var.split('.').next().unwrap_or(var).trim();
            if !target.is_empty() && !locals.contains(target) {
                out.insert(target.to_string());
            }
        }
        rest = &after[end + 1..];
    }
}
