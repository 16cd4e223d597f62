//! Stack name resolution
//!
//! A deployment is addressed by name alone: the same working copy must
//! resolve to the same stack name on every invocation, because that is how
//! the engine finds the stack it deployed last time. The algorithm here is
//! therefore a compatibility surface; changing it orphans every stack
//! deployed under the old scheme.

use rand::Rng;

use crate::project::ProjectMetadata;

/// The provider's stack name length limit.
pub const MAX_STACK_NAME_LEN: usize = 128;

/// Resolve the stack name for a deployment.
///
/// A pinned name is returned verbatim. Otherwise the name is
/// `<Project>-<qualifier>`: the project name in Pascal word form, qualified
/// by the environment label (verbatim) or else the branch (Pascal word
/// form). Deterministic for the same inputs, with one exception: when no
/// project name resolves at all, a random `Stack-xxxx` base keeps the
/// deployment usable.
pub fn resolve_stack_name(meta: &ProjectMetadata, pinned: Option<&str>) -> String {
    if let Some(name) = pinned {
        return name.to_string();
    }

    let base = meta
        .project
        .as_deref()
        .map(pascal_word_form)
        .filter(|s| !s.is_empty())
        .unwrap_or_else(random_fallback);

    let mut name = match qualifier_for(meta) {
        Some(qualifier) => format!("{base}-{qualifier}"),
        None => base,
    };

    // Truncate after joining; truncating the parts first could eat the
    // separator and merge what should be distinct names.
    truncate_at_char_boundary(&mut name, MAX_STACK_NAME_LEN);
    name
}

/// Truncate to at most `max` bytes without splitting a character. The
/// environment label is joined verbatim and may be multibyte; cutting at a
/// fixed byte offset would panic mid-character.
fn truncate_at_char_boundary(name: &mut String, max: usize) {
    if name.len() <= max {
        return;
    }
    let mut cut = max;
    while !name.is_char_boundary(cut) {
        cut -= 1;
    }
    name.truncate(cut);
}

fn qualifier_for(meta: &ProjectMetadata) -> Option<String> {
    if let Some(env) = meta.environment.as_deref() {
        if !env.is_empty() {
            return Some(env.to_string());
        }
    }
    let branch = meta.branch.as_deref().map(pascal_word_form)?;
    (!branch.is_empty()).then_some(branch)
}

/// Pascal word form: split on anything that is not ASCII alphanumeric and
/// uppercase each word's first letter. `feature/log-retention` becomes
/// `FeatureLogRetention`.
pub fn pascal_word_form(input: &str) -> String {
    input
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|word| !word.is_empty())
        .map(capitalize)
        .collect()
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
        None => String::new(),
    }
}

/// Collisions are acceptable at this cardinality: the fallback only fires
/// when the working copy has no resolvable name at all.
fn random_fallback() -> String {
    let token: u16 = rand::thread_rng().gen();
    format!("Stack-{token:04x}")
}
