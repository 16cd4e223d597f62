//! Standard stack tags
//!
//! Every deployed stack carries tags recording where it came from, so stacks
//! are attributable in the console and discoverable by tooling. Keys are
//! namespaced to stay out of the way of caller tags.

use crate::config::Tag;
use crate::project::ProjectMetadata;

/// Git branch the stack was deployed from
pub const TAG_BRANCH: &str = "branchstack:branch";
/// Environment label active at deploy time
pub const TAG_ENVIRONMENT: &str = "branchstack:environment";
/// Package name from the project manifest
pub const TAG_PACKAGE: &str = "branchstack:package";
/// Project (working copy) name
pub const TAG_PROJECT: &str = "branchstack:project";
/// Package version from the project manifest
pub const TAG_VERSION: &str = "branchstack:version";

/// Standard tags for the given metadata.
///
/// Facts that are absent or empty produce no tag: the provider rejects
/// empty tag values, and a missing fact is not worth a placeholder.
pub fn standard_tags(meta: &ProjectMetadata) -> Vec<Tag> {
    let candidates = [
        (TAG_BRANCH, meta.branch.as_deref()),
        (TAG_ENVIRONMENT, meta.environment.as_deref()),
        (TAG_PACKAGE, meta.package.as_deref()),
        (TAG_PROJECT, meta.project.as_deref()),
        (TAG_VERSION, meta.version.as_deref()),
    ];

    candidates
        .into_iter()
        .filter_map(|(key, value)| match value {
            Some(v) if !v.is_empty() => Some(Tag::new(key, v)),
            _ => None,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn full_meta() -> ProjectMetadata {
        ProjectMetadata {
            project: Some("frontend".to_string()),
            package: Some("@acme/frontend".to_string()),
            version: Some("2.1.0".to_string()),
            branch: Some("feature/log-retention".to_string()),
            environment: Some("staging".to_string()),
        }
    }

    #[test]
    fn test_all_facts_present() {
        let tags = standard_tags(&full_meta());
        assert_eq!(tags.len(), 5);
        assert!(tags.contains(&Tag::new(TAG_BRANCH, "feature/log-retention")));
        assert!(tags.contains(&Tag::new(TAG_VERSION, "2.1.0")));
    }

    #[test]
    fn test_absent_facts_produce_no_tags() {
        let mut meta = full_meta();
        meta.environment = None;
        meta.version = None;
        let tags = standard_tags(&meta);
        assert_eq!(tags.len(), 3);
        assert!(!tags.iter().any(|t| t.key == TAG_ENVIRONMENT));
        assert!(!tags.iter().any(|t| t.key == TAG_VERSION));
    }

    #[test]
    fn test_empty_values_are_filtered() {
        let mut meta = full_meta();
        meta.branch = Some(String::new());
        let tags = standard_tags(&meta);
        assert!(!tags.iter().any(|t| t.key == TAG_BRANCH));
    }

    #[test]
    fn test_no_facts_no_tags() {
        assert!(standard_tags(&ProjectMetadata::default()).is_empty());
    }
}
