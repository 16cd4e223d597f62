//! Caller-facing deployment configuration

/// One stack tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tag {
    pub key: String,
    pub value: String,
}

impl Tag {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Caller-supplied knobs for one deployment.
///
/// Everything here is optional; an empty `DeployParams` deploys with a
/// resolved name, injected defaults, and standard tags. The pinned name
/// replaces what used to be process-global state: callers that need a fixed
/// name pass it here, explicitly, per call.
#[derive(Debug, Clone, Default)]
pub struct DeployParams {
    /// Pinned stack name; skips name resolution entirely
    pub stack_name: Option<String>,
    /// Template parameter overrides, submitted in this order
    pub parameters: Vec<(String, String)>,
    /// Caller tags; standard tags are appended after these
    pub tags: Vec<Tag>,
    /// Request termination protection even without an active environment
    pub termination_protection: bool,
}

impl DeployParams {
    /// Params with a pinned stack name.
    pub fn pinned(name: impl Into<String>) -> Self {
        Self {
            stack_name: Some(name.into()),
            ..Self::default()
        }
    }

    pub fn has_parameter(&self, key: &str) -> bool {
        self.parameters.iter().any(|(k, _)| k == key)
    }

    pub fn has_tag(&self, key: &str) -> bool {
        self.tags.iter().any(|t| t.key == key)
    }
}
