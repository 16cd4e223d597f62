//! Project metadata discovery
//!
//! Stack names and standard tags derive from facts about the working copy:
//! the checked-out branch, the active environment label, and the package
//! manifest. The three lookups are independent and run concurrently.
//! Discovery never fails; a fact that cannot be determined is absent and the
//! consumers degrade (shorter name, fewer tags).

use std::path::Path;

use serde_json::Value;
use tokio::process::Command;
use tracing::debug;

/// Environment variable carrying the active deployment environment label.
pub const ENVIRONMENT_VAR: &str = "DEPLOY_ENV";

/// Environment assumed when no label is set.
pub const DEFAULT_ENVIRONMENT: &str = "dev";

/// Facts about the working copy a deployment runs from.
#[derive(Debug, Clone, Default)]
pub struct ProjectMetadata {
    /// Project name: the working copy's directory name
    pub project: Option<String>,
    /// Package name from the manifest (`package.json`, then `Cargo.toml`)
    pub package: Option<String>,
    /// Package version from the same manifest
    pub version: Option<String>,
    /// Checked-out git branch; absent outside a repository or on detached HEAD
    pub branch: Option<String>,
    /// Active environment label from [`ENVIRONMENT_VAR`]
    pub environment: Option<String>,
}

impl ProjectMetadata {
    /// Discover metadata for the working copy at `root`.
    pub async fn discover(root: &Path) -> Self {
        let (branch, environment, (package, version)) = tokio::join!(
            current_branch(root),
            environment_label(),
            read_manifest(root),
        );

        let meta = Self {
            project: project_name(root),
            package,
            version,
            branch,
            environment,
        };
        debug!(?meta, "Discovered project metadata");
        meta
    }

    /// The environment this deployment targets: the active label, or
    /// [`DEFAULT_ENVIRONMENT`] when none is set.
    pub fn resolved_environment(&self) -> &str {
        self.environment.as_deref().unwrap_or(DEFAULT_ENVIRONMENT)
    }

    /// True when an environment label is active. Environment deployments get
    /// termination protection and refuse the destroy path.
    pub fn environment_active(&self) -> bool {
        self.environment.is_some()
    }
}

fn project_name(root: &Path) -> Option<String> {
    root.canonicalize()
        .ok()?
        .file_name()?
        .to_str()
        .map(ToString::to_string)
}

/// Branch checked out at `root`. Detached HEAD reports the literal string
/// "HEAD", which is not a branch.
async fn current_branch(root: &Path) -> Option<String> {
    let output = Command::new("git")
        .args(["rev-parse", "--abbrev-ref", "HEAD"])
        .current_dir(root)
        .output()
        .await
        .ok()?;
    if !output.status.success() {
        return None;
    }
    let branch = String::from_utf8(output.stdout).ok()?.trim().to_string();
    (!branch.is_empty() && branch != "HEAD").then_some(branch)
}

async fn environment_label() -> Option<String> {
    let value = std::env::var(ENVIRONMENT_VAR).ok()?;
    let value = value.trim();
    (!value.is_empty()).then(|| value.to_string())
}

/// Package name and version: `package.json` first, `Cargo.toml` second.
async fn read_manifest(root: &Path) -> (Option<String>, Option<String>) {
    if let Some(found) = read_package_json(&root.join("package.json")).await {
        return found;
    }
    read_cargo_toml(&root.join("Cargo.toml"))
        .await
        .unwrap_or((None, None))
}

async fn read_package_json(path: &Path) -> Option<(Option<String>, Option<String>)> {
    let body = tokio::fs::read_to_string(path).await.ok()?;
    let doc: Value = serde_json::from_str(&body).ok()?;
    let name = doc.get("name").and_then(Value::as_str).map(ToString::to_string);
    let version = doc
        .get("version")
        .and_then(Value::as_str)
        .map(ToString::to_string);
    if name.is_none() && version.is_none() {
        return None;
    }
    Some((name, version))
}

async fn read_cargo_toml(path: &Path) -> Option<(Option<String>, Option<String>)> {
    let body = tokio::fs::read_to_string(path).await.ok()?;
    let doc: toml::Value = toml::from_str(&body).ok()?;
    let package = doc.get("package")?;
    let name = package
        .get("name")
        .and_then(toml::Value::as_str)
        .map(ToString::to_string);
    let version = package
        .get("version")
        .and_then(toml::Value::as_str)
        .map(ToString::to_string);
    Some((name, version))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn package_json_wins_over_cargo_toml() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("package.json"),
            r#"{ "name": "frontend", "version": "2.1.0" }"#,
        )
        .unwrap();
        std::fs::write(
            dir.path().join("Cargo.toml"),
            "[package]\nname = \"other\"\nversion = \"0.1.0\"\n",
        )
        .unwrap();

        let (package, version) = read_manifest(dir.path()).await;
        assert_eq!(package.as_deref(), Some("frontend"));
        assert_eq!(version.as_deref(), Some("2.1.0"));
    }

    #[tokio::test]
    async fn falls_back_to_cargo_toml() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("Cargo.toml"),
            "[package]\nname = \"service\"\nversion = \"0.3.0\"\n",
        )
        .unwrap();

        let (package, version) = read_manifest(dir.path()).await;
        assert_eq!(package.as_deref(), Some("service"));
        assert_eq!(version.as_deref(), Some("0.3.0"));
    }

    #[tokio::test]
    async fn unparseable_manifests_yield_nothing() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("package.json"), "not json").unwrap();

        let (package, version) = read_manifest(dir.path()).await;
        assert_eq!(package, None);
        assert_eq!(version, None);
    }

    #[tokio::test]
    async fn discovery_survives_an_empty_directory() {
        let dir = tempfile::tempdir().unwrap();
        let meta = ProjectMetadata::discover(dir.path()).await;
        // tempdir is outside any repository in CI; project name still resolves
        assert!(meta.project.is_some());
        assert_eq!(meta.package, None);
        assert_eq!(meta.version, None);
    }

    #[test]
    fn resolved_environment_defaults() {
        let mut meta = ProjectMetadata::default();
        assert_eq!(meta.resolved_environment(), DEFAULT_ENVIRONMENT);
        assert!(!meta.environment_active());

        meta.environment = Some("staging".to_string());
        assert_eq!(meta.resolved_environment(), "staging");
        assert!(meta.environment_active());
    }
}
