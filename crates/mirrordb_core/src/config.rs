//! Pipeline configuration.
//!
//! All structs implement `Default` and `serde::Deserialize` with per-field
//! defaults, so a partial JSON file is a valid configuration.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Name of the staging directory under the base path.
pub const STAGING_DIR: &str = ".staging";

/// Current layout identifier written into every metadata record.
pub const STRUCTURE_VERSION: &str = "2.0-names";

/// What to do when two distinct entities sanitize to the same segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CollisionPolicy {
    /// Refuse the sync with `NameCollision`.
    #[default]
    Error,
    /// Append a short ID hash to the incoming segment.
    Disambiguate,
}

/// When the pipeline may publish a server repository to its remote.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PublishPolicy {
    /// Publish on the first sync that creates the repository's history.
    #[default]
    FirstSyncOnly,
    /// Never publish.
    Never,
}

/// Display-name sanitization rules.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SanitizeConfig {
    /// Characters replaced in addition to ASCII control characters.
    pub disallowed: String,
    /// Replacement character.
    pub replacement: char,
    /// Maximum segment length in characters.
    pub max_len: usize,
}

impl Default for SanitizeConfig {
    fn default() -> Self {
        Self {
            disallowed: r#"<>:"/\|?*"#.to_string(),
            replacement: '_',
            max_len: 100,
        }
    }
}

impl SanitizeConfig {
    /// Sets the replacement character.
    #[must_use]
    pub fn with_replacement(mut self, replacement: char) -> Self {
        self.replacement = replacement;
        self
    }

    /// Sets the maximum segment length.
    #[must_use]
    pub fn with_max_len(mut self, max_len: usize) -> Self {
        self.max_len = max_len;
        self
    }
}

/// Local git settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GitConfig {
    /// Git executable.
    pub binary: String,
    /// Default branch for new repositories.
    pub branch: String,
    /// Committer name configured per repository.
    pub author_name: String,
    /// Committer email configured per repository.
    pub author_email: String,
}

impl Default for GitConfig {
    fn default() -> Self {
        Self {
            binary: "git".to_string(),
            branch: "main".to_string(),
            author_name: "mirrordb".to_string(),
            author_email: "mirrordb@localhost".to_string(),
        }
    }
}

impl GitConfig {
    /// Sets the git executable.
    #[must_use]
    pub fn with_binary(mut self, binary: impl Into<String>) -> Self {
        self.binary = binary.into();
        self
    }

    /// Sets the default branch.
    #[must_use]
    pub fn with_branch(mut self, branch: impl Into<String>) -> Self {
        self.branch = branch.into();
        self
    }

    /// Sets the committer identity.
    #[must_use]
    pub fn with_author(mut self, name: impl Into<String>, email: impl Into<String>) -> Self {
        self.author_name = name.into();
        self.author_email = email.into();
        self
    }
}

/// Remote hosting settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteConfig {
    /// Base URL of the host, without trailing slash (e.g. `https://git.example.com`).
    pub base_url: String,
    /// Namespace (user or organization) repositories are created under.
    pub namespace: String,
}

impl RemoteConfig {
    /// Creates a remote configuration.
    pub fn new(base_url: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            namespace: namespace.into(),
        }
    }

    /// Returns the credential-free clone URL for a repository name.
    pub fn repo_url(&self, repo: &str) -> String {
        format!(
            "{}/{}/{}.git",
            self.base_url.trim_end_matches('/'),
            self.namespace,
            repo
        )
    }
}

/// Configuration for a [`crate::SyncPipeline`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MirrorConfig {
    /// Root under which every server tree lives.
    pub base_path: PathBuf,
    /// Sanitization rules.
    pub sanitize: SanitizeConfig,
    /// Collision handling.
    pub collision_policy: CollisionPolicy,
    /// Local git settings.
    pub git: GitConfig,
    /// Remote hosting, if publishing is wanted.
    pub remote: Option<RemoteConfig>,
    /// When to publish.
    pub publish_policy: PublishPolicy,
    /// Whether to generate `ERD.md`.
    pub generate_diagram: bool,
    /// Whether to generate `SCRIPTS.md`.
    pub generate_docs: bool,
}

impl Default for MirrorConfig {
    fn default() -> Self {
        Self {
            base_path: PathBuf::from("mirror"),
            sanitize: SanitizeConfig::default(),
            collision_policy: CollisionPolicy::default(),
            git: GitConfig::default(),
            remote: None,
            publish_policy: PublishPolicy::default(),
            generate_diagram: true,
            generate_docs: true,
        }
    }
}

impl MirrorConfig {
    /// Creates a configuration rooted at `base_path`.
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
            ..Self::default()
        }
    }

    /// Sets the sanitization rules.
    #[must_use]
    pub fn with_sanitize(mut self, sanitize: SanitizeConfig) -> Self {
        self.sanitize = sanitize;
        self
    }

    /// Sets the collision policy.
    #[must_use]
    pub fn with_collision_policy(mut self, policy: CollisionPolicy) -> Self {
        self.collision_policy = policy;
        self
    }

    /// Sets the git settings.
    #[must_use]
    pub fn with_git(mut self, git: GitConfig) -> Self {
        self.git = git;
        self
    }

    /// Sets the remote host.
    #[must_use]
    pub fn with_remote(mut self, remote: RemoteConfig) -> Self {
        self.remote = Some(remote);
        self
    }

    /// Sets the publish policy.
    #[must_use]
    pub fn with_publish_policy(mut self, policy: PublishPolicy) -> Self {
        self.publish_policy = policy;
        self
    }

    /// Enables or disables the individual artifact generators.
    #[must_use]
    pub fn with_artifacts(mut self, diagram: bool, docs: bool) -> Self {
        self.generate_diagram = diagram;
        self.generate_docs = docs;
        self
    }

    /// Directory under which fetchers create staging roots.
    pub fn staging_root(&self) -> PathBuf {
        self.base_path.join(STAGING_DIR)
    }

    /// Loads a configuration from a JSON file.
    pub fn load(path: &Path) -> crate::CoreResult<Self> {
        let data = std::fs::read(path)?;
        Ok(serde_json::from_slice(&data)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = MirrorConfig::default();
        assert_eq!(config.collision_policy, CollisionPolicy::Error);
        assert_eq!(config.publish_policy, PublishPolicy::FirstSyncOnly);
        assert_eq!(config.git.branch, "main");
        assert_eq!(config.sanitize.replacement, '_');
        assert_eq!(config.sanitize.max_len, 100);
        assert!(config.remote.is_none());
        assert!(config.generate_diagram && config.generate_docs);
    }

    #[test]
    fn builder_pattern() {
        let config = MirrorConfig::new("/srv/mirror")
            .with_collision_policy(CollisionPolicy::Disambiguate)
            .with_publish_policy(PublishPolicy::Never)
            .with_git(GitConfig::default().with_branch("trunk"))
            .with_artifacts(false, true);

        assert_eq!(config.base_path, PathBuf::from("/srv/mirror"));
        assert_eq!(config.collision_policy, CollisionPolicy::Disambiguate);
        assert_eq!(config.publish_policy, PublishPolicy::Never);
        assert_eq!(config.git.branch, "trunk");
        assert!(!config.generate_diagram);
        assert_eq!(config.staging_root(), PathBuf::from("/srv/mirror/.staging"));
    }

    #[test]
    fn partial_json_uses_defaults() {
        let config: MirrorConfig = serde_json::from_str(
            r#"{"base_path": "/data", "collision_policy": "disambiguate",
                "remote": {"base_url": "https://git.example.com/", "namespace": "backups"}}"#,
        )
        .unwrap();
        assert_eq!(config.base_path, PathBuf::from("/data"));
        assert_eq!(config.collision_policy, CollisionPolicy::Disambiguate);
        assert_eq!(config.git, GitConfig::default());
        let remote = config.remote.unwrap();
        assert_eq!(
            remote.repo_url("acme_example_com"),
            "https://git.example.com/backups/acme_example_com.git"
        );
    }
}
