//! Remote repository hosting.
//!
//! The pipeline only needs three things from a host: whether a repository
//! exists, a way to create one, and a push. Authentication is the host's
//! concern; URLs handed to git and written to `.git/config` never carry
//! credentials.

use crate::config::RemoteConfig;
use crate::error::{CoreError, CoreResult};
use crate::git::Git;
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::info;

/// Remote used for publishing.
pub const ORIGIN: &str = "origin";

/// A place server repositories are published to.
pub trait RemoteHost: Send + Sync {
    /// Credential-free clone URL for `repo`.
    fn remote_url(&self, repo: &str) -> String;

    /// Returns true if `repo` exists on the host.
    fn repo_exists(&self, repo: &str) -> CoreResult<bool>;

    /// Creates `repo`.
    fn create_repo(&self, repo: &str) -> CoreResult<()>;

    /// Pushes `branch` of the working tree at `server_dir` to `origin` and
    /// sets upstream tracking.
    fn push(&self, server_dir: &Path, repo: &str, branch: &str) -> CoreResult<()>;
}

fn push_with_git(git: &Git, server_dir: &Path, branch: &str) -> CoreResult<()> {
    git.run(server_dir, &["push", "-q", "-u", ORIGIN, branch])
        .map(|_| ())
}

/// Bare repositories in a local directory, `<root>/<repo>.git`.
#[derive(Debug, Clone)]
pub struct LocalBareHost {
    root: PathBuf,
    branch: String,
    git: Git,
}

impl LocalBareHost {
    /// Creates a host rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            branch: "main".to_string(),
            git: Git::default(),
        }
    }

    /// Sets the branch new bare repositories point `HEAD` at.
    #[must_use]
    pub fn with_branch(mut self, branch: impl Into<String>) -> Self {
        self.branch = branch.into();
        self
    }

    /// Sets the git runner.
    #[must_use]
    pub fn with_git(mut self, git: Git) -> Self {
        self.git = git;
        self
    }

    /// Directory of a bare repository.
    pub fn repo_path(&self, repo: &str) -> PathBuf {
        self.root.join(format!("{repo}.git"))
    }
}

impl RemoteHost for LocalBareHost {
    fn remote_url(&self, repo: &str) -> String {
        self.repo_path(repo).to_string_lossy().into_owned()
    }

    fn repo_exists(&self, repo: &str) -> CoreResult<bool> {
        Ok(self.repo_path(repo).join("HEAD").is_file())
    }

    fn create_repo(&self, repo: &str) -> CoreResult<()> {
        let path = self.repo_path(repo);
        fs::create_dir_all(&path)?;
        self.git.run(&path, &["init", "-q", "--bare"])?;
        let head = format!("refs/heads/{}", self.branch);
        self.git.run(&path, &["symbolic-ref", "HEAD", &head])?;
        info!(path = %path.display(), "created bare repository");
        Ok(())
    }

    fn push(&self, server_dir: &Path, _repo: &str, branch: &str) -> CoreResult<()> {
        push_with_git(&self.git, server_dir, branch)
    }
}

/// An existing git host reached over its clone URLs.
///
/// Repositories must be created out of band; `create_repo` always fails.
/// Pushes rely on the git credential helper of the running user.
#[derive(Debug, Clone)]
pub struct GitRemoteHost {
    config: RemoteConfig,
    git: Git,
}

impl GitRemoteHost {
    /// Creates a host from its configuration.
    pub fn new(config: RemoteConfig) -> Self {
        Self {
            config,
            git: Git::default(),
        }
    }

    /// Sets the git runner.
    #[must_use]
    pub fn with_git(mut self, git: Git) -> Self {
        self.git = git;
        self
    }
}

impl RemoteHost for GitRemoteHost {
    fn remote_url(&self, repo: &str) -> String {
        self.config.repo_url(repo)
    }

    fn repo_exists(&self, repo: &str) -> CoreResult<bool> {
        let url = self.remote_url(repo);
        Ok(self
            .git
            .succeeds(Path::new("."), &["ls-remote", "--exit-code", "-q", &url]))
    }

    fn create_repo(&self, repo: &str) -> CoreResult<()> {
        Err(CoreError::RemotePublish(format!(
            "repository {repo} does not exist under {} and cannot be created over git",
            self.config.namespace
        )))
    }

    fn push(&self, server_dir: &Path, _repo: &str, branch: &str) -> CoreResult<()> {
        push_with_git(&self.git, server_dir, branch)
    }
}

/// A call observed by [`MockRemoteHost`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteCall {
    /// `repo_exists(repo)`.
    RepoExists(String),
    /// `create_repo(repo)`.
    CreateRepo(String),
    /// `push(repo, branch)`.
    Push {
        /// Repository.
        repo: String,
        /// Branch.
        branch: String,
    },
}

/// In-memory host for testing.
#[derive(Debug, Default)]
pub struct MockRemoteHost {
    repos: Mutex<BTreeSet<String>>,
    calls: Mutex<Vec<RemoteCall>>,
    fail_create: AtomicBool,
    fail_push: AtomicBool,
}

impl MockRemoteHost {
    /// Creates a host with no repositories.
    pub fn new() -> Self {
        Self::default()
    }

    /// Pretends `repo` already exists.
    pub fn add_repo(&self, repo: impl Into<String>) {
        self.repos.lock().insert(repo.into());
    }

    /// Makes `create_repo` fail.
    pub fn set_fail_create(&self, fail: bool) {
        self.fail_create.store(fail, Ordering::SeqCst);
    }

    /// Makes `push` fail.
    pub fn set_fail_push(&self, fail: bool) {
        self.fail_push.store(fail, Ordering::SeqCst);
    }

    /// Every call so far, in order.
    pub fn calls(&self) -> Vec<RemoteCall> {
        self.calls.lock().clone()
    }

    /// Number of pushes so far.
    pub fn push_count(&self) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|c| matches!(c, RemoteCall::Push { .. }))
            .count()
    }
}

impl RemoteHost for MockRemoteHost {
    fn remote_url(&self, repo: &str) -> String {
        format!("https://git.invalid/mock/{repo}.git")
    }

    fn repo_exists(&self, repo: &str) -> CoreResult<bool> {
        self.calls.lock().push(RemoteCall::RepoExists(repo.to_string()));
        Ok(self.repos.lock().contains(repo))
    }

    fn create_repo(&self, repo: &str) -> CoreResult<()> {
        self.calls.lock().push(RemoteCall::CreateRepo(repo.to_string()));
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(CoreError::RemotePublish("mock create failure".into()));
        }
        self.repos.lock().insert(repo.to_string());
        Ok(())
    }

    fn push(&self, _server_dir: &Path, repo: &str, branch: &str) -> CoreResult<()> {
        self.calls.lock().push(RemoteCall::Push {
            repo: repo.to_string(),
            branch: branch.to_string(),
        });
        if self.fail_push.load(Ordering::SeqCst) {
            return Err(CoreError::RemotePublish("mock push failure".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn mock_records_calls() {
        let host = MockRemoteHost::new();
        assert!(!host.repo_exists("acme").unwrap());
        host.create_repo("acme").unwrap();
        assert!(host.repo_exists("acme").unwrap());
        host.push(Path::new("."), "acme", "main").unwrap();

        assert_eq!(
            host.calls(),
            vec![
                RemoteCall::RepoExists("acme".into()),
                RemoteCall::CreateRepo("acme".into()),
                RemoteCall::RepoExists("acme".into()),
                RemoteCall::Push {
                    repo: "acme".into(),
                    branch: "main".into()
                },
            ]
        );
        assert_eq!(host.push_count(), 1);
    }

    #[test]
    fn mock_failure_injection() {
        let host = MockRemoteHost::new();
        host.set_fail_create(true);
        host.set_fail_push(true);
        assert!(host.create_repo("x").is_err());
        assert!(host.push(Path::new("."), "x", "main").is_err());
        assert!(!host.repo_exists("x").unwrap());
    }

    #[test]
    fn local_bare_host_creates_repository() {
        let dir = tempdir().unwrap();
        let host = LocalBareHost::new(dir.path());
        assert!(!host.repo_exists("acme").unwrap());
        host.create_repo("acme").unwrap();
        assert!(host.repo_exists("acme").unwrap());
        assert!(host.remote_url("acme").ends_with("acme.git"));
    }

    #[test]
    fn git_host_cannot_create() {
        let host = GitRemoteHost::new(RemoteConfig::new("https://git.invalid", "backups"));
        assert_eq!(
            host.remote_url("acme"),
            "https://git.invalid/backups/acme.git"
        );
        assert_eq!(host.create_repo("acme").unwrap_err().kind(), "RemotePublishError");
    }
}
