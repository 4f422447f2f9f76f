//! The synchronization pipeline.
//!
//! One run for one target:
//!
//! ```text
//! init → fetch (unlocked)
//!      → [server lock] staging_check → restructuring → committing
//!                      → publishing (first sync only) → generating_artifacts
//!      → done | failed
//! ```
//!
//! ## Failure rules
//!
//! - Fetch, staging, naming and restructure errors end the run before any
//!   commit; the canonical tree keeps its last good state.
//! - A commit error ends the run as failed, but artifacts are still
//!   generated so the working tree stays current.
//! - Publish and single-artifact failures are reported as phase-local
//!   `failed` events and do not change the terminal outcome.
//! - The staging directory is removed on every path.

use crate::artifacts::{ArtifactReport, ArtifactSet};
use crate::config::{MirrorConfig, PublishPolicy};
use crate::error::{CoreError, CoreResult};
use crate::fetch::Fetcher;
use crate::locks::ServerLocks;
use crate::metadata::{MetadataRecord, MetadataStore};
use crate::path::{objects_dir, PathResolver};
use crate::progress::{Phase, ProgressEvent, ProgressSink};
use crate::remote::RemoteHost;
use crate::repository::{redact_url, CommitId, CommitSummary, RepositoryManager};
use crate::restructure::{CanonicalLayout, Restructurer, StagingGuard};
use crate::types::SyncTarget;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

/// Whether and how a run published.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum PublishOutcome {
    /// Publishing was not due.
    #[default]
    NotAttempted,
    /// Published to the (redacted) URL.
    Published(String),
    /// Publishing failed; the run continued.
    Failed(String),
}

/// A fatal error, flattened for reporting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncFailure {
    /// Error kind, as sent on the progress channel.
    pub kind: &'static str,
    /// Full message.
    pub message: String,
}

impl From<&CoreError> for SyncFailure {
    fn from(e: &CoreError) -> Self {
        Self {
            kind: e.kind(),
            message: e.to_string(),
        }
    }
}

impl fmt::Display for SyncFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

/// What a run did.
#[derive(Debug, Clone)]
pub struct SyncOutcome {
    /// The target.
    pub target: SyncTarget,
    /// Canonical database root, once restructured.
    pub database_dir: Option<PathBuf>,
    /// Content commit, if the tree changed.
    pub commit: Option<CommitId>,
    /// Artifact commit, if artifacts changed.
    pub artifact_commit: Option<CommitId>,
    /// Publish result.
    pub publish: PublishOutcome,
    /// Per-generator results.
    pub artifacts: Vec<ArtifactReport>,
    /// Set if the run failed.
    pub failure: Option<SyncFailure>,
}

impl SyncOutcome {
    fn new(target: &SyncTarget) -> Self {
        Self {
            target: target.clone(),
            database_dir: None,
            commit: None,
            artifact_commit: None,
            publish: PublishOutcome::NotAttempted,
            artifacts: Vec::new(),
            failure: None,
        }
    }

    /// Returns true if the run ended in `done`.
    pub fn is_success(&self) -> bool {
        self.failure.is_none()
    }
}

/// Runs syncs for many targets, serializing work per server.
pub struct SyncPipeline {
    config: MirrorConfig,
    restructurer: Restructurer,
    repository: RepositoryManager,
    store: MetadataStore,
    artifacts: ArtifactSet,
    fetcher: Arc<dyn Fetcher>,
    host: Option<Arc<dyn RemoteHost>>,
    locks: ServerLocks,
}

impl fmt::Debug for SyncPipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncPipeline")
            .field("base", &self.config.base_path)
            .field("artifacts", &self.artifacts)
            .field("has_host", &self.host.is_some())
            .finish()
    }
}

impl SyncPipeline {
    /// Creates a pipeline with the standard artifact set from `config`.
    pub fn new(config: MirrorConfig, fetcher: Arc<dyn Fetcher>) -> Self {
        let artifacts = ArtifactSet::standard(config.generate_diagram, config.generate_docs);
        let resolver = PathResolver::new(&config.base_path, config.sanitize.clone());
        let restructurer = Restructurer::new(resolver, config.collision_policy)
            .with_carry_over(artifacts.file_names());
        Self {
            repository: RepositoryManager::new(config.git.clone()),
            store: MetadataStore::new(),
            restructurer,
            artifacts,
            fetcher,
            host: None,
            locks: ServerLocks::new(),
            config,
        }
    }

    /// Sets the remote host used for first-sync publishing.
    #[must_use]
    pub fn with_host(mut self, host: Arc<dyn RemoteHost>) -> Self {
        self.host = Some(host);
        self
    }

    /// Replaces the artifact generators.
    #[must_use]
    pub fn with_artifacts(mut self, artifacts: ArtifactSet) -> Self {
        self.restructurer = self.restructurer.with_carry_over(artifacts.file_names());
        self.artifacts = artifacts;
        self
    }

    /// The configuration.
    pub fn config(&self) -> &MirrorConfig {
        &self.config
    }

    /// The path resolver.
    pub fn resolver(&self) -> &PathResolver {
        self.restructurer.resolver()
    }

    /// The repository manager.
    pub fn repository(&self) -> &RepositoryManager {
        &self.repository
    }

    /// Resolves where `target` lives (or will live).
    pub fn layout(&self, target: &SyncTarget) -> CoreResult<CanonicalLayout> {
        self.restructurer.resolve(target)
    }

    /// Runs one sync, reporting progress to `sink`.
    ///
    /// Never panics on pipeline errors; the outcome and the terminal
    /// progress event describe what happened.
    #[instrument(skip(self, target, sink), fields(sync = %target))]
    pub fn run_sync(&self, target: &SyncTarget, sink: &dyn ProgressSink) -> SyncOutcome {
        let mut outcome = SyncOutcome::new(target);
        sink.emit(ProgressEvent::new(Phase::Init, target.to_string()));

        let result = self.fetch_and_apply(target, sink, &mut outcome);
        match result {
            Ok(()) => {
                let detail = outcome
                    .database_dir
                    .as_ref()
                    .map(|p| p.display().to_string())
                    .unwrap_or_default();
                info!(commit = ?outcome.commit.as_ref().map(CommitId::short), "sync finished");
                sink.emit(ProgressEvent::new(Phase::Done, detail));
            }
            Err(e) => {
                error!(kind = e.kind(), error = %e, "sync failed");
                outcome.failure = Some(SyncFailure::from(&e));
                sink.emit(ProgressEvent::terminal_failure(e.kind()));
            }
        }
        outcome
    }

    fn fetch_and_apply(
        &self,
        target: &SyncTarget,
        sink: &dyn ProgressSink,
        outcome: &mut SyncOutcome,
    ) -> CoreResult<()> {
        let staging = self
            .config
            .staging_root()
            .join(Uuid::new_v4().to_string());
        let _guard = StagingGuard::new(&staging);
        fs::create_dir_all(&staging)?;

        self.fetcher
            .fetch(target, &staging)
            .map_err(|e| match e {
                CoreError::Fetch(_) => e,
                other => CoreError::Fetch(other.to_string()),
            })?;
        debug!(staging = %staging.display(), "fetched");

        let lock_key = self.resolver().resolve_server_path(&target.server)?;
        self.locks
            .with_lock(&lock_key, || self.apply(target, &staging, sink, outcome))
    }

    fn apply(
        &self,
        target: &SyncTarget,
        staging: &Path,
        sink: &dyn ProgressSink,
        outcome: &mut SyncOutcome,
    ) -> CoreResult<()> {
        sink.emit(ProgressEvent::new(Phase::StagingCheck, staging.display().to_string()));
        let source = objects_dir(staging, &target.database.id);
        if !source.is_dir() {
            return Err(CoreError::StagingMissing { path: source });
        }

        sink.emit(ProgressEvent::new(Phase::Restructuring, &target.database.name));
        let layout = self.restructurer.restructure(staging, target)?;
        outcome.database_dir = Some(layout.database_dir.clone());

        sink.emit(ProgressEvent::new(Phase::Committing, format!("Sync: {}", target.database.name)));
        let mut fatal = None;
        match self.commit_content(&layout, target) {
            Ok((had_history, commit)) => {
                let first_sync = !had_history && commit.is_some();
                outcome.commit = commit;
                if first_sync {
                    outcome.publish = self.publish(&layout, target, sink);
                }
            }
            Err(e) => {
                warn!(error = %e, "commit failed, generating artifacts anyway");
                sink.emit(ProgressEvent::failure(Phase::Committing, e.kind()));
                fatal = Some(e);
            }
        }

        if !self.artifacts.is_empty() {
            let artifact_commit = self.generate(&layout, target, sink, outcome, fatal.is_none());
            match artifact_commit {
                Ok(commit) => outcome.artifact_commit = commit,
                Err(e) if fatal.is_none() => fatal = Some(e),
                Err(e) => warn!(error = %e, "artifact commit failed"),
            }
        }

        match fatal {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn commit_content(
        &self,
        layout: &CanonicalLayout,
        target: &SyncTarget,
    ) -> CoreResult<(bool, Option<CommitId>)> {
        let server_dir = &layout.server_dir;
        self.repository
            .ensure_initialized(server_dir)
            .map_err(|e| CoreError::RepositoryCommit {
                path: server_dir.clone(),
                message: e.to_string(),
            })?;
        let had_history = self.repository.has_commits(server_dir);
        let commit = self
            .repository
            .commit_all(server_dir, &format!("Sync: {}", target.database.name))?;
        Ok((had_history, commit))
    }

    fn publish(
        &self,
        layout: &CanonicalLayout,
        target: &SyncTarget,
        sink: &dyn ProgressSink,
    ) -> PublishOutcome {
        if self.config.publish_policy == PublishPolicy::Never {
            return PublishOutcome::NotAttempted;
        }
        let Some(host) = &self.host else {
            debug!("no remote host configured, skipping publish");
            return PublishOutcome::NotAttempted;
        };

        sink.emit(ProgressEvent::new(Phase::Publishing, &target.server.name));
        let result = self
            .resolver()
            .repo_name(&target.server)
            .and_then(|repo| {
                self.repository
                    .ensure_remote_and_publish(&layout.server_dir, &repo, host.as_ref())
            });
        match result {
            Ok(url) => {
                let url = redact_url(&url);
                sink.emit(ProgressEvent::new(Phase::Publishing, &url));
                PublishOutcome::Published(url)
            }
            Err(e) => {
                warn!(error = %e, "publish failed, continuing with local history");
                sink.emit(ProgressEvent::failure(Phase::Publishing, e.kind()));
                PublishOutcome::Failed(e.to_string())
            }
        }
    }

    fn generate(
        &self,
        layout: &CanonicalLayout,
        target: &SyncTarget,
        sink: &dyn ProgressSink,
        outcome: &mut SyncOutcome,
        commit: bool,
    ) -> CoreResult<Option<CommitId>> {
        sink.emit(ProgressEvent::new(
            Phase::GeneratingArtifacts,
            self.artifacts.file_names().join(", "),
        ));
        let reports = self.artifacts.run(&layout.database_dir);
        for report in reports.iter().filter(|r| r.is_failed()) {
            sink.emit(ProgressEvent::failure(Phase::GeneratingArtifacts, &report.name));
        }
        outcome.artifacts = reports;

        if !commit {
            return Ok(None);
        }
        self.repository.commit_all(
            &layout.server_dir,
            &format!("Update artifacts for {}", target.database.name),
        )
    }

    /// Regenerates artifacts for an already-synced target and commits them.
    pub fn regenerate_artifacts(
        &self,
        target: &SyncTarget,
    ) -> CoreResult<(Vec<ArtifactReport>, Option<CommitId>)> {
        let lock_key = self.resolver().resolve_server_path(&target.server)?;
        self.locks.with_lock(&lock_key, || {
            let layout = self.restructurer.resolve(target)?;
            self.store.read(&layout.database_dir)?;
            let reports = self.artifacts.run(&layout.database_dir);
            let commit = if self.repository.is_initialized(&layout.server_dir) {
                self.repository.commit_all(
                    &layout.server_dir,
                    &format!("Update artifacts for {}", target.database.name),
                )?
            } else {
                None
            };
            Ok((reports, commit))
        })
    }

    /// Metadata of the last successful sync of `target`.
    ///
    /// # Errors
    ///
    /// `MetadataNotFound` if the target was never synced.
    pub fn last_sync(&self, target: &SyncTarget) -> CoreResult<MetadataRecord> {
        let layout = self.restructurer.resolve(target)?;
        self.store.read(&layout.database_dir)
    }

    /// Commits touching `target`'s database root, newest first.
    pub fn history(&self, target: &SyncTarget, limit: usize) -> CoreResult<Vec<CommitSummary>> {
        let layout = self.restructurer.resolve(target)?;
        let relative = layout
            .database_dir
            .strip_prefix(&layout.server_dir)
            .map(Path::to_path_buf)
            .map_err(|e| CoreError::restructure(&layout.database_dir, e))?;
        self.repository
            .history(&layout.server_dir, Some(&relative), limit)
    }
}
