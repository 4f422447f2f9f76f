//! Error types for the mirrordb core.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in the sync pipeline and its components.
#[derive(Debug, Error)]
pub enum CoreError {
    /// The fetcher produced no export at the expected staging location.
    #[error("staged export not found at {path}")]
    StagingMissing {
        /// Path where the export was expected.
        path: PathBuf,
    },

    /// The fetch collaborator failed.
    #[error("fetch failed: {0}")]
    Fetch(String),

    /// A display name sanitized to an unusable path segment.
    #[error("name {name:?} does not produce a usable path segment")]
    InvalidName {
        /// The offending display name.
        name: String,
    },

    /// Two distinct entities sanitize to the same path segment.
    #[error("path {path} already belongs to {existing_id}, refusing to reuse it for {incoming_id}")]
    NameCollision {
        /// The contested canonical path.
        path: PathBuf,
        /// ID recorded on disk for the path.
        existing_id: String,
        /// ID of the entity being synced.
        incoming_id: String,
    },

    /// Copying or swapping into the canonical path failed.
    #[error("restructure failed for {path}: {message}")]
    Restructure {
        /// Canonical path being written.
        path: PathBuf,
        /// Description of the failure.
        message: String,
    },

    /// No metadata sidecar exists at the given database root.
    #[error("metadata not found: {path}")]
    MetadataNotFound {
        /// Expected sidecar location.
        path: PathBuf,
    },

    /// The metadata sidecar exists but could not be parsed.
    #[error("metadata corrupt at {path}: {message}")]
    MetadataCorrupt {
        /// Sidecar location.
        path: PathBuf,
        /// Parser message.
        message: String,
    },

    /// A git command failed while committing.
    #[error("commit failed in {path}: {message}")]
    RepositoryCommit {
        /// Server working tree.
        path: PathBuf,
        /// stderr of the failing command.
        message: String,
    },

    /// A git command failed outside of committing.
    #[error("git {command} failed: {message}")]
    Git {
        /// Subcommand that failed.
        command: String,
        /// stderr of the failing command.
        message: String,
    },

    /// Creating the remote repository or pushing to it failed.
    #[error("publish failed: {0}")]
    RemotePublish(String),

    /// A single artifact generator failed.
    #[error("{generator} generation failed: {message}")]
    ArtifactGeneration {
        /// Name of the generator.
        generator: String,
        /// Description of the failure.
        message: String,
    },

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// JSON encoding or decoding error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CoreError {
    /// Creates a restructure error.
    pub fn restructure(path: impl Into<PathBuf>, message: impl ToString) -> Self {
        Self::Restructure {
            path: path.into(),
            message: message.to_string(),
        }
    }

    /// Creates a git error.
    pub fn git(command: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Git {
            command: command.into(),
            message: message.into(),
        }
    }

    /// Creates an artifact generation error.
    pub fn artifact(generator: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ArtifactGeneration {
            generator: generator.into(),
            message: message.into(),
        }
    }

    /// Returns the stable kind name used on the progress channel.
    pub fn kind(&self) -> &'static str {
        match self {
            CoreError::StagingMissing { .. } => "StagingMissing",
            CoreError::Fetch(_) => "FetchError",
            CoreError::InvalidName { .. } => "InvalidName",
            CoreError::NameCollision { .. } => "NameCollision",
            CoreError::Restructure { .. } => "RestructureError",
            CoreError::MetadataNotFound { .. } => "MetadataNotFound",
            CoreError::MetadataCorrupt { .. } => "MetadataCorrupt",
            CoreError::RepositoryCommit { .. } => "RepositoryCommitError",
            CoreError::Git { .. } => "GitError",
            CoreError::RemotePublish(_) => "RemotePublishError",
            CoreError::ArtifactGeneration { .. } => "ArtifactGenerationError",
            CoreError::Io(_) => "IoError",
            CoreError::Json(_) => "JsonError",
        }
    }

    /// Returns true if this error terminates a sync attempt.
    ///
    /// Metadata, publish and artifact errors are handled inside the pipeline.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            CoreError::MetadataNotFound { .. }
                | CoreError::MetadataCorrupt { .. }
                | CoreError::RemotePublish(_)
                | CoreError::ArtifactGeneration { .. }
        )
    }
}
