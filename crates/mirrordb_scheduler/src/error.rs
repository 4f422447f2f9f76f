//! Error types for the scheduler.

use mirrordb_core::CoreError;
use std::path::PathBuf;
use thiserror::Error;
use uuid::Uuid;

/// Result type for scheduler operations.
pub type SchedulerResult<T> = Result<T, SchedulerError>;

/// Errors raised by the registry and the dispatch loop.
#[derive(Error, Debug)]
pub enum SchedulerError {
    /// No job with this ID.
    #[error("job not found: {0}")]
    JobNotFound(Uuid),

    /// Schedule values out of range or unparsable.
    #[error("invalid schedule: {0}")]
    InvalidSchedule(String),

    /// A server-scope job ran without a catalog to enumerate databases.
    #[error("no catalog configured to list databases of server {0}")]
    NoCatalog(String),

    /// The registry file could not be read or written.
    #[error("job registry {path}: {message}")]
    Registry {
        /// Registry file.
        path: PathBuf,
        /// What went wrong.
        message: String,
    },

    /// A job's worker panicked.
    #[error("job panicked: {0}")]
    Panicked(String),

    /// Error from the sync core.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl SchedulerError {
    /// Creates a registry error.
    pub fn registry(path: impl Into<PathBuf>, message: impl ToString) -> Self {
        Self::Registry {
            path: path.into(),
            message: message.to_string(),
        }
    }

    /// Stable name of the error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            SchedulerError::JobNotFound(_) => "JobNotFound",
            SchedulerError::InvalidSchedule(_) => "InvalidSchedule",
            SchedulerError::NoCatalog(_) => "NoCatalog",
            SchedulerError::Registry { .. } => "RegistryError",
            SchedulerError::Panicked(_) => "Panic",
            SchedulerError::Core(e) => e.kind(),
            SchedulerError::Io(_) => "IoError",
            SchedulerError::Json(_) => "JsonError",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds() {
        assert_eq!(SchedulerError::JobNotFound(Uuid::nil()).kind(), "JobNotFound");
        assert_eq!(
            SchedulerError::from(CoreError::Fetch("down".into())).kind(),
            "FetchError"
        );
        assert_eq!(SchedulerError::Panicked("boom".into()).kind(), "Panic");
    }

    #[test]
    fn registry_message() {
        let err = SchedulerError::registry("/tmp/jobs.json", "truncated");
        assert_eq!(err.to_string(), "job registry /tmp/jobs.json: truncated");
    }
}
