//! Scheduled sync jobs.

use crate::schedule::Schedule;
use chrono::{DateTime, Utc};
use mirrordb_core::{ServerRef, SyncTarget};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Job identifier.
pub type JobId = Uuid;

/// What a job syncs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JobScope {
    /// Every database the catalog lists for the server.
    Server {
        /// Server.
        server: ServerRef,
    },
    /// One database.
    Database {
        /// Target.
        target: SyncTarget,
    },
}

impl JobScope {
    /// The server this scope writes to.
    pub fn server(&self) -> &ServerRef {
        match self {
            JobScope::Server { server } => server,
            JobScope::Database { target } => &target.server,
        }
    }

    /// Returns true if runs of both scopes could touch the same database.
    pub fn overlaps(&self, other: &JobScope) -> bool {
        if self.server().id != other.server().id {
            return false;
        }
        match (self, other) {
            (JobScope::Database { target: a }, JobScope::Database { target: b }) => {
                a.database.id == b.database.id
            }
            _ => true,
        }
    }
}

impl fmt::Display for JobScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobScope::Server { server } => write!(f, "server {} ({})", server.name, server.id),
            JobScope::Database { target } => write!(f, "database {target}"),
        }
    }
}

/// Result of a job's last run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Every database synced.
    Success,
    /// Some databases failed.
    Partial,
    /// The run could not proceed at all.
    Error,
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobStatus::Success => write!(f, "success"),
            JobStatus::Partial => write!(f, "partial"),
            JobStatus::Error => write!(f, "error"),
        }
    }
}

/// Tally of one job run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// Databases synced.
    pub succeeded: usize,
    /// Databases that failed.
    pub failed: usize,
}

impl RunSummary {
    /// Status and error text to record for this run.
    pub fn status(&self) -> (JobStatus, Option<String>) {
        if self.failed == 0 {
            (JobStatus::Success, None)
        } else {
            (
                JobStatus::Partial,
                Some(format!("{} success, {} errors", self.succeeded, self.failed)),
            )
        }
    }
}

/// A registered recurring sync.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncJob {
    /// ID.
    pub id: JobId,
    /// Display name.
    pub name: String,
    /// When it runs.
    pub schedule: Schedule,
    /// What it syncs.
    pub scope: JobScope,
    /// Inactive jobs are never dispatched.
    pub active: bool,
    /// Completion time of the last run.
    #[serde(default)]
    pub last_run: Option<DateTime<Utc>>,
    /// Planned time of the next run.
    #[serde(default)]
    pub next_run: Option<DateTime<Utc>>,
    /// Set while a run is in flight.
    #[serde(default)]
    pub currently_running: bool,
    /// Status of the last run.
    #[serde(default)]
    pub last_status: Option<JobStatus>,
    /// Error text of the last run.
    #[serde(default)]
    pub last_error: Option<String>,
    /// Completed runs.
    #[serde(default)]
    pub run_count: u64,
}

impl SyncJob {
    /// Creates an active job planned for its first slot after `now`.
    pub fn new(
        name: impl Into<String>,
        schedule: Schedule,
        scope: JobScope,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            schedule,
            scope,
            active: true,
            last_run: None,
            next_run: Some(schedule.next_after(now)),
            currently_running: false,
            last_status: None,
            last_error: None,
            run_count: 0,
        }
    }

    /// Overrides the next planned run.
    #[must_use]
    pub fn with_next_run(mut self, next_run: DateTime<Utc>) -> Self {
        self.next_run = Some(next_run);
        self
    }

    /// Returns true if the job is active and its slot has come.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.active && Schedule::is_due(self.next_run, now)
    }

    /// Records a completed run and plans the next one.
    pub fn finish(&mut self, status: JobStatus, error: Option<String>, now: DateTime<Utc>) {
        self.currently_running = false;
        self.last_run = Some(now);
        self.last_status = Some(status);
        self.last_error = error.map(|e| e.chars().take(1000).collect());
        self.run_count += 1;
        self.next_run = Some(self.schedule.next_after(now));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schedule::IntervalUnit;
    use chrono::{Duration, TimeZone};
    use mirrordb_core::{DatabaseRef, TeamRef};

    fn target(server: &str, db: &str) -> SyncTarget {
        SyncTarget::new(
            ServerRef::new(server, server),
            TeamRef::new("t", "Team"),
            DatabaseRef::new(db, db),
        )
    }

    #[test]
    fn scope_overlap() {
        let a = JobScope::Database { target: target("s1", "db1") };
        let b = JobScope::Database { target: target("s1", "db2") };
        let server = JobScope::Server { server: ServerRef::new("s1", "s1") };
        let other = JobScope::Server { server: ServerRef::new("s2", "s2") };

        assert!(a.overlaps(&a));
        assert!(!a.overlaps(&b));
        assert!(server.overlaps(&a));
        assert!(b.overlaps(&server));
        assert!(!server.overlaps(&other));
    }

    #[test]
    fn finish_plans_next_run() {
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        let mut job = SyncJob::new(
            "hourly",
            Schedule::every(1, IntervalUnit::Hours),
            JobScope::Server { server: ServerRef::new("s1", "Acme") },
            now,
        );
        assert!(!job.is_due(now));
        assert!(job.is_due(now + Duration::hours(1)));

        job.currently_running = true;
        let later = now + Duration::hours(1);
        job.finish(JobStatus::Partial, Some("1 success, 1 errors".into()), later);
        assert!(!job.currently_running);
        assert_eq!(job.run_count, 1);
        assert_eq!(job.last_run, Some(later));
        assert_eq!(job.next_run, Some(later + Duration::hours(1)));

        job.active = false;
        assert!(!job.is_due(later + Duration::days(1)));
    }

    #[test]
    fn summary_status() {
        assert_eq!(RunSummary { succeeded: 3, failed: 0 }.status().0, JobStatus::Success);
        let (status, error) = RunSummary { succeeded: 1, failed: 2 }.status();
        assert_eq!(status, JobStatus::Partial);
        assert_eq!(error.as_deref(), Some("1 success, 2 errors"));
    }
}
