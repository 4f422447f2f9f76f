//! The job registry.
//!
//! Jobs live in memory behind a lock and, when the registry has a path, are
//! written to a JSON file after every change. Run flags are cleared on load:
//! a job marked running in the file belonged to a process that is gone.

use crate::error::{SchedulerError, SchedulerResult};
use crate::job::{JobId, JobStatus, SyncJob};
use chrono::{DateTime, Utc};
use mirrordb_core::fsutil;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Outcome of trying to claim a job for dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Claim {
    /// The job is now marked running.
    Claimed,
    /// Another run covering the same scope is in flight.
    Busy(JobId),
    /// The job was deactivated or removed.
    Gone,
}

/// Thread-safe store of [`SyncJob`]s.
#[derive(Debug, Default)]
pub struct JobRegistry {
    jobs: RwLock<BTreeMap<JobId, SyncJob>>,
    path: Option<PathBuf>,
}

impl JobRegistry {
    /// Creates an in-memory registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens a registry persisted at `path`, starting empty if the file is absent.
    pub fn open(path: impl Into<PathBuf>) -> SchedulerResult<Self> {
        let path = path.into();
        let jobs = match fs::read(&path) {
            Ok(data) => {
                let list: Vec<SyncJob> = serde_json::from_slice(&data)
                    .map_err(|e| SchedulerError::registry(&path, e))?;
                list.into_iter()
                    .map(|mut job| {
                        job.currently_running = false;
                        (job.id, job)
                    })
                    .collect()
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(SchedulerError::registry(&path, e)),
        };
        info!(path = %path.display(), jobs = jobs.len(), "opened job registry");
        Ok(Self {
            jobs: RwLock::new(jobs),
            path: Some(path),
        })
    }

    /// The backing file, if any.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Writes all jobs to the backing file. No-op for in-memory registries.
    pub fn save(&self) -> SchedulerResult<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let jobs: Vec<SyncJob> = self.jobs.read().values().cloned().collect();
        let mut data = serde_json::to_vec_pretty(&jobs)?;
        data.push(b'\n');
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fsutil::write_atomic(path, &data).map_err(|e| SchedulerError::registry(path, e))?;
        debug!(path = %path.display(), jobs = jobs.len(), "saved job registry");
        Ok(())
    }

    /// Adds a job.
    pub fn register(&self, job: SyncJob) -> SchedulerResult<JobId> {
        job.schedule.validate()?;
        let id = job.id;
        self.jobs.write().insert(id, job);
        self.save()?;
        Ok(id)
    }

    /// Removes a job. In-flight runs finish normally.
    pub fn remove(&self, id: JobId) -> SchedulerResult<SyncJob> {
        let job = self
            .jobs
            .write()
            .remove(&id)
            .ok_or(SchedulerError::JobNotFound(id))?;
        self.save()?;
        Ok(job)
    }

    /// A copy of one job.
    pub fn get(&self, id: JobId) -> Option<SyncJob> {
        self.jobs.read().get(&id).cloned()
    }

    /// Copies of all jobs, in ID order.
    pub fn list(&self) -> Vec<SyncJob> {
        self.jobs.read().values().cloned().collect()
    }

    /// Number of jobs.
    pub fn len(&self) -> usize {
        self.jobs.read().len()
    }

    /// Returns true if there are no jobs.
    pub fn is_empty(&self) -> bool {
        self.jobs.read().is_empty()
    }

    /// Activates or deactivates a job.
    pub fn set_active(&self, id: JobId, active: bool) -> SchedulerResult<()> {
        {
            let mut jobs = self.jobs.write();
            let job = jobs.get_mut(&id).ok_or(SchedulerError::JobNotFound(id))?;
            job.active = active;
        }
        self.save()
    }

    /// Active jobs whose slot has come, running or not.
    pub fn due_jobs(&self, now: DateTime<Utc>) -> Vec<SyncJob> {
        self.jobs
            .read()
            .values()
            .filter(|job| job.is_due(now))
            .cloned()
            .collect()
    }

    /// Marks a job running unless a run with an overlapping scope is in flight.
    ///
    /// Checking and marking happen under one write lock, so two callers can
    /// never both claim overlapping scopes.
    pub fn try_mark_running(&self, id: JobId) -> Claim {
        let mut jobs = self.jobs.write();
        let Some(job) = jobs.get(&id) else {
            return Claim::Gone;
        };
        if !job.active {
            return Claim::Gone;
        }
        let scope = job.scope.clone();
        if let Some(busy) = jobs
            .values()
            .find(|other| other.currently_running && other.scope.overlaps(&scope))
        {
            return Claim::Busy(busy.id);
        }
        if let Some(job) = jobs.get_mut(&id) {
            job.currently_running = true;
        }
        Claim::Claimed
    }

    /// Records the end of a run and persists the result.
    pub fn mark_finished(
        &self,
        id: JobId,
        status: JobStatus,
        error: Option<String>,
        now: DateTime<Utc>,
    ) -> SchedulerResult<()> {
        {
            let mut jobs = self.jobs.write();
            let job = jobs.get_mut(&id).ok_or(SchedulerError::JobNotFound(id))?;
            job.finish(status, error, now);
        }
        self.save()
    }
}
