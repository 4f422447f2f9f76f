//! The dispatch loop and worker pool.

use crate::error::{SchedulerError, SchedulerResult};
use crate::job::{JobId, JobScope, JobStatus, RunSummary, SyncJob};
use crate::registry::{Claim, JobRegistry};
use crate::schedule::Schedule;
use crate::task::{task, TaskHandle, TaskReporter, TaskState, TaskTable};
use chrono::{DateTime, Utc};
use mirrordb_core::{Catalog, CoreResult, MetadataRecord, SyncPipeline, SyncTarget};
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

const EVENT_CAPACITY: usize = 256;

/// Scheduler tuning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// How often the loop looks for due jobs, in milliseconds.
    pub poll_interval_ms: u64,
    /// Maximum concurrent sync executions.
    pub max_workers: usize,
}

impl SchedulerConfig {
    /// Creates the default configuration: poll every 30 s, 2 workers.
    pub fn new() -> Self {
        Self {
            poll_interval_ms: 30_000,
            max_workers: 2,
        }
    }

    /// Sets the poll interval.
    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval_ms = u64::try_from(interval.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Sets the worker count.
    #[must_use]
    pub fn with_max_workers(mut self, workers: usize) -> Self {
        self.max_workers = workers;
        self
    }

    /// The poll interval, at least one millisecond.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Scheduler activity, broadcast to subscribers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SchedulerEvent {
    /// A job was handed to a worker.
    JobStarted {
        /// Job.
        job_id: JobId,
        /// Job name.
        name: String,
    },
    /// A job run began syncing one database. Its progress is readable
    /// through [`Scheduler::task`].
    SyncStarted {
        /// Job.
        job_id: JobId,
        /// Task tracking this database's run.
        task_id: Uuid,
        /// Display form of the synced target.
        target: String,
    },
    /// A job run ended, whatever the result.
    JobFinished {
        /// Job.
        job_id: JobId,
        /// Job name.
        name: String,
        /// Recorded status.
        status: JobStatus,
        /// Recorded error text.
        error: Option<String>,
    },
    /// A due job was not dispatched because an overlapping run is in flight.
    JobSkipped {
        /// Job.
        job_id: JobId,
        /// Job name.
        name: String,
        /// The run holding the scope.
        running: JobId,
    },
}

/// Runs registered jobs on a bounded pool and accepts manual runs.
///
/// Cloning is cheap; clones share the registry, pool and event channel.
#[derive(Clone)]
pub struct Scheduler {
    pipeline: Arc<SyncPipeline>,
    catalog: Option<Arc<dyn Catalog>>,
    registry: Arc<JobRegistry>,
    config: SchedulerConfig,
    workers: Arc<Semaphore>,
    events: broadcast::Sender<SchedulerEvent>,
    tasks: Arc<TaskTable>,
    shutdown: Arc<watch::Sender<bool>>,
}

impl fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scheduler")
            .field("config", &self.config)
            .field("jobs", &self.registry.len())
            .field("idle_workers", &self.workers.available_permits())
            .field("has_catalog", &self.catalog.is_some())
            .finish()
    }
}

impl Scheduler {
    /// Creates a scheduler over `pipeline` and `registry`.
    pub fn new(pipeline: Arc<SyncPipeline>, registry: JobRegistry, config: SchedulerConfig) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let (shutdown, _) = watch::channel(false);
        Self {
            pipeline,
            catalog: None,
            registry: Arc::new(registry),
            workers: Arc::new(Semaphore::new(config.max_workers.max(1))),
            config,
            events,
            tasks: Arc::new(TaskTable::default()),
            shutdown: Arc::new(shutdown),
        }
    }

    /// Sets the catalog used to expand server-scope jobs.
    #[must_use]
    pub fn with_catalog(mut self, catalog: Arc<dyn Catalog>) -> Self {
        self.catalog = Some(catalog);
        self
    }

    /// The job registry.
    pub fn registry(&self) -> &JobRegistry {
        &self.registry
    }

    /// The pipeline.
    pub fn pipeline(&self) -> &SyncPipeline {
        &self.pipeline
    }

    /// The configuration.
    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Receiver for scheduler events from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<SchedulerEvent> {
        self.events.subscribe()
    }

    /// Handle of an in-flight or recently finished run, manual or scheduled.
    pub fn task(&self, id: Uuid) -> Option<TaskHandle> {
        self.tasks.get(id)
    }

    /// Handles of in-flight and recently finished runs, oldest first.
    pub fn tasks(&self) -> Vec<TaskHandle> {
        self.tasks.all()
    }

    /// Registers a job planned for its first slot from now.
    pub fn register_job(
        &self,
        name: impl Into<String>,
        schedule: Schedule,
        scope: JobScope,
    ) -> SchedulerResult<JobId> {
        let job = SyncJob::new(name, schedule, scope, Utc::now());
        let id = self.registry.register(job)?;
        info!(job_id = %id, %schedule, "registered job");
        Ok(id)
    }

    /// Stops future dispatch of a job. A run already in flight completes.
    pub fn cancel_job(&self, id: JobId) -> SchedulerResult<()> {
        self.registry.set_active(id, false)?;
        info!(job_id = %id, "job deactivated");
        Ok(())
    }

    /// Metadata of the last successful sync of `target`.
    pub fn list_last_sync(&self, target: &SyncTarget) -> CoreResult<MetadataRecord> {
        self.pipeline.last_sync(target)
    }

    /// Starts a sync of `target` on the pool and returns immediately.
    ///
    /// Must be called from within a tokio runtime. Manual runs do not claim
    /// job scopes; the pipeline's per-server lock still serializes writers.
    pub fn run_sync(&self, target: SyncTarget) -> TaskHandle {
        let (reporter, handle) = task();
        self.tasks.insert(handle.clone());
        let reporter = Arc::new(reporter);
        let workers = Arc::clone(&self.workers);
        let pipeline = Arc::clone(&self.pipeline);
        let task_id = handle.id();

        tokio::spawn(async move {
            let Ok(permit) = workers.acquire_owned().await else {
                reporter.abort("Shutdown");
                return;
            };
            reporter.set_state(TaskState::Running);
            let worker = Arc::clone(&reporter);
            let result = tokio::task::spawn_blocking(move || {
                let _permit = permit;
                pipeline.run_sync(&target, &*worker)
            })
            .await;
            match result {
                Ok(outcome) => reporter.finish(outcome),
                Err(e) => {
                    error!(%task_id, error = %e, "sync task panicked");
                    reporter.abort("Panic");
                }
            }
        });
        handle
    }

    /// Dispatches every due job whose scope is free. Never waits for runs.
    ///
    /// Returns the handles of the dispatched runs.
    pub fn tick(&self, now: DateTime<Utc>) -> Vec<JoinHandle<()>> {
        let mut dispatched = Vec::new();
        for job in self.registry.due_jobs(now) {
            if job.currently_running {
                continue;
            }
            match self.registry.try_mark_running(job.id) {
                Claim::Claimed => {
                    let this = self.clone();
                    dispatched.push(tokio::spawn(this.execute(job)));
                }
                Claim::Busy(running) => {
                    debug!(job = %job.name, %running, "scope busy, skipping");
                    let _ = self.events.send(SchedulerEvent::JobSkipped {
                        job_id: job.id,
                        name: job.name,
                        running,
                    });
                }
                Claim::Gone => {}
            }
        }
        dispatched
    }

    #[instrument(skip(self, job), fields(job = %job.name, scope = %job.scope))]
    async fn execute(self, job: SyncJob) {
        let (status, error) = match self.workers.clone().acquire_owned().await {
            Ok(permit) => {
                let _ = self.events.send(SchedulerEvent::JobStarted {
                    job_id: job.id,
                    name: job.name.clone(),
                });
                info!("job started");
                let pipeline = Arc::clone(&self.pipeline);
                let catalog = self.catalog.clone();
                let scope = job.scope.clone();
                let tasks = Arc::clone(&self.tasks);
                let events = self.events.clone();
                let job_id = job.id;
                let result = tokio::task::spawn_blocking(move || {
                    let _permit = permit;
                    run_scope(&pipeline, catalog.as_deref(), &scope, |target| {
                        let (reporter, handle) = task();
                        debug!(sync = %target, task_id = %handle.id(), "database sync started");
                        let _ = events.send(SchedulerEvent::SyncStarted {
                            job_id,
                            task_id: handle.id(),
                            target: target.to_string(),
                        });
                        tasks.insert(handle);
                        reporter
                    })
                })
                .await;
                match result {
                    Ok(Ok(summary)) => summary.status(),
                    Ok(Err(e)) => (JobStatus::Error, Some(e.to_string())),
                    Err(e) if e.is_panic() => {
                        let message = panic_message(e.into_panic().as_ref());
                        (JobStatus::Error, Some(SchedulerError::Panicked(message).to_string()))
                    }
                    Err(e) => (JobStatus::Error, Some(e.to_string())),
                }
            }
            Err(e) => (JobStatus::Error, Some(e.to_string())),
        };

        match &error {
            None => info!(%status, "job finished"),
            Some(e) => warn!(%status, error = %e, "job finished with errors"),
        }
        let registry = Arc::clone(&self.registry);
        let recorded = {
            let error = error.clone();
            tokio::task::spawn_blocking(move || {
                registry.mark_finished(job.id, status, error, Utc::now())
            })
            .await
        };
        match recorded {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(error = %e, "could not record job result"),
            Err(e) => warn!(error = %e, "registry write did not complete"),
        }
        let _ = self.events.send(SchedulerEvent::JobFinished {
            job_id: job.id,
            name: job.name,
            status,
            error,
        });
    }

    /// Starts the check loop. It runs until [`Scheduler::stop`].
    pub fn start(&self) -> JoinHandle<()> {
        self.shutdown.send_replace(false);
        let mut shutdown = self.shutdown.subscribe();
        let this = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(this.config.poll_interval());
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            info!(poll_ms = this.config.poll_interval_ms, "scheduler started");
            loop {
                tokio::select! {
                    _ = shutdown.changed() => {
                        if *shutdown.borrow() {
                            break;
                        }
                    }
                    _ = interval.tick() => {
                        let dispatched = this.tick(Utc::now());
                        if !dispatched.is_empty() {
                            debug!(jobs = dispatched.len(), "dispatched due jobs");
                        }
                    }
                }
            }
            info!("scheduler stopped");
        })
    }

    /// Stops the check loop. In-flight runs complete.
    pub fn stop(&self) {
        self.shutdown.send_replace(true);
    }
}

/// Syncs every database of `scope`, isolating failures and panics per database.
///
/// `start` is called once per database and returns the reporter its run
/// emits progress to.
fn run_scope(
    pipeline: &SyncPipeline,
    catalog: Option<&dyn Catalog>,
    scope: &JobScope,
    start: impl Fn(&SyncTarget) -> TaskReporter,
) -> SchedulerResult<RunSummary> {
    let targets = match scope {
        JobScope::Database { target } => vec![target.clone()],
        JobScope::Server { server } => {
            let catalog = catalog.ok_or_else(|| SchedulerError::NoCatalog(server.id.clone()))?;
            catalog
                .list_databases(server)?
                .into_iter()
                .map(|(team, database)| SyncTarget::new(server.clone(), team, database))
                .collect()
        }
    };

    let mut summary = RunSummary::default();
    for target in &targets {
        let reporter = start(target);
        reporter.set_state(TaskState::Running);
        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            pipeline.run_sync(target, &reporter)
        }));
        match result {
            Ok(outcome) => {
                if outcome.is_success() {
                    summary.succeeded += 1;
                } else {
                    summary.failed += 1;
                }
                reporter.finish(outcome);
            }
            Err(payload) => {
                error!(sync = %target, panic = %panic_message(payload.as_ref()), "sync panicked");
                reporter.abort("Panic");
                summary.failed += 1;
            }
        }
    }
    Ok(summary)
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_defaults() {
        let config = SchedulerConfig::default();
        assert_eq!(config.poll_interval(), Duration::from_secs(30));
        assert_eq!(config.max_workers, 2);

        let fast = config.with_poll_interval(Duration::from_millis(20));
        assert_eq!(fast.poll_interval_ms, 20);

        let parsed: SchedulerConfig = serde_json::from_str(r#"{"max_workers": 4}"#).unwrap();
        assert_eq!(parsed.max_workers, 4);
        assert_eq!(parsed.poll_interval_ms, 30_000);
    }

    #[test]
    fn panic_messages() {
        let boxed: Box<dyn Any + Send> = Box::new("static");
        assert_eq!(panic_message(boxed.as_ref()), "static");
        let boxed: Box<dyn Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(boxed.as_ref()), "owned");
        let boxed: Box<dyn Any + Send> = Box::new(7_u8);
        assert_eq!(panic_message(boxed.as_ref()), "unknown panic");
    }

    #[test]
    fn event_wire_shape() {
        let event = SchedulerEvent::JobSkipped {
            job_id: uuid::Uuid::nil(),
            name: "n".into(),
            running: uuid::Uuid::nil(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "job_skipped");
    }
}
