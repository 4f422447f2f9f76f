//! # mirrordb Scheduler
//!
//! Runs syncs in the background, on demand or on a schedule.
//!
//! This crate provides:
//! - [`Schedule`]: interval and daily-at schedules in UTC
//! - [`JobRegistry`]: the set of [`SyncJob`]s, persisted as JSON
//! - [`TaskHandle`]: state and progress of one background run, manual or scheduled
//! - [`Scheduler`]: the check loop and a bounded worker pool
//!
//! ## Key Invariants
//!
//! - At most one run per overlapping job scope at any time
//! - A job error or panic never stops the loop or delays other jobs
//! - Cancelling a job prevents future dispatch only; in-flight runs finish
//! - `currently_running` is cleared and `last_run` set after every run
//!
//! ## Usage
//!
//! ```rust,ignore
//! let scheduler = Scheduler::new(pipeline, JobRegistry::open("jobs.json")?, SchedulerConfig::default())
//!     .with_catalog(catalog);
//! scheduler.register_job("nightly", "daily@02:00".parse()?, JobScope::Server { server })?;
//! let handle = scheduler.start();
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod job;
mod registry;
mod schedule;
mod scheduler;
mod task;

pub use error::{SchedulerError, SchedulerResult};
pub use job::{JobId, JobScope, JobStatus, RunSummary, SyncJob};
pub use registry::{Claim, JobRegistry};
pub use schedule::{IntervalUnit, Schedule};
pub use scheduler::{Scheduler, SchedulerConfig, SchedulerEvent};
pub use task::{TaskHandle, TaskState};
