//! Schedule commands: manage jobs and run the scheduler.

use crate::config::CliConfig;
use mirrordb_scheduler::{JobId, JobScope, Schedule, SchedulerEvent};
use std::error::Error;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

/// Registers a job for a whole server or one of its databases.
pub fn add(
    config: &CliConfig,
    name: &str,
    schedule: Schedule,
    server: &str,
    database: Option<&str>,
) -> Result<(), Box<dyn Error>> {
    let scope = match database {
        Some(db) => JobScope::Database {
            target: config.target(db, Some(server))?,
        },
        None => {
            let catalog = config
                .load_catalog()?
                .ok_or("server jobs need a catalog: set catalog or pass --catalog")?;
            let server = catalog
                .server(server)
                .ok_or_else(|| format!("server {server} is not in the catalog"))?;
            JobScope::Server { server }
        }
    };

    let scheduler = config.scheduler()?;
    let id = scheduler.register_job(name, schedule, scope)?;
    let job = scheduler.registry().get(id).ok_or("job vanished after registration")?;
    println!("✓ Registered job {id}");
    println!("  {} {}, {}", job.name, job.schedule, job.scope);
    if let Some(next) = job.next_run {
        println!("  Next run: {}", next.to_rfc3339());
    }
    Ok(())
}

/// Lists registered jobs.
pub fn list(config: &CliConfig, format: &str) -> Result<(), Box<dyn Error>> {
    let scheduler = config.scheduler()?;
    let jobs = scheduler.registry().list();

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&jobs)?),
        _ => {
            if jobs.is_empty() {
                println!("No jobs registered");
            }
            for job in &jobs {
                let state = if job.active { "active" } else { "cancelled" };
                println!("{} {} [{state}]", job.id, job.name);
                println!("  {}, {}", job.schedule, job.scope);
                if let Some(next) = job.next_run.filter(|_| job.active) {
                    println!("  Next run: {}", next.to_rfc3339());
                }
                if let (Some(last), Some(status)) = (job.last_run, job.last_status) {
                    println!("  Last run: {} ({status})", last.to_rfc3339());
                }
                if let Some(error) = &job.last_error {
                    println!("  Error:    {error}");
                }
            }
        }
    }
    Ok(())
}

/// Deactivates a job.
pub fn cancel(config: &CliConfig, id: JobId) -> Result<(), Box<dyn Error>> {
    config.scheduler()?.cancel_job(id)?;
    println!("✓ Job {id} cancelled");
    Ok(())
}

/// Runs the check loop until Ctrl-C, then waits for in-flight jobs.
pub fn run(config: &CliConfig) -> Result<(), Box<dyn Error>> {
    if !config.has_export_source() {
        warn!("no export source configured; every job will fail to fetch");
    }
    let scheduler = config.scheduler()?;
    let runtime = tokio::runtime::Runtime::new()?;

    runtime.block_on(async {
        let mut events = scheduler.subscribe();
        let tasks = scheduler.clone();
        let reporter = tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(SchedulerEvent::JobStarted { name, .. }) => info!(job = %name, "started"),
                    Ok(SchedulerEvent::SyncStarted {
                        task_id, target, ..
                    }) => {
                        let Some(handle) = tasks.task(task_id) else {
                            continue;
                        };
                        tokio::spawn(async move {
                            let state = handle.wait().await;
                            let detail = handle.events().last().map(|e| e.detail.clone());
                            info!(sync = %target, %state, detail = ?detail, "database sync ended");
                        });
                    }
                    Ok(SchedulerEvent::JobFinished {
                        name,
                        status,
                        error,
                        ..
                    }) => match error {
                        Some(e) => warn!(job = %name, %status, error = %e, "finished"),
                        None => info!(job = %name, %status, "finished"),
                    },
                    Ok(SchedulerEvent::JobSkipped { name, running, .. }) => {
                        info!(job = %name, %running, "skipped, scope busy");
                    }
                    Err(RecvError::Lagged(n)) => warn!(missed = n, "event reporter lagged"),
                    Err(RecvError::Closed) => break,
                }
            }
        });

        info!(jobs = scheduler.registry().len(), "scheduler running, Ctrl-C to stop");
        let looper = scheduler.start();
        tokio::signal::ctrl_c().await?;
        info!("stopping scheduler");
        scheduler.stop();
        looper.await?;
        while scheduler.registry().list().iter().any(|j| j.currently_running) {
            tokio::time::sleep(Duration::from_millis(200)).await;
        }
        reporter.abort();
        Ok::<_, Box<dyn Error>>(())
    })
}
