//! Sync command implementation.

use crate::config::CliConfig;
use mirrordb_core::{ArtifactStatus, ProgressEvent, PublishOutcome, SyncTarget};
use mirrordb_scheduler::{JobRegistry, Scheduler, TaskHandle, TaskState};
use serde::Serialize;
use std::error::Error;
use std::sync::Arc;

/// Result of one database sync.
#[derive(Debug, Serialize)]
pub struct SyncReport {
    /// Target, as `server/team/database (id)`.
    pub target: String,
    /// Final task state.
    pub state: TaskState,
    /// Canonical database root.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database_dir: Option<String>,
    /// Content commit.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub commit: Option<String>,
    /// Publish result.
    pub publish: String,
    /// Artifact results as `file: status`.
    pub artifacts: Vec<String>,
    /// Failure, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Every progress event.
    pub events: Vec<ProgressEvent>,
}

impl SyncReport {
    fn from_handle(target: &SyncTarget, handle: &TaskHandle, state: TaskState) -> Self {
        let outcome = handle.outcome();
        let mut report = Self {
            target: target.to_string(),
            state,
            database_dir: None,
            commit: None,
            publish: "not attempted".to_string(),
            artifacts: Vec::new(),
            error: None,
            events: handle.events(),
        };
        let Some(outcome) = outcome else {
            report.error = Some("sync worker panicked".to_string());
            return report;
        };
        report.database_dir = outcome.database_dir.map(|p| p.display().to_string());
        report.commit = outcome.commit.map(|c| c.short().to_string());
        report.publish = match outcome.publish {
            PublishOutcome::NotAttempted => "not attempted".to_string(),
            PublishOutcome::Published(url) => format!("published to {url}"),
            PublishOutcome::Failed(e) => format!("failed: {e}"),
        };
        report.artifacts = outcome
            .artifacts
            .iter()
            .map(|a| match &a.status {
                ArtifactStatus::Written => format!("{}: written", a.file_name),
                ArtifactStatus::Unchanged => format!("{}: unchanged", a.file_name),
                ArtifactStatus::Failed(e) => format!("{}: failed ({e})", a.file_name),
            })
            .collect();
        report.error = outcome.failure.map(|f| f.to_string());
        report
    }
}

/// Runs the sync command.
pub fn run(
    config: &CliConfig,
    databases: &[String],
    server: Option<&str>,
    all: bool,
    format: &str,
) -> Result<(), Box<dyn Error>> {
    if !config.has_export_source() {
        return Err(
            "no export source: set export_dir or export_command, or pass --export-dir".into(),
        );
    }
    let targets = select_targets(config, databases, server, all)?;
    if targets.is_empty() {
        return Err("nothing to sync: name database IDs or pass --all".into());
    }

    // manual runs share the worker limit but not the job registry
    let scheduler = Scheduler::new(
        Arc::new(config.pipeline()),
        JobRegistry::new(),
        config.scheduler.clone(),
    );
    let runtime = tokio::runtime::Runtime::new()?;
    let reports = runtime.block_on(async {
        let handles: Vec<_> = targets
            .iter()
            .map(|t| (t, scheduler.run_sync(t.clone())))
            .collect();
        let mut reports = Vec::with_capacity(handles.len());
        for (target, handle) in handles {
            let state = handle.wait().await;
            reports.push(SyncReport::from_handle(target, &handle, state));
        }
        reports
    });

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&reports)?),
        _ => reports.iter().for_each(print_text_output),
    }

    let failed = reports.iter().filter(|r| r.state != TaskState::Done).count();
    if failed == 0 {
        Ok(())
    } else {
        Err(format!("{failed} of {} syncs failed", reports.len()).into())
    }
}

fn select_targets(
    config: &CliConfig,
    databases: &[String],
    server: Option<&str>,
    all: bool,
) -> Result<Vec<SyncTarget>, Box<dyn Error>> {
    if all {
        let catalog = config
            .load_catalog()?
            .ok_or("--all needs a catalog: set catalog or pass --catalog")?;
        return Ok(catalog
            .targets()
            .into_iter()
            .filter(|t| server.map_or(true, |s| t.server.id == s || t.server.name == s))
            .collect());
    }
    databases
        .iter()
        .map(|db| config.target(db, server))
        .collect()
}

fn print_text_output(report: &SyncReport) {
    let mark = if report.state == TaskState::Done {
        "✓"
    } else {
        "✗"
    };
    println!("{mark} {}", report.target);
    for event in &report.events {
        let flag = if event.failed { " (failed)" } else { "" };
        println!("    {:<22}{}{flag}", event.phase.as_str(), event.detail);
    }
    if let Some(dir) = &report.database_dir {
        println!("  Path:    {dir}");
    }
    if let Some(commit) = &report.commit {
        println!("  Commit:  {commit}");
    }
    println!("  Publish: {}", report.publish);
    for artifact in &report.artifacts {
        println!("  {artifact}");
    }
    if let Some(error) = &report.error {
        println!("  Error:   {error}");
    }
    println!();
}
