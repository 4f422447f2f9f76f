//! Generate command implementation.

use crate::config::CliConfig;
use mirrordb_core::ArtifactStatus;
use std::error::Error;
use tracing::info;

/// Regenerates artifacts for a synced database and commits them.
pub fn run(config: &CliConfig, database: &str, server: Option<&str>) -> Result<(), Box<dyn Error>> {
    let target = config.target(database, server)?;
    info!("Regenerating artifacts for {target}");
    let (reports, commit) = config.pipeline().regenerate_artifacts(&target)?;

    let mut failed = 0;
    for report in &reports {
        match &report.status {
            ArtifactStatus::Written => println!("✓ {} written", report.file_name),
            ArtifactStatus::Unchanged => println!("✓ {} unchanged", report.file_name),
            ArtifactStatus::Failed(e) => {
                failed += 1;
                println!("✗ {} failed: {e}", report.file_name);
            }
        }
    }
    match commit {
        Some(id) => println!("Committed {}", id.short()),
        None => println!("Nothing to commit"),
    }

    if failed == 0 {
        Ok(())
    } else {
        Err(format!("{failed} generator(s) failed").into())
    }
}
