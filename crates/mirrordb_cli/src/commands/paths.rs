//! Paths command implementation.

use crate::config::CliConfig;
use std::error::Error;

/// Runs the paths command.
pub fn run(config: &CliConfig, database: &str, server: Option<&str>) -> Result<(), Box<dyn Error>> {
    let target = config.target(database, server)?;
    let pipeline = config.pipeline();
    let layout = pipeline.layout(&target)?;
    let repo = pipeline.resolver().repo_name(&target.server)?;

    println!("Target:    {target}");
    println!("Server:    {}", layout.server_dir.display());
    println!("Team:      {}", layout.team_dir.display());
    println!("Database:  {}", layout.database_dir.display());
    println!("Objects:   {}", layout.objects_dir().display());
    println!("Repo:      {repo}");
    if layout.database_dir.is_dir() {
        println!("(synced)");
    } else {
        println!("(not synced yet)");
    }
    Ok(())
}
