//! History command implementation.

use crate::config::CliConfig;
use std::error::Error;

/// Runs the history command.
pub fn run(
    config: &CliConfig,
    database: &str,
    server: Option<&str>,
    limit: usize,
) -> Result<(), Box<dyn Error>> {
    let target = config.target(database, server)?;
    let commits = config.pipeline().history(&target, limit)?;
    if commits.is_empty() {
        println!("No commits for {target}");
        return Ok(());
    }
    for commit in commits {
        println!(
            "{}  {}  {:<16} {}",
            commit.id.short(),
            commit.date.format("%Y-%m-%d %H:%M"),
            commit.author,
            commit.message
        );
    }
    Ok(())
}
