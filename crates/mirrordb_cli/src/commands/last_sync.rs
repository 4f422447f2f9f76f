//! Last-sync command implementation.

use crate::config::CliConfig;
use mirrordb_core::CoreError;
use std::error::Error;

/// Runs the last-sync command.
pub fn run(
    config: &CliConfig,
    database: &str,
    server: Option<&str>,
    format: &str,
) -> Result<(), Box<dyn Error>> {
    let target = config.target(database, server)?;
    let record = match config.pipeline().last_sync(&target) {
        Ok(record) => record,
        Err(CoreError::MetadataNotFound { .. }) => {
            return Err(format!("{target} has never been synced").into());
        }
        Err(e) => return Err(e.into()),
    };

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&record)?),
        _ => {
            println!("Database:  {} ({})", record.database_name, record.database_id);
            println!("Team:      {} ({})", record.team_name, record.team_id);
            println!("Server:    {} ({})", record.server_name, record.server_id);
            println!("Last sync: {}", record.last_sync.to_rfc3339());
            println!("Layout:    {}", record.structure_version);
        }
    }
    Ok(())
}
