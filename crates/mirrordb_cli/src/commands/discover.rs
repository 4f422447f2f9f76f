//! Discover command implementation.

use mirrordb_core::{Discovery, MetadataStore};
use serde::Serialize;
use std::error::Error;
use std::path::Path;

/// One discovered database.
#[derive(Debug, Serialize)]
pub struct DiscoveredDatabase {
    /// Upstream database ID, when the layout records one.
    pub database_id: Option<String>,
    /// Database name.
    pub database_name: String,
    /// Where it was found.
    pub path: String,
    /// `metadata` or `legacy`.
    pub source: &'static str,
    /// Time of the last sync, when a sidecar was found.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_sync: Option<String>,
}

impl From<&Discovery> for DiscoveredDatabase {
    fn from(discovery: &Discovery) -> Self {
        let (source, last_sync) = match discovery {
            Discovery::MetadataPresent { record, .. } => {
                ("metadata", Some(record.last_sync.to_rfc3339()))
            }
            Discovery::LegacyInferred(_) => ("legacy", None),
        };
        Self {
            database_id: discovery.database_id().map(str::to_string),
            database_name: discovery.database_name().to_string(),
            path: discovery.path().display().to_string(),
            source,
            last_sync,
        }
    }
}

/// Runs the discover command.
pub fn run(root: &Path, format: &str) -> Result<(), Box<dyn Error>> {
    if !root.is_dir() {
        return Err(format!("No mirror found at {}", root.display()).into());
    }
    let found: Vec<DiscoveredDatabase> = MetadataStore::new()
        .discover_all(root)?
        .iter()
        .map(DiscoveredDatabase::from)
        .collect();

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&found)?),
        _ => {
            println!("{} database(s) under {}", found.len(), root.display());
            for db in &found {
                println!(
                    "  {:<14} {:<24} {:<8} {}",
                    db.database_id.as_deref().unwrap_or("-"),
                    db.database_name,
                    db.source,
                    db.path
                );
            }
        }
    }
    Ok(())
}
