//! mirrordb CLI
//!
//! Command-line front end for mirroring exported databases into git.
//!
//! # Commands
//!
//! - `sync` - Fetch, restructure, commit and publish one or more databases
//! - `paths` - Show where a database lives in the mirror
//! - `discover` - List every database found under the mirror root
//! - `last-sync` - Show the metadata of a database's last sync
//! - `generate` - Regenerate `ERD.md` and `SCRIPTS.md`
//! - `history` - Show the commits touching a database
//! - `schedule` - Manage recurring sync jobs and run the scheduler

mod commands;
mod config;

use clap::{Parser, Subcommand};
use config::CliConfig;
use mirrordb_scheduler::{JobId, Schedule};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Mirror exported workspace databases into git repositories.
#[derive(Parser)]
#[command(name = "mirrordb")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// JSON configuration file
    #[arg(global = true, short, long)]
    config: Option<PathBuf>,

    /// Mirror root (overrides the config file)
    #[arg(global = true, short, long)]
    base: Option<PathBuf>,

    /// Catalog file (overrides the config file)
    #[arg(global = true, long)]
    catalog: Option<PathBuf>,

    /// Local export workspace (overrides the config file)
    #[arg(global = true, long)]
    export_dir: Option<PathBuf>,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Sync databases from the catalog
    Sync {
        /// Database IDs to sync
        databases: Vec<String>,

        /// Restrict lookups to this server (ID or name)
        #[arg(short, long)]
        server: Option<String>,

        /// Sync every database in the catalog (or on --server)
        #[arg(short, long)]
        all: bool,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Show where a database lives in the mirror
    Paths {
        /// Database ID
        database: String,

        /// Server (ID or name)
        #[arg(short, long)]
        server: Option<String>,
    },

    /// List databases found under the mirror root
    Discover {
        /// Directory to scan instead of the mirror root
        root: Option<PathBuf>,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Show the metadata of a database's last sync
    LastSync {
        /// Database ID
        database: String,

        /// Server (ID or name)
        #[arg(short, long)]
        server: Option<String>,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Regenerate derived artifacts for a synced database
    Generate {
        /// Database ID
        database: String,

        /// Server (ID or name)
        #[arg(short, long)]
        server: Option<String>,
    },

    /// Show the commits touching a database
    History {
        /// Database ID
        database: String,

        /// Server (ID or name)
        #[arg(short, long)]
        server: Option<String>,

        /// Maximum number of commits
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },

    /// Manage recurring sync jobs
    Schedule {
        #[command(subcommand)]
        action: ScheduleAction,
    },

    /// Show version information
    Version,
}

#[derive(Subcommand)]
enum ScheduleAction {
    /// Register a job
    Add {
        /// Job name
        name: String,

        /// Schedule: `30m`, `2h`, `1d`, `1w` or `daily@HH:MM` (UTC)
        #[arg(short = 'e', long)]
        every: Schedule,

        /// Server whose databases the job syncs
        #[arg(short, long)]
        server: String,

        /// Sync only this database instead of the whole server
        #[arg(short, long)]
        database: Option<String>,
    },

    /// List registered jobs
    List {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Deactivate a job
    Cancel {
        /// Job ID
        id: JobId,
    },

    /// Run the scheduler until interrupted
    Run,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = CliConfig::load(cli.config.as_deref())?.with_overrides(
        cli.base,
        cli.catalog,
        cli.export_dir,
    );

    match cli.command {
        Commands::Sync {
            databases,
            server,
            all,
            format,
        } => {
            commands::sync::run(&config, &databases, server.as_deref(), all, &format)?;
        }
        Commands::Paths { database, server } => {
            commands::paths::run(&config, &database, server.as_deref())?;
        }
        Commands::Discover { root, format } => {
            let root = root.unwrap_or_else(|| config.mirror.base_path.clone());
            commands::discover::run(&root, &format)?;
        }
        Commands::LastSync {
            database,
            server,
            format,
        } => {
            commands::last_sync::run(&config, &database, server.as_deref(), &format)?;
        }
        Commands::Generate { database, server } => {
            commands::generate::run(&config, &database, server.as_deref())?;
        }
        Commands::History {
            database,
            server,
            limit,
        } => {
            commands::history::run(&config, &database, server.as_deref(), limit)?;
        }
        Commands::Schedule { action } => match action {
            ScheduleAction::Add {
                name,
                every,
                server,
                database,
            } => {
                commands::schedule::add(&config, &name, every, &server, database.as_deref())?;
            }
            ScheduleAction::List { format } => commands::schedule::list(&config, &format)?,
            ScheduleAction::Cancel { id } => commands::schedule::cancel(&config, id)?,
            ScheduleAction::Run => commands::schedule::run(&config)?,
        },
        Commands::Version => {
            println!("mirrordb CLI v{}", env!("CARGO_PKG_VERSION"));
            println!("Layout {}", mirrordb_core::STRUCTURE_VERSION);
        }
    }

    Ok(())
}
