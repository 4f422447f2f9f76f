//! Inbound collaborators: where exports and database lists come from.

use crate::error::{CoreError, CoreResult};
use crate::fsutil;
use crate::path::{files_dir, objects_dir};
use crate::types::{DatabaseRef, ServerRef, SyncTarget, TeamRef};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::debug;

/// Writes the export of one database into a staging directory.
///
/// On success the export must be at
/// `<staging>/src/Objects/database_<database id>/`.
pub trait Fetcher: Send + Sync {
    /// Fetches `target` into `staging`.
    fn fetch(&self, target: &SyncTarget, staging: &Path) -> CoreResult<()>;
}

impl<F> Fetcher for F
where
    F: Fn(&SyncTarget, &Path) -> CoreResult<()> + Send + Sync,
{
    fn fetch(&self, target: &SyncTarget, staging: &Path) -> CoreResult<()> {
        self(target, staging)
    }
}

/// Copies exports from a local export workspace.
///
/// The workspace uses the same layout as staging:
/// `<root>/src/Objects/database_<id>` and optionally `<root>/src/Files/database_<id>`.
#[derive(Debug, Clone)]
pub struct DirectoryFetcher {
    root: PathBuf,
}

impl DirectoryFetcher {
    /// Creates a fetcher reading from `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl Fetcher for DirectoryFetcher {
    fn fetch(&self, target: &SyncTarget, staging: &Path) -> CoreResult<()> {
        let id = &target.database.id;
        let source = objects_dir(&self.root, id);
        if !source.is_dir() {
            return Err(CoreError::Fetch(format!(
                "no export for database {id} under {}",
                self.root.display()
            )));
        }
        fsutil::copy_dir_all(&source, &objects_dir(staging, id))?;

        let files = files_dir(&self.root, id);
        if files.is_dir() {
            fsutil::copy_dir_all(&files, &files_dir(staging, id))?;
        }
        debug!(source = %source.display(), "copied export");
        Ok(())
    }
}

/// Runs an external export command inside the staging directory.
///
/// `{server_id}`, `{team_id}`, `{database_id}` and `{staging}` in the
/// arguments are replaced before the command runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandFetcher {
    /// Executable.
    pub program: String,
    /// Arguments, with placeholders.
    #[serde(default)]
    pub args: Vec<String>,
}

impl CommandFetcher {
    /// Creates a fetcher for `program`.
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    /// Appends an argument.
    #[must_use]
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Arguments with placeholders filled in.
    pub fn expand_args(&self, target: &SyncTarget, staging: &Path) -> Vec<String> {
        let staging = staging.to_string_lossy();
        self.args
            .iter()
            .map(|arg| {
                arg.replace("{server_id}", &target.server.id)
                    .replace("{team_id}", &target.team.id)
                    .replace("{database_id}", &target.database.id)
                    .replace("{staging}", &staging)
            })
            .collect()
    }
}

impl Fetcher for CommandFetcher {
    fn fetch(&self, target: &SyncTarget, staging: &Path) -> CoreResult<()> {
        fs::create_dir_all(staging)?;
        let args = self.expand_args(target, staging);
        debug!(program = %self.program, ?args, "running export command");

        let output = Command::new(&self.program)
            .args(&args)
            .current_dir(staging)
            .output()
            .map_err(|e| CoreError::Fetch(format!("{}: {e}", self.program)))?;

        if output.status.success() {
            Ok(())
        } else {
            Err(CoreError::Fetch(format!(
                "{} exited with {}: {}",
                self.program,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )))
        }
    }
}

/// Lists the databases of a server.
pub trait Catalog: Send + Sync {
    /// Every (team, database) pair on `server`.
    fn list_databases(&self, server: &ServerRef) -> CoreResult<Vec<(TeamRef, DatabaseRef)>>;
}

/// A database entry in a [`StaticCatalog`] file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogDatabase {
    /// ID.
    pub id: String,
    /// Name.
    pub name: String,
}

/// A team entry in a [`StaticCatalog`] file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogTeam {
    /// ID.
    pub id: String,
    /// Name.
    pub name: String,
    /// Databases.
    #[serde(default)]
    pub databases: Vec<CatalogDatabase>,
}

/// A server entry in a [`StaticCatalog`] file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogServer {
    /// ID.
    pub id: String,
    /// Name.
    pub name: String,
    /// URL.
    #[serde(default)]
    pub url: Option<String>,
    /// Teams.
    #[serde(default)]
    pub teams: Vec<CatalogTeam>,
}

impl CatalogServer {
    /// The server as a reference.
    pub fn server_ref(&self) -> ServerRef {
        ServerRef {
            id: self.id.clone(),
            name: self.name.clone(),
            url: self.url.clone(),
        }
    }
}

/// A catalog loaded from JSON.
///
/// ```json
/// {"servers": [{"id": "s1", "name": "Acme", "url": "https://acme.example",
///   "teams": [{"id": "t1", "name": "Dev",
///     "databases": [{"id": "db1", "name": "Shop"}]}]}]}
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaticCatalog {
    /// Servers.
    #[serde(default)]
    pub servers: Vec<CatalogServer>,
}

impl StaticCatalog {
    /// Parses a catalog from JSON text.
    pub fn from_json(json: &str) -> CoreResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Loads a catalog file.
    pub fn load(path: &Path) -> CoreResult<Self> {
        let data = fs::read(path)?;
        Ok(serde_json::from_slice(&data)?)
    }

    /// Looks a server up by ID or name.
    pub fn server(&self, key: &str) -> Option<ServerRef> {
        self.servers
            .iter()
            .find(|s| s.id == key || s.name == key)
            .map(CatalogServer::server_ref)
    }

    /// Every target in the catalog.
    pub fn targets(&self) -> Vec<SyncTarget> {
        let mut targets = Vec::new();
        for server in &self.servers {
            for team in &server.teams {
                for db in &team.databases {
                    targets.push(SyncTarget::new(
                        server.server_ref(),
                        TeamRef::new(&team.id, &team.name),
                        DatabaseRef::new(&db.id, &db.name),
                    ));
                }
            }
        }
        targets
    }

    /// Finds the target for a database ID, optionally restricted to a server.
    pub fn find_target(&self, server: Option<&str>, database_id: &str) -> Option<SyncTarget> {
        self.targets().into_iter().find(|t| {
            t.database.id == database_id
                && server.map_or(true, |s| t.server.id == s || t.server.name == s)
        })
    }
}

impl Catalog for StaticCatalog {
    fn list_databases(&self, server: &ServerRef) -> CoreResult<Vec<(TeamRef, DatabaseRef)>> {
        let Some(entry) = self.servers.iter().find(|s| s.id == server.id) else {
            return Err(CoreError::Fetch(format!("unknown server {}", server.id)));
        };
        Ok(entry
            .teams
            .iter()
            .flat_map(|team| {
                team.databases.iter().map(move |db| {
                    (
                        TeamRef::new(&team.id, &team.name),
                        DatabaseRef::new(&db.id, &db.name),
                    )
                })
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const CATALOG: &str = r#"{"servers": [
        {"id": "s1", "name": "Acme", "url": "https://acme.example",
         "teams": [{"id": "t1", "name": "Dev", "databases": [
            {"id": "db1", "name": "Shop"}, {"id": "db2", "name": "CRM"}]}]},
        {"id": "s2", "name": "Other"}
    ]}"#;

    fn target() -> SyncTarget {
        SyncTarget::new(
            ServerRef::new("s1", "Acme"),
            TeamRef::new("t1", "Dev"),
            DatabaseRef::new("db1", "Shop"),
        )
    }

    #[test]
    fn static_catalog_lists_databases() {
        let catalog = StaticCatalog::from_json(CATALOG).unwrap();
        let server = catalog.server("Acme").unwrap();
        assert_eq!(server.url.as_deref(), Some("https://acme.example"));

        let dbs = catalog.list_databases(&server).unwrap();
        assert_eq!(dbs.len(), 2);
        assert_eq!(dbs[1].1.name, "CRM");

        assert!(catalog.list_databases(&catalog.server("s2").unwrap()).unwrap().is_empty());
        assert!(catalog.list_databases(&ServerRef::new("nope", "x")).is_err());
    }

    #[test]
    fn find_target_by_database() {
        let catalog = StaticCatalog::from_json(CATALOG).unwrap();
        let t = catalog.find_target(None, "db2").unwrap();
        assert_eq!(t.team.name, "Dev");
        assert!(catalog.find_target(Some("s2"), "db2").is_none());
        assert_eq!(catalog.targets().len(), 2);
    }

    #[test]
    fn directory_fetcher_copies_export() {
        let source = tempdir().unwrap();
        let objects = objects_dir(source.path(), "db1");
        fs::create_dir_all(&objects).unwrap();
        fs::write(objects.join("database.yaml"), "name: Shop").unwrap();

        let staging = tempdir().unwrap();
        DirectoryFetcher::new(source.path())
            .fetch(&target(), staging.path())
            .unwrap();
        assert!(objects_dir(staging.path(), "db1").join("database.yaml").is_file());
    }

    #[test]
    fn directory_fetcher_missing_export() {
        let source = tempdir().unwrap();
        let staging = tempdir().unwrap();
        let err = DirectoryFetcher::new(source.path())
            .fetch(&target(), staging.path())
            .unwrap_err();
        assert_eq!(err.kind(), "FetchError");
    }

    #[test]
    fn command_fetcher_placeholders() {
        let fetcher = CommandFetcher::new("export-tool")
            .arg("--server={server_id}")
            .arg("{team_id}/{database_id}")
            .arg("{staging}");
        assert_eq!(
            fetcher.expand_args(&target(), Path::new("/tmp/stage")),
            ["--server=s1", "t1/db1", "/tmp/stage"]
        );
    }

    #[cfg(unix)]
    #[test]
    fn command_fetcher_reports_failure() {
        let staging = tempdir().unwrap();
        let err = CommandFetcher::new("sh")
            .arg("-c")
            .arg("echo boom >&2; exit 3")
            .fetch(&target(), staging.path())
            .unwrap_err();
        assert_eq!(err.kind(), "FetchError");
        assert!(err.to_string().contains("boom"));
    }

    #[cfg(unix)]
    #[test]
    fn command_fetcher_writes_into_staging() {
        let staging = tempdir().unwrap();
        CommandFetcher::new("sh")
            .arg("-c")
            .arg("mkdir -p src/Objects/database_{database_id}")
            .fetch(&target(), staging.path())
            .unwrap();
        assert!(objects_dir(staging.path(), "db1").is_dir());
    }
}
