//! Configuration file and the objects built from it.

use mirrordb_core::{
    CommandFetcher, CoreError, CoreResult, DirectoryFetcher, Fetcher, Git, GitRemoteHost,
    LocalBareHost, MirrorConfig, StaticCatalog, SyncPipeline, SyncTarget,
};
use mirrordb_scheduler::{JobRegistry, Scheduler, SchedulerConfig};
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Contents of the `--config` JSON file. Every field is optional.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    /// Pipeline settings.
    pub mirror: MirrorConfig,
    /// Scheduler settings.
    pub scheduler: SchedulerConfig,
    /// Catalog file listing servers, teams and databases.
    pub catalog: Option<PathBuf>,
    /// Local export workspace read by the directory fetcher.
    pub export_dir: Option<PathBuf>,
    /// External export command, used when `export_dir` is unset.
    pub export_command: Option<CommandFetcher>,
    /// Directory of bare repositories to publish into instead of `mirror.remote`.
    pub bare_remote_dir: Option<PathBuf>,
    /// Job registry file. Defaults to `<base>/.mirrordb/jobs.json`.
    pub jobs_file: Option<PathBuf>,
}

impl CliConfig {
    /// Loads `path`, or the defaults when no file is given.
    pub fn load(path: Option<&Path>) -> Result<Self, Box<dyn Error>> {
        match path {
            Some(path) => {
                let data = fs::read(path)
                    .map_err(|e| format!("cannot read config {}: {e}", path.display()))?;
                Ok(serde_json::from_slice(&data)?)
            }
            None => Ok(Self::default()),
        }
    }

    /// Applies command-line overrides.
    pub fn with_overrides(
        mut self,
        base: Option<PathBuf>,
        catalog: Option<PathBuf>,
        export_dir: Option<PathBuf>,
    ) -> Self {
        if let Some(base) = base {
            self.mirror.base_path = base;
        }
        if catalog.is_some() {
            self.catalog = catalog;
        }
        if export_dir.is_some() {
            self.export_dir = export_dir;
        }
        self
    }

    /// Registry file path.
    pub fn jobs_file(&self) -> PathBuf {
        self.jobs_file
            .clone()
            .unwrap_or_else(|| self.mirror.base_path.join(".mirrordb").join("jobs.json"))
    }

    /// Loads the catalog, if configured.
    pub fn load_catalog(&self) -> Result<Option<StaticCatalog>, Box<dyn Error>> {
        match &self.catalog {
            Some(path) => Ok(Some(StaticCatalog::load(path)?)),
            None => Ok(None),
        }
    }

    /// Returns true if an export source is configured.
    pub fn has_export_source(&self) -> bool {
        self.export_dir.is_some() || self.export_command.is_some()
    }

    /// The fetcher syncs will use. Without a source every fetch fails.
    pub fn fetcher(&self) -> Arc<dyn Fetcher> {
        if let Some(dir) = &self.export_dir {
            return Arc::new(DirectoryFetcher::new(dir));
        }
        if let Some(command) = &self.export_command {
            return Arc::new(command.clone());
        }
        Arc::new(|_: &SyncTarget, _: &Path| -> CoreResult<()> {
            Err(CoreError::Fetch("no export source configured".into()))
        })
    }

    /// Builds the pipeline, with a remote host if one is configured.
    pub fn pipeline(&self) -> SyncPipeline {
        let git = Git::new(&self.mirror.git.binary);
        let mut pipeline = SyncPipeline::new(self.mirror.clone(), self.fetcher());
        if let Some(dir) = &self.bare_remote_dir {
            let host = LocalBareHost::new(dir)
                .with_branch(&self.mirror.git.branch)
                .with_git(git);
            pipeline = pipeline.with_host(Arc::new(host));
        } else if let Some(remote) = &self.mirror.remote {
            let host = GitRemoteHost::new(remote.clone()).with_git(git);
            pipeline = pipeline.with_host(Arc::new(host));
        }
        pipeline
    }

    /// Builds a scheduler over a persistent registry.
    pub fn scheduler(&self) -> Result<Scheduler, Box<dyn Error>> {
        let registry = JobRegistry::open(self.jobs_file())?;
        let mut scheduler = Scheduler::new(
            Arc::new(self.pipeline()),
            registry,
            self.scheduler.clone(),
        );
        if let Some(catalog) = self.load_catalog()? {
            scheduler = scheduler.with_catalog(Arc::new(catalog));
        }
        Ok(scheduler)
    }

    /// Finds a database in the catalog by ID, optionally on one server.
    pub fn target(
        &self,
        database: &str,
        server: Option<&str>,
    ) -> Result<SyncTarget, Box<dyn Error>> {
        let catalog = self
            .load_catalog()?
            .ok_or("no catalog configured: set catalog or pass --catalog")?;
        catalog
            .find_target(server, database)
            .ok_or_else(|| format!("database {database} is not in the catalog").into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn partial_file_and_overrides() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("mirrordb.json");
        fs::write(
            &path,
            r#"{"mirror": {"base_path": "/srv/mirror"}, "scheduler": {"max_workers": 4}}"#,
        )
        .unwrap();

        let config = CliConfig::load(Some(&path)).unwrap();
        assert_eq!(config.mirror.base_path, PathBuf::from("/srv/mirror"));
        assert_eq!(config.scheduler.max_workers, 4);
        assert_eq!(config.jobs_file(), PathBuf::from("/srv/mirror/.mirrordb/jobs.json"));

        let config = config.with_overrides(Some(dir.path().join("other")), None, None);
        assert_eq!(config.mirror.base_path, dir.path().join("other"));
    }

    #[test]
    fn missing_sources_are_reported() {
        let config = CliConfig::default();
        assert!(!config.has_export_source());
        assert_eq!(config.pipeline().config().base_path, PathBuf::from("mirror"));
        assert!(config.target("db1", None).is_err());
    }

    #[test]
    fn catalog_lookup() {
        let dir = tempdir().unwrap();
        let catalog = dir.path().join("catalog.json");
        fs::write(
            &catalog,
            r#"{"servers": [{"id": "s1", "name": "Acme", "teams": [
                {"id": "t1", "name": "Ops", "databases": [{"id": "db1", "name": "Shop"}]}]}]}"#,
        )
        .unwrap();
        let config = CliConfig::default().with_overrides(None, Some(catalog), None);

        let target = config.target("db1", Some("Acme")).unwrap();
        assert_eq!(target.database.name, "Shop");
        assert!(config.target("db1", Some("Other")).is_err());
    }
}
