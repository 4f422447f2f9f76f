//! Test fixtures: workspaces, targets and scripted collaborators.

use crate::export::{shop_export, ExportBuilder};
use mirrordb_core::{
    ArtifactGenerator, CoreError, CoreResult, DatabaseRef, Fetcher, MirrorConfig, ServerRef,
    SyncPipeline, SyncTarget, TeamRef,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tempfile::TempDir;

/// A temporary mirror base directory.
///
/// The directory is removed when the workspace is dropped.
pub struct TestWorkspace {
    _temp_dir: TempDir,
    base: PathBuf,
}

impl TestWorkspace {
    /// Creates an empty workspace.
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let base = temp_dir.path().join("mirror");
        fs::create_dir_all(&base).expect("Failed to create mirror base");
        Self {
            _temp_dir: temp_dir,
            base,
        }
    }

    /// The mirror base path.
    pub fn base(&self) -> &Path {
        &self.base
    }

    /// A scratch directory next to the base, e.g. for bare remotes.
    pub fn scratch(&self, name: &str) -> PathBuf {
        let dir = self._temp_dir.path().join(name);
        fs::create_dir_all(&dir).expect("Failed to create scratch directory");
        dir
    }

    /// Default configuration rooted at the workspace.
    pub fn config(&self) -> MirrorConfig {
        MirrorConfig::new(&self.base)
    }

    /// A pipeline with the default configuration.
    pub fn pipeline(&self, fetcher: Arc<dyn Fetcher>) -> SyncPipeline {
        SyncPipeline::new(self.config(), fetcher)
    }

    /// Number of entries left under the staging root.
    pub fn staging_entries(&self) -> usize {
        match fs::read_dir(self.config().staging_root()) {
            Ok(entries) => entries.count(),
            Err(_) => 0,
        }
    }

    /// Commit subjects of a server repository, newest first.
    pub fn commit_messages(&self, server_dir: &Path) -> Vec<String> {
        let output = std::process::Command::new("git")
            .args(["log", "--format=%s"])
            .current_dir(server_dir)
            .output()
            .expect("Failed to run git log");
        String::from_utf8_lossy(&output.stdout)
            .lines()
            .map(str::to_string)
            .collect()
    }
}

impl Default for TestWorkspace {
    fn default() -> Self {
        Self::new()
    }
}

/// Runs `f` with a fresh workspace.
pub fn with_workspace<F, R>(f: F) -> R
where
    F: FnOnce(&TestWorkspace) -> R,
{
    let workspace = TestWorkspace::new();
    f(&workspace)
}

/// `EFS Server / Dev / Buywatch`, the canonical naming example.
pub fn efs_target() -> SyncTarget {
    SyncTarget::new(
        ServerRef::new("srv-efs", "EFS-Server"),
        TeamRef::new("team-dev", "Dev"),
        DatabaseRef::new("jz79ok8wdsbd", "Buywatch"),
    )
}

/// A database `name` with ID `id` on the `Acme` server.
pub fn acme_target(id: &str, name: &str) -> SyncTarget {
    SyncTarget::new(
        ServerRef::new("srv-acme", "Acme"),
        TeamRef::new("team-ops", "Ops"),
        DatabaseRef::new(id, name),
    )
}

/// Writes a prepared export per database ID and counts calls.
///
/// Databases without a prepared export get [`shop_export`] under their own
/// ID and name.
#[derive(Default)]
pub struct ExportFetcher {
    exports: Mutex<HashMap<String, ExportBuilder>>,
    calls: AtomicUsize,
    delay: Option<Duration>,
}

impl ExportFetcher {
    /// Creates a fetcher with no prepared exports.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleeps for `delay` inside every fetch.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Sets the export returned for `export.id()`.
    pub fn set(&self, export: ExportBuilder) {
        self.exports.lock().insert(export.id().to_string(), export);
    }

    /// Number of fetches so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Fetcher for ExportFetcher {
    fn fetch(&self, target: &SyncTarget, staging: &Path) -> CoreResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            thread::sleep(delay);
        }
        let export = self
            .exports
            .lock()
            .get(&target.database.id)
            .cloned()
            .unwrap_or_else(|| shop_export(&target.database.id, &target.database.name));
        export.write_to(staging);
        Ok(())
    }
}

/// Succeeds without writing anything, so the staged export is missing.
#[derive(Debug, Default, Clone, Copy)]
pub struct EmptyFetcher;

impl Fetcher for EmptyFetcher {
    fn fetch(&self, _target: &SyncTarget, _staging: &Path) -> CoreResult<()> {
        Ok(())
    }
}

/// Always fails with a fetch error.
#[derive(Debug, Default, Clone, Copy)]
pub struct OfflineFetcher;

impl Fetcher for OfflineFetcher {
    fn fetch(&self, target: &SyncTarget, _staging: &Path) -> CoreResult<()> {
        Err(CoreError::Fetch(format!("{} is offline", target.server.name)))
    }
}

/// Panics on every fetch.
#[derive(Debug, Default, Clone, Copy)]
pub struct PanickingFetcher;

impl Fetcher for PanickingFetcher {
    fn fetch(&self, target: &SyncTarget, _staging: &Path) -> CoreResult<()> {
        panic!("fetcher exploded for {target}");
    }
}

/// An artifact generator that always fails.
#[derive(Debug, Clone)]
pub struct FailingGenerator {
    name: &'static str,
    file_name: &'static str,
}

impl FailingGenerator {
    /// Creates a generator named `name` that owns `file_name`.
    pub fn new(name: &'static str, file_name: &'static str) -> Self {
        Self { name, file_name }
    }
}

impl ArtifactGenerator for FailingGenerator {
    fn name(&self) -> &'static str {
        self.name
    }

    fn file_name(&self) -> &'static str {
        self.file_name
    }

    fn generate(&self, db_root: &Path) -> CoreResult<String> {
        Err(CoreError::artifact(
            self.name,
            format!("refusing to render {}", db_root.display()),
        ))
    }
}

/// Reads a file relative to `root`, panicking with the path on failure.
pub fn read_file(root: &Path, relative: &str) -> String {
    let path = root.join(relative);
    fs::read_to_string(&path).unwrap_or_else(|e| panic!("read {}: {e}", path.display()))
}

/// Every file under `dir` with its contents, keyed by relative path.
///
/// Paths containing `skip` segments (e.g. `.git`) are left out.
pub fn snapshot(dir: &Path, skip: &[&str]) -> Vec<(String, Vec<u8>)> {
    fn walk(root: &Path, dir: &Path, skip: &[&str], out: &mut Vec<(String, Vec<u8>)>) {
        let mut entries: Vec<_> = fs::read_dir(dir)
            .expect("read_dir")
            .filter_map(Result::ok)
            .collect();
        entries.sort_by_key(|e| e.file_name());
        for entry in entries {
            let name = entry.file_name().to_string_lossy().into_owned();
            if skip.contains(&name.as_str()) {
                continue;
            }
            let path = entry.path();
            if path.is_dir() {
                walk(root, &path, skip, out);
            } else {
                let relative = path
                    .strip_prefix(root)
                    .expect("under root")
                    .to_string_lossy()
                    .into_owned();
                out.push((relative, fs::read(&path).expect("read file")));
            }
        }
    }
    let mut out = Vec::new();
    walk(dir, dir, skip, &mut out);
    out
}
