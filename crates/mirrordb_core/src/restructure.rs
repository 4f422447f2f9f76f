//! Moves a staged export into its canonical, name-addressed location.
//!
//! The new database root is assembled in a hidden sibling directory and
//! swapped in with two renames, so readers never observe a mix of old and
//! new content:
//!
//! ```text
//! <team>/
//! ├─ <db>/                         # canonical (old)
//! ├─ .<db>.incoming-<uuid>/        # new content, built first
//! └─ .<db>.previous-<uuid>/        # old content during the swap
//! ```
//!
//! The staging directory is removed on every exit path.

use crate::config::CollisionPolicy;
use crate::error::{CoreError, CoreResult};
use crate::fsutil;
use crate::metadata::{Discovery, MetadataRecord, MetadataStore};
use crate::path::{files_dir, objects_dir, PathResolver};
use crate::types::SyncTarget;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use uuid::Uuid;

const INCOMING_MARKER: &str = "incoming-";
const PREVIOUS_MARKER: &str = "previous-";

/// Removes a staging directory when dropped.
#[derive(Debug)]
pub struct StagingGuard {
    path: PathBuf,
}

impl StagingGuard {
    /// Guards `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// The guarded path.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for StagingGuard {
    fn drop(&mut self) {
        if let Err(e) = fsutil::remove_dir_if_exists(&self.path) {
            warn!(path = %self.path.display(), error = %e, "failed to remove staging directory");
        }
    }
}

/// Where a target lives on disk after collision handling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanonicalLayout {
    /// Server working tree.
    pub server_dir: PathBuf,
    /// Team directory.
    pub team_dir: PathBuf,
    /// Database root (holds the sidecar).
    pub database_dir: PathBuf,
    /// Final path segment of the database root.
    pub database_segment: String,
}

impl CanonicalLayout {
    /// `src/Objects/database_<segment>` under the database root.
    pub fn objects_dir(&self) -> PathBuf {
        objects_dir(&self.database_dir, &self.database_segment)
    }
}

/// Relocates staged exports into the canonical layout.
#[derive(Debug, Clone)]
pub struct Restructurer {
    resolver: PathResolver,
    store: MetadataStore,
    policy: CollisionPolicy,
    carry_over: Vec<String>,
}

impl Restructurer {
    /// Creates a restructurer.
    pub fn new(resolver: PathResolver, policy: CollisionPolicy) -> Self {
        Self {
            resolver,
            store: MetadataStore::new(),
            policy,
            carry_over: Vec::new(),
        }
    }

    /// Sets the file names copied from the old database root into the new one.
    #[must_use]
    pub fn with_carry_over(mut self, files: Vec<String>) -> Self {
        self.carry_over = files;
        self
    }

    /// Returns the path resolver.
    pub fn resolver(&self) -> &PathResolver {
        &self.resolver
    }

    /// Resolves the canonical layout for `target`, checking on-disk owners.
    ///
    /// # Errors
    ///
    /// `InvalidName` for unusable names, `NameCollision` when a segment
    /// already belongs to a different ID and the policy is `Error`.
    pub fn resolve(&self, target: &SyncTarget) -> CoreResult<CanonicalLayout> {
        let base = self.resolver.base();

        let server_segment = self.resolver.sanitize(&target.server.name)?;
        let server_segment = self.settle(
            base.join(&server_segment),
            server_segment,
            &target.server.id,
            |r| &r.server_id,
        )?;
        let server_dir = base.join(&server_segment);

        let team_segment = self.resolver.sanitize(&target.team.name)?;
        let team_segment = self.settle(
            server_dir.join(&team_segment),
            team_segment,
            &target.team.id,
            |r| &r.team_id,
        )?;
        let team_dir = server_dir.join(&team_segment);

        let database_segment = self.resolver.sanitize(&target.database.name)?;
        let database_segment = self.settle(
            team_dir.join(&database_segment),
            database_segment,
            &target.database.id,
            |r| &r.database_id,
        )?;
        let database_dir = team_dir.join(&database_segment);

        Ok(CanonicalLayout {
            server_dir,
            team_dir,
            database_dir,
            database_segment,
        })
    }

    /// Moves `staging/src/Objects/database_<id>` into the canonical layout and
    /// writes the metadata sidecar. Removes `staging` whatever the outcome.
    pub fn restructure(&self, staging: &Path, target: &SyncTarget) -> CoreResult<CanonicalLayout> {
        let _guard = StagingGuard::new(staging);

        let source = objects_dir(staging, &target.database.id);
        if !source.is_dir() {
            return Err(CoreError::StagingMissing { path: source });
        }

        let layout = self.resolve(target)?;
        let canonical = &layout.database_dir;
        let segment = &layout.database_segment;

        fs::create_dir_all(&layout.team_dir)
            .map_err(|e| CoreError::restructure(&layout.team_dir, e))?;
        recover_side_dirs(&layout.team_dir, segment)
            .map_err(|e| CoreError::restructure(canonical, e))?;

        let side = layout
            .team_dir
            .join(format!(".{segment}.{INCOMING_MARKER}{}", Uuid::new_v4()));
        if let Err(e) = self.build(&side, staging, &source, target, &layout) {
            let _ = fsutil::remove_dir_if_exists(&side);
            return Err(e);
        }

        swap_into_place(&side, canonical, &layout.team_dir, segment)?;

        info!(sync = %target, path = %canonical.display(), "restructured export");
        Ok(layout)
    }

    fn build(
        &self,
        side: &Path,
        staging: &Path,
        source: &Path,
        target: &SyncTarget,
        layout: &CanonicalLayout,
    ) -> CoreResult<()> {
        let segment = &layout.database_segment;
        let canonical = &layout.database_dir;
        let wrap = |e: std::io::Error| CoreError::restructure(canonical, e);

        fsutil::copy_dir_all(source, &objects_dir(side, segment)).map_err(wrap)?;

        let files_source = files_dir(staging, &target.database.id);
        if files_source.is_dir() {
            fsutil::copy_dir_all(&files_source, &files_dir(side, segment)).map_err(wrap)?;
        }

        for name in &self.carry_over {
            let previous = canonical.join(name);
            if previous.is_file() {
                fs::copy(&previous, side.join(name)).map_err(wrap)?;
            }
        }

        self.store
            .write(side, &MetadataRecord::for_target(target))
            .map_err(|e| CoreError::restructure(canonical, e))?;
        Ok(())
    }

    /// Returns `segment` or its disambiguated form when `dir` already belongs
    /// to a different ID.
    fn settle(
        &self,
        dir: PathBuf,
        segment: String,
        id: &str,
        owner: impl Fn(&MetadataRecord) -> &String,
    ) -> CoreResult<String> {
        let Some(existing) = self.foreign_owner(&dir, id, owner)? else {
            return Ok(segment);
        };
        match self.policy {
            CollisionPolicy::Error => Err(CoreError::NameCollision {
                path: dir,
                existing_id: existing,
                incoming_id: id.to_string(),
            }),
            CollisionPolicy::Disambiguate => {
                let renamed = PathResolver::disambiguate(&segment, id);
                debug!(from = %segment, to = %renamed, "disambiguated colliding segment");
                Ok(renamed)
            }
        }
    }

    fn foreign_owner(
        &self,
        dir: &Path,
        id: &str,
        owner: impl Fn(&MetadataRecord) -> &String,
    ) -> CoreResult<Option<String>> {
        if !dir.is_dir() {
            return Ok(None);
        }
        for found in self.store.discover_all(dir)? {
            if let Discovery::MetadataPresent { record, .. } = found {
                let existing = owner(&record);
                if existing != id {
                    return Ok(Some(existing.clone()));
                }
            }
        }
        Ok(None)
    }
}

fn swap_into_place(side: &Path, canonical: &Path, parent: &Path, segment: &str) -> CoreResult<()> {
    let previous = parent.join(format!(".{segment}.{PREVIOUS_MARKER}{}", Uuid::new_v4()));
    let had_previous = canonical.exists();

    if had_previous {
        if let Err(e) = fs::rename(canonical, &previous) {
            let _ = fsutil::remove_dir_if_exists(side);
            return Err(CoreError::restructure(canonical, e));
        }
    }

    if let Err(e) = fs::rename(side, canonical) {
        if had_previous {
            if let Err(restore) = fs::rename(&previous, canonical) {
                warn!(path = %canonical.display(), error = %restore, "failed to restore previous content");
            }
        }
        let _ = fsutil::remove_dir_if_exists(side);
        return Err(CoreError::restructure(canonical, e));
    }

    if had_previous {
        if let Err(e) = fsutil::remove_dir_if_exists(&previous) {
            warn!(path = %previous.display(), error = %e, "failed to remove previous content");
        }
    }
    fsutil::sync_directory(parent).map_err(|e| CoreError::restructure(canonical, e))
}

/// Cleans up side directories left by an interrupted swap.
///
/// If the canonical directory is missing but a previous copy exists, the
/// previous copy is moved back first.
fn recover_side_dirs(parent: &Path, segment: &str) -> std::io::Result<()> {
    let canonical = parent.join(segment);
    let incoming = format!(".{segment}.{INCOMING_MARKER}");
    let previous = format!(".{segment}.{PREVIOUS_MARKER}");

    let mut leftovers: Vec<PathBuf> = fs::read_dir(parent)?
        .filter_map(|e| e.ok())
        .filter(|e| {
            let name = e.file_name();
            let name = name.to_string_lossy();
            name.starts_with(&incoming) || name.starts_with(&previous)
        })
        .map(|e| e.path())
        .collect();
    leftovers.sort();

    for path in leftovers {
        let is_previous = path
            .file_name()
            .is_some_and(|n| n.to_string_lossy().starts_with(&previous));
        if is_previous && !canonical.exists() {
            warn!(path = %path.display(), "restoring interrupted restructure");
            fs::rename(&path, &canonical)?;
        } else {
            fsutil::remove_dir_if_exists(&path)?;
        }
    }
    Ok(())
}
