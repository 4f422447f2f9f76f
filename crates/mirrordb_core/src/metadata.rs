//! Metadata sidecars and discovery.
//!
//! Every database root written by the restructurer carries a
//! `.mirrordb-metadata.json` sidecar. Its presence is the authoritative
//! signal that the directory was fully synced. Trees written before
//! sidecars existed are still discoverable through their
//! `database_<id>` directory names.

use crate::artifacts::export::read_database_name;
use crate::config::STRUCTURE_VERSION;
use crate::error::{CoreError, CoreResult};
use crate::fsutil;
use crate::path::DATABASE_DIR_PREFIX;
use crate::types::SyncTarget;
use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

/// File name of the per-database sidecar.
pub const METADATA_FILE: &str = ".mirrordb-metadata.json";

/// Identity and sync state of one database root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataRecord {
    /// Upstream server ID.
    pub server_id: String,
    /// Server display name at last sync.
    pub server_name: String,
    /// Upstream team ID.
    pub team_id: String,
    /// Team display name at last sync.
    pub team_name: String,
    /// Upstream database ID.
    pub database_id: String,
    /// Database display name at last sync.
    pub database_name: String,
    /// Time of the last successful restructure.
    pub last_sync: DateTime<Utc>,
    /// Layout identifier.
    pub structure_version: String,
}

impl MetadataRecord {
    /// Creates a record for `target` stamped with the current time.
    pub fn for_target(target: &SyncTarget) -> Self {
        Self {
            server_id: target.server.id.clone(),
            server_name: target.server.name.clone(),
            team_id: target.team.id.clone(),
            team_name: target.team.name.clone(),
            database_id: target.database.id.clone(),
            database_name: target.database.name.clone(),
            last_sync: Utc::now().trunc_subsecs(0),
            structure_version: STRUCTURE_VERSION.to_string(),
        }
    }
}

/// Result of looking at a directory that may hold a synced database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Discovery {
    /// A valid sidecar was found.
    MetadataPresent {
        /// Database root holding the sidecar.
        path: PathBuf,
        /// Parsed sidecar.
        record: MetadataRecord,
    },
    /// No usable sidecar; identity inferred from the directory layout.
    LegacyInferred(LegacyMapping),
}

impl Discovery {
    /// Upstream database ID, if the directory layout records one.
    pub fn database_id(&self) -> Option<&str> {
        match self {
            Discovery::MetadataPresent { record, .. } => Some(&record.database_id),
            Discovery::LegacyInferred(m) => m.database_id.as_deref(),
        }
    }

    /// Database display name.
    pub fn database_name(&self) -> &str {
        match self {
            Discovery::MetadataPresent { record, .. } => &record.database_name,
            Discovery::LegacyInferred(m) => &m.database_name,
        }
    }

    /// Directory the entry was found at.
    pub fn path(&self) -> &Path {
        match self {
            Discovery::MetadataPresent { path, .. } => path,
            Discovery::LegacyInferred(m) => &m.path,
        }
    }
}

/// Identity inferred from a `database_<id>` directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LegacyMapping {
    /// ID taken from a `database_<id>` directory name. Unset for
    /// name-addressed roots, whose object directory carries no real ID.
    pub database_id: Option<String>,
    /// Name from the export's database YAML, or the ID.
    pub database_name: String,
    /// The inferred directory.
    pub path: PathBuf,
}

/// Reads and writes metadata sidecars.
#[derive(Debug, Clone, Copy, Default)]
pub struct MetadataStore;

impl MetadataStore {
    /// Creates a store.
    pub fn new() -> Self {
        Self
    }

    /// Sidecar location for a database root.
    pub fn sidecar_path(db_root: &Path) -> PathBuf {
        db_root.join(METADATA_FILE)
    }

    /// Writes `record` atomically to the sidecar of `db_root`.
    pub fn write(&self, db_root: &Path, record: &MetadataRecord) -> CoreResult<()> {
        let mut data = serde_json::to_vec_pretty(record)?;
        data.push(b'\n');
        fsutil::write_atomic(&Self::sidecar_path(db_root), &data)?;
        Ok(())
    }

    /// Reads the sidecar of `db_root`.
    ///
    /// # Errors
    ///
    /// - `MetadataNotFound` if no sidecar exists
    /// - `MetadataCorrupt` if it cannot be parsed
    pub fn read(&self, db_root: &Path) -> CoreResult<MetadataRecord> {
        let path = Self::sidecar_path(db_root);
        let data = match fs::read(&path) {
            Ok(data) => data,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(CoreError::MetadataNotFound { path });
            }
            Err(e) => return Err(e.into()),
        };
        serde_json::from_slice(&data).map_err(|e| CoreError::MetadataCorrupt {
            path,
            message: e.to_string(),
        })
    }

    /// Updates `last_sync` to now, keeping the rest of the record.
    pub fn touch_last_sync(&self, db_root: &Path) -> CoreResult<MetadataRecord> {
        let mut record = self.read(db_root)?;
        record.last_sync = Utc::now().trunc_subsecs(0);
        self.write(db_root, &record)?;
        Ok(record)
    }

    /// Classifies a single directory.
    ///
    /// `dir` may be a database root (with or without sidecar) or a legacy
    /// `database_<id>` directory. Returns `None` if neither applies.
    pub fn discover(&self, dir: &Path) -> Option<Discovery> {
        match self.read(dir) {
            Ok(record) => {
                return Some(Discovery::MetadataPresent {
                    path: dir.to_path_buf(),
                    record,
                });
            }
            Err(CoreError::MetadataNotFound { .. }) => {}
            Err(e) => {
                warn!(path = %dir.display(), error = %e, "unreadable metadata, falling back to layout");
                return Some(Discovery::LegacyInferred(infer_from_root(dir)));
            }
        }

        if let Some(id) = legacy_id(dir) {
            return Some(Discovery::LegacyInferred(LegacyMapping {
                database_name: read_database_name(dir).unwrap_or_else(|| id.clone()),
                database_id: Some(id),
                path: dir.to_path_buf(),
            }));
        }
        None
    }

    /// Walks `root` and returns every database found, in path order.
    ///
    /// Directories with a sidecar are not descended into. Hidden directories
    /// (`.git`, staging, restructure side directories) are skipped.
    pub fn discover_all(&self, root: &Path) -> CoreResult<Vec<Discovery>> {
        let mut found = Vec::new();
        let mut entries = WalkDir::new(root)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| {
                e.depth() == 0
                    || (e.file_type().is_dir() && !e.file_name().to_string_lossy().starts_with('.'))
            });

        while let Some(entry) = entries.next() {
            let entry = entry.map_err(io::Error::from)?;
            if let Some(discovery) = self.discover(entry.path()) {
                found.push(discovery);
                entries.skip_current_dir();
            }
        }
        debug!(root = %root.display(), count = found.len(), "discovery finished");
        Ok(found)
    }
}

fn legacy_id(dir: &Path) -> Option<String> {
    let name = dir.file_name()?.to_str()?;
    let id = name.strip_prefix(DATABASE_DIR_PREFIX)?;
    if id.is_empty() {
        None
    } else {
        Some(id.to_string())
    }
}

/// Infers identity for a database root whose sidecar is unreadable.
///
/// Canonical roots name their object directory after the sanitized database
/// name, so no ID is recovered from them.
fn infer_from_root(db_root: &Path) -> LegacyMapping {
    let objects = db_root.join("src").join("Objects");
    let object_dir = fs::read_dir(&objects).ok().and_then(|entries| {
        let mut dirs: Vec<PathBuf> = entries
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().map(|t| t.is_dir()).unwrap_or(false))
            .map(|e| e.path())
            .filter(|p| legacy_id(p).is_some())
            .collect();
        dirs.sort();
        dirs.into_iter().next()
    });

    let dir_name = db_root
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    let database_name = object_dir
        .as_deref()
        .and_then(read_database_name)
        .unwrap_or(dir_name);
    LegacyMapping {
        database_id: None,
        database_name,
        path: db_root.to_path_buf(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{DatabaseRef, ServerRef, TeamRef};
    use tempfile::tempdir;

    fn target() -> SyncTarget {
        SyncTarget::new(
            ServerRef::new("s1", "EFS-Server"),
            TeamRef::new("t1", "Dev"),
            DatabaseRef::new("jz79ok8wdsbd", "Buywatch"),
        )
    }

    #[test]
    fn write_read_record() {
        let dir = tempdir().unwrap();
        let store = MetadataStore::new();
        let record = MetadataRecord::for_target(&target());

        store.write(dir.path(), &record).unwrap();
        assert_eq!(store.read(dir.path()).unwrap(), record);
        assert_eq!(record.structure_version, "2.0-names");
    }

    #[test]
    fn sidecar_is_pretty_json() {
        let dir = tempdir().unwrap();
        let store = MetadataStore::new();
        store
            .write(dir.path(), &MetadataRecord::for_target(&target()))
            .unwrap();

        let text = fs::read_to_string(MetadataStore::sidecar_path(dir.path())).unwrap();
        assert!(text.starts_with("{\n  \"server_id\": \"s1\""));
        assert!(text.contains("\"last_sync\": \""));
        assert!(text.ends_with("}\n"));
    }

    #[test]
    fn missing_and_corrupt() {
        let dir = tempdir().unwrap();
        let store = MetadataStore::new();
        assert!(matches!(
            store.read(dir.path()),
            Err(CoreError::MetadataNotFound { .. })
        ));

        fs::write(MetadataStore::sidecar_path(dir.path()), "{not json").unwrap();
        assert!(matches!(
            store.read(dir.path()),
            Err(CoreError::MetadataCorrupt { .. })
        ));
    }

    #[test]
    fn touch_updates_only_timestamp() {
        let dir = tempdir().unwrap();
        let store = MetadataStore::new();
        let mut record = MetadataRecord::for_target(&target());
        record.last_sync = DateTime::parse_from_rfc3339("2020-01-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        store.write(dir.path(), &record).unwrap();

        let touched = store.touch_last_sync(dir.path()).unwrap();
        assert!(touched.last_sync > record.last_sync);
        assert_eq!(touched.database_id, record.database_id);
    }

    #[test]
    fn discover_prefers_metadata() {
        let dir = tempdir().unwrap();
        let store = MetadataStore::new();
        store
            .write(dir.path(), &MetadataRecord::for_target(&target()))
            .unwrap();

        match store.discover(dir.path()).unwrap() {
            Discovery::MetadataPresent { record, .. } => {
                assert_eq!(record.database_name, "Buywatch")
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn discover_legacy_directory() {
        let dir = tempdir().unwrap();
        let legacy = dir.path().join("database_abc123");
        fs::create_dir_all(&legacy).unwrap();
        fs::write(
            legacy.join("database.yaml"),
            "database:\n  settings:\n    name: Inventory\n",
        )
        .unwrap();

        let found = MetadataStore::new().discover(&legacy).unwrap();
        assert_eq!(found.database_id(), Some("abc123"));
        assert_eq!(found.database_name(), "Inventory");
        assert!(matches!(found, Discovery::LegacyInferred(_)));
    }

    #[test]
    fn corrupt_sidecar_falls_back() {
        let dir = tempdir().unwrap();
        let root = dir.path().join("Buywatch");
        let objects = root.join("src/Objects/database_Buywatch");
        fs::create_dir_all(&objects).unwrap();
        fs::write(
            objects.join("database.yaml"),
            "database:\n  settings:\n    name: Buywatch Live\n",
        )
        .unwrap();
        fs::write(MetadataStore::sidecar_path(&root), "garbage").unwrap();

        let found = MetadataStore::new().discover(&root).unwrap();
        assert!(matches!(found, Discovery::LegacyInferred(_)));
        assert_eq!(found.database_id(), None);
        assert_eq!(found.database_name(), "Buywatch Live");
        assert_eq!(found.path(), root.as_path());
    }

    #[test]
    fn discover_all_walks_tree() {
        let dir = tempdir().unwrap();
        let store = MetadataStore::new();

        let synced = dir.path().join("EFS-Server/Dev/Buywatch");
        fs::create_dir_all(synced.join("src/Objects/database_Buywatch")).unwrap();
        store
            .write(&synced, &MetadataRecord::for_target(&target()))
            .unwrap();

        let legacy = dir.path().join("Old/src/Objects/database_zz9");
        fs::create_dir_all(&legacy).unwrap();
        fs::create_dir_all(dir.path().join(".staging/database_tmp")).unwrap();

        let found = store.discover_all(dir.path()).unwrap();
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].database_name(), "Buywatch");
        assert_eq!(found[1].database_id(), Some("zz9"));
        assert_eq!(found[1].database_name(), "zz9");
    }

    #[cfg(unix)]
    #[test]
    fn discover_all_does_not_follow_symlinks() {
        use std::os::unix::fs::symlink;

        let dir = tempdir().unwrap();
        let mirror = dir.path().join("mirror");
        let legacy = mirror.join("Old/src/Objects/database_zz9");
        fs::create_dir_all(&legacy).unwrap();
        symlink("..", mirror.join("Old/loop")).unwrap();

        let elsewhere = dir.path().join("elsewhere/database_ext1");
        fs::create_dir_all(&elsewhere).unwrap();
        symlink(&elsewhere, mirror.join("database_ext1")).unwrap();

        let found = MetadataStore::new().discover_all(&mirror).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].database_id(), Some("zz9"));
    }
}
