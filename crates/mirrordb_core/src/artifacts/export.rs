//! Read-only model of an exported database directory.
//!
//! ```text
//! database_<id>/
//! ├─ database.yaml            # or database_<name>.yaml
//! ├─ table_<X>/table_<X>.yaml
//! ├─ views.yaml
//! └─ reports.yaml
//! ```
//!
//! The YAML is loosely structured, so documents stay as `serde_yaml::Value`
//! and accessors pick out the keys generators need.

use crate::path::DATABASE_DIR_PREFIX;
use serde_yaml::{Mapping, Value};
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

const TABLE_DIR_PREFIX: &str = "table_";

/// Code keys on the database document.
pub const DATABASE_CODE_FIELDS: &[&str] = &["globalCode", "afterOpen", "beforeOpen"];

/// Code keys on a table document.
pub const TABLE_CODE_FIELDS: &[&str] = &[
    "afterCreate",
    "afterUpdate",
    "afterDelete",
    "beforeDelete",
    "canRead",
    "canWrite",
    "canCreate",
    "canDelete",
];

/// Code keys on a field definition.
pub const FIELD_CODE_FIELDS: &[&str] = &[
    "fn",
    "afterUpdate",
    "afterCreate",
    "constraint",
    "dchoiceValues",
    "dchoiceCaption",
    "dchoiceColor",
    "dchoiceIcon",
    "referenceFormat",
    "visibility",
    "onClick",
    "onDoubleClick",
    "canRead",
    "canWrite",
    "validation",
];

/// Code keys on a UI element.
pub const UI_CODE_FIELDS: &[&str] = &["fn", "onClick", "beforeShow", "afterShow", "afterHide"];

/// Errors loading an export.
#[derive(Debug, Error)]
pub enum ExportError {
    /// No `src/Objects/database_*` directory under the database root.
    #[error("no exported database under {0}")]
    MissingObjects(PathBuf),

    /// No database YAML in the export directory.
    #[error("no database YAML in {0}")]
    MissingDatabaseYaml(PathBuf),

    /// A YAML document failed to parse.
    #[error("invalid YAML in {path}: {source}")]
    Yaml {
        /// File that failed.
        path: PathBuf,
        /// Parser error.
        #[source]
        source: serde_yaml::Error,
    },

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Level a code location belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum CodeLevel {
    /// Database-wide code.
    Database,
    /// Table triggers and permissions.
    Table,
    /// Field formulas and handlers.
    Field,
    /// UI element scripts.
    Ui,
}

/// One script found in the export.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeLocation {
    /// Level.
    pub level: CodeLevel,
    /// Table caption, for everything below database level.
    pub table: Option<String>,
    /// Field or UI element caption.
    pub element: Option<String>,
    /// Key the code was stored under (e.g. `afterUpdate`).
    pub code_type: String,
    /// The code, unescaped.
    pub code: String,
}

impl CodeLocation {
    /// Number of lines of code.
    pub fn line_count(&self) -> usize {
        self.code.lines().count()
    }
}

/// A table directory and its parsed document, if it could be read.
#[derive(Debug, Clone)]
pub struct ExportTable {
    /// Directory name (`table_<X>`).
    pub dir_name: String,
    /// Parsed table document, or the reason it could not be read.
    pub document: Result<Mapping, String>,
}

impl ExportTable {
    /// Table ID used by reference fields: the `id` key, else the directory suffix.
    pub fn id(&self) -> String {
        self.document
            .as_ref()
            .ok()
            .and_then(|doc| str_key(doc, "id"))
            .map(str::to_string)
            .unwrap_or_else(|| self.dir_suffix().to_string())
    }

    /// Display caption.
    pub fn caption(&self) -> String {
        self.document
            .as_ref()
            .ok()
            .and_then(|doc| str_key(doc, "caption").or_else(|| str_key(doc, "name")))
            .map(str::to_string)
            .unwrap_or_else(|| self.dir_suffix().to_string())
    }

    /// Field definitions in key order. Empty if the table is unreadable.
    pub fn fields(&self) -> BTreeMap<String, Value> {
        self.child_map("fields")
    }

    /// UI elements in key order. Empty if the table is unreadable.
    pub fn uis(&self) -> BTreeMap<String, Value> {
        self.child_map("uis")
    }

    fn child_map(&self, key: &str) -> BTreeMap<String, Value> {
        let Ok(doc) = &self.document else {
            return BTreeMap::new();
        };
        match doc.get(key) {
            Some(Value::Mapping(map)) => map
                .iter()
                .map(|(k, v)| (key_string(k), v.clone()))
                .collect(),
            _ => BTreeMap::new(),
        }
    }

    fn dir_suffix(&self) -> &str {
        self.dir_name
            .strip_prefix(TABLE_DIR_PREFIX)
            .unwrap_or(&self.dir_name)
    }
}

/// An exported database loaded from disk.
#[derive(Debug, Clone)]
pub struct ExportDatabase {
    /// Export directory (`database_<segment>`).
    pub path: PathBuf,
    /// ID taken from the directory name.
    pub id: String,
    /// Display name from settings, or the ID.
    pub name: String,
    /// Database document with any `database:` wrapper removed.
    pub database: Mapping,
    /// Tables in directory order.
    pub tables: Vec<ExportTable>,
    /// Entries of `views.yaml`.
    pub views: Vec<Value>,
    /// Entries of `reports.yaml`.
    pub reports: Vec<Value>,
}

impl ExportDatabase {
    /// Loads the export under a canonical database root.
    pub fn load_from_root(db_root: &Path) -> Result<Self, ExportError> {
        let dir = find_database_dir(db_root)
            .ok_or_else(|| ExportError::MissingObjects(db_root.to_path_buf()))?;
        Self::load(&dir)
    }

    /// Loads an export directory.
    ///
    /// Tables that fail to parse are kept with their error so callers can
    /// decide how strict to be.
    pub fn load(dir: &Path) -> Result<Self, ExportError> {
        let db_yaml =
            database_yaml_path(dir).ok_or_else(|| ExportError::MissingDatabaseYaml(dir.into()))?;
        let database = unwrap_key(load_yaml(&db_yaml)?, "database");

        let dir_name = dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let id = dir_name
            .strip_prefix(DATABASE_DIR_PREFIX)
            .unwrap_or(&dir_name)
            .to_string();
        let name = name_from_document(&database).unwrap_or_else(|| id.clone());

        let mut table_dirs: Vec<PathBuf> = fs::read_dir(dir)?
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| {
                p.is_dir()
                    && p.file_name()
                        .and_then(|n| n.to_str())
                        .is_some_and(|n| n.starts_with(TABLE_DIR_PREFIX))
            })
            .collect();
        table_dirs.sort();

        let tables = table_dirs.iter().map(|p| load_table(p)).collect();

        Ok(Self {
            path: dir.to_path_buf(),
            id,
            name,
            database,
            tables,
            views: load_list(&dir.join("views.yaml"))?,
            reports: load_list(&dir.join("reports.yaml"))?,
        })
    }

    /// Returns true if any table failed to load.
    pub fn has_unreadable_tables(&self) -> bool {
        self.tables.iter().any(|t| t.document.is_err())
    }

    /// Extracts every non-empty script, database level first, then per table.
    pub fn code_locations(&self) -> Vec<CodeLocation> {
        let mut locations = Vec::new();

        let schema = match self.database.get("schema") {
            Some(Value::Mapping(map)) => map,
            _ => &self.database,
        };
        for key in DATABASE_CODE_FIELDS {
            if let Some(code) = code_value(schema.get(*key)).or_else(|| code_value(self.database.get(*key))) {
                locations.push(CodeLocation {
                    level: CodeLevel::Database,
                    table: None,
                    element: None,
                    code_type: (*key).to_string(),
                    code,
                });
            }
        }

        for table in &self.tables {
            let Ok(doc) = &table.document else { continue };
            let caption = table.caption();

            for key in TABLE_CODE_FIELDS {
                if let Some(code) = code_value(doc.get(*key)) {
                    locations.push(CodeLocation {
                        level: CodeLevel::Table,
                        table: Some(caption.clone()),
                        element: None,
                        code_type: (*key).to_string(),
                        code,
                    });
                }
            }

            for (field_id, field) in table.fields() {
                let Value::Mapping(field) = field else { continue };
                let element = element_caption(&field, &field_id);
                for key in FIELD_CODE_FIELDS {
                    let Some(code) = code_value(field.get(*key)) else { continue };
                    if *key == "fn" && code.trim().len() < 3 {
                        continue;
                    }
                    locations.push(CodeLocation {
                        level: CodeLevel::Field,
                        table: Some(caption.clone()),
                        element: Some(element.clone()),
                        code_type: (*key).to_string(),
                        code,
                    });
                }
            }

            for (ui_id, ui) in table.uis() {
                let Value::Mapping(ui) = ui else { continue };
                let element = element_caption(&ui, &ui_id);
                for key in UI_CODE_FIELDS {
                    if let Some(code) = code_value(ui.get(*key)) {
                        locations.push(CodeLocation {
                            level: CodeLevel::Ui,
                            table: Some(caption.clone()),
                            element: Some(element.clone()),
                            code_type: (*key).to_string(),
                            code,
                        });
                    }
                }
            }
        }

        locations
    }
}

/// Finds `src/Objects/database_*` under a database root (first in name order).
pub fn find_database_dir(db_root: &Path) -> Option<PathBuf> {
    let objects = db_root.join("src").join("Objects");
    let mut dirs: Vec<PathBuf> = fs::read_dir(objects)
        .ok()?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| {
            p.is_dir()
                && p.file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.starts_with(DATABASE_DIR_PREFIX))
        })
        .collect();
    dirs.sort();
    dirs.into_iter().next()
}

/// Returns `database.yaml`, else the first `database_*.yaml` in name order.
pub fn database_yaml_path(dir: &Path) -> Option<PathBuf> {
    let plain = dir.join("database.yaml");
    if plain.is_file() {
        return Some(plain);
    }
    let mut candidates: Vec<PathBuf> = fs::read_dir(dir)
        .ok()?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| {
            p.is_file()
                && p.file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.starts_with(DATABASE_DIR_PREFIX) && n.ends_with(".yaml"))
        })
        .collect();
    candidates.sort();
    candidates.into_iter().next()
}

/// Reads the display name from an export directory's database YAML.
pub fn read_database_name(dir: &Path) -> Option<String> {
    let path = database_yaml_path(dir)?;
    let doc = unwrap_key(load_yaml(&path).ok()?, "database");
    name_from_document(&doc)
}

/// Human-readable label for a code key.
pub fn code_type_label(code_type: &str) -> &str {
    match code_type {
        "globalCode" => "Global Code",
        "afterOpen" => "After Open (DB)",
        "beforeOpen" => "Before Open (DB)",
        "afterCreate" => "After Create",
        "afterUpdate" => "After Update",
        "afterDelete" => "After Delete",
        "beforeDelete" => "Before Delete",
        "canRead" => "Can Read",
        "canWrite" => "Can Write",
        "canCreate" => "Can Create",
        "canDelete" => "Can Delete",
        "fn" => "Formula",
        "constraint" => "Constraint",
        "dchoiceValues" => "Dynamic Choice Values",
        "dchoiceCaption" => "Dynamic Choice Caption",
        "dchoiceColor" => "Dynamic Choice Color",
        "dchoiceIcon" => "Dynamic Choice Icon",
        "referenceFormat" => "Reference Format",
        "visibility" => "Visibility",
        "onClick" => "On Click",
        "onDoubleClick" => "On Double Click",
        "validation" => "Validation",
        "beforeShow" => "Before Show",
        "afterShow" => "After Show",
        "afterHide" => "After Hide",
        other => other,
    }
}

/// Returns a string value for `key`, if it is a string.
pub(crate) fn str_key<'a>(map: &'a Mapping, key: &str) -> Option<&'a str> {
    map.get(key).and_then(Value::as_str)
}

/// Renders a mapping key as a string.
pub(crate) fn key_string(key: &Value) -> String {
    match key {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        other => serde_yaml::to_string(other)
            .map(|s| s.trim().to_string())
            .unwrap_or_default(),
    }
}

pub(crate) fn element_caption(map: &Mapping, fallback: &str) -> String {
    str_key(map, "caption")
        .or_else(|| str_key(map, "name"))
        .unwrap_or(fallback)
        .to_string()
}

fn load_table(dir: &Path) -> ExportTable {
    let dir_name = dir
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    let yaml = fs::read_dir(dir).ok().and_then(|entries| {
        let mut files: Vec<PathBuf> = entries
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| {
                p.is_file()
                    && p.file_name()
                        .and_then(|n| n.to_str())
                        .is_some_and(|n| n.starts_with(TABLE_DIR_PREFIX) && n.ends_with(".yaml"))
            })
            .collect();
        files.sort();
        files.into_iter().next()
    });

    let document = match yaml {
        None => Err("no table YAML".to_string()),
        Some(path) => match load_yaml(&path) {
            Ok(doc) => Ok(unwrap_key(doc, "table")),
            Err(e) => Err(e.to_string()),
        },
    };

    ExportTable { dir_name, document }
}

fn load_yaml(path: &Path) -> Result<Mapping, ExportError> {
    let text = fs::read_to_string(path)?;
    let value: Value = serde_yaml::from_str(&text).map_err(|source| ExportError::Yaml {
        path: path.to_path_buf(),
        source,
    })?;
    match value {
        Value::Mapping(map) => Ok(map),
        Value::Null => Ok(Mapping::new()),
        _ => Err(ExportError::Yaml {
            path: path.to_path_buf(),
            source: serde::de::Error::custom("top-level document is not a mapping"),
        }),
    }
}

fn load_list(path: &Path) -> Result<Vec<Value>, ExportError> {
    if !path.is_file() {
        return Ok(Vec::new());
    }
    let text = fs::read_to_string(path)?;
    let value: Value = serde_yaml::from_str(&text).map_err(|source| ExportError::Yaml {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(match value {
        Value::Null => Vec::new(),
        Value::Sequence(items) => items,
        other => vec![other],
    })
}

/// Strips a single wrapping key (`database:` / `table:`) if present.
fn unwrap_key(map: Mapping, key: &str) -> Mapping {
    match map.get(key) {
        Some(Value::Mapping(inner)) => inner.clone(),
        _ => map,
    }
}

fn name_from_document(doc: &Mapping) -> Option<String> {
    let from_settings = match doc.get("settings") {
        Some(Value::Mapping(settings)) => str_key(settings, "name"),
        _ => None,
    };
    from_settings
        .or_else(|| str_key(doc, "name"))
        .or_else(|| str_key(doc, "caption"))
        .filter(|s| !s.trim().is_empty())
        .map(str::to_string)
}

fn code_value(value: Option<&Value>) -> Option<String> {
    let raw = value?.as_str()?;
    if raw.trim().is_empty() {
        return None;
    }
    Some(unescape_code(raw))
}

/// Undoes quoting left in exported code strings.
fn unescape_code(value: &str) -> String {
    let quoted = value.len() >= 2
        && ((value.starts_with('"') && value.ends_with('"'))
            || (value.starts_with('\'') && value.ends_with('\'')));
    let inner = if quoted {
        &value[1..value.len() - 1]
    } else {
        value
    };
    inner
        .replace("\\n", "\n")
        .replace("\\t", "\t")
        .replace("\\\"", "\"")
        .replace("\\'", "'")
        .replace("\\\\", "\\")
}
