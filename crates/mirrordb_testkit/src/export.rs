//! Builders for on-disk database exports.
//!
//! Exports are written in the layout fetchers produce:
//!
//! ```text
//! <root>/src/Objects/database_<id>/
//! ├─ database.yaml
//! └─ table_<X>/table_<X>.yaml
//! <root>/src/Files/database_<id>/...   (optional)
//! ```

use mirrordb_core::{files_dir, objects_dir};
use serde_yaml::{Mapping, Value};
use std::fs;
use std::path::{Path, PathBuf};

/// A field in a [`TableBuilder`].
#[derive(Debug, Clone)]
struct FieldSpec {
    id: String,
    doc: Mapping,
}

/// Builds one exported table.
#[derive(Debug, Clone)]
pub struct TableBuilder {
    id: String,
    caption: String,
    fields: Vec<FieldSpec>,
    scripts: Vec<(String, String)>,
    raw: Option<String>,
}

impl TableBuilder {
    /// Creates a table with the given ID and caption.
    pub fn new(id: impl Into<String>, caption: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            caption: caption.into(),
            fields: Vec::new(),
            scripts: Vec::new(),
            raw: None,
        }
    }

    /// Adds a plain field of type `base`.
    pub fn field(self, id: &str, caption: &str, base: &str) -> Self {
        self.push_field(id, caption, base, |_| {})
    }

    /// Adds a required field.
    pub fn required(self, id: &str, caption: &str, base: &str) -> Self {
        self.push_field(id, caption, base, |doc| {
            doc.insert("required".into(), Value::Bool(true));
        })
    }

    /// Adds a reference to another table in the same database.
    pub fn reference(self, id: &str, caption: &str, target_table: &str) -> Self {
        self.push_field(id, caption, "ref", |doc| {
            doc.insert("refTypeId".into(), target_table.into());
        })
    }

    /// Adds a reverse reference to another table.
    pub fn reverse(self, id: &str, caption: &str, target_table: &str) -> Self {
        self.push_field(id, caption, "rev", |doc| {
            doc.insert("refTypeId".into(), target_table.into());
        })
    }

    /// Adds a reference into another database.
    pub fn external_reference(
        self,
        id: &str,
        caption: &str,
        target_table: &str,
        db_id: &str,
        db_name: &str,
    ) -> Self {
        self.push_field(id, caption, "ref", |doc| {
            doc.insert("refTypeId".into(), target_table.into());
            doc.insert("dbId".into(), db_id.into());
            doc.insert("dbName".into(), db_name.into());
        })
    }

    /// Adds a formula field.
    pub fn formula(self, id: &str, caption: &str, code: &str) -> Self {
        self.push_field(id, caption, "formula", |doc| {
            doc.insert("fn".into(), code.into());
        })
    }

    /// Adds a table-level script such as `afterUpdate`.
    pub fn trigger(mut self, key: &str, code: &str) -> Self {
        self.scripts.push((key.to_string(), code.to_string()));
        self
    }

    /// Replaces the whole document with raw text, e.g. to write invalid YAML.
    pub fn raw(mut self, text: impl Into<String>) -> Self {
        self.raw = Some(text.into());
        self
    }

    fn push_field(
        mut self,
        id: &str,
        caption: &str,
        base: &str,
        extra: impl FnOnce(&mut Mapping),
    ) -> Self {
        let mut doc = Mapping::new();
        doc.insert("caption".into(), caption.into());
        doc.insert("base".into(), base.into());
        extra(&mut doc);
        self.fields.push(FieldSpec {
            id: id.to_string(),
            doc,
        });
        self
    }

    fn render(&self) -> String {
        if let Some(raw) = &self.raw {
            return raw.clone();
        }
        let mut doc = Mapping::new();
        doc.insert("id".into(), self.id.as_str().into());
        doc.insert("caption".into(), self.caption.as_str().into());
        for (key, code) in &self.scripts {
            doc.insert(key.as_str().into(), code.as_str().into());
        }
        let mut fields = Mapping::new();
        for field in &self.fields {
            fields.insert(field.id.as_str().into(), Value::Mapping(field.doc.clone()));
        }
        doc.insert("fields".into(), Value::Mapping(fields));
        serde_yaml::to_string(&Value::Mapping(doc)).expect("table document serializes")
    }
}

/// Builds a complete database export.
///
/// # Example
///
/// ```rust,ignore
/// let export = ExportBuilder::new("db1", "Shop")
///     .table(TableBuilder::new("A", "Customer").field("A1", "Name", "string"));
/// export.write_to(staging.path());
/// ```
#[derive(Debug, Clone)]
pub struct ExportBuilder {
    id: String,
    name: String,
    scripts: Vec<(String, String)>,
    tables: Vec<TableBuilder>,
    files: Vec<(String, Vec<u8>)>,
}

impl ExportBuilder {
    /// Creates an export for database `id` named `name`.
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            scripts: Vec::new(),
            tables: Vec::new(),
            files: Vec::new(),
        }
    }

    /// The database ID.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Adds a database-level script such as `globalCode`.
    pub fn script(mut self, key: &str, code: &str) -> Self {
        self.scripts.push((key.to_string(), code.to_string()));
        self
    }

    /// Adds a table.
    pub fn table(mut self, table: TableBuilder) -> Self {
        self.tables.push(table);
        self
    }

    /// Adds an attachment under the `Files` tree.
    pub fn file(mut self, relative: &str, contents: impl Into<Vec<u8>>) -> Self {
        self.files.push((relative.to_string(), contents.into()));
        self
    }

    /// Writes the export under `root` and returns the objects directory.
    pub fn write_to(&self, root: &Path) -> PathBuf {
        let dir = objects_dir(root, &self.id);
        fs::create_dir_all(&dir).expect("create objects dir");

        let mut settings = Mapping::new();
        settings.insert("name".into(), self.name.as_str().into());
        let mut database = Mapping::new();
        database.insert("settings".into(), Value::Mapping(settings));
        for (key, code) in &self.scripts {
            database.insert(key.as_str().into(), code.as_str().into());
        }
        let text = serde_yaml::to_string(&Value::Mapping(database)).expect("database serializes");
        fs::write(dir.join("database.yaml"), text).expect("write database.yaml");

        for table in &self.tables {
            let table_dir = dir.join(format!("table_{}", table.id));
            fs::create_dir_all(&table_dir).expect("create table dir");
            fs::write(
                table_dir.join(format!("table_{}.yaml", table.id)),
                table.render(),
            )
            .expect("write table yaml");
        }

        if !self.files.is_empty() {
            let files = files_dir(root, &self.id);
            for (relative, contents) in &self.files {
                let path = files.join(relative);
                if let Some(parent) = path.parent() {
                    fs::create_dir_all(parent).expect("create files dir");
                }
                fs::write(path, contents).expect("write attachment");
            }
        }
        dir
    }
}

/// A small two-table export with one reference and a few scripts.
pub fn shop_export(id: &str, name: &str) -> ExportBuilder {
    ExportBuilder::new(id, name)
        .script("globalCode", "function greet(n) do 'Hello ' + n end")
        .table(
            TableBuilder::new("A", "Customer")
                .required("A1", "Full Name", "string")
                .field("A2", "Joined", "date")
                .trigger("afterUpdate", "this.Modified := now()"),
        )
        .table(
            TableBuilder::new("B", "Order")
                .reference("B1", "Customer", "A")
                .field("B2", "Total", "number")
                .formula("B3", "Label", "'#' + text(Id)"),
        )
}
