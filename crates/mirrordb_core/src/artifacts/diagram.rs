//! Mermaid entity-relationship diagram.

use super::export::{element_caption, str_key, ExportDatabase, ExportTable};
use super::ArtifactGenerator;
use crate::error::{CoreError, CoreResult};
use serde_yaml::Value;
use std::collections::BTreeMap;
use std::fmt::Write;
use std::path::Path;

const NAME: &str = "diagram";

/// Writes `ERD.md`: tables, fields and reference edges as a Mermaid `erDiagram`.
///
/// Strict: an unreadable table, a field that is not a mapping, or a
/// reference to a table that does not exist fails the whole artifact.
#[derive(Debug, Clone, Copy, Default)]
pub struct DiagramGenerator;

impl DiagramGenerator {
    /// Creates the generator.
    pub fn new() -> Self {
        Self
    }

    /// Renders the diagram for a loaded export.
    pub fn render(&self, export: &ExportDatabase) -> CoreResult<String> {
        let mut entities: BTreeMap<String, String> = BTreeMap::new();
        for table in &export.tables {
            if let Err(message) = &table.document {
                return Err(CoreError::artifact(
                    NAME,
                    format!("table {} unreadable: {message}", table.dir_name),
                ));
            }
            entities.insert(table.id(), entity_name(table));
        }

        let mut body = String::new();
        let mut edges = Vec::new();
        let mut notes = Vec::new();

        for table in &export.tables {
            let entity = &entities[&table.id()];
            let _ = writeln!(body, "    {entity} {{");

            for (field_id, field) in table.fields() {
                let Value::Mapping(field) = field else {
                    return Err(CoreError::artifact(
                        NAME,
                        format!("field {field_id} in {} is not a mapping", table.dir_name),
                    ));
                };
                let caption = element_caption(&field, &field_id);
                let base = str_key(&field, "base").unwrap_or("string");
                let required = field.get("required").and_then(Value::as_bool) == Some(true);

                if base == "ref" || base == "rev" {
                    let _ = writeln!(
                        body,
                        "        int {} \"{} (FK)\"",
                        attribute_name(&caption),
                        quote(&caption)
                    );

                    if let Some(db) = external_db(&field) {
                        notes.push(format!(
                            "    %% {entity}.{} references database {db}",
                            attribute_name(&caption)
                        ));
                        continue;
                    }
                    let target = str_key(&field, "refTypeId").ok_or_else(|| {
                        CoreError::artifact(
                            NAME,
                            format!("reference {caption} in {} has no target", table.dir_name),
                        )
                    })?;
                    let target_entity = entities.get(target).ok_or_else(|| {
                        CoreError::artifact(
                            NAME,
                            format!(
                                "reference {caption} in {} points to unknown table {target}",
                                table.dir_name
                            ),
                        )
                    })?;
                    let arrow = if base == "ref" { "||--o{" } else { "}o--o{" };
                    edges.push(format!(
                        "    {entity} {arrow} {target_entity} : \"{}\"",
                        quote(&caption)
                    ));
                } else if required {
                    let _ = writeln!(
                        body,
                        "        {} {} \"{} (NOT NULL)\"",
                        erd_type(base),
                        attribute_name(&caption),
                        quote(&caption)
                    );
                } else {
                    let _ = writeln!(
                        body,
                        "        {} {} \"{}\"",
                        erd_type(base),
                        attribute_name(&caption),
                        quote(&caption)
                    );
                }
            }
            body.push_str("    }\n");
        }

        let mut out = String::new();
        let _ = writeln!(out, "# {} ERD\n", export.name);
        let _ = writeln!(
            out,
            "Tables: {} | Relationships: {}\n",
            export.tables.len(),
            edges.len()
        );
        out.push_str("```mermaid\nerDiagram\n");
        out.push_str(&body);
        if !edges.is_empty() {
            out.push('\n');
            for edge in &edges {
                out.push_str(edge);
                out.push('\n');
            }
        }
        if !notes.is_empty() {
            out.push('\n');
            for note in &notes {
                out.push_str(note);
                out.push('\n');
            }
        }
        out.push_str("```\n");
        Ok(out)
    }
}

impl ArtifactGenerator for DiagramGenerator {
    fn name(&self) -> &str {
        NAME
    }

    fn file_name(&self) -> &str {
        "ERD.md"
    }

    fn generate(&self, db_root: &Path) -> CoreResult<String> {
        let export = ExportDatabase::load_from_root(db_root)
            .map_err(|e| CoreError::artifact(NAME, e.to_string()))?;
        self.render(&export)
    }
}

fn external_db(field: &serde_yaml::Mapping) -> Option<String> {
    let id = match field.get("dbId") {
        Some(Value::String(s)) if !s.is_empty() => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        _ => return None,
    };
    Some(str_key(field, "dbName").map(str::to_string).unwrap_or(id))
}

/// Maps export field types onto Mermaid attribute types.
fn erd_type(base: &str) -> &'static str {
    match base {
        "text" => "text",
        "number" => "number",
        "bool" => "boolean",
        "date" => "date",
        "datetime" => "datetime",
        "time" => "time",
        _ => "string",
    }
}

/// Entity identifier: word characters only, upper case, `T_` prefixed if empty or numeric.
fn entity_name(table: &ExportTable) -> String {
    let name = identifier(&table.caption()).to_uppercase();
    if name.is_empty() || name.starts_with(|c: char| c.is_ascii_digit()) {
        format!("T_{}", identifier(&table.id()).to_uppercase())
    } else {
        name
    }
}

/// Attribute identifier: word characters only, lower case, `f_` prefixed if numeric.
fn attribute_name(caption: &str) -> String {
    let name = identifier(caption).to_lowercase();
    if name.is_empty() {
        "field".to_string()
    } else if name.starts_with(|c: char| c.is_ascii_digit()) {
        format!("f_{name}")
    } else {
        name
    }
}

fn identifier(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if c.is_alphanumeric() {
            out.push(c);
        } else if !out.ends_with('_') {
            out.push('_');
        }
    }
    out.trim_matches('_').to_string()
}

fn quote(s: &str) -> String {
    s.replace('"', "'")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn export(tables: &[(&str, &str)]) -> (tempfile::TempDir, ExportDatabase) {
        let dir = tempdir().unwrap();
        let db = dir.path().join("database_x");
        fs::create_dir_all(&db).unwrap();
        fs::write(db.join("database.yaml"), "settings:\n  name: Shop\n").unwrap();
        for (name, yaml) in tables {
            let table_dir = db.join(format!("table_{name}"));
            fs::create_dir_all(&table_dir).unwrap();
            fs::write(table_dir.join(format!("table_{name}.yaml")), yaml).unwrap();
        }
        let export = ExportDatabase::load(&db).unwrap();
        (dir, export)
    }

    #[test]
    fn renders_tables_and_edges() {
        let (_dir, export) = export(&[
            (
                "A",
                "caption: Customer\nfields:\n  A1:\n    caption: Full Name\n    base: string\n    required: true\n",
            ),
            (
                "B",
                "caption: Order\nfields:\n  B1:\n    caption: Customer\n    base: ref\n    refTypeId: A\n  B2:\n    caption: Supplier\n    base: ref\n    refTypeId: Q\n    dbId: other\n    dbName: Purchasing\n",
            ),
        ]);

        let out = DiagramGenerator::new().render(&export).unwrap();
        assert!(out.starts_with("# Shop ERD\n"));
        assert!(out.contains("erDiagram\n    CUSTOMER {\n        string full_name \"Full Name (NOT NULL)\"\n"));
        assert!(out.contains("    ORDER ||--o{ CUSTOMER : \"Customer\"\n"));
        assert!(out.contains("%% ORDER.supplier references database Purchasing"));
        assert!(out.contains("Relationships: 1"));
    }

    #[test]
    fn unknown_reference_fails() {
        let (_dir, export) = export(&[(
            "A",
            "caption: Order\nfields:\n  A1:\n    caption: Customer\n    base: ref\n    refTypeId: MISSING\n",
        )]);
        let err = DiagramGenerator::new().render(&export).unwrap_err();
        assert_eq!(err.kind(), "ArtifactGenerationError");
        assert!(err.to_string().contains("MISSING"));
    }

    #[test]
    fn non_mapping_field_fails() {
        let (_dir, export) = export(&[("A", "caption: Order\nfields:\n  A1: 42\n")]);
        assert!(DiagramGenerator::new().render(&export).is_err());
    }

    #[test]
    fn output_is_stable() {
        let (_dir, export) = export(&[(
            "A",
            "caption: Customer\nfields:\n  Z:\n    caption: Zip\n  B:\n    caption: Born\n    base: date\n",
        )]);
        let gen = DiagramGenerator::new();
        let first = gen.render(&export).unwrap();
        assert_eq!(first, gen.render(&export).unwrap());
        let born = first.find("born").unwrap();
        let zip = first.find("zip").unwrap();
        assert!(born < zip);
    }

    #[test]
    fn identifiers() {
        assert_eq!(attribute_name("Full  Name!"), "full_name");
        assert_eq!(attribute_name("1st"), "f_1st");
        assert_eq!(attribute_name("???"), "field");
    }
}
