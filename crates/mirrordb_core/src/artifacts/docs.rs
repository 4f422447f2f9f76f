//! Script documentation (`SCRIPTS.md`).

use super::export::{code_type_label, CodeLevel, CodeLocation, ExportDatabase};
use super::ArtifactGenerator;
use crate::error::{CoreError, CoreResult};
use std::collections::BTreeMap;
use std::fmt::Write;
use std::path::Path;

const NAME: &str = "documentation";

/// Writes `SCRIPTS.md`: a table overview followed by every script grouped
/// by table, field and UI element.
///
/// Lenient: unreadable tables are listed as such and skipped.
#[derive(Debug, Clone, Copy, Default)]
pub struct DocumentationGenerator;

#[derive(Default)]
struct TableScripts<'a> {
    table: Vec<&'a CodeLocation>,
    fields: BTreeMap<&'a str, Vec<&'a CodeLocation>>,
    uis: BTreeMap<&'a str, Vec<&'a CodeLocation>>,
}

impl DocumentationGenerator {
    /// Creates the generator.
    pub fn new() -> Self {
        Self
    }

    /// Renders the document for a loaded export.
    pub fn render(&self, export: &ExportDatabase) -> String {
        let locations = export.code_locations();
        let mut out = String::new();

        let _ = writeln!(out, "# Scripts: {}\n", export.name);
        out.push_str("> Every script in the database, grouped by table.\n\n");

        out.push_str("## Overview\n\n");
        out.push_str("| Table | Fields | Scripts |\n|---|---|---|\n");
        for table in &export.tables {
            if table.document.is_err() {
                continue;
            }
            let caption = table.caption();
            let scripts = locations
                .iter()
                .filter(|l| l.table.as_deref() == Some(caption.as_str()))
                .count();
            let _ = writeln!(out, "| {} | {} | {} |", caption, table.fields().len(), scripts);
        }
        out.push('\n');

        let unreadable: Vec<_> = export
            .tables
            .iter()
            .filter_map(|t| t.document.as_ref().err().map(|e| (&t.dir_name, e)))
            .collect();
        if !unreadable.is_empty() {
            out.push_str("### Unreadable tables\n\n");
            for (dir, message) in unreadable {
                let _ = writeln!(out, "- `{dir}`: {}", message.lines().next().unwrap_or(""));
            }
            out.push('\n');
        }

        if locations.is_empty() {
            out.push_str("*No scripts found.*\n");
            return out;
        }

        let mut database = Vec::new();
        let mut tables: BTreeMap<&str, TableScripts<'_>> = BTreeMap::new();
        for loc in &locations {
            match (loc.level, loc.table.as_deref(), loc.element.as_deref()) {
                (CodeLevel::Database, _, _) => database.push(loc),
                (CodeLevel::Table, Some(table), _) => {
                    tables.entry(table).or_default().table.push(loc)
                }
                (CodeLevel::Field, Some(table), Some(element)) => tables
                    .entry(table)
                    .or_default()
                    .fields
                    .entry(element)
                    .or_default()
                    .push(loc),
                (CodeLevel::Ui, Some(table), Some(element)) => tables
                    .entry(table)
                    .or_default()
                    .uis
                    .entry(element)
                    .or_default()
                    .push(loc),
                _ => {}
            }
        }

        if !database.is_empty() {
            out.push_str("## Database\n\n");
            for loc in sorted(database) {
                code_block(&mut out, "###", "(Database)", loc);
            }
        }

        for (table, scripts) in tables {
            let _ = writeln!(out, "---\n## Table: {table}\n");

            if !scripts.table.is_empty() {
                out.push_str("### Table Triggers\n\n");
                for loc in sorted(scripts.table) {
                    code_block(&mut out, "####", "(Without Field)", loc);
                }
            }
            if !scripts.fields.is_empty() {
                out.push_str("### Fields\n\n");
                for (field, locs) in scripts.fields {
                    for loc in sorted(locs) {
                        code_block(&mut out, "####", field, loc);
                    }
                }
            }
            if !scripts.uis.is_empty() {
                out.push_str("### UI Elements\n\n");
                for (ui, locs) in scripts.uis {
                    for loc in sorted(locs) {
                        code_block(&mut out, "####", ui, loc);
                    }
                }
            }
        }

        out
    }
}

impl ArtifactGenerator for DocumentationGenerator {
    fn name(&self) -> &str {
        NAME
    }

    fn file_name(&self) -> &str {
        "SCRIPTS.md"
    }

    fn generate(&self, db_root: &Path) -> CoreResult<String> {
        let export = ExportDatabase::load_from_root(db_root)
            .map_err(|e| CoreError::artifact(NAME, e.to_string()))?;
        Ok(self.render(&export))
    }
}

fn sorted(mut locs: Vec<&CodeLocation>) -> Vec<&CodeLocation> {
    locs.sort_by(|a, b| a.code_type.cmp(&b.code_type));
    locs
}

fn code_block(out: &mut String, heading: &str, title: &str, loc: &CodeLocation) {
    let _ = writeln!(out, "{heading} {title} ({})", loc.line_count());
    let _ = writeln!(out, "**{}**\n", code_type_label(&loc.code_type));
    out.push_str("```javascript\n");
    out.push_str(loc.code.trim_end());
    out.push_str("\n```\n\n");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn groups_scripts_by_table() {
        let dir = tempdir().unwrap();
        let db = dir.path().join("database_x");
        fs::create_dir_all(db.join("table_A")).unwrap();
        fs::create_dir_all(db.join("table_B")).unwrap();
        fs::write(
            db.join("database.yaml"),
            "database:\n  settings:\n    name: Shop\n  globalCode: \"function f() do 1 end\"\n",
        )
        .unwrap();
        fs::write(
            db.join("table_A/table_A.yaml"),
            "caption: Customer\nafterCreate: \"x := 1\"\nfields:\n  A1:\n    caption: Total\n    fn: \"a + b\"\n    onClick: \"alert('x')\"\nuis:\n  U1:\n    caption: Save\n    onClick: \"save()\"\n",
        )
        .unwrap();
        fs::write(db.join("table_B/table_B.yaml"), "{ broken").unwrap();

        let export = ExportDatabase::load(&db).unwrap();
        let out = DocumentationGenerator::new().render(&export);

        assert!(out.starts_with("# Scripts: Shop\n"));
        assert!(out.contains("| Customer | 1 | 4 |"));
        assert!(out.contains("- `table_B`:"));
        assert!(out.contains("## Database\n\n### (Database) (1)\n**Global Code**"));
        assert!(out.contains("## Table: Customer"));
        assert!(out.contains("#### (Without Field) (1)\n**After Create**"));
        let formula = out.find("**Formula**").unwrap();
        let click = out.find("**On Click**").unwrap();
        assert!(formula < click);
        assert!(out.contains("### UI Elements\n\n#### Save (1)"));
    }

    #[test]
    fn empty_database() {
        let dir = tempdir().unwrap();
        let db = dir.path().join("database_x");
        fs::create_dir_all(&db).unwrap();
        fs::write(db.join("database.yaml"), "name: Empty\n").unwrap();

        let export = ExportDatabase::load(&db).unwrap();
        let out = DocumentationGenerator::new().render(&export);
        assert!(out.contains("*No scripts found.*"));
    }
}
