//! Property-based test generators using proptest.

use crate::export::{ExportBuilder, TableBuilder};
use mirrordb_core::{DatabaseRef, ServerRef, SyncTarget, TeamRef};
use proptest::prelude::*;

/// Strategy for display names as users type them: letters, digits,
/// punctuation that is illegal in paths, and odd whitespace.
pub fn display_name_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex(r#"[ A-Za-z0-9äöüé<>:"/\\|?*.\t_-]{0,40}"#).expect("Invalid regex")
}

/// Strategy for names that always keep at least one legal character.
pub fn valid_name_strategy() -> impl Strategy<Value = String> {
    (
        display_name_strategy(),
        prop::string::string_regex("[A-Za-z0-9]{1,8}").expect("Invalid regex"),
        display_name_strategy(),
    )
        .prop_map(|(a, core, b)| format!("{a}{core}{b}"))
}

/// Strategy for opaque upstream IDs.
pub fn id_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-z0-9]{4,12}").expect("Invalid regex")
}

/// Strategy for whole sync targets.
pub fn target_strategy() -> impl Strategy<Value = SyncTarget> {
    (
        id_strategy(),
        valid_name_strategy(),
        valid_name_strategy(),
        id_strategy(),
        valid_name_strategy(),
    )
        .prop_map(|(server_id, server, team, db_id, db)| {
            SyncTarget::new(
                ServerRef::new(server_id, server),
                TeamRef::new("team", team),
                DatabaseRef::new(db_id, db),
            )
        })
}

/// Strategy for exports with a few tables of plain fields.
pub fn export_strategy(id: String, name: String) -> impl Strategy<Value = ExportBuilder> {
    prop::collection::vec(
        prop::collection::vec(
            prop::sample::select(vec!["string", "number", "date", "bool", "text"]),
            1..5,
        ),
        0..4,
    )
    .prop_map(move |tables| {
        tables
            .into_iter()
            .enumerate()
            .fold(ExportBuilder::new(&id, &name), |export, (t, bases)| {
                let table_id = format!("T{t}");
                let table = bases.into_iter().enumerate().fold(
                    TableBuilder::new(&table_id, format!("Table {t}")),
                    |table, (f, base)| {
                        table.field(&format!("{table_id}F{f}"), &format!("Field {f}"), base)
                    },
                );
                export.table(table)
            })
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    proptest! {
        #[test]
        fn valid_names_have_a_legal_core(name in valid_name_strategy()) {
            prop_assert!(name.chars().any(|c| c.is_ascii_alphanumeric()));
        }

        #[test]
        fn targets_have_ids(target in target_strategy()) {
            prop_assert!(!target.database.id.is_empty());
            prop_assert!(!target.server.id.is_empty());
        }
    }
}
