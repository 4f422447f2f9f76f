//! Name-addressed path resolution.
//!
//! Everything here is a pure function of the configured rules and the
//! display names passed in. No I/O happens in this module.
//!
//! ```text
//! <base>/
//! └─ <server>/                 # one git working tree per server
//!    └─ <team>/
//!       └─ <database>/         # database root, holds the metadata sidecar
//!          ├─ .mirrordb-metadata.json
//!          ├─ ERD.md
//!          ├─ SCRIPTS.md
//!          └─ src/
//!             ├─ Objects/database_<database>/
//!             └─ Files/database_<database>/
//! ```

use crate::config::SanitizeConfig;
use crate::error::{CoreError, CoreResult};
use crate::types::{ServerRef, SyncTarget, TeamRef};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

/// Prefix of per-database directories inside `src/Objects` and `src/Files`.
pub const DATABASE_DIR_PREFIX: &str = "database_";

/// Separator between a segment and its disambiguation suffix.
const DISAMBIGUATION_SEPARATOR: char = '~';

/// Number of hex characters of the ID hash used for disambiguation.
const DISAMBIGUATION_LEN: usize = 8;

/// Resolves sanitized, deterministic paths for sync targets.
#[derive(Debug, Clone)]
pub struct PathResolver {
    base: PathBuf,
    rules: SanitizeConfig,
}

impl PathResolver {
    /// Creates a resolver rooted at `base`.
    pub fn new(base: impl Into<PathBuf>, rules: SanitizeConfig) -> Self {
        Self {
            base: base.into(),
            rules,
        }
    }

    /// Returns the base path.
    pub fn base(&self) -> &Path {
        &self.base
    }

    /// Maps a display name to a filesystem-safe path segment.
    ///
    /// # Errors
    ///
    /// Returns `InvalidName` if nothing usable is left after sanitization.
    pub fn sanitize(&self, name: &str) -> CoreResult<String> {
        sanitize_with(&self.rules, name)
    }

    /// Returns `<base>/<server>`.
    pub fn resolve_server_path(&self, server: &ServerRef) -> CoreResult<PathBuf> {
        Ok(self.base.join(self.sanitize(&server.name)?))
    }

    /// Returns `<base>/<server>/<team>`.
    pub fn resolve_team_path(&self, server: &ServerRef, team: &TeamRef) -> CoreResult<PathBuf> {
        Ok(self
            .resolve_server_path(server)?
            .join(self.sanitize(&team.name)?))
    }

    /// Returns `<base>/<server>/<team>/<database>`.
    pub fn resolve_database_path(&self, target: &SyncTarget) -> CoreResult<PathBuf> {
        Ok(self
            .resolve_team_path(&target.server, &target.team)?
            .join(self.sanitize(&target.database.name)?))
    }

    /// Returns the remote repository name for a server.
    ///
    /// Uses the sanitized URL hostname when the server has one, otherwise the
    /// sanitized server name.
    pub fn repo_name(&self, server: &ServerRef) -> CoreResult<String> {
        match server.host() {
            Some(host) => self.sanitize(host),
            None => self.sanitize(&server.name),
        }
    }

    /// Appends a short stable hash of `id` to `segment`.
    pub fn disambiguate(segment: &str, id: &str) -> String {
        let digest = Sha256::digest(id.as_bytes());
        let hex: String = digest
            .iter()
            .map(|b| format!("{b:02x}"))
            .collect::<String>()
            .chars()
            .take(DISAMBIGUATION_LEN)
            .collect();
        format!("{segment}{DISAMBIGUATION_SEPARATOR}{hex}")
    }
}

/// Name of the objects directory for a database segment or ID.
pub fn database_dir_name(segment: &str) -> String {
    format!("{DATABASE_DIR_PREFIX}{segment}")
}

/// `<db_root>/src/Objects/database_<segment>`.
pub fn objects_dir(db_root: &Path, segment: &str) -> PathBuf {
    db_root
        .join("src")
        .join("Objects")
        .join(database_dir_name(segment))
}

/// `<db_root>/src/Files/database_<segment>`.
pub fn files_dir(db_root: &Path, segment: &str) -> PathBuf {
    db_root
        .join("src")
        .join("Files")
        .join(database_dir_name(segment))
}

fn sanitize_with(rules: &SanitizeConfig, name: &str) -> CoreResult<String> {
    let replacement = rules.replacement;
    let mut out = String::with_capacity(name.len());
    let mut in_whitespace = false;

    for c in name.chars() {
        if c.is_whitespace() {
            if !in_whitespace {
                out.push(replacement);
                in_whitespace = true;
            }
            continue;
        }
        in_whitespace = false;
        if c.is_ascii_control() || rules.disallowed.contains(c) {
            out.push(replacement);
        } else {
            out.push(c);
        }
    }

    let trimmed = trim_segment(&out, replacement);
    let truncated: String = trimmed.chars().take(rules.max_len).collect();
    let result = trim_segment(&truncated, replacement);

    if result.is_empty() {
        return Err(CoreError::InvalidName {
            name: name.to_string(),
        });
    }
    Ok(result.to_string())
}

fn trim_segment(s: &str, replacement: char) -> &str {
    s.trim_matches(|c: char| c == '.' || c == ' ' || c == replacement)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{DatabaseRef, TeamRef};
    use proptest::prelude::*;

    fn resolver() -> PathResolver {
        PathResolver::new("/base", SanitizeConfig::default())
    }

    #[test]
    fn plain_names_pass_through() {
        let r = resolver();
        assert_eq!(r.sanitize("EFS-Server").unwrap(), "EFS-Server");
        assert_eq!(r.sanitize("Buywatch").unwrap(), "Buywatch");
    }

    #[test]
    fn disallowed_and_whitespace() {
        let r = resolver();
        assert_eq!(r.sanitize("Sales: 2024/Q1").unwrap(), "Sales__2024_Q1");
        assert_eq!(r.sanitize("Acme   Corp").unwrap(), "Acme_Corp");
        assert_eq!(r.sanitize("a\tb\nc").unwrap(), "a_b_c");
        assert_eq!(r.sanitize("x\u{1}y").unwrap(), "x_y");
    }

    #[test]
    fn strips_edges() {
        let r = resolver();
        assert_eq!(r.sanitize("  .hidden. ").unwrap(), "hidden");
        assert_eq!(r.sanitize("?name?").unwrap(), "name");
    }

    #[test]
    fn empty_results_are_invalid() {
        let r = resolver();
        for name in ["", "   ", "..", "...", "???", "/"] {
            let err = r.sanitize(name).unwrap_err();
            assert_eq!(err.kind(), "InvalidName", "{name:?}");
        }
    }

    #[test]
    fn truncates_on_char_boundary() {
        let r = PathResolver::new("/base", SanitizeConfig::default().with_max_len(4));
        assert_eq!(r.sanitize("ääääää").unwrap(), "ääää");
        assert_eq!(r.sanitize("abc def").unwrap(), "abc");
    }

    #[test]
    fn resolves_nested_paths() {
        let r = resolver();
        let target = SyncTarget::new(
            ServerRef::new("s1", "EFS-Server"),
            TeamRef::new("t1", "Dev"),
            DatabaseRef::new("jz79ok8wdsbd", "Buywatch"),
        );
        assert_eq!(
            r.resolve_database_path(&target).unwrap(),
            PathBuf::from("/base/EFS-Server/Dev/Buywatch")
        );
        assert_eq!(
            r.resolve_team_path(&target.server, &target.team).unwrap(),
            PathBuf::from("/base/EFS-Server/Dev")
        );
    }

    #[test]
    fn repo_name_prefers_host() {
        let r = resolver();
        let server = ServerRef::new("s1", "Acme Corp");
        assert_eq!(r.repo_name(&server).unwrap(), "Acme_Corp");
        let server = server.with_url("https://acme.ninox.example/");
        assert_eq!(r.repo_name(&server).unwrap(), "acme.ninox.example");
    }

    #[test]
    fn disambiguate_is_stable() {
        let a = PathResolver::disambiguate("Acme", "s1");
        let b = PathResolver::disambiguate("Acme", "s1");
        let c = PathResolver::disambiguate("Acme", "s2");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(a.starts_with("Acme~"));
        assert_eq!(a.len(), "Acme~".len() + 8);
    }

    #[test]
    fn layout_helpers() {
        let root = Path::new("/base/S/T/D");
        assert_eq!(
            objects_dir(root, "D"),
            PathBuf::from("/base/S/T/D/src/Objects/database_D")
        );
        assert_eq!(
            files_dir(root, "D"),
            PathBuf::from("/base/S/T/D/src/Files/database_D")
        );
    }

    proptest! {
        #[test]
        fn sanitize_is_deterministic(name in ".*") {
            let r = resolver();
            let first = r.sanitize(&name).ok();
            let second = r.sanitize(&name).ok();
            prop_assert_eq!(first, second);
        }

        #[test]
        fn sanitized_segments_are_safe(name in ".{0,200}") {
            let r = resolver();
            if let Ok(segment) = r.sanitize(&name) {
                prop_assert!(!segment.is_empty());
                prop_assert!(segment != "." && segment != "..");
                prop_assert!(segment.chars().count() <= 100);
                prop_assert!(!segment.chars().any(|c| c.is_ascii_control() || c.is_whitespace()));
                prop_assert!(!segment.chars().any(|c| r#"<>:"/\|?*"#.contains(c)));
                prop_assert!(!segment.starts_with('.') && !segment.ends_with('.'));
            }
        }

        #[test]
        fn sanitize_is_idempotent(name in "[a-zA-Z0-9 ._:/-]{1,60}") {
            let r = resolver();
            if let Ok(once) = r.sanitize(&name) {
                prop_assert_eq!(r.sanitize(&once).unwrap(), once);
            }
        }
    }
}
