//! Derived documentation artifacts.
//!
//! Each generator is a pure function of the canonical database tree and
//! writes one file at the database root. Generators fail independently:
//! one failing never prevents another from running, and a failed generator
//! leaves its previous file untouched.

mod diagram;
mod docs;
pub mod export;

pub use diagram::DiagramGenerator;
pub use docs::DocumentationGenerator;

use crate::error::CoreResult;
use crate::fsutil;
use std::path::Path;
use tracing::{debug, warn};

/// Produces one derived file from a canonical database root.
pub trait ArtifactGenerator: Send + Sync {
    /// Short name used in logs and progress events.
    fn name(&self) -> &str;

    /// File written at the database root.
    fn file_name(&self) -> &str;

    /// Renders the file content. Must be deterministic for unchanged input.
    fn generate(&self, db_root: &Path) -> CoreResult<String>;
}

/// Outcome of one generator run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArtifactStatus {
    /// Content changed and was written.
    Written,
    /// Content matched the existing file.
    Unchanged,
    /// The generator failed; the message is the error text.
    Failed(String),
}

/// Per-generator report from [`ArtifactSet::run`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactReport {
    /// Generator name.
    pub name: String,
    /// File name.
    pub file_name: String,
    /// What happened.
    pub status: ArtifactStatus,
}

impl ArtifactReport {
    /// Returns true if the generator failed.
    pub fn is_failed(&self) -> bool {
        matches!(self.status, ArtifactStatus::Failed(_))
    }
}

/// An ordered set of generators.
#[derive(Default)]
pub struct ArtifactSet {
    generators: Vec<Box<dyn ArtifactGenerator>>,
}

impl std::fmt::Debug for ArtifactSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.generators.iter().map(|g| g.name()))
            .finish()
    }
}

impl ArtifactSet {
    /// Creates an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// The standard set: diagram and documentation, each optional.
    pub fn standard(diagram: bool, docs: bool) -> Self {
        let mut set = Self::new();
        if diagram {
            set = set.with(DiagramGenerator::new());
        }
        if docs {
            set = set.with(DocumentationGenerator::new());
        }
        set
    }

    /// Adds a generator.
    #[must_use]
    pub fn with(mut self, generator: impl ArtifactGenerator + 'static) -> Self {
        self.generators.push(Box::new(generator));
        self
    }

    /// File names of every generator, for carry-over across restructures.
    pub fn file_names(&self) -> Vec<String> {
        self.generators
            .iter()
            .map(|g| g.file_name().to_string())
            .collect()
    }

    /// Returns true if no generators are configured.
    pub fn is_empty(&self) -> bool {
        self.generators.is_empty()
    }

    /// Runs every generator against `db_root`.
    pub fn run(&self, db_root: &Path) -> Vec<ArtifactReport> {
        self.generators
            .iter()
            .map(|generator| {
                let status = match run_one(generator.as_ref(), db_root) {
                    Ok(true) => ArtifactStatus::Written,
                    Ok(false) => ArtifactStatus::Unchanged,
                    Err(e) => {
                        warn!(generator = generator.name(), error = %e, "artifact generation failed");
                        ArtifactStatus::Failed(e.to_string())
                    }
                };
                debug!(generator = generator.name(), ?status, "artifact finished");
                ArtifactReport {
                    name: generator.name().to_string(),
                    file_name: generator.file_name().to_string(),
                    status,
                }
            })
            .collect()
    }
}

fn run_one(generator: &dyn ArtifactGenerator, db_root: &Path) -> CoreResult<bool> {
    let content = generator.generate(db_root)?;
    let written = fsutil::write_if_changed(&db_root.join(generator.file_name()), content.as_bytes())?;
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CoreError;
    use std::fs;
    use tempfile::tempdir;

    struct Fixed(&'static str);

    impl ArtifactGenerator for Fixed {
        fn name(&self) -> &str {
            "fixed"
        }
        fn file_name(&self) -> &str {
            "FIXED.md"
        }
        fn generate(&self, _db_root: &Path) -> CoreResult<String> {
            Ok(self.0.to_string())
        }
    }

    struct Broken;

    impl ArtifactGenerator for Broken {
        fn name(&self) -> &str {
            "broken"
        }
        fn file_name(&self) -> &str {
            "BROKEN.md"
        }
        fn generate(&self, _db_root: &Path) -> CoreResult<String> {
            Err(CoreError::artifact("broken", "always"))
        }
    }

    #[test]
    fn failures_are_isolated() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("BROKEN.md"), "previous").unwrap();
        let set = ArtifactSet::new().with(Broken).with(Fixed("hello"));

        let reports = set.run(dir.path());
        assert!(reports[0].is_failed());
        assert_eq!(reports[1].status, ArtifactStatus::Written);
        assert_eq!(fs::read_to_string(dir.path().join("BROKEN.md")).unwrap(), "previous");
        assert_eq!(fs::read_to_string(dir.path().join("FIXED.md")).unwrap(), "hello");
    }

    #[test]
    fn unchanged_content_is_not_rewritten() {
        let dir = tempdir().unwrap();
        let set = ArtifactSet::new().with(Fixed("same"));
        assert_eq!(set.run(dir.path())[0].status, ArtifactStatus::Written);
        assert_eq!(set.run(dir.path())[0].status, ArtifactStatus::Unchanged);
    }

    #[test]
    fn standard_set() {
        assert_eq!(ArtifactSet::standard(true, true).file_names(), ["ERD.md", "SCRIPTS.md"]);
        assert_eq!(ArtifactSet::standard(false, true).file_names(), ["SCRIPTS.md"]);
        assert!(ArtifactSet::standard(false, false).is_empty());
    }
}
