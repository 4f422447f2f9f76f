//! Thin wrapper over the git command line.

use crate::error::{CoreError, CoreResult};
use std::path::Path;
use std::process::Command;
use tracing::trace;

/// Runs git commands with a configurable executable.
#[derive(Debug, Clone)]
pub struct Git {
    binary: String,
}

impl Default for Git {
    fn default() -> Self {
        Self::new("git")
    }
}

impl Git {
    /// Creates a runner for `binary`.
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    /// Runs `git <args>` in `dir` and returns stdout.
    ///
    /// Interactive credential prompts are disabled; a command needing them fails.
    pub fn run(&self, dir: &Path, args: &[&str]) -> CoreResult<String> {
        trace!(dir = %dir.display(), ?args, "git");
        let output = Command::new(&self.binary)
            .args(args)
            .current_dir(dir)
            .env("GIT_TERMINAL_PROMPT", "0")
            .output()
            .map_err(|e| CoreError::git(subcommand(args), e.to_string()))?;

        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).into_owned())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let stdout = String::from_utf8_lossy(&output.stdout);
            let message = if stderr.trim().is_empty() {
                stdout.trim().to_string()
            } else {
                stderr.trim().to_string()
            };
            Err(CoreError::git(subcommand(args), message))
        }
    }

    /// Runs a command and reports only whether it succeeded.
    pub fn succeeds(&self, dir: &Path, args: &[&str]) -> bool {
        self.run(dir, args).is_ok()
    }
}

fn subcommand(args: &[&str]) -> String {
    args.iter()
        .find(|a| !a.starts_with('-'))
        .copied()
        .unwrap_or("")
        .to_string()
}
