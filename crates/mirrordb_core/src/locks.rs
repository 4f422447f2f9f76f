//! Per-server write locks.

use parking_lot::{Mutex, MutexGuard};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Serializes mutating access to each server working tree.
///
/// Locks are keyed by server directory so two targets that resolve to the
/// same tree always share a lock. Different servers never contend.
#[derive(Debug, Default)]
pub struct ServerLocks {
    locks: Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>,
}

impl ServerLocks {
    /// Creates an empty lock table.
    pub fn new() -> Self {
        Self::default()
    }

    fn entry(&self, server_dir: &Path) -> Arc<Mutex<()>> {
        self.locks
            .lock()
            .entry(server_dir.to_path_buf())
            .or_default()
            .clone()
    }

    /// Runs `f` while holding the lock for `server_dir`, blocking until it is free.
    pub fn with_lock<T>(&self, server_dir: &Path, f: impl FnOnce() -> T) -> T {
        let entry = self.entry(server_dir);
        let _guard: MutexGuard<'_, ()> = entry.lock();
        f()
    }

    /// Returns true if the lock for `server_dir` is currently held.
    ///
    /// Never creates an entry for an unknown server.
    pub fn is_locked(&self, server_dir: &Path) -> bool {
        self.locks
            .lock()
            .get(server_dir)
            .is_some_and(|lock| lock.is_locked())
    }
}
