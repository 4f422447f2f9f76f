//! Filesystem helpers shared by the restructurer and the metadata store.

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::Path;
use tracing::warn;
use walkdir::WalkDir;

/// Recursively copies `src` into `dst`, creating `dst` if needed.
///
/// Symlinks are never followed or dereferenced. They, and any other
/// non-regular entries, are skipped with a warning.
pub fn copy_dir_all(src: &Path, dst: &Path) -> io::Result<()> {
    fs::create_dir_all(dst)?;
    for entry in WalkDir::new(src).follow_links(false).min_depth(1) {
        let entry = entry?;
        let relative = entry
            .path()
            .strip_prefix(src)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
        let to = dst.join(relative);
        let file_type = entry.file_type();
        if file_type.is_dir() {
            fs::create_dir_all(&to)?;
        } else if file_type.is_file() {
            fs::copy(entry.path(), &to)?;
        } else {
            warn!(path = %entry.path().display(), "skipping symlink or special file");
        }
    }
    Ok(())
}

/// Removes a directory tree, treating a missing path as success.
pub fn remove_dir_if_exists(path: &Path) -> io::Result<()> {
    match fs::remove_dir_all(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

/// Writes `data` to `path` atomically.
///
/// 1. Write to a temporary sibling
/// 2. Sync it to disk
/// 3. Rename over the destination
/// 4. Fsync the parent directory
pub fn write_atomic(path: &Path, data: &[u8]) -> io::Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "path has no parent"))?;
    let name = path
        .file_name()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "path has no file name"))?;
    let temp_path = parent.join(format!(".{}.tmp", name.to_string_lossy()));

    let mut file = File::create(&temp_path)?;
    file.write_all(data)?;
    file.sync_all()?;
    drop(file);

    fs::rename(&temp_path, path)?;
    sync_directory(parent)
}

/// Writes `data` only if the file content differs. Returns true if written.
pub fn write_if_changed(path: &Path, data: &[u8]) -> io::Result<bool> {
    match fs::read(path) {
        Ok(existing) if existing == data => Ok(false),
        Ok(_) => write_atomic(path, data).map(|()| true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => write_atomic(path, data).map(|()| true),
        Err(e) => Err(e),
    }
}

/// Fsyncs a directory so renames inside it are durable.
///
/// On Windows, directory handles cannot be fsynced, so this is a no-op.
#[cfg(unix)]
pub fn sync_directory(path: &Path) -> io::Result<()> {
    let dir = File::open(path)?;
    dir.sync_all()
}

/// Fsyncs a directory so renames inside it are durable.
///
/// On Windows, directory handles cannot be fsynced, so this is a no-op.
#[cfg(not(unix))]
pub fn sync_directory(_path: &Path) -> io::Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn copy_nested_tree() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("src");
        fs::create_dir_all(src.join("a/b")).unwrap();
        fs::write(src.join("top.txt"), "top").unwrap();
        fs::write(src.join("a/b/leaf.txt"), "leaf").unwrap();

        let dst = dir.path().join("dst");
        copy_dir_all(&src, &dst).unwrap();

        assert_eq!(fs::read_to_string(dst.join("top.txt")).unwrap(), "top");
        assert_eq!(fs::read_to_string(dst.join("a/b/leaf.txt")).unwrap(), "leaf");
    }

    #[cfg(unix)]
    #[test]
    fn copy_skips_symlink_loop() {
        use std::os::unix::fs::symlink;

        let dir = tempdir().unwrap();
        let src = dir.path().join("src");
        let db = src.join("Objects/database_db1");
        fs::create_dir_all(&db).unwrap();
        fs::write(db.join("database.yaml"), "name: Shop").unwrap();
        symlink("..", db.join("up")).unwrap();

        let dst = dir.path().join("dst");
        copy_dir_all(&src, &dst).unwrap();

        let copied = dst.join("Objects/database_db1");
        assert_eq!(
            fs::read_to_string(copied.join("database.yaml")).unwrap(),
            "name: Shop"
        );
        assert!(fs::symlink_metadata(copied.join("up")).is_err());
    }

    #[cfg(unix)]
    #[test]
    fn copy_never_reads_through_outside_links() {
        use std::os::unix::fs::symlink;

        let dir = tempdir().unwrap();
        let outside = dir.path().join("outside");
        fs::create_dir_all(&outside).unwrap();
        fs::write(outside.join("secret.txt"), "TOKEN=abc").unwrap();

        let src = dir.path().join("src");
        fs::create_dir_all(&src).unwrap();
        fs::write(src.join("kept.txt"), "kept").unwrap();
        symlink(outside.join("secret.txt"), src.join("link")).unwrap();
        symlink(&outside, src.join("linked_dir")).unwrap();

        let dst = dir.path().join("dst");
        copy_dir_all(&src, &dst).unwrap();

        assert_eq!(fs::read_to_string(dst.join("kept.txt")).unwrap(), "kept");
        assert!(fs::symlink_metadata(dst.join("link")).is_err());
        assert!(fs::symlink_metadata(dst.join("linked_dir")).is_err());
    }

    #[test]
    fn remove_missing_is_ok() {
        let dir = tempdir().unwrap();
        remove_dir_if_exists(&dir.path().join("nope")).unwrap();
    }

    #[test]
    fn atomic_write_leaves_no_temp() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("record.json");
        write_atomic(&path, b"{}").unwrap();
        write_atomic(&path, b"{\"a\":1}").unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "{\"a\":1}");
        let names: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(names.len(), 1);
    }

    #[test]
    fn write_if_changed_skips_identical() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ERD.md");
        assert!(write_if_changed(&path, b"x").unwrap());
        assert!(!write_if_changed(&path, b"x").unwrap());
        assert!(write_if_changed(&path, b"y").unwrap());
    }
}
