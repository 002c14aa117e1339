//! Filesystem utilities.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::core::errors::Error;

/// Ensure a directory exists, creating it and its parents if necessary.
/// Succeeds if the directory already exists.
pub fn ensure_dir(path: &Path) -> Result<(), Error> {
    match fs::create_dir_all(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists && path.is_dir() => Ok(()),
        Err(e) => Err(Error::io(path, e)),
    }
}

/// Remove a directory and all its contents, if it exists.
///
/// Returns whether anything was removed. A directory that vanishes while
/// being removed counts as removed.
pub fn remove_dir_all_if_exists(path: &Path) -> Result<bool, Error> {
    if !path.exists() {
        return Ok(false);
    }
    match fs::remove_dir_all(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(true),
        Err(e) => Err(Error::io(path, e)),
    }
}

/// Write a string to a file, creating parent directories if needed.
pub fn write_string(path: &Path, contents: &str) -> Result<(), Error> {
    if let Some(parent) = path.parent() {
        ensure_dir(parent)?;
    }
    fs::write(path, contents).map_err(|e| Error::io(path, e))
}

/// Files under `root` (up to `max_depth`) whose name satisfies `pred`,
/// sorted.
pub fn find_files<F>(root: &Path, max_depth: usize, pred: F) -> Vec<PathBuf>
where
    F: Fn(&Path) -> bool,
{
    let mut files: Vec<PathBuf> = WalkDir::new(root)
        .max_depth(max_depth)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file() && pred(e.path()))
        .map(|e| e.into_path())
        .collect();
    files.sort();
    files
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_ensure_dir_is_idempotent() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("build").join("debug").join("gcc");

        ensure_dir(&dir).unwrap();
        ensure_dir(&dir).unwrap();
        assert!(dir.is_dir());
    }

    #[test]
    fn test_ensure_dir_over_file_fails() {
        let tmp = TempDir::new().unwrap();
        let file = tmp.path().join("taken");
        fs::write(&file, "").unwrap();

        let err = ensure_dir(&file).unwrap_err();
        assert!(matches!(err, Error::Io { .. }));
    }

    #[test]
    fn test_remove_dir_all_if_exists() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("build");
        write_string(&dir.join("a").join("CMakeCache.txt"), "").unwrap();

        assert!(remove_dir_all_if_exists(&dir).unwrap());
        assert!(!dir.exists());
        assert!(!remove_dir_all_if_exists(&dir).unwrap());
    }

    #[test]
    fn test_find_files() {
        let tmp = TempDir::new().unwrap();
        write_string(&tmp.path().join("bin").join("app"), "").unwrap();
        write_string(&tmp.path().join("lib").join("libcore.a"), "").unwrap();
        write_string(&tmp.path().join("notes.txt"), "").unwrap();

        let found = find_files(tmp.path(), 3, |p| p.extension().map_or(true, |e| e != "txt"));
        assert_eq!(
            found,
            vec![tmp.path().join("bin").join("app"), tmp.path().join("lib").join("libcore.a")]
        );
    }
}
