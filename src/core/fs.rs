//! Filesystem helpers shared by descriptors, config generation and hops

use super::{Result, UpgradeError};
use nix::unistd::{AccessFlags, access};
use regex::Regex;
use std::fs;
use std::path::{Path, PathBuf};

/// Directory exists and can be traversed by the current user
pub fn dir_accessible(path: &Path) -> bool {
    path.is_dir() && access(path, AccessFlags::X_OK).is_ok()
}

/// Regular file exists and is executable by the current user
pub fn is_executable(path: &Path) -> bool {
    path.is_file() && access(path, AccessFlags::X_OK).is_ok()
}

pub fn create_dir_all(path: &Path) -> Result<()> {
    fs::create_dir_all(path).map_err(|e| UpgradeError::io(path, e))
}

/// Remove a directory tree; a missing directory is not an error
pub fn remove_dir_all_if_exists(path: &Path) -> Result<bool> {
    match fs::remove_dir_all(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(UpgradeError::io(path, e)),
    }
}

/// Remove a single file; a missing file is not an error
pub fn remove_file_if_exists(path: &Path) -> Result<bool> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(UpgradeError::io(path, e)),
    }
}

/// Recursively copy `src` into `dst`, creating `dst`.
///
/// Symlinks are followed and copied as the files they point to.
pub fn copy_tree(src: &Path, dst: &Path) -> Result<()> {
    create_dir_all(dst)?;
    let entries = fs::read_dir(src).map_err(|e| UpgradeError::io(src, e))?;
    for entry in entries {
        let entry = entry.map_err(|e| UpgradeError::io(src, e))?;
        let from = entry.path();
        let to = dst.join(entry.file_name());
        if from.is_dir() {
            copy_tree(&from, &to)?;
        } else {
            fs::copy(&from, &to).map_err(|e| UpgradeError::io(&from, e))?;
        }
    }
    Ok(())
}

/// Delete the regular files directly inside `dir` whose names match `pattern`.
///
/// Returns the removed paths, sorted.
pub fn remove_matching_files(dir: &Path, pattern: &Regex) -> Result<Vec<PathBuf>> {
    let entries = fs::read_dir(dir).map_err(|e| UpgradeError::io(dir, e))?;
    let mut removed = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| UpgradeError::io(dir, e))?;
        let path = entry.path();
        let matches = entry
            .file_name()
            .to_str()
            .is_some_and(|name| pattern.is_match(name));
        if matches && path.is_file() {
            fs::remove_file(&path).map_err(|e| UpgradeError::io(&path, e))?;
            removed.push(path);
        }
    }
    removed.sort();
    Ok(removed)
}
