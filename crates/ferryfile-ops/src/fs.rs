//! Filesystem primitives executed by the task queue worker.

use std::fs::{self, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use uuid::Uuid;

/// The single-item mutations the worker performs.
///
/// Every call runs on the queue's worker thread and may block.
pub trait FsPrimitives: Send + Sync + std::fmt::Debug {
    /// Copy `source` (file, directory or symlink) to `target`, which must not exist.
    ///
    /// Returns the number of bytes copied.
    fn copy(&self, source: &Path, target: &Path) -> io::Result<u64>;

    /// Move `source` to `target`, which must not exist.
    ///
    /// Returns the number of bytes moved.
    fn relocate(&self, source: &Path, target: &Path) -> io::Result<u64>;

    /// Remove a file, symlink or whole directory tree.
    fn remove(&self, path: &Path) -> io::Result<()>;

    /// Create one empty directory (the parent must exist).
    fn create_dir(&self, path: &Path) -> io::Result<()>;

    /// Create one empty file, failing if anything exists at `path`.
    fn create_file(&self, path: &Path) -> io::Result<()>;
}

/// Primitives backed by the local filesystem.
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalFs;

impl FsPrimitives for LocalFs {
    fn copy(&self, source: &Path, target: &Path) -> io::Result<u64> {
        copy_path(source, target)
    }

    fn relocate(&self, source: &Path, target: &Path) -> io::Result<u64> {
        move_path(source, target)
    }

    fn remove(&self, path: &Path) -> io::Result<()> {
        remove_path(path)
    }

    fn create_dir(&self, path: &Path) -> io::Result<()> {
        fs::create_dir(path)
    }

    fn create_file(&self, path: &Path) -> io::Result<()> {
        OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)
            .map(|_| ())
    }
}

/// Whether anything (including a dangling symlink) exists at `path`.
pub fn path_exists(path: &Path) -> bool {
    fs::symlink_metadata(path).is_ok()
}

/// Copy into a hidden staging sibling, then rename onto `target`.
///
/// `target` never holds a partially written item.
pub fn copy_path(source: &Path, target: &Path) -> io::Result<u64> {
    let staging = staging_path(target);

    match copy_any(source, &staging) {
        Ok(bytes) => {
            if let Err(e) = fs::rename(&staging, target) {
                let _ = remove_path(&staging);
                return Err(e);
            }
            Ok(bytes)
        }
        Err(e) => {
            if path_exists(&staging) {
                let _ = remove_path(&staging);
            }
            Err(e)
        }
    }
}

/// Rename when possible, falling back to staged copy + remove across devices.
///
/// Any other rename error is returned as is. If the source cannot be
/// removed after a cross-device copy, the copy is removed again so a failed
/// move leaves nothing behind at `target`.
pub fn move_path(source: &Path, target: &Path) -> io::Result<u64> {
    let size = get_size(source);

    match fs::rename(source, target) {
        Ok(()) => Ok(size),
        Err(e) if is_cross_device(&e) => copy_then_remove(source, target, remove_path),
        Err(e) => Err(e),
    }
}

fn is_cross_device(error: &io::Error) -> bool {
    #[cfg(unix)]
    if error.raw_os_error() == Some(libc::EXDEV) {
        return true;
    }
    error.kind() == io::ErrorKind::CrossesDevices
}

fn copy_then_remove(
    source: &Path,
    target: &Path,
    remove_source: impl FnOnce(&Path) -> io::Result<()>,
) -> io::Result<u64> {
    let bytes = copy_path(source, target)?;
    let entries = count_entries(source);

    if let Err(e) = remove_source(source) {
        // A directory may have lost some entries before the failure; the
        // copy then holds the only version of them.
        if count_entries(source) == entries {
            if let Err(cleanup) = remove_path(target) {
                tracing::warn!(
                    target: "ferry::fs",
                    path = %target.display(),
                    error = %cleanup,
                    "Could not remove copy left by a failed move"
                );
            }
        } else {
            tracing::warn!(
                target: "ferry::fs",
                source = %source.display(),
                target = %target.display(),
                "Move partly removed its source; keeping the copy"
            );
        }
        return Err(e);
    }
    Ok(bytes)
}

fn count_entries(path: &Path) -> usize {
    match fs::symlink_metadata(path) {
        Ok(m) if m.is_dir() => {
            1 + fs::read_dir(path)
                .map(|entries| entries.flatten().map(|e| count_entries(&e.path())).sum())
                .unwrap_or(0)
        }
        Ok(_) => 1,
        Err(_) => 0,
    }
}

/// Remove a file, symlink or directory tree.
pub fn remove_path(path: &Path) -> io::Result<()> {
    let metadata = fs::symlink_metadata(path)?;
    if metadata.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    }
}

fn staging_path(target: &Path) -> PathBuf {
    let name = target
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    target.with_file_name(format!(".{name}.ferry-part-{}", Uuid::new_v4().simple()))
}

fn copy_any(source: &Path, dest: &Path) -> io::Result<u64> {
    let metadata = fs::symlink_metadata(source)?;
    if metadata.file_type().is_symlink() {
        copy_symlink(source, dest)?;
        Ok(0)
    } else if metadata.is_dir() {
        copy_dir_recursive(source, dest)
    } else {
        fs::copy(source, dest)
    }
}

#[cfg(unix)]
fn copy_symlink(source: &Path, dest: &Path) -> io::Result<()> {
    let link = fs::read_link(source)?;
    std::os::unix::fs::symlink(link, dest)
}

#[cfg(not(unix))]
fn copy_symlink(source: &Path, dest: &Path) -> io::Result<()> {
    fs::copy(source, dest).map(|_| ())
}

fn copy_dir_recursive(source: &Path, dest: &Path) -> io::Result<u64> {
    fs::create_dir(dest)?;

    let mut total_bytes = 0u64;
    for entry in fs::read_dir(source)? {
        let entry = entry?;
        total_bytes += copy_any(&entry.path(), &dest.join(entry.file_name()))?;
    }

    Ok(total_bytes)
}

/// Get the size of a file or directory.
fn get_size(path: &Path) -> u64 {
    match fs::symlink_metadata(path) {
        Ok(m) if m.is_dir() => fs::read_dir(path)
            .map(|entries| entries.flatten().map(|e| get_size(&e.path())).sum())
            .unwrap_or(0),
        Ok(m) => m.len(),
        Err(_) => 0,
    }
}
