//! Backup collaborators that make deletion and overwriting reversible.

use std::fs;
use std::path::{Path, PathBuf};

use ferryfile_core::{BackupHandle, OpsError};
use uuid::Uuid;

use crate::fs::{move_path, path_exists};

/// Keeps removed items so they can be put back later.
///
/// Calls run on the queue's worker thread and may block.
pub trait Backup: Send + Sync + std::fmt::Debug {
    /// Take `path` out of place and return a handle to it.
    fn backup(&self, path: &Path) -> Result<BackupHandle, OpsError>;

    /// Put the item back at its original path.
    fn restore(&self, handle: &BackupHandle) -> Result<PathBuf, OpsError>;
}

/// Moves items into per-handle slots under a backup directory.
#[derive(Debug, Clone)]
pub struct StagingBackup {
    root: PathBuf,
}

impl StagingBackup {
    /// Create a backup store rooted at `root` (created on first use).
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Directory holding the backed-up items.
    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl Backup for StagingBackup {
    fn backup(&self, path: &Path) -> Result<BackupHandle, OpsError> {
        if !path_exists(path) {
            return Err(OpsError::PathNotFound {
                path: path.to_path_buf(),
            });
        }

        let id = Uuid::new_v4().simple().to_string();
        let slot = self.root.join(&id);
        fs::create_dir_all(&slot).map_err(|e| OpsError::io(&slot, e))?;

        let name = path.file_name().unwrap_or(path.as_os_str());
        let stored = slot.join(name);
        if let Err(e) = move_path(path, &stored) {
            let _ = fs::remove_dir(&slot);
            return Err(OpsError::io(path, e));
        }

        tracing::debug!(target: "ferry::backup", id = %id, path = %path.display(), "Backed up item");

        Ok(BackupHandle {
            id,
            original: path.to_path_buf(),
            stored,
        })
    }

    fn restore(&self, handle: &BackupHandle) -> Result<PathBuf, OpsError> {
        if !path_exists(&handle.stored) {
            return Err(OpsError::PathNotFound {
                path: handle.stored.clone(),
            });
        }
        if path_exists(&handle.original) {
            return Err(OpsError::NameCollision {
                path: handle.original.clone(),
            });
        }

        if let Some(parent) = handle.original.parent() {
            fs::create_dir_all(parent).map_err(|e| OpsError::io(parent, e))?;
        }
        move_path(&handle.stored, &handle.original)
            .map_err(|e| OpsError::io(&handle.original, e))?;

        if let Some(slot) = handle.stored.parent() {
            let _ = fs::remove_dir(slot);
        }

        Ok(handle.original.clone())
    }
}

/// Uses the platform trash.
///
/// Restoring needs a trash that can be listed, which excludes macOS.
#[derive(Debug, Default, Clone, Copy)]
pub struct TrashBackup;

impl Backup for TrashBackup {
    fn backup(&self, path: &Path) -> Result<BackupHandle, OpsError> {
        if !path_exists(path) {
            return Err(OpsError::PathNotFound {
                path: path.to_path_buf(),
            });
        }

        trash::delete(path).map_err(|e| OpsError::Backup {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;

        Ok(BackupHandle {
            id: Uuid::new_v4().simple().to_string(),
            original: path.to_path_buf(),
            stored: PathBuf::new(),
        })
    }

    #[cfg(any(
        target_os = "windows",
        all(
            unix,
            not(target_os = "macos"),
            not(target_os = "ios"),
            not(target_os = "android")
        )
    ))]
    fn restore(&self, handle: &BackupHandle) -> Result<PathBuf, OpsError> {
        let backup_error = |message: String| OpsError::Backup {
            path: handle.original.clone(),
            message,
        };

        if path_exists(&handle.original) {
            return Err(OpsError::NameCollision {
                path: handle.original.clone(),
            });
        }

        let item = trash::os_limited::list()
            .map_err(|e| backup_error(e.to_string()))?
            .into_iter()
            .filter(|item| item.original_path() == handle.original)
            .max_by_key(|item| item.time_deleted)
            .ok_or_else(|| OpsError::PathNotFound {
                path: handle.original.clone(),
            })?;

        trash::os_limited::restore_all([item]).map_err(|e| backup_error(e.to_string()))?;
        Ok(handle.original.clone())
    }

    #[cfg(not(any(
        target_os = "windows",
        all(
            unix,
            not(target_os = "macos"),
            not(target_os = "ios"),
            not(target_os = "android")
        )
    )))]
    fn restore(&self, handle: &BackupHandle) -> Result<PathBuf, OpsError> {
        Err(OpsError::Backup {
            path: handle.original.clone(),
            message: "restoring from the platform trash is not supported here".to_string(),
        })
    }
}
