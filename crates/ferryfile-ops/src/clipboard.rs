//! Clipboard collaborators.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use ferryfile_core::{ClipboardPayload, OpsError};

/// Read/write access to the system clipboard.
pub trait ClipboardBridge: Send + Sync + std::fmt::Debug {
    fn write(&self, payload: &ClipboardPayload) -> Result<(), OpsError>;

    /// Current payload; `None` when the clipboard holds no file list.
    fn read(&self) -> Result<Option<ClipboardPayload>, OpsError>;

    fn clear(&self) -> Result<(), OpsError>;

    /// Whether `path` is cut and waiting to be moved by a paste.
    fn is_pending_removal(&self, path: &Path) -> bool {
        matches!(self.read(), Ok(Some(payload)) if payload.is_pending_removal(path))
    }
}

/// In-process clipboard.
#[derive(Debug, Default)]
pub struct MemoryClipboard {
    payload: Mutex<Option<ClipboardPayload>>,
}

impl MemoryClipboard {
    /// Create an empty clipboard.
    pub fn new() -> Self {
        Self::default()
    }
}

impl ClipboardBridge for MemoryClipboard {
    fn write(&self, payload: &ClipboardPayload) -> Result<(), OpsError> {
        *self.payload.lock().unwrap_or_else(PoisonError::into_inner) = Some(payload.clone());
        Ok(())
    }

    fn read(&self) -> Result<Option<ClipboardPayload>, OpsError> {
        Ok(self
            .payload
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone())
    }

    fn clear(&self) -> Result<(), OpsError> {
        *self.payload.lock().unwrap_or_else(PoisonError::into_inner) = None;
        Ok(())
    }
}

/// Clipboard kept in a text file using the copied-files format, so that
/// separate processes can share it.
#[derive(Debug, Clone)]
pub struct FileClipboard {
    path: PathBuf,
}

impl FileClipboard {
    /// Use the file at `path`; it is created on the first write.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Location of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn clipboard_error(&self, e: io::Error) -> OpsError {
        OpsError::Clipboard {
            message: format!("{}: {e}", self.path.display()),
        }
    }
}

impl ClipboardBridge for FileClipboard {
    fn write(&self, payload: &ClipboardPayload) -> Result<(), OpsError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| self.clipboard_error(e))?;
        }
        fs::write(&self.path, payload.to_copied_files()).map_err(|e| self.clipboard_error(e))
    }

    fn read(&self) -> Result<Option<ClipboardPayload>, OpsError> {
        let text = match fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(self.clipboard_error(e)),
        };
        match ClipboardPayload::from_copied_files(&text) {
            Ok(payload) => Ok(Some(payload)),
            Err(OpsError::EmptyClipboard) => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn clear(&self) -> Result<(), OpsError> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(self.clipboard_error(e)),
        }
    }
}
