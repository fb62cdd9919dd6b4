//! Error taxonomy for file operations.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur while planning or executing a file operation.
#[derive(Debug, Error)]
pub enum OpsError {
    /// A path the operation depends on does not exist.
    #[error("Path not found: {path}")]
    PathNotFound { path: PathBuf },

    /// None of a library's locations can receive new items.
    #[error("Library '{library}' has no writable location")]
    NoWritableLocation { library: String },

    /// The target name is already taken.
    #[error("'{path}' already exists")]
    NameCollision { path: PathBuf },

    /// Permission denied for a path.
    #[error("Permission denied: {path}")]
    PermissionDenied { path: PathBuf },

    /// The destination device ran out of space.
    #[error("Disk full while writing {path}")]
    DiskFull { path: PathBuf },

    /// A folder would be copied or moved into itself.
    #[error("Cannot copy or move {source_path} into {destination}")]
    CycleDetected {
        source_path: PathBuf,
        destination: PathBuf,
    },

    /// The operation was cancelled before it finished.
    #[error("Operation cancelled")]
    Cancelled,

    /// The operation cannot be undone.
    #[error("{message}")]
    Irreversible { message: String },

    /// A file name failed validation.
    #[error("Invalid name '{name}': {reason}")]
    InvalidName { name: String, reason: String },

    /// The request itself is malformed.
    #[error("Invalid request: {message}")]
    InvalidRequest { message: String },

    /// Paste was requested with nothing on the clipboard.
    #[error("Clipboard is empty")]
    EmptyClipboard,

    /// The clipboard payload could not be read or written.
    #[error("Clipboard error: {message}")]
    Clipboard { message: String },

    /// The backup collaborator failed.
    #[error("Backup error at {path}: {message}")]
    Backup { path: PathBuf, message: String },

    /// The task queue worker is gone.
    #[error("Task queue is closed")]
    QueueClosed,

    /// Generic I/O error.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl OpsError {
    /// Create an I/O error with path context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        let path = path.into();
        match source.kind() {
            std::io::ErrorKind::PermissionDenied => Self::PermissionDenied { path },
            std::io::ErrorKind::NotFound => Self::PathNotFound { path },
            std::io::ErrorKind::AlreadyExists => Self::NameCollision { path },
            std::io::ErrorKind::StorageFull => Self::DiskFull { path },
            _ => Self::Io { path, source },
        }
    }

    /// Create an invalid request error.
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest {
            message: message.into(),
        }
    }

    /// The kind of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::PathNotFound { .. } => ErrorKind::PathNotFound,
            Self::NoWritableLocation { .. } => ErrorKind::NoWritableLocation,
            Self::NameCollision { .. } => ErrorKind::NameCollision,
            Self::PermissionDenied { .. } => ErrorKind::PermissionDenied,
            Self::DiskFull { .. } => ErrorKind::DiskFull,
            Self::CycleDetected { .. } => ErrorKind::CycleDetected,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::Irreversible { .. } => ErrorKind::Irreversible,
            Self::InvalidName { .. } => ErrorKind::InvalidName,
            Self::InvalidRequest { .. } => ErrorKind::InvalidRequest,
            Self::EmptyClipboard | Self::Clipboard { .. } => ErrorKind::Clipboard,
            Self::Backup { .. } => ErrorKind::Backup,
            Self::QueueClosed => ErrorKind::QueueClosed,
            Self::Io { .. } => ErrorKind::Io,
        }
    }
}

/// Discriminant of [`OpsError`], cheap to copy into results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    PathNotFound,
    NoWritableLocation,
    NameCollision,
    PermissionDenied,
    DiskFull,
    CycleDetected,
    Cancelled,
    Irreversible,
    InvalidName,
    InvalidRequest,
    Clipboard,
    Backup,
    QueueClosed,
    Io,
}

/// How loudly a reported problem should be presented.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Severity {
    Info,
    Warning,
    Error,
    Critical,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Info => write!(f, "info"),
            Self::Warning => write!(f, "warning"),
            Self::Error => write!(f, "error"),
            Self::Critical => write!(f, "critical"),
        }
    }
}

/// A per-item failure recorded in a batch result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationError {
    /// The path that caused the error.
    pub path: PathBuf,
    /// Classified kind of the failure.
    pub kind: ErrorKind,
    /// A human-readable error message.
    pub message: String,
}

impl OperationError {
    /// Create a new operation error.
    pub fn new(path: impl Into<PathBuf>, kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            kind,
            message: message.into(),
        }
    }

    /// Capture an [`OpsError`] for the given path.
    pub fn from_error(path: impl Into<PathBuf>, error: &OpsError) -> Self {
        Self::new(path, error.kind(), error.to_string())
    }

    /// Turn a recorded failure back into an [`OpsError`] for reporting.
    pub fn into_error(self) -> OpsError {
        let path = self.path;
        match self.kind {
            ErrorKind::PathNotFound => OpsError::PathNotFound { path },
            ErrorKind::NameCollision => OpsError::NameCollision { path },
            ErrorKind::PermissionDenied => OpsError::PermissionDenied { path },
            ErrorKind::DiskFull => OpsError::DiskFull { path },
            ErrorKind::Cancelled => OpsError::Cancelled,
            _ => OpsError::Io {
                path,
                source: std::io::Error::other(self.message),
            },
        }
    }
}

impl std::fmt::Display for OperationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.path.display(), self.message)
    }
}
