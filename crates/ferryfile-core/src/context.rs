//! Where an operation lands: a plain directory or a library of locations.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::OpsError;

/// A named aggregate of physical directories.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LibraryContext {
    /// Identifier of the library (e.g. "Documents").
    pub library_id: String,
    /// Physical locations, in preference order.
    pub ordered_locations: Vec<PathBuf>,
    /// Location explicitly chosen for new items, if any.
    #[serde(default)]
    pub save_location: Option<PathBuf>,
}

impl LibraryContext {
    /// Create a library context with no explicit save location.
    pub fn new(library_id: impl Into<String>, ordered_locations: Vec<PathBuf>) -> Self {
        Self {
            library_id: library_id.into(),
            ordered_locations,
            save_location: None,
        }
    }

    /// Prefer `location` for new items when it is one of the library's locations.
    pub fn with_save_location(mut self, location: impl Into<PathBuf>) -> Self {
        self.save_location = Some(location.into());
        self
    }
}

/// The target of an operation, constructed fresh from the current focus.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OperationContext {
    /// A concrete directory.
    Path { directory: PathBuf },
    /// A library spanning several directories.
    Library(LibraryContext),
}

impl OperationContext {
    /// Create a directory context.
    pub fn path(directory: impl Into<PathBuf>) -> Self {
        Self::Path {
            directory: directory.into(),
        }
    }

    /// Create a library context.
    pub fn library(library_id: impl Into<String>, ordered_locations: Vec<PathBuf>) -> Self {
        Self::Library(LibraryContext::new(library_id, ordered_locations))
    }

    /// Resolve the single directory new items should be written to.
    ///
    /// A path context must still exist. A library context yields its save
    /// location when that is usable, otherwise the first existing, writable
    /// location in order.
    pub fn resolve_destination_directory(&self) -> Result<PathBuf, OpsError> {
        match self {
            Self::Path { directory } => {
                if directory.is_dir() {
                    Ok(directory.clone())
                } else {
                    Err(OpsError::PathNotFound {
                        path: directory.clone(),
                    })
                }
            }
            Self::Library(library) => {
                let chosen = library
                    .save_location
                    .as_ref()
                    .filter(|loc| library.ordered_locations.contains(loc))
                    .filter(|loc| is_writable_dir(loc));

                chosen
                    .or_else(|| {
                        library
                            .ordered_locations
                            .iter()
                            .find(|loc| is_writable_dir(loc))
                    })
                    .cloned()
                    .ok_or_else(|| OpsError::NoWritableLocation {
                        library: library.library_id.clone(),
                    })
            }
        }
    }

    /// Whether `path` lives inside this context.
    pub fn contains(&self, path: &Path) -> bool {
        match self {
            Self::Path { directory } => path.starts_with(directory),
            Self::Library(library) => library
                .ordered_locations
                .iter()
                .any(|loc| path.starts_with(loc)),
        }
    }

    /// Human-readable name for messages.
    pub fn display_name(&self) -> String {
        match self {
            Self::Path { directory } => directory.display().to_string(),
            Self::Library(library) => format!("library '{}'", library.library_id),
        }
    }
}

fn is_writable_dir(path: &Path) -> bool {
    fs::metadata(path).map(|m| m.is_dir()).unwrap_or(false) && can_write(path)
}

/// Ask the OS whether this process may create entries in `path`.
#[cfg(unix)]
fn can_write(path: &Path) -> bool {
    use std::ffi::CString;
    use std::os::unix::ffi::OsStrExt;

    let Ok(c_path) = CString::new(path.as_os_str().as_bytes()) else {
        return false;
    };
    // SAFETY: `c_path` is a valid NUL-terminated string for the duration of the call.
    unsafe { libc::access(c_path.as_ptr(), libc::W_OK) == 0 }
}

#[cfg(not(unix))]
fn can_write(path: &Path) -> bool {
    fs::metadata(path)
        .map(|m| !m.permissions().readonly())
        .unwrap_or(false)
}
