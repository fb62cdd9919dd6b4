//! Clipboard payload and its text encoding.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use percent_encoding::{AsciiSet, CONTROLS, percent_decode_str, percent_encode};
use serde::{Deserialize, Serialize};

use crate::OpsError;

/// Characters escaped in `file://` URIs.
const URI_ESCAPE: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}');

/// Whether a paste duplicates or relocates the items.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ClipboardMode {
    Copy,
    Cut,
}

impl std::fmt::Display for ClipboardMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Copy => write!(f, "copy"),
            Self::Cut => write!(f, "cut"),
        }
    }
}

/// Paths plus mode, as exchanged with the clipboard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClipboardPayload {
    pub paths: Vec<PathBuf>,
    pub mode: ClipboardMode,
}

impl ClipboardPayload {
    /// Create a copy payload.
    pub fn copy(paths: Vec<PathBuf>) -> Self {
        Self {
            paths,
            mode: ClipboardMode::Copy,
        }
    }

    /// Create a cut payload.
    pub fn cut(paths: Vec<PathBuf>) -> Self {
        Self {
            paths,
            mode: ClipboardMode::Cut,
        }
    }

    /// Whether `path` is waiting to be moved away by a paste.
    pub fn is_pending_removal(&self, path: &Path) -> bool {
        self.mode == ClipboardMode::Cut && self.paths.iter().any(|p| p == path)
    }

    /// Encode in the `x-special/gnome-copied-files` text format.
    ///
    /// The first line is `copy` or `cut`, followed by one `file://` URI per path.
    pub fn to_copied_files(&self) -> String {
        let mut out = self.mode.to_string();
        for path in &self.paths {
            out.push('\n');
            out.push_str("file://");
            out.extend(percent_encode(&path_bytes(path), URI_ESCAPE));
        }
        out
    }

    /// Decode the `x-special/gnome-copied-files` text format.
    ///
    /// Plain absolute paths are accepted in place of URIs.
    pub fn from_copied_files(text: &str) -> Result<Self, OpsError> {
        let mut lines = text
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'));

        let mode = match lines.next() {
            Some("copy") => ClipboardMode::Copy,
            Some("cut") => ClipboardMode::Cut,
            Some(other) => {
                return Err(OpsError::Clipboard {
                    message: format!("unknown clipboard mode '{other}'"),
                });
            }
            None => return Err(OpsError::EmptyClipboard),
        };

        let paths = lines.map(decode_uri).collect::<Result<Vec<_>, _>>()?;
        if paths.is_empty() {
            return Err(OpsError::EmptyClipboard);
        }

        Ok(Self { paths, mode })
    }
}

fn decode_uri(line: &str) -> Result<PathBuf, OpsError> {
    let Some(rest) = line.strip_prefix("file://") else {
        return Ok(PathBuf::from(line));
    };
    // Drop an optional authority ("file://localhost/...").
    let path = match rest.find('/') {
        Some(idx) => &rest[idx..],
        None => {
            return Err(OpsError::Clipboard {
                message: format!("malformed file URI '{line}'"),
            });
        }
    };
    let bytes: Vec<u8> = percent_decode_str(path).collect();
    let decoded = os_string(bytes).map_err(|e| OpsError::Clipboard {
        message: format!("invalid path in '{line}': {e}"),
    })?;
    Ok(PathBuf::from(decoded))
}

/// Raw bytes of `path`, so names that are not UTF-8 survive the round trip.
#[cfg(unix)]
fn path_bytes(path: &Path) -> Vec<u8> {
    use std::os::unix::ffi::OsStrExt;
    path.as_os_str().as_bytes().to_vec()
}

#[cfg(not(unix))]
fn path_bytes(path: &Path) -> Vec<u8> {
    path.to_string_lossy().into_owned().into_bytes()
}

#[cfg(unix)]
fn os_string(bytes: Vec<u8>) -> Result<OsString, std::string::FromUtf8Error> {
    use std::os::unix::ffi::OsStringExt;
    Ok(OsString::from_vec(bytes))
}

#[cfg(not(unix))]
fn os_string(bytes: Vec<u8>) -> Result<OsString, std::string::FromUtf8Error> {
    String::from_utf8(bytes).map(OsString::from)
}
