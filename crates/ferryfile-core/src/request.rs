//! File operation requests.

use std::fs;
use std::path::{Path, PathBuf};

use indexmap::IndexSet;
use serde::{Deserialize, Serialize};

use crate::OpsError;
use crate::name::validate_filename;

/// The kind of operation being performed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OperationKind {
    Copy,
    Move,
    Delete,
    Rename,
    NewFolder,
    NewFile,
    /// Bring items back from the backup collaborator.
    Restore,
}

impl OperationKind {
    /// Past-tense verb used in batch summaries.
    pub fn past_tense(&self) -> &'static str {
        match self {
            Self::Copy => "Copied",
            Self::Move => "Moved",
            Self::Delete => "Deleted",
            Self::Rename => "Renamed",
            Self::NewFolder | Self::NewFile => "Created",
            Self::Restore => "Restored",
        }
    }
}

impl std::fmt::Display for OperationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Copy => write!(f, "Copy"),
            Self::Move => write!(f, "Move"),
            Self::Delete => write!(f, "Delete"),
            Self::Rename => write!(f, "Rename"),
            Self::NewFolder => write!(f, "New folder"),
            Self::NewFile => write!(f, "New file"),
            Self::Restore => write!(f, "Restore"),
        }
    }
}

/// How name collisions are handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum ConflictPolicy {
    /// Pick "name (n)" until free.
    #[default]
    AutoRename,
    /// Replace the existing item (it is handed to the backup collaborator first).
    Overwrite,
    /// Leave the existing item alone and skip the incoming one.
    Skip,
    /// Suspend the item and ask the UI collaborator.
    Ask,
}

impl std::str::FromStr for ConflictPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "auto-rename" | "rename" => Ok(Self::AutoRename),
            "overwrite" => Ok(Self::Overwrite),
            "skip" => Ok(Self::Skip),
            "ask" => Ok(Self::Ask),
            other => Err(format!("unknown conflict policy '{other}'")),
        }
    }
}

/// Reference to an item held by the backup collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BackupHandle {
    /// Unique identifier assigned by the collaborator.
    pub id: String,
    /// Where the item lived before it was backed up.
    pub original: PathBuf,
    /// Where the collaborator keeps it (empty when opaque, e.g. platform trash).
    pub stored: PathBuf,
}

/// A batch file operation to be executed by a task queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileOperationRequest {
    /// What to do.
    pub kind: OperationKind,
    /// Items to operate on (non-empty, deduplicated).
    pub sources: Vec<PathBuf>,
    /// Destination directory for Copy/Move, parent directory for NewFolder/NewFile.
    pub destination: Option<PathBuf>,
    /// Exact destination paths parallel to `sources`; overrides `destination`.
    #[serde(default)]
    pub targets: Vec<PathBuf>,
    /// New name for Rename/NewFolder/NewFile.
    #[serde(default)]
    pub new_name: Option<String>,
    /// Skip the backup collaborator when deleting.
    #[serde(default)]
    pub permanent: bool,
    /// Override the queue's conflict policy for this request.
    #[serde(default)]
    pub conflict: Option<ConflictPolicy>,
    /// Handles to restore, parallel to `sources` (Restore only).
    #[serde(default)]
    pub backups: Vec<BackupHandle>,
}

impl FileOperationRequest {
    fn new(kind: OperationKind, sources: Vec<PathBuf>) -> Self {
        Self {
            kind,
            sources: dedup(sources),
            destination: None,
            targets: Vec::new(),
            new_name: None,
            permanent: false,
            conflict: None,
            backups: Vec::new(),
        }
    }

    /// Create a copy request.
    pub fn copy(sources: Vec<PathBuf>, destination: impl Into<PathBuf>) -> Self {
        Self {
            destination: Some(destination.into()),
            ..Self::new(OperationKind::Copy, sources)
        }
    }

    /// Create a move request.
    pub fn move_to(sources: Vec<PathBuf>, destination: impl Into<PathBuf>) -> Self {
        Self {
            destination: Some(destination.into()),
            ..Self::new(OperationKind::Move, sources)
        }
    }

    /// Create a delete request.
    pub fn delete(targets: Vec<PathBuf>, permanent: bool) -> Self {
        Self {
            permanent,
            ..Self::new(OperationKind::Delete, targets)
        }
    }

    /// Create a rename request.
    pub fn rename(source: impl Into<PathBuf>, new_name: impl Into<String>) -> Self {
        Self {
            new_name: Some(new_name.into()),
            ..Self::new(OperationKind::Rename, vec![source.into()])
        }
    }

    /// Create a request for a new, empty folder.
    pub fn new_folder(parent: impl Into<PathBuf>, name: impl Into<String>) -> Self {
        Self::create(OperationKind::NewFolder, parent.into(), name.into())
    }

    /// Create a request for a new, empty file.
    pub fn new_file(parent: impl Into<PathBuf>, name: impl Into<String>) -> Self {
        Self::create(OperationKind::NewFile, parent.into(), name.into())
    }

    fn create(kind: OperationKind, parent: PathBuf, name: String) -> Self {
        Self {
            destination: Some(parent.clone()),
            new_name: Some(name.clone()),
            ..Self::new(kind, vec![parent.join(name)])
        }
    }

    /// Create a request restoring backed-up items to their original paths.
    pub fn restore(backups: Vec<BackupHandle>) -> Self {
        Self {
            sources: backups.iter().map(|b| b.original.clone()).collect(),
            backups,
            ..Self::new(OperationKind::Restore, Vec::new())
        }
    }

    /// Use exact destination paths, parallel to `sources`.
    pub fn with_targets(mut self, targets: Vec<PathBuf>) -> Self {
        self.targets = targets;
        self
    }

    /// Override the conflict policy for this request.
    pub fn with_conflict(mut self, policy: ConflictPolicy) -> Self {
        self.conflict = Some(policy);
        self
    }

    /// Number of items this request touches.
    pub fn item_count(&self) -> usize {
        self.sources.len()
    }

    /// Where the item at `index` should end up, before conflict resolution.
    pub fn target_for(&self, index: usize) -> Option<PathBuf> {
        if let Some(target) = self.targets.get(index) {
            return Some(target.clone());
        }
        let source = self.sources.get(index)?;
        match self.kind {
            OperationKind::Copy | OperationKind::Move => {
                let name = source.file_name()?;
                self.destination.as_ref().map(|d| d.join(name))
            }
            OperationKind::Rename => {
                let name = self.new_name.as_ref()?;
                Some(source.parent().unwrap_or(Path::new("")).join(name))
            }
            OperationKind::NewFolder | OperationKind::NewFile => Some(source.clone()),
            OperationKind::Restore => self.backups.get(index).map(|b| b.original.clone()),
            OperationKind::Delete => None,
        }
    }

    /// Human-readable description of the request.
    pub fn describe(&self) -> String {
        let count = self.sources.len();
        let items = if count == 1 {
            format!("'{}'", display_name(&self.sources[0]))
        } else {
            format!("{count} items")
        };
        match self.kind {
            OperationKind::Copy | OperationKind::Move => match &self.destination {
                Some(dest) => format!("{} {items} to {}", self.kind, dest.display()),
                None => format!("{} {items}", self.kind),
            },
            OperationKind::Delete if self.permanent => format!("Permanently delete {items}"),
            OperationKind::Delete => format!("Delete {items}"),
            OperationKind::Rename => format!(
                "Rename {items} to '{}'",
                self.new_name.as_deref().unwrap_or_default()
            ),
            OperationKind::NewFolder | OperationKind::NewFile | OperationKind::Restore => {
                format!("{} {items}", self.kind)
            }
        }
    }

    /// Check the request before any mutation happens.
    ///
    /// Rejects empty or duplicated sources, mismatched targets, invalid
    /// names, and copying or moving a folder into itself.
    pub fn validate(&self) -> Result<(), OpsError> {
        if self.sources.is_empty() {
            return Err(OpsError::invalid_request("no items to operate on"));
        }

        let unique: IndexSet<&PathBuf> = self.sources.iter().collect();
        if unique.len() != self.sources.len() {
            return Err(OpsError::invalid_request("duplicate items in request"));
        }

        if !self.targets.is_empty() && self.targets.len() != self.sources.len() {
            return Err(OpsError::invalid_request(
                "targets must match sources one to one",
            ));
        }

        match self.kind {
            OperationKind::Copy | OperationKind::Move => {
                if self.targets.is_empty() {
                    let destination = self.destination.as_ref().ok_or_else(|| {
                        OpsError::invalid_request("copy and move need a destination")
                    })?;
                    for source in &self.sources {
                        check_cycle(source, destination)?;
                    }
                } else {
                    for (source, target) in self.sources.iter().zip(&self.targets) {
                        if let Some(parent) = target.parent() {
                            check_cycle(source, parent)?;
                        }
                    }
                }
            }
            OperationKind::Rename | OperationKind::NewFolder | OperationKind::NewFile => {
                if self.sources.len() != 1 {
                    return Err(OpsError::invalid_request(format!(
                        "{} takes exactly one item",
                        self.kind
                    )));
                }
                let name = self
                    .new_name
                    .as_deref()
                    .ok_or_else(|| OpsError::invalid_request("a new name is required"))?;
                validate_filename(name)?;
            }
            OperationKind::Restore => {
                if self.backups.len() != self.sources.len() {
                    return Err(OpsError::invalid_request(
                        "restore needs one backup handle per item",
                    ));
                }
            }
            OperationKind::Delete => {}
        }

        Ok(())
    }
}

/// Fail when `destination` is `source` itself or lies beneath it.
pub fn check_cycle(source: &Path, destination: &Path) -> Result<(), OpsError> {
    let source_norm = normalize(source);
    let destination_norm = normalize(destination);
    if destination_norm.starts_with(&source_norm) {
        return Err(OpsError::CycleDetected {
            source_path: source.to_path_buf(),
            destination: destination.to_path_buf(),
        });
    }
    Ok(())
}

/// Canonicalize what exists; keep the rest lexical.
fn normalize(path: &Path) -> PathBuf {
    if let Ok(canonical) = fs::canonicalize(path) {
        return canonical;
    }
    match (path.parent(), path.file_name()) {
        (Some(parent), Some(name)) if !parent.as_os_str().is_empty() => normalize(parent).join(name),
        _ => path.to_path_buf(),
    }
}

fn dedup(paths: Vec<PathBuf>) -> Vec<PathBuf> {
    paths.into_iter().collect::<IndexSet<_>>().into_iter().collect()
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string())
}
