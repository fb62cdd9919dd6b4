//! Conflict detection and resolution for file operations.

use std::path::{Path, PathBuf};

use ferryfile_core::ConflictPolicy;
use tokio::sync::oneshot;

use crate::fs::path_exists;
use crate::progress::TaskId;

/// What to do with an incoming item whose name is already taken.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConflictDecision {
    /// Replace the existing item.
    Overwrite,
    /// Leave the existing item and skip the incoming one.
    Skip,
    /// Place the incoming item under this name instead.
    Rename(String),
    /// Defer to the UI collaborator.
    Ask,
}

/// Stateless policy object deciding name collisions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConflictResolver {
    policy: ConflictPolicy,
}

impl ConflictResolver {
    /// Create a resolver applying `policy`.
    pub fn new(policy: ConflictPolicy) -> Self {
        Self { policy }
    }

    /// The policy in effect.
    pub fn policy(&self) -> ConflictPolicy {
        self.policy
    }

    /// This resolver, or one with the request's override.
    pub fn with_override(&self, policy: Option<ConflictPolicy>) -> Self {
        policy.map(Self::new).unwrap_or(*self)
    }

    /// Decide what to do when `incoming_name` collides with `existing`.
    ///
    /// `incoming_is_dir` describes the item being placed; directories keep
    /// dots in their names when auto-renamed.
    pub fn resolve(
        &self,
        existing: &Path,
        incoming_name: &str,
        incoming_is_dir: bool,
    ) -> ConflictDecision {
        match self.policy {
            ConflictPolicy::AutoRename => {
                let wanted = existing.with_file_name(incoming_name);
                let renamed = auto_rename_path(&wanted, incoming_is_dir);
                let name = renamed
                    .file_name()
                    .map(|n| n.to_string_lossy().to_string())
                    .unwrap_or_default();
                ConflictDecision::Rename(name)
            }
            ConflictPolicy::Overwrite => ConflictDecision::Overwrite,
            ConflictPolicy::Skip => ConflictDecision::Skip,
            ConflictPolicy::Ask => ConflictDecision::Ask,
        }
    }
}

/// A collision waiting for a decision from the UI collaborator.
#[derive(Debug)]
pub struct ConflictPrompt {
    /// Task the suspended item belongs to.
    pub task_id: TaskId,
    /// The incoming item.
    pub source: PathBuf,
    /// The item already occupying the name.
    pub existing: PathBuf,
    respond: oneshot::Sender<ConflictDecision>,
}

impl ConflictPrompt {
    pub(crate) fn new(
        task_id: TaskId,
        source: PathBuf,
        existing: PathBuf,
        respond: oneshot::Sender<ConflictDecision>,
    ) -> Self {
        Self {
            task_id,
            source,
            existing,
            respond,
        }
    }

    /// Resume the worker with `decision`. `Ask` is treated as `Skip`.
    pub fn answer(self, decision: ConflictDecision) {
        let _ = self.respond.send(decision);
    }
}

/// Generate an auto-renamed path to avoid conflicts.
///
/// For "file.txt", tries "file (1).txt", "file (2).txt", etc. Directories
/// keep dots in their names intact.
pub fn auto_rename_path(path: &Path, is_dir: bool) -> PathBuf {
    let parent = path.parent().unwrap_or(Path::new(""));
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let (stem, extension) = if is_dir {
        (file_name.clone(), None)
    } else {
        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default();
        let extension = path.extension().map(|e| e.to_string_lossy().to_string());
        (stem, extension)
    };

    let candidate = |suffix: String| match &extension {
        Some(ext) => parent.join(format!("{stem} {suffix}.{ext}")),
        None => parent.join(format!("{stem} {suffix}")),
    };

    for i in 1..10_000 {
        let new_path = candidate(format!("({i})"));
        if !path_exists(&new_path) {
            return new_path;
        }
    }

    // Fallback: use timestamp
    let timestamp = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0);
    candidate(format!("({timestamp})"))
}
