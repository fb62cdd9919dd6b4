//! Task states, per-item results and progress reporting types.

use std::path::PathBuf;

use ferryfile_core::{BackupHandle, OperationError, OperationKind};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifier of a queued task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskId(pub Uuid);

impl TaskId {
    /// Create a fresh random task id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.simple())
    }
}

/// Lifecycle of a queued task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskState {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl TaskState {
    /// Terminal states never change again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// What happened to one source of a batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ItemOutcome {
    /// The item was applied.
    ///
    /// `backup` holds whatever this item handed to the backup collaborator:
    /// the deleted item itself, or an item it displaced by overwriting.
    Success {
        final_path: PathBuf,
        backup: Option<BackupHandle>,
    },
    /// The item was deliberately left alone.
    Skipped { reason: String },
    /// The item could not be applied.
    Failed { error: OperationError },
}

/// Result for a single source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemResult {
    pub source: PathBuf,
    pub outcome: ItemOutcome,
}

impl ItemResult {
    /// The item was placed at `final_path`.
    pub fn success(source: PathBuf, final_path: PathBuf, backup: Option<BackupHandle>) -> Self {
        Self {
            source,
            outcome: ItemOutcome::Success { final_path, backup },
        }
    }

    /// The item was left alone.
    pub fn skipped(source: PathBuf, reason: impl Into<String>) -> Self {
        Self {
            source,
            outcome: ItemOutcome::Skipped {
                reason: reason.into(),
            },
        }
    }

    /// The item could not be processed.
    pub fn failed(source: PathBuf, error: OperationError) -> Self {
        Self {
            source,
            outcome: ItemOutcome::Failed { error },
        }
    }

    /// Whether the item was applied.
    pub fn is_success(&self) -> bool {
        matches!(self.outcome, ItemOutcome::Success { .. })
    }

    /// Where the item ended up, if it was applied.
    pub fn final_path(&self) -> Option<&PathBuf> {
        match &self.outcome {
            ItemOutcome::Success { final_path, .. } => Some(final_path),
            _ => None,
        }
    }
}

/// Progress of a running task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskProgress {
    pub id: TaskId,
    /// Number of sources processed so far.
    pub completed: usize,
    /// Total number of sources.
    pub total: usize,
    /// The source currently being processed.
    pub current: Option<PathBuf>,
}

impl TaskProgress {
    /// Get the progress as a percentage (0.0 to 100.0).
    pub fn percentage(&self) -> f64 {
        if self.total > 0 {
            (self.completed as f64 / self.total as f64) * 100.0
        } else {
            0.0
        }
    }
}

/// Final, immutable result of a task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskReport {
    pub id: TaskId,
    pub kind: OperationKind,
    pub state: TaskState,
    /// Number of sources in the request.
    pub total: usize,
    /// One entry per processed source, in submission order.
    pub results: Vec<ItemResult>,
    /// Total bytes copied or moved.
    pub bytes_processed: u64,
}

impl TaskReport {
    /// Terminal state for a finished batch.
    ///
    /// `Failed` only when nothing succeeded and something failed.
    pub fn terminal_state(results: &[ItemResult], cancelled: bool) -> TaskState {
        if cancelled {
            return TaskState::Cancelled;
        }
        let any_success = results.iter().any(ItemResult::is_success);
        let any_failure = results
            .iter()
            .any(|r| matches!(r.outcome, ItemOutcome::Failed { .. }));
        if !any_success && any_failure {
            TaskState::Failed
        } else {
            TaskState::Completed
        }
    }

    /// Number of items applied.
    pub fn succeeded(&self) -> usize {
        self.results.iter().filter(|r| r.is_success()).count()
    }

    /// Number of items skipped.
    pub fn skipped(&self) -> usize {
        self.results
            .iter()
            .filter(|r| matches!(r.outcome, ItemOutcome::Skipped { .. }))
            .count()
    }

    /// Number of items that failed.
    pub fn failed(&self) -> usize {
        self.results
            .iter()
            .filter(|r| matches!(r.outcome, ItemOutcome::Failed { .. }))
            .count()
    }

    /// Sources never reached because the task was cancelled.
    pub fn not_processed(&self) -> usize {
        self.total.saturating_sub(self.results.len())
    }

    /// Errors of failed items.
    pub fn errors(&self) -> impl Iterator<Item = &OperationError> {
        self.results.iter().filter_map(|r| match &r.outcome {
            ItemOutcome::Failed { error } => Some(error),
            _ => None,
        })
    }

    /// Check if every item was applied.
    pub fn is_success(&self) -> bool {
        self.state == TaskState::Completed && self.succeeded() == self.total
    }

    /// Get a human-readable summary of the task.
    pub fn summary(&self) -> String {
        let mut summary = format!("{} {} items", self.kind.past_tense(), self.succeeded());
        let skipped = self.skipped();
        if skipped > 0 {
            summary.push_str(&format!(", {skipped} skipped"));
        }
        let failed = self.failed();
        if failed > 0 {
            summary.push_str(&format!(", {failed} failed"));
        }
        if self.state == TaskState::Cancelled {
            summary.push_str(&format!(" (cancelled, {} not processed)", self.not_processed()));
        }
        summary
    }
}
