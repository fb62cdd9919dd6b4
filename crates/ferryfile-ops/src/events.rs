//! Events published to UI collaborators.

use std::path::PathBuf;

use ferryfile_core::OperationKind;
use tokio::sync::broadcast;

use crate::progress::{TaskId, TaskProgress, TaskReport};

/// Notifications from task queues and undo histories.
///
/// Observers drain these on their own event loop; nothing waits for them.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    TaskEnqueued {
        id: TaskId,
        kind: OperationKind,
        items: usize,
    },
    TaskStarted {
        id: TaskId,
    },
    TaskProgress(TaskProgress),
    /// An item is suspended waiting for a conflict decision.
    ConflictPending {
        id: TaskId,
        existing: PathBuf,
    },
    TaskCompleted(TaskReport),
    ActionUndone {
        description: String,
    },
    ActionRedone {
        description: String,
    },
    StackChanged(StackStatus),
}

/// Snapshot of an undo history for enabling/disabling affordances.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StackStatus {
    pub can_undo: bool,
    pub can_redo: bool,
    pub next_undo: Option<String>,
    pub next_redo: Option<String>,
}

/// Sending half shared by the components of a pane.
pub type EventSender = broadcast::Sender<EngineEvent>;

/// Create an event channel with room for `capacity` undelivered events.
pub fn event_channel(capacity: usize) -> EventSender {
    let (tx, _) = broadcast::channel(capacity.max(1));
    tx
}
