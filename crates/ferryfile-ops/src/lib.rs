//! File operations engine for ferryfile.
//!
//! This crate executes copy, move, delete, rename and create requests on
//! per-pane background task queues, resolves name conflicts, keeps an
//! undo/redo history of everything it did, and bridges to the clipboard.
//! Observers follow progress through a broadcast channel of [`EngineEvent`]s.

mod backup;
mod clipboard;
mod conflict;
mod events;
mod fs;
mod progress;
mod queue;
mod report;
mod service;
mod undo;

pub use backup::{Backup, StagingBackup, TrashBackup};
pub use clipboard::{ClipboardBridge, FileClipboard, MemoryClipboard};
pub use conflict::{ConflictDecision, ConflictPrompt, ConflictResolver, auto_rename_path};
pub use events::{EngineEvent, EventSender, StackStatus, event_channel};
pub use fs::{FsPrimitives, LocalFs, copy_path, move_path, path_exists, remove_path};
pub use progress::{ItemOutcome, ItemResult, TaskId, TaskProgress, TaskReport, TaskState};
pub use queue::{TaskHandle, TaskQueue, TaskQueueBuilder};
pub use report::{ErrorSink, TracingErrorSink};
pub use service::{FileOperationService, OperationOutcome};
pub use undo::{UndoService, UndoableAction};

/// Default buffer size for the conflict prompt channel.
pub const PROMPT_CHANNEL_SIZE: usize = 16;
