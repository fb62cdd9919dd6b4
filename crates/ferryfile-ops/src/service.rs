//! High-level façade over the task queue, undo history and clipboard.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use ferryfile_core::{
    ClipboardMode, ClipboardPayload, ConflictPolicy, EngineConfig, FileOperationRequest,
    OperationContext, OperationKind, OpsError, Severity,
};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::backup::Backup;
use crate::clipboard::ClipboardBridge;
use crate::events::{EngineEvent, event_channel};
use crate::progress::{ItemOutcome, TaskReport, TaskState};
use crate::queue::TaskQueue;
use crate::report::ErrorSink;
use crate::undo::{UndoService, UndoableAction};

/// What a façade call did.
#[derive(Debug, Clone)]
pub struct OperationOutcome {
    /// Per-item results of the task.
    pub report: TaskReport,
    /// Whether an undo entry was recorded.
    pub undo_recorded: bool,
    /// Whether items were removed with no way back.
    pub irreversible: bool,
}

/// Entry point for one pane: copy, cut, paste, delete, rename, create,
/// undo and redo.
///
/// Every mutation, including undo and redo, is executed by the pane's
/// task queue. The destination context is resolved on each call.
#[derive(Debug)]
pub struct FileOperationService {
    queue: Arc<TaskQueue>,
    undo: UndoService,
    clipboard: Arc<dyn ClipboardBridge>,
    errors: Arc<dyn ErrorSink>,
}

impl FileOperationService {
    /// Wrap an already running queue.
    pub fn new(
        queue: TaskQueue,
        undo_capacity: usize,
        clipboard: Arc<dyn ClipboardBridge>,
        errors: Arc<dyn ErrorSink>,
    ) -> Self {
        let queue = Arc::new(queue);
        let undo = UndoService::new(Arc::clone(&queue), undo_capacity, Arc::clone(&errors));
        Self {
            queue,
            undo,
            clipboard,
            errors,
        }
    }

    /// Start a queue named `name` configured from `config` and wrap it.
    pub fn spawn(
        name: &str,
        config: &EngineConfig,
        clipboard: Arc<dyn ClipboardBridge>,
        backup: Arc<dyn Backup>,
        errors: Arc<dyn ErrorSink>,
    ) -> Result<Self, OpsError> {
        let queue = TaskQueue::builder(name)
            .with_config(config)
            .with_backup(backup)
            .with_events(event_channel(config.event_capacity))
            .spawn()?;
        Ok(Self::new(queue, config.undo_capacity, clipboard, errors))
    }

    /// The pane's task queue.
    pub fn queue(&self) -> &TaskQueue {
        &self.queue
    }

    /// The pane's undo/redo history.
    pub fn undo_service(&self) -> &UndoService {
        &self.undo
    }

    /// Receive engine events from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.queue.subscribe()
    }

    /// Put `items` on the clipboard for copying. Nothing is touched yet.
    pub fn copy(&self, items: Vec<PathBuf>) -> Result<(), OpsError> {
        self.write_clipboard(ClipboardPayload::copy(items))
    }

    /// Put `items` on the clipboard for moving. Nothing is touched yet.
    pub fn cut(&self, items: Vec<PathBuf>) -> Result<(), OpsError> {
        self.write_clipboard(ClipboardPayload::cut(items))
    }

    fn write_clipboard(&self, payload: ClipboardPayload) -> Result<(), OpsError> {
        if payload.paths.is_empty() {
            return Err(OpsError::invalid_request("no items selected"));
        }
        self.clipboard
            .write(&payload)
            .map_err(|e| self.reject("Could not write to the clipboard", e))
    }

    /// Whether `path` is cut and waiting to be moved.
    pub fn is_pending_removal(&self, path: &Path) -> bool {
        self.clipboard.is_pending_removal(path)
    }

    /// Copy or move the clipboard items into `context`.
    ///
    /// A cut payload is consumed: items that were moved (or deliberately
    /// skipped) are dropped from it, the rest stay cut.
    pub async fn paste(
        &self,
        context: &OperationContext,
        cancel: CancellationToken,
    ) -> Result<OperationOutcome, OpsError> {
        let payload = match self.clipboard.read() {
            Ok(Some(payload)) if !payload.paths.is_empty() => payload,
            Ok(_) => return Err(self.reject("Nothing to paste", OpsError::EmptyClipboard)),
            Err(e) => return Err(self.reject("Could not read the clipboard", e)),
        };
        let destination = context.resolve_destination_directory().map_err(|e| {
            self.reject(&format!("Cannot paste into {}", context.display_name()), e)
        })?;

        let request = match payload.mode {
            ClipboardMode::Copy => FileOperationRequest::copy(payload.paths.clone(), destination),
            ClipboardMode::Cut => FileOperationRequest::move_to(payload.paths.clone(), destination),
        };
        let outcome = self.submit(request, cancel).await?;

        if payload.mode == ClipboardMode::Cut {
            self.consume_cut(&payload, &outcome.report);
        }
        Ok(outcome)
    }

    fn consume_cut(&self, payload: &ClipboardPayload, report: &TaskReport) {
        let leftover: Vec<PathBuf> = payload
            .paths
            .iter()
            .filter(|path| {
                !report.results.iter().any(|r| {
                    &r.source == *path && !matches!(r.outcome, ItemOutcome::Failed { .. })
                })
            })
            .cloned()
            .collect();

        let updated = if leftover.is_empty() {
            self.clipboard.clear()
        } else {
            self.clipboard.write(&ClipboardPayload::cut(leftover))
        };
        if let Err(e) = updated {
            self.errors
                .report("Could not update the clipboard", Severity::Warning, Some(&e));
        }
    }

    /// Delete `items`; a non-permanent delete goes through the backup
    /// collaborator and can be undone.
    pub async fn delete(
        &self,
        items: Vec<PathBuf>,
        permanent: bool,
    ) -> Result<OperationOutcome, OpsError> {
        self.submit(
            FileOperationRequest::delete(items, permanent),
            CancellationToken::new(),
        )
        .await
    }

    /// Rename `item` within its directory.
    ///
    /// Fails with `NameCollision` when the name is taken, unless `overwrite`.
    pub async fn rename(
        &self,
        item: impl Into<PathBuf>,
        new_name: &str,
        overwrite: bool,
    ) -> Result<OperationOutcome, OpsError> {
        let policy = if overwrite {
            ConflictPolicy::Overwrite
        } else {
            ConflictPolicy::Skip
        };
        let request = FileOperationRequest::rename(item, new_name).with_conflict(policy);
        let outcome = self.submit(request, CancellationToken::new()).await?;

        let first_error = outcome.report.errors().next().cloned();
        match first_error {
            Some(error) => Err(error.into_error()),
            None => Ok(outcome),
        }
    }

    /// Create an empty folder in `context`.
    pub async fn new_folder(
        &self,
        context: &OperationContext,
        name: &str,
    ) -> Result<OperationOutcome, OpsError> {
        let parent = self.resolve(context)?;
        self.submit(
            FileOperationRequest::new_folder(parent, name),
            CancellationToken::new(),
        )
        .await
    }

    /// Create an empty file in `context`.
    pub async fn new_file(
        &self,
        context: &OperationContext,
        name: &str,
    ) -> Result<OperationOutcome, OpsError> {
        let parent = self.resolve(context)?;
        self.submit(
            FileOperationRequest::new_file(parent, name),
            CancellationToken::new(),
        )
        .await
    }

    /// Revert the most recent action once everything queued before it has run.
    pub async fn undo(&self) -> bool {
        self.undo.undo().await
    }

    /// Replay the most recently undone action once everything queued before it has run.
    pub async fn redo(&self) -> bool {
        self.undo.redo().await
    }

    fn resolve(&self, context: &OperationContext) -> Result<PathBuf, OpsError> {
        context.resolve_destination_directory().map_err(|e| {
            self.reject(&format!("Cannot write to {}", context.display_name()), e)
        })
    }

    /// Run a request to completion; the worker records it for undo.
    async fn submit(
        &self,
        request: FileOperationRequest,
        cancel: CancellationToken,
    ) -> Result<OperationOutcome, OpsError> {
        let description = request.describe();
        let handle = self
            .queue
            .enqueue_recorded(request.clone(), cancel)
            .map_err(|e| self.reject(&format!("Cannot {}", lowercase_first(&description)), e))?;
        let report = handle
            .wait()
            .await
            .map_err(|e| self.reject(&description, e))?;

        self.report_outcome(&description, &report);

        let undo_recorded = UndoableAction::from_report(&request, &report).is_some();
        let irreversible = request.kind == OperationKind::Delete
            && request.permanent
            && report.succeeded() > 0;
        if irreversible {
            let error = OpsError::Irreversible {
                message: format!("{} permanently deleted", report.succeeded()),
            };
            self.errors.report(
                &format!("{description}: this cannot be undone"),
                Severity::Info,
                Some(&error),
            );
        }

        Ok(OperationOutcome {
            report,
            undo_recorded,
            irreversible,
        })
    }

    fn report_outcome(&self, description: &str, report: &TaskReport) {
        let first_error = report.errors().next().cloned().map(|e| e.into_error());
        match report.state {
            TaskState::Cancelled => {
                self.errors.report(
                    &format!("{description} cancelled: {}", report.summary()),
                    Severity::Info,
                    Some(&OpsError::Cancelled),
                );
            }
            TaskState::Failed => {
                self.errors.report(
                    &format!("{description} failed: {}", report.summary()),
                    Severity::Error,
                    first_error.as_ref(),
                );
            }
            _ if report.failed() > 0 => {
                self.errors.report(
                    &format!("{description} partially failed: {}", report.summary()),
                    Severity::Warning,
                    first_error.as_ref(),
                );
            }
            _ => {}
        }
    }

    fn reject(&self, message: &str, error: OpsError) -> OpsError {
        self.errors.report(message, Severity::Error, Some(&error));
        error
    }
}

fn lowercase_first(text: &str) -> String {
    let mut chars = text.chars();
    match chars.next() {
        Some(first) => first.to_lowercase().chain(chars).collect(),
        None => String::new(),
    }
}
