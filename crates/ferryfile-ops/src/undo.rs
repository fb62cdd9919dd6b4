//! Bounded, linear undo/redo history of reversible file operations.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use ferryfile_core::{
    BackupHandle, ConflictPolicy, FileOperationRequest, OperationKind, OpsError, Severity,
};
use serde::{Deserialize, Serialize};

use crate::events::{EngineEvent, EventSender, StackStatus};
use crate::progress::{ItemOutcome, TaskReport};
use crate::queue::TaskQueue;
use crate::report::ErrorSink;

/// A mutation that can be replayed forwards and backwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UndoableAction {
    /// Replays the successful part of the original request.
    pub forward: FileOperationRequest,
    /// Requests restoring the pre-forward state, executed in order.
    pub inverse: Vec<FileOperationRequest>,
    /// Human-readable description.
    pub description: String,
    /// When the forward operation completed.
    pub timestamp: DateTime<Utc>,
}

impl UndoableAction {
    /// Build the action for the successful items of a finished task.
    ///
    /// Returns `None` when nothing succeeded or the operation cannot be
    /// reversed (permanent delete, restore).
    pub fn from_report(request: &FileOperationRequest, report: &TaskReport) -> Option<Self> {
        let applied: Vec<(PathBuf, PathBuf, Option<BackupHandle>)> = report
            .results
            .iter()
            .filter_map(|r| match &r.outcome {
                ItemOutcome::Success { final_path, backup } => {
                    Some((r.source.clone(), final_path.clone(), backup.clone()))
                }
                _ => None,
            })
            .collect();
        if applied.is_empty() {
            return None;
        }

        let sources: Vec<PathBuf> = applied.iter().map(|(s, _, _)| s.clone()).collect();
        let finals: Vec<PathBuf> = applied.iter().map(|(_, f, _)| f.clone()).collect();
        let backups: Vec<BackupHandle> = applied.iter().filter_map(|(_, _, b)| b.clone()).collect();
        let restore_displaced = || {
            (!backups.is_empty()).then(|| FileOperationRequest::restore(backups.clone()))
        };

        let (forward, inverse) = match request.kind {
            OperationKind::Copy => {
                let forward = FileOperationRequest::copy(sources, destination_of(request))
                    .with_targets(finals.clone())
                    .with_conflict(ConflictPolicy::Overwrite);
                let mut inverse = vec![FileOperationRequest::delete(finals, false)];
                inverse.extend(restore_displaced());
                (forward, inverse)
            }
            OperationKind::Move => {
                let forward = FileOperationRequest::move_to(sources.clone(), destination_of(request))
                    .with_targets(finals.clone())
                    .with_conflict(ConflictPolicy::Overwrite);
                let back_to = sources
                    .first()
                    .and_then(|s| s.parent())
                    .map(PathBuf::from)
                    .unwrap_or_default();
                let mut inverse = vec![
                    FileOperationRequest::move_to(finals, back_to)
                        .with_targets(sources)
                        .with_conflict(ConflictPolicy::Skip),
                ];
                inverse.extend(restore_displaced());
                (forward, inverse)
            }
            OperationKind::Rename => {
                let (source, final_path, _) = &applied[0];
                let new_name = file_name(final_path);
                let old_name = file_name(source);
                let mut forward = FileOperationRequest::rename(source, new_name);
                if !backups.is_empty() {
                    forward = forward.with_conflict(ConflictPolicy::Overwrite);
                }
                let mut inverse = vec![FileOperationRequest::rename(final_path, old_name)];
                inverse.extend(restore_displaced());
                (forward, inverse)
            }
            OperationKind::NewFolder | OperationKind::NewFile => {
                let final_path = &finals[0];
                let parent = final_path.parent().map(PathBuf::from).unwrap_or_default();
                let name = file_name(final_path);
                let forward = if request.kind == OperationKind::NewFolder {
                    FileOperationRequest::new_folder(parent, name)
                } else {
                    FileOperationRequest::new_file(parent, name)
                }
                .with_conflict(ConflictPolicy::Skip);
                (forward, vec![FileOperationRequest::delete(finals, false)])
            }
            OperationKind::Delete if !request.permanent => (
                FileOperationRequest::delete(sources, false),
                vec![FileOperationRequest::restore(backups)],
            ),
            OperationKind::Delete | OperationKind::Restore => return None,
        };

        Some(Self {
            description: describe(request, &forward),
            forward,
            inverse,
            timestamp: Utc::now(),
        })
    }
}

fn destination_of(request: &FileOperationRequest) -> PathBuf {
    request.destination.clone().unwrap_or_default()
}

fn file_name(path: &std::path::Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default()
}

fn describe(original: &FileOperationRequest, forward: &FileOperationRequest) -> String {
    match original.kind {
        OperationKind::NewFolder | OperationKind::NewFile => forward.describe(),
        _ if forward.sources.len() == original.sources.len() => original.describe(),
        _ => forward.describe(),
    }
}

#[derive(Debug)]
struct UndoStacks {
    undo: VecDeque<UndoableAction>,
    redo: Vec<UndoableAction>,
    capacity: usize,
}

impl UndoStacks {
    fn push_undo(&mut self, action: UndoableAction) {
        // Remove oldest entry if at capacity
        while self.undo.len() >= self.capacity {
            self.undo.pop_front();
        }
        self.undo.push_back(action);
    }

    fn status(&self) -> StackStatus {
        StackStatus {
            can_undo: !self.undo.is_empty(),
            can_redo: !self.redo.is_empty(),
            next_undo: self.undo.back().map(|a| a.description.clone()),
            next_redo: self.redo.last().map(|a| a.description.clone()),
        }
    }
}

/// The undo and redo stacks of one pane.
///
/// Owned by the pane's task queue. Its worker records finished tasks and
/// pops entries when it reaches an undo or redo step, so history changes
/// happen in the same order as the mutations they describe.
#[derive(Debug)]
pub(crate) struct History {
    stacks: Mutex<UndoStacks>,
    events: EventSender,
}

impl History {
    pub(crate) fn new(capacity: usize, events: EventSender) -> Self {
        Self {
            stacks: Mutex::new(UndoStacks {
                undo: VecDeque::new(),
                redo: Vec::new(),
                capacity: capacity.max(1),
            }),
            events,
        }
    }

    fn stacks(&self) -> MutexGuard<'_, UndoStacks> {
        self.stacks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn set_capacity(&self, capacity: usize) {
        let mut stacks = self.stacks();
        stacks.capacity = capacity.max(1);
        while stacks.undo.len() > stacks.capacity {
            stacks.undo.pop_front();
        }
    }

    /// Record a new action; clears the redo history.
    pub(crate) fn push(&self, action: UndoableAction) {
        {
            let mut stacks = self.stacks();
            stacks.redo.clear();
            stacks.push_undo(action);
        }
        self.notify_changed();
    }

    /// Build and push the action for a finished task, if it is reversible.
    pub(crate) fn record(&self, request: &FileOperationRequest, report: &TaskReport) -> bool {
        match UndoableAction::from_report(request, report) {
            Some(action) => {
                tracing::debug!(target: "ferry::undo", description = %action.description, "Recorded action");
                self.push(action);
                true
            }
            None => false,
        }
    }

    pub(crate) fn pop_undo(&self) -> Option<UndoableAction> {
        self.stacks().undo.pop_back()
    }

    pub(crate) fn pop_redo(&self) -> Option<UndoableAction> {
        self.stacks().redo.pop()
    }

    /// Put an undone action on the redo stack.
    pub(crate) fn undone(&self, action: UndoableAction) {
        let _ = self.events.send(EngineEvent::ActionUndone {
            description: action.description.clone(),
        });
        self.stacks().redo.push(action);
        self.notify_changed();
    }

    /// Put a replayed action back on the undo stack, keeping the redo history.
    pub(crate) fn redone(&self, action: UndoableAction) {
        let _ = self.events.send(EngineEvent::ActionRedone {
            description: action.description.clone(),
        });
        self.stacks().push_undo(action);
        self.notify_changed();
    }

    fn clear(&self) {
        {
            let mut stacks = self.stacks();
            stacks.undo.clear();
            stacks.redo.clear();
        }
        self.notify_changed();
    }

    pub(crate) fn notify_changed(&self) {
        let status = self.stacks().status();
        let _ = self.events.send(EngineEvent::StackChanged(status));
    }
}

/// What an undo or redo did once the worker reached it.
#[derive(Debug)]
pub(crate) enum HistoryStep {
    /// There was nothing to apply.
    Empty,
    /// The action was applied and moved to the other stack.
    Applied,
    /// The action could not be applied and was dropped.
    Discarded { description: String, error: OpsError },
}

/// Per-pane undo/redo history.
///
/// Undo and redo are steps on the pane's task queue: the entry to apply is
/// chosen when the worker dequeues the step, after everything submitted
/// before it has finished, and its requests run on the same worker.
#[derive(Debug)]
pub struct UndoService {
    queue: Arc<TaskQueue>,
    errors: Arc<dyn ErrorSink>,
}

impl UndoService {
    /// Wrap the history of `queue`, holding at most `capacity` actions.
    pub fn new(queue: Arc<TaskQueue>, capacity: usize, errors: Arc<dyn ErrorSink>) -> Self {
        queue.history().set_capacity(capacity);
        Self { queue, errors }
    }

    fn shared(&self) -> &History {
        self.queue.history()
    }

    /// Record a pre-built action; clears the redo history.
    pub fn push(&self, action: UndoableAction) {
        self.shared().push(action);
    }

    /// Revert the most recent action.
    ///
    /// Returns false when there is nothing to undo or the inverse could not
    /// be applied; a failed entry is discarded.
    pub async fn undo(&self) -> bool {
        let step = match self.queue.submit_undo() {
            Ok(step) => step.await.map_err(|_| OpsError::QueueClosed),
            Err(e) => Err(e),
        };
        self.settle("undo", step)
    }

    /// Re-apply the most recently undone action.
    pub async fn redo(&self) -> bool {
        let step = match self.queue.submit_redo() {
            Ok(step) => step.await.map_err(|_| OpsError::QueueClosed),
            Err(e) => Err(e),
        };
        self.settle("redo", step)
    }

    fn settle(&self, verb: &str, step: Result<HistoryStep, OpsError>) -> bool {
        match step {
            Ok(HistoryStep::Applied) => true,
            Ok(HistoryStep::Empty) => false,
            Ok(HistoryStep::Discarded { description, error }) => {
                self.errors.report(
                    &format!("Could not {verb} '{description}'; it was removed from history"),
                    Severity::Warning,
                    Some(&error),
                );
                false
            }
            Err(e) => {
                self.errors
                    .report(&format!("Could not {verb}"), Severity::Error, Some(&e));
                false
            }
        }
    }

    /// Whether there is an action to undo.
    pub fn can_undo(&self) -> bool {
        self.status().can_undo
    }

    /// Whether there is an undone action to redo.
    pub fn can_redo(&self) -> bool {
        self.status().can_redo
    }

    /// Description of the action the next undo reverts.
    pub fn next_undo_description(&self) -> Option<String> {
        self.status().next_undo
    }

    /// Description of the action the next redo replays.
    pub fn next_redo_description(&self) -> Option<String> {
        self.status().next_redo
    }

    /// Snapshot for enabling/disabling affordances.
    pub fn status(&self) -> StackStatus {
        self.shared().stacks().status()
    }

    /// Descriptions of undoable actions, most recent first.
    pub fn history(&self) -> Vec<String> {
        self.shared()
            .stacks()
            .undo
            .iter()
            .rev()
            .map(|a| a.description.clone())
            .collect()
    }

    /// Number of undoable actions.
    pub fn len(&self) -> usize {
        self.shared().stacks().undo.len()
    }

    /// Whether there is nothing to undo.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop both histories.
    pub fn clear(&self) {
        self.shared().clear();
    }
}
