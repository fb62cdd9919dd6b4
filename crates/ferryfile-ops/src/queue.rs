//! Single-worker FIFO task queue.
//!
//! Each queue owns one background thread. Requests are executed strictly in
//! submission order, one source at a time, so at most one mutation is in
//! flight per queue. Cancellation is cooperative and only observed between
//! items. Undo and redo are steps in the same FIFO, and the pane's history
//! is only changed by the worker.

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use ferryfile_core::{
    ConflictPolicy, EngineConfig, FileOperationRequest, OperationError, OperationKind, OpsError,
    validate_filename,
};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::backup::{Backup, StagingBackup};
use crate::conflict::{ConflictDecision, ConflictPrompt, ConflictResolver};
use crate::events::{EngineEvent, EventSender, event_channel};
use crate::fs::{FsPrimitives, LocalFs, path_exists};
use crate::progress::{ItemOutcome, ItemResult, TaskId, TaskProgress, TaskReport, TaskState};
use crate::undo::{History, HistoryStep, UndoableAction};

/// Finished tasks whose state stays queryable by default.
const RETAINED_STATES: usize = 64;

/// Handle to a submitted task.
#[derive(Debug)]
pub struct TaskHandle {
    id: TaskId,
    token: CancellationToken,
    done: oneshot::Receiver<TaskReport>,
}

impl TaskHandle {
    /// Identifier used in events and by [`TaskQueue::cancel`].
    pub fn id(&self) -> TaskId {
        self.id
    }

    /// Ask the worker to stop at the next item boundary.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Token cancelling this task, for handing to other code.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Wait for the task to reach a terminal state.
    pub async fn wait(self) -> Result<TaskReport, OpsError> {
        self.done.await.map_err(|_| OpsError::QueueClosed)
    }
}

#[derive(Debug)]
struct TaskEntry {
    state: TaskState,
    token: CancellationToken,
}

/// Live tasks plus the most recently finished ones.
#[derive(Debug)]
struct Registry {
    tasks: HashMap<TaskId, TaskEntry>,
    finished: VecDeque<TaskId>,
    retain: usize,
}

impl Registry {
    fn new(retain: usize) -> Self {
        Self {
            tasks: HashMap::new(),
            finished: VecDeque::new(),
            retain,
        }
    }

    fn insert(&mut self, id: TaskId, token: CancellationToken) {
        self.tasks.insert(
            id,
            TaskEntry {
                state: TaskState::Pending,
                token,
            },
        );
    }

    fn set_running(&mut self, id: TaskId) {
        if let Some(entry) = self.tasks.get_mut(&id) {
            if !entry.state.is_terminal() {
                entry.state = TaskState::Running;
            }
        }
    }

    /// Store the terminal state and evict the oldest finished entries.
    fn finish(&mut self, id: TaskId, state: TaskState) {
        let Some(entry) = self.tasks.get_mut(&id) else {
            return;
        };
        entry.state = state;
        self.finished.push_back(id);
        while self.finished.len() > self.retain {
            if let Some(old) = self.finished.pop_front() {
                self.tasks.remove(&old);
            }
        }
    }
}

type SharedRegistry = Arc<Mutex<Registry>>;

fn lock(registry: &SharedRegistry) -> MutexGuard<'_, Registry> {
    registry.lock().unwrap_or_else(PoisonError::into_inner)
}

struct QueuedTask {
    id: TaskId,
    request: FileOperationRequest,
    token: CancellationToken,
    /// Record the finished task in the pane's undo history.
    record: bool,
    done: oneshot::Sender<TaskReport>,
}

enum Job {
    Task(QueuedTask),
    Undo(oneshot::Sender<HistoryStep>),
    Redo(oneshot::Sender<HistoryStep>),
}

/// Builder wiring a queue's collaborators before its worker starts.
#[derive(Debug)]
pub struct TaskQueueBuilder {
    name: String,
    resolver: ConflictResolver,
    conflict_timeout: Duration,
    fs: Arc<dyn FsPrimitives>,
    backup: Arc<dyn Backup>,
    prompts: Option<mpsc::Sender<ConflictPrompt>>,
    events: Option<EventSender>,
    undo_capacity: usize,
    retained_states: usize,
}

impl TaskQueueBuilder {
    /// Apply the conflict policy, timeout, undo capacity and backup directory from `config`.
    pub fn with_config(mut self, config: &EngineConfig) -> Self {
        self.resolver = ConflictResolver::new(config.conflict_policy);
        self.conflict_timeout = config.conflict_timeout();
        self.undo_capacity = config.undo_capacity;
        self.backup = Arc::new(StagingBackup::new(config.backup_dir_or_default()));
        self
    }

    /// Policy applied to requests without their own override.
    pub fn with_resolver(mut self, resolver: ConflictResolver) -> Self {
        self.resolver = resolver;
        self
    }

    /// How long an interactive conflict may stay unanswered.
    pub fn with_conflict_timeout(mut self, timeout: Duration) -> Self {
        self.conflict_timeout = timeout;
        self
    }

    /// Replace the filesystem primitives.
    pub fn with_fs(mut self, fs: Arc<dyn FsPrimitives>) -> Self {
        self.fs = fs;
        self
    }

    /// Collaborator keeping deleted and overwritten items.
    pub fn with_backup(mut self, backup: Arc<dyn Backup>) -> Self {
        self.backup = backup;
        self
    }

    /// Channel on which interactive conflicts are offered to the UI.
    pub fn with_prompts(mut self, prompts: mpsc::Sender<ConflictPrompt>) -> Self {
        self.prompts = Some(prompts);
        self
    }

    /// Publish events on an existing channel.
    pub fn with_events(mut self, events: EventSender) -> Self {
        self.events = Some(events);
        self
    }

    /// Most actions the pane's undo history holds.
    pub fn with_undo_capacity(mut self, capacity: usize) -> Self {
        self.undo_capacity = capacity;
        self
    }

    /// How many finished tasks [`TaskQueue::state`] still knows about.
    pub fn with_retained_states(mut self, count: usize) -> Self {
        self.retained_states = count;
        self
    }

    /// Start the worker thread.
    pub fn spawn(self) -> Result<TaskQueue, OpsError> {
        let (sender, receiver) = mpsc::unbounded_channel();
        let registry = Arc::new(Mutex::new(Registry::new(self.retained_states)));
        let events = self.events.unwrap_or_else(|| event_channel(256));
        let history = Arc::new(History::new(self.undo_capacity, events.clone()));

        let worker = Worker {
            queue: self.name.clone(),
            resolver: self.resolver,
            conflict_timeout: self.conflict_timeout,
            fs: self.fs,
            backup: self.backup,
            prompts: self.prompts,
            registry: Arc::clone(&registry),
            history: Arc::clone(&history),
            events: events.clone(),
        };

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .map_err(|e| OpsError::io(PathBuf::new(), e))?;

        std::thread::Builder::new()
            .name(format!("ferry-queue-{}", self.name))
            .spawn(move || runtime.block_on(worker.run(receiver)))
            .map_err(|e| OpsError::io(PathBuf::new(), e))?;

        tracing::debug!(target: "ferry::queue", queue = %self.name, "Task queue started");

        Ok(TaskQueue {
            name: self.name,
            sender,
            registry,
            history,
            events,
        })
    }
}

/// A FIFO of file operations executed by one background worker.
///
/// Dropping the queue lets the worker finish what was already submitted
/// and then exit.
#[derive(Debug)]
pub struct TaskQueue {
    name: String,
    sender: mpsc::UnboundedSender<Job>,
    registry: SharedRegistry,
    history: Arc<History>,
    events: EventSender,
}

impl TaskQueue {
    /// Start configuring a queue with local filesystem primitives.
    pub fn builder(name: impl Into<String>) -> TaskQueueBuilder {
        TaskQueueBuilder {
            name: name.into(),
            resolver: ConflictResolver::default(),
            conflict_timeout: Duration::from_secs(30),
            fs: Arc::new(LocalFs),
            backup: Arc::new(StagingBackup::new(
                std::env::temp_dir().join("ferryfile-backup"),
            )),
            prompts: None,
            events: None,
            undo_capacity: 100,
            retained_states: RETAINED_STATES,
        }
    }

    /// Name the queue was started with.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Sender the queue publishes its events on.
    pub fn events(&self) -> &EventSender {
        &self.events
    }

    /// Receive every event published from now on.
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    pub(crate) fn history(&self) -> &History {
        &self.history
    }

    /// Validate and append a request; returns immediately.
    pub fn enqueue(&self, request: FileOperationRequest) -> Result<TaskHandle, OpsError> {
        self.enqueue_with_token(request, CancellationToken::new())
    }

    /// Like [`TaskQueue::enqueue`], cancelled through the caller's token.
    pub fn enqueue_with_token(
        &self,
        request: FileOperationRequest,
        token: CancellationToken,
    ) -> Result<TaskHandle, OpsError> {
        self.submit(request, token, false)
    }

    /// Like [`TaskQueue::enqueue_with_token`]; the worker records the
    /// finished task in the undo history before reporting it.
    pub(crate) fn enqueue_recorded(
        &self,
        request: FileOperationRequest,
        token: CancellationToken,
    ) -> Result<TaskHandle, OpsError> {
        self.submit(request, token, true)
    }

    fn submit(
        &self,
        request: FileOperationRequest,
        token: CancellationToken,
        record: bool,
    ) -> Result<TaskHandle, OpsError> {
        request.validate()?;

        let id = TaskId::new();
        let (done_tx, done_rx) = oneshot::channel();
        let kind = request.kind;
        let items = request.item_count();

        lock(&self.registry).insert(id, token.clone());
        let _ = self.events.send(EngineEvent::TaskEnqueued { id, kind, items });

        let task = QueuedTask {
            id,
            request,
            token: token.clone(),
            record,
            done: done_tx,
        };
        if self.sender.send(Job::Task(task)).is_err() {
            lock(&self.registry).tasks.remove(&id);
            return Err(OpsError::QueueClosed);
        }

        tracing::debug!(target: "ferry::queue", queue = %self.name, %id, %kind, items, "Task enqueued");

        Ok(TaskHandle {
            id,
            token,
            done: done_rx,
        })
    }

    /// Queue an undo step; the entry is picked when the worker reaches it.
    pub(crate) fn submit_undo(&self) -> Result<oneshot::Receiver<HistoryStep>, OpsError> {
        self.submit_step(Job::Undo)
    }

    /// Queue a redo step; the entry is picked when the worker reaches it.
    pub(crate) fn submit_redo(&self) -> Result<oneshot::Receiver<HistoryStep>, OpsError> {
        self.submit_step(Job::Redo)
    }

    fn submit_step(
        &self,
        job: fn(oneshot::Sender<HistoryStep>) -> Job,
    ) -> Result<oneshot::Receiver<HistoryStep>, OpsError> {
        let (done_tx, done_rx) = oneshot::channel();
        self.sender
            .send(job(done_tx))
            .map_err(|_| OpsError::QueueClosed)?;
        Ok(done_rx)
    }

    /// Cancel a task by id. Returns false if it is unknown or already finished.
    pub fn cancel(&self, id: TaskId) -> bool {
        match lock(&self.registry).tasks.get(&id) {
            Some(entry) if !entry.state.is_terminal() => {
                entry.token.cancel();
                true
            }
            _ => false,
        }
    }

    /// Current state of a task.
    ///
    /// Finished tasks are forgotten once more than the retained number of
    /// later tasks have finished; their state is then `None`.
    pub fn state(&self, id: TaskId) -> Option<TaskState> {
        lock(&self.registry).tasks.get(&id).map(|entry| entry.state)
    }

    /// Number of tasks the queue currently tracks.
    pub fn tracked_tasks(&self) -> usize {
        lock(&self.registry).tasks.len()
    }
}

struct Worker {
    queue: String,
    resolver: ConflictResolver,
    conflict_timeout: Duration,
    fs: Arc<dyn FsPrimitives>,
    backup: Arc<dyn Backup>,
    prompts: Option<mpsc::Sender<ConflictPrompt>>,
    registry: SharedRegistry,
    history: Arc<History>,
    events: EventSender,
}

impl Worker {
    async fn run(self, mut receiver: mpsc::UnboundedReceiver<Job>) {
        while let Some(job) = receiver.recv().await {
            match job {
                Job::Task(task) => self.process(task).await,
                Job::Undo(done) => {
                    let _ = done.send(self.undo().await);
                }
                Job::Redo(done) => {
                    let _ = done.send(self.redo().await);
                }
            }
        }
        tracing::debug!(target: "ferry::queue", queue = %self.queue, "Task queue stopped");
    }

    fn progress(&self, id: TaskId, completed: usize, total: usize, current: Option<PathBuf>) {
        let _ = self.events.send(EngineEvent::TaskProgress(TaskProgress {
            id,
            completed,
            total,
            current,
        }));
    }

    async fn process(&self, task: QueuedTask) {
        let QueuedTask {
            id,
            request,
            token,
            record,
            done,
        } = task;
        let report = self.execute(id, &request, &token).await;
        if record {
            self.history.record(&request, &report);
        }
        let _ = done.send(report);
    }

    /// Run every item of a request and publish the terminal report.
    async fn execute(
        &self,
        id: TaskId,
        request: &FileOperationRequest,
        token: &CancellationToken,
    ) -> TaskReport {
        let total = request.item_count();
        let mut results = Vec::with_capacity(total);
        let mut bytes_processed = 0u64;
        let mut cancelled = token.is_cancelled();

        if !cancelled {
            lock(&self.registry).set_running(id);
            let _ = self.events.send(EngineEvent::TaskStarted { id });
            tracing::debug!(target: "ferry::queue", queue = %self.queue, %id, "Task started");

            let resolver = self.resolver.with_override(request.conflict);
            for (index, source) in request.sources.iter().enumerate() {
                if token.is_cancelled() {
                    cancelled = true;
                    break;
                }
                self.progress(id, index, total, Some(source.clone()));

                let (result, bytes) = self
                    .execute_item(id, request, index, source, &resolver, token)
                    .await;
                if let ItemOutcome::Failed { error } = &result.outcome {
                    tracing::warn!(target: "ferry::queue", %id, error = %error, "Item failed");
                }
                bytes_processed += bytes;
                results.push(result);
            }
            self.progress(id, results.len(), total, None);
        }

        let state = TaskReport::terminal_state(&results, cancelled);
        lock(&self.registry).finish(id, state);

        let report = TaskReport {
            id,
            kind: request.kind,
            state,
            total,
            results,
            bytes_processed,
        };
        tracing::info!(target: "ferry::queue", queue = %self.queue, %id, %state, "{}", report.summary());

        let _ = self.events.send(EngineEvent::TaskCompleted(report.clone()));
        report
    }

    /// Run a request from the history on this worker; every item must be applied.
    async fn replay(&self, request: &FileOperationRequest) -> Result<TaskReport, OpsError> {
        request.validate()?;

        let id = TaskId::new();
        let token = CancellationToken::new();
        lock(&self.registry).insert(id, token.clone());
        let _ = self.events.send(EngineEvent::TaskEnqueued {
            id,
            kind: request.kind,
            items: request.item_count(),
        });

        let report = self.execute(id, request, &token).await;
        match report.state {
            _ if report.is_success() => Ok(report),
            TaskState::Cancelled => Err(OpsError::Cancelled),
            _ => Err(report
                .errors()
                .next()
                .cloned()
                .map(|e| e.into_error())
                .unwrap_or_else(|| OpsError::invalid_request(report.summary()))),
        }
    }

    async fn undo(&self) -> HistoryStep {
        let Some(action) = self.history.pop_undo() else {
            return HistoryStep::Empty;
        };
        let description = action.description.clone();

        for request in &action.inverse {
            if let Err(error) = self.replay(request).await {
                tracing::warn!(target: "ferry::undo", %description, %error, "Undo failed");
                self.history.notify_changed();
                return HistoryStep::Discarded { description, error };
            }
        }

        tracing::debug!(target: "ferry::undo", %description, "Undid action");
        self.history.undone(action);
        HistoryStep::Applied
    }

    async fn redo(&self) -> HistoryStep {
        let Some(action) = self.history.pop_redo() else {
            return HistoryStep::Empty;
        };
        let description = action.description;

        let replayed = self.replay(&action.forward).await.and_then(|report| {
            UndoableAction::from_report(&action.forward, &report).ok_or_else(|| {
                OpsError::Irreversible {
                    message: "replay produced nothing to undo".to_string(),
                }
            })
        });

        match replayed {
            Ok(mut fresh) => {
                tracing::debug!(target: "ferry::undo", %description, "Redid action");
                fresh.description = description;
                self.history.redone(fresh);
                HistoryStep::Applied
            }
            Err(error) => {
                tracing::warn!(target: "ferry::undo", %description, %error, "Redo failed");
                self.history.notify_changed();
                HistoryStep::Discarded { description, error }
            }
        }
    }

    async fn execute_item(
        &self,
        id: TaskId,
        request: &FileOperationRequest,
        index: usize,
        source: &Path,
        resolver: &ConflictResolver,
        token: &CancellationToken,
    ) -> (ItemResult, u64) {
        match request.kind {
            OperationKind::Delete => (self.delete_item(request, source), 0),
            OperationKind::Restore => (self.restore_item(request, index, source), 0),
            OperationKind::Copy
            | OperationKind::Move
            | OperationKind::Rename
            | OperationKind::NewFolder
            | OperationKind::NewFile => {
                self.place_item(id, request, index, source, resolver, token)
                    .await
            }
        }
    }

    fn delete_item(&self, request: &FileOperationRequest, source: &Path) -> ItemResult {
        if request.permanent {
            match self.fs.remove(source) {
                Ok(()) => ItemResult::success(source.to_path_buf(), source.to_path_buf(), None),
                Err(e) => failed(source, &OpsError::io(source, e)),
            }
        } else {
            match self.backup.backup(source) {
                Ok(handle) => {
                    ItemResult::success(source.to_path_buf(), handle.stored.clone(), Some(handle))
                }
                Err(e) => failed(source, &e),
            }
        }
    }

    fn restore_item(
        &self,
        request: &FileOperationRequest,
        index: usize,
        source: &Path,
    ) -> ItemResult {
        let Some(handle) = request.backups.get(index) else {
            return failed(source, &OpsError::invalid_request("missing backup handle"));
        };
        match self.backup.restore(handle) {
            Ok(path) => ItemResult::success(source.to_path_buf(), path, None),
            Err(e) => failed(source, &e),
        }
    }

    /// Copy, move, rename or create one item, resolving name collisions.
    async fn place_item(
        &self,
        id: TaskId,
        request: &FileOperationRequest,
        index: usize,
        source: &Path,
        resolver: &ConflictResolver,
        token: &CancellationToken,
    ) -> (ItemResult, u64) {
        let Some(mut target) = request.target_for(index) else {
            return (
                failed(source, &OpsError::invalid_request("no destination for item")),
                0,
            );
        };

        if target == source {
            match request.kind {
                OperationKind::Move => {
                    return (
                        ItemResult::skipped(source.to_path_buf(), "already in destination"),
                        0,
                    );
                }
                OperationKind::Rename => {
                    return (ItemResult::success(source.to_path_buf(), target, None), 0);
                }
                _ => {}
            }
        }

        let mut displaced = None;
        if path_exists(&target) {
            let incoming_name = target
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default();

            let decision = match request.kind {
                OperationKind::Rename if resolver.policy() != ConflictPolicy::Overwrite => {
                    return (
                        failed(source, &OpsError::NameCollision { path: target }),
                        0,
                    );
                }
                _ => {
                    let is_dir = incoming_is_dir(request.kind, source);
                    resolver.resolve(&target, &incoming_name, is_dir)
                }
            };
            let decision = match decision {
                ConflictDecision::Ask => self.ask(id, source, &target, token).await,
                other => Some(other),
            };

            match decision {
                None => {
                    return (
                        ItemResult::skipped(source.to_path_buf(), "no conflict decision"),
                        0,
                    );
                }
                Some(ConflictDecision::Skip) | Some(ConflictDecision::Ask) => {
                    return (ItemResult::skipped(source.to_path_buf(), "already exists"), 0);
                }
                Some(ConflictDecision::Rename(name)) => {
                    if let Err(e) = validate_filename(&name) {
                        return (failed(source, &e), 0);
                    }
                    target = target.with_file_name(name);
                    if path_exists(&target) {
                        return (
                            failed(source, &OpsError::NameCollision { path: target }),
                            0,
                        );
                    }
                }
                Some(ConflictDecision::Overwrite) => {
                    if target == source {
                        return (
                            ItemResult::skipped(source.to_path_buf(), "source and destination are the same"),
                            0,
                        );
                    }
                    match self.backup.backup(&target) {
                        Ok(handle) => displaced = Some(handle),
                        Err(e) => return (failed(source, &e), 0),
                    }
                }
            }
        }

        let applied = match request.kind {
            OperationKind::Copy => self.fs.copy(source, &target),
            OperationKind::Move | OperationKind::Rename => self.fs.relocate(source, &target),
            OperationKind::NewFolder => self.fs.create_dir(&target).map(|()| 0),
            OperationKind::NewFile => self.fs.create_file(&target).map(|()| 0),
            OperationKind::Delete | OperationKind::Restore => Ok(0),
        };

        match applied {
            Ok(bytes) => (
                ItemResult::success(source.to_path_buf(), target, displaced),
                bytes,
            ),
            Err(e) => {
                if let Some(handle) = &displaced {
                    if let Err(restore_err) = self.backup.restore(handle) {
                        tracing::warn!(
                            target: "ferry::queue",
                            path = %handle.original.display(),
                            error = %restore_err,
                            "Could not put displaced item back"
                        );
                    }
                }
                let error_path = match request.kind {
                    OperationKind::NewFolder | OperationKind::NewFile => target.as_path(),
                    _ => source,
                };
                (failed(source, &OpsError::io(error_path, e)), 0)
            }
        }
    }

    /// Suspend the item until the UI answers, times out, or the task is cancelled.
    async fn ask(
        &self,
        id: TaskId,
        source: &Path,
        existing: &Path,
        token: &CancellationToken,
    ) -> Option<ConflictDecision> {
        let prompts = self.prompts.as_ref()?;
        let (respond, answer) = oneshot::channel();
        let prompt = ConflictPrompt::new(
            id,
            source.to_path_buf(),
            existing.to_path_buf(),
            respond,
        );
        let _ = self.events.send(EngineEvent::ConflictPending {
            id,
            existing: existing.to_path_buf(),
        });

        let exchange = async {
            prompts.send(prompt).await.ok()?;
            answer.await.ok()
        };

        tokio::select! {
            decision = tokio::time::timeout(self.conflict_timeout, exchange) => match decision {
                Ok(decision) => decision,
                Err(_) => {
                    tracing::warn!(target: "ferry::queue", %id, path = %existing.display(), "Conflict prompt timed out");
                    None
                }
            },
            _ = token.cancelled() => None,
        }
    }
}

/// Whether the item being placed is a directory (symlinks are not followed).
fn incoming_is_dir(kind: OperationKind, source: &Path) -> bool {
    match kind {
        OperationKind::NewFolder => true,
        OperationKind::NewFile => false,
        _ => std::fs::symlink_metadata(source).is_ok_and(|m| m.is_dir()),
    }
}

fn failed(source: &Path, error: &OpsError) -> ItemResult {
    ItemResult::failed(
        source.to_path_buf(),
        OperationError::from_error(source, error),
    )
}
