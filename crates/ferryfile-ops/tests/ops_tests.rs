use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use ferryfile_core::{
    ConflictPolicy, ErrorKind, FileOperationRequest, LibraryContext, OperationContext, OpsError,
    Severity,
};
use ferryfile_ops::{
    ConflictDecision, ConflictResolver, EngineEvent, ErrorSink, FileOperationService,
    FsPrimitives, ItemOutcome, LocalFs, MemoryClipboard, PROMPT_CHANNEL_SIZE, StagingBackup,
    TaskQueue, TaskState, copy_path, move_path, remove_path,
};
use tempfile::TempDir;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Default)]
struct CollectingSink {
    reports: Mutex<Vec<(String, Severity, Option<ErrorKind>)>>,
}

impl CollectingSink {
    fn severities(&self) -> Vec<Severity> {
        self.reports.lock().unwrap().iter().map(|r| r.1).collect()
    }

    fn kinds(&self) -> Vec<Option<ErrorKind>> {
        self.reports.lock().unwrap().iter().map(|r| r.2).collect()
    }
}

impl ErrorSink for CollectingSink {
    fn report(&self, message: &str, severity: Severity, error: Option<&OpsError>) {
        self.reports
            .lock()
            .unwrap()
            .push((message.to_string(), severity, error.map(OpsError::kind)));
    }
}

/// Sleeps inside every copy and records when it ran.
#[derive(Debug)]
struct DelayFs {
    delay: Duration,
    windows: Mutex<Vec<(Instant, Instant)>>,
}

impl FsPrimitives for DelayFs {
    fn copy(&self, source: &Path, target: &Path) -> io::Result<u64> {
        let start = Instant::now();
        std::thread::sleep(self.delay);
        let copied = copy_path(source, target);
        self.windows.lock().unwrap().push((start, Instant::now()));
        copied
    }

    fn relocate(&self, source: &Path, target: &Path) -> io::Result<u64> {
        move_path(source, target)
    }

    fn remove(&self, path: &Path) -> io::Result<()> {
        remove_path(path)
    }

    fn create_dir(&self, path: &Path) -> io::Result<()> {
        LocalFs.create_dir(path)
    }

    fn create_file(&self, path: &Path) -> io::Result<()> {
        LocalFs.create_file(path)
    }
}

/// Refuses to read one file name.
#[derive(Debug)]
struct UnreadableFs {
    name: &'static str,
}

impl FsPrimitives for UnreadableFs {
    fn copy(&self, source: &Path, target: &Path) -> io::Result<u64> {
        if source.file_name().is_some_and(|n| n == self.name) {
            return Err(io::Error::new(io::ErrorKind::PermissionDenied, "unreadable"));
        }
        copy_path(source, target)
    }

    fn relocate(&self, source: &Path, target: &Path) -> io::Result<u64> {
        move_path(source, target)
    }

    fn remove(&self, path: &Path) -> io::Result<()> {
        remove_path(path)
    }

    fn create_dir(&self, path: &Path) -> io::Result<()> {
        LocalFs.create_dir(path)
    }

    fn create_file(&self, path: &Path) -> io::Result<()> {
        LocalFs.create_file(path)
    }
}

/// Cancels a token once `after` copies have been committed.
#[derive(Debug)]
struct CancelAfterFs {
    after: usize,
    copies: AtomicUsize,
    token: CancellationToken,
}

impl FsPrimitives for CancelAfterFs {
    fn copy(&self, source: &Path, target: &Path) -> io::Result<u64> {
        let copied = copy_path(source, target)?;
        if self.copies.fetch_add(1, Ordering::SeqCst) + 1 == self.after {
            self.token.cancel();
        }
        Ok(copied)
    }

    fn relocate(&self, source: &Path, target: &Path) -> io::Result<u64> {
        move_path(source, target)
    }

    fn remove(&self, path: &Path) -> io::Result<()> {
        remove_path(path)
    }

    fn create_dir(&self, path: &Path) -> io::Result<()> {
        LocalFs.create_dir(path)
    }

    fn create_file(&self, path: &Path) -> io::Result<()> {
        LocalFs.create_file(path)
    }
}

/// Blocks every copy until the test releases it.
#[derive(Debug)]
struct GateFs {
    release: Mutex<std::sync::mpsc::Receiver<()>>,
}

impl FsPrimitives for GateFs {
    fn copy(&self, source: &Path, target: &Path) -> io::Result<u64> {
        let _ = self.release.lock().unwrap().recv();
        copy_path(source, target)
    }

    fn relocate(&self, source: &Path, target: &Path) -> io::Result<u64> {
        move_path(source, target)
    }

    fn remove(&self, path: &Path) -> io::Result<()> {
        remove_path(path)
    }

    fn create_dir(&self, path: &Path) -> io::Result<()> {
        LocalFs.create_dir(path)
    }

    fn create_file(&self, path: &Path) -> io::Result<()> {
        LocalFs.create_file(path)
    }
}

struct Fixture {
    _backup: TempDir,
    root: TempDir,
    sink: Arc<CollectingSink>,
    service: FileOperationService,
}

impl Fixture {
    fn new() -> Self {
        Self::with_fs(Arc::new(LocalFs), 100)
    }

    fn with_fs(fs: Arc<dyn FsPrimitives>, undo_capacity: usize) -> Self {
        let backup = TempDir::new().unwrap();
        let root = TempDir::new().unwrap();
        let sink = Arc::new(CollectingSink::default());
        let queue = TaskQueue::builder("test")
            .with_fs(fs)
            .with_backup(Arc::new(StagingBackup::new(backup.path())))
            .spawn()
            .unwrap();
        let service = FileOperationService::new(
            queue,
            undo_capacity,
            Arc::new(MemoryClipboard::new()),
            sink.clone(),
        );
        Self {
            _backup: backup,
            root,
            sink,
            service,
        }
    }

    fn path(&self, relative: &str) -> PathBuf {
        self.root.path().join(relative)
    }

    fn write(&self, relative: &str, contents: &str) -> PathBuf {
        let path = self.path(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(&path, contents).unwrap();
        path
    }

    fn dir(&self, relative: &str) -> PathBuf {
        let path = self.path(relative);
        fs::create_dir_all(&path).unwrap();
        path
    }

    fn snapshot(&self) -> BTreeMap<PathBuf, Option<String>> {
        let mut out = BTreeMap::new();
        walk(self.root.path(), self.root.path(), &mut out);
        out
    }
}

fn walk(root: &Path, dir: &Path, out: &mut BTreeMap<PathBuf, Option<String>>) {
    for entry in fs::read_dir(dir).unwrap() {
        let path = entry.unwrap().path();
        let relative = path.strip_prefix(root).unwrap().to_path_buf();
        if path.is_dir() {
            out.insert(relative, None);
            walk(root, &path, out);
        } else {
            out.insert(relative, Some(fs::read_to_string(&path).unwrap()));
        }
    }
}

fn numbered_files(fx: &Fixture, count: usize) -> Vec<PathBuf> {
    (1..=count)
        .map(|i| fx.write(&format!("src/{i}.txt"), &i.to_string()))
        .collect()
}

#[tokio::test]
async fn test_undo_redo_copy_is_idempotent() {
    let fx = Fixture::new();
    let doc = fx.write("src/doc.txt", "new");
    let folder = fx.write("src/folder/inner.txt", "inner");
    let dest = fx.dir("dest");
    fx.write("dest/doc.txt", "old");

    fx.service
        .copy(vec![doc, folder.parent().unwrap().to_path_buf()])
        .unwrap();
    let before = fx.snapshot();
    let outcome = fx
        .service
        .paste(&OperationContext::path(&dest), CancellationToken::new())
        .await
        .unwrap();
    assert!(outcome.undo_recorded);
    let after = fx.snapshot();
    assert_ne!(before, after);

    for _ in 0..3 {
        assert!(fx.service.undo().await);
        assert_eq!(fx.snapshot(), before);
        assert!(fx.service.redo().await);
        assert_eq!(fx.snapshot(), after);
    }
}

#[tokio::test]
async fn test_undo_redo_move_and_delete_are_idempotent() {
    let fx = Fixture::new();
    let a = fx.write("src/a.txt", "a");
    let sub = fx.write("src/sub/b.txt", "b").parent().unwrap().to_path_buf();
    let dest = fx.dir("dest");
    fx.write("dest/a.txt", "taken");

    let initial = fx.snapshot();
    fx.service.cut(vec![a.clone(), sub]).unwrap();
    fx.service
        .paste(&OperationContext::path(&dest), CancellationToken::new())
        .await
        .unwrap();
    let moved = fx.snapshot();
    assert_eq!(
        moved.get(Path::new("dest/a (1).txt")),
        Some(&Some("a".to_string()))
    );

    fx.service
        .delete(vec![dest.join("a.txt")], false)
        .await
        .unwrap();
    let deleted = fx.snapshot();
    assert!(!deleted.contains_key(Path::new("dest/a.txt")));

    for _ in 0..2 {
        assert!(fx.service.undo().await);
        assert_eq!(fx.snapshot(), moved);
        assert!(fx.service.undo().await);
        assert_eq!(fx.snapshot(), initial);
        assert!(fx.service.redo().await);
        assert_eq!(fx.snapshot(), moved);
        assert!(fx.service.redo().await);
        assert_eq!(fx.snapshot(), deleted);
    }
}

#[tokio::test]
async fn test_back_to_back_pastes_never_interleave() {
    let delay = Arc::new(DelayFs {
        delay: Duration::from_millis(30),
        windows: Mutex::new(Vec::new()),
    });
    let fx = Fixture::with_fs(delay.clone(), 100);
    let files = numbered_files(&fx, 2);
    let dest = fx.dir("dest");
    fx.service.copy(files).unwrap();

    let ctx = OperationContext::path(&dest);
    let (first, second) = tokio::join!(
        fx.service.paste(&ctx, CancellationToken::new()),
        fx.service.paste(&ctx, CancellationToken::new()),
    );
    assert_eq!(first.unwrap().report.succeeded(), 2);
    assert_eq!(second.unwrap().report.succeeded(), 2);

    let mut windows = delay.windows.lock().unwrap().clone();
    windows.sort_by_key(|w| w.0);
    assert_eq!(windows.len(), 4);
    for pair in windows.windows(2) {
        assert!(pair[0].1 <= pair[1].0, "copy windows overlap");
    }
    assert!(dest.join("1.txt").exists());
    assert!(dest.join("1 (1).txt").exists());
}

#[tokio::test]
async fn test_partial_failure_completes_batch() {
    let fx = Fixture::with_fs(Arc::new(UnreadableFs { name: "3.txt" }), 100);
    let files = numbered_files(&fx, 5);
    let dest = fx.dir("dest");
    fx.service.copy(files).unwrap();

    let outcome = fx
        .service
        .paste(&OperationContext::path(&dest), CancellationToken::new())
        .await
        .unwrap();
    let report = outcome.report;

    assert_eq!(report.state, TaskState::Completed);
    assert_eq!(report.succeeded(), 4);
    assert_eq!(report.failed(), 1);
    match &report.results[2].outcome {
        ItemOutcome::Failed { error } => assert_eq!(error.kind, ErrorKind::PermissionDenied),
        other => panic!("expected failure, got {other:?}"),
    }
    assert!(!dest.join("3.txt").exists());
    assert!(dest.join("5.txt").exists());
    assert!(fx.sink.severities().contains(&Severity::Warning));
    assert!(outcome.undo_recorded);
}

#[tokio::test]
async fn test_all_items_failing_fails_batch() {
    let fx = Fixture::with_fs(Arc::new(UnreadableFs { name: "1.txt" }), 100);
    let files = numbered_files(&fx, 1);
    let dest = fx.dir("dest");
    fx.service.copy(files).unwrap();

    let outcome = fx
        .service
        .paste(&OperationContext::path(&dest), CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(outcome.report.state, TaskState::Failed);
    assert!(!outcome.undo_recorded);
    assert!(fx.sink.severities().contains(&Severity::Error));
}

#[tokio::test]
async fn test_cycle_rejected_without_writes() {
    let fx = Fixture::new();
    let a = fx.write("a/file.txt", "x").parent().unwrap().to_path_buf();
    let sub = fx.dir("a/sub");
    let before = fx.snapshot();

    fx.service.copy(vec![a]).unwrap();
    let err = fx
        .service
        .paste(&OperationContext::path(&sub), CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, OpsError::CycleDetected { .. }));
    assert_eq!(fx.snapshot(), before);
    assert!(!fx.service.undo_service().can_undo());
    assert_eq!(fx.sink.kinds(), vec![Some(ErrorKind::CycleDetected)]);
}

#[tokio::test]
async fn test_paste_auto_renames_on_collision() {
    let fx = Fixture::new();
    let doc = fx.write("src/doc.txt", "incoming");
    let dest = fx.dir("dest");
    fx.write("dest/doc.txt", "existing");

    fx.service.copy(vec![doc]).unwrap();
    let outcome = fx
        .service
        .paste(&OperationContext::path(&dest), CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(
        outcome.report.results[0].final_path(),
        Some(&dest.join("doc (1).txt"))
    );
    assert_eq!(fs::read_to_string(dest.join("doc.txt")).unwrap(), "existing");
    assert_eq!(
        fs::read_to_string(dest.join("doc (1).txt")).unwrap(),
        "incoming"
    );
}

#[tokio::test]
async fn test_permanent_delete_is_irreversible() {
    let fx = Fixture::new();
    let dest = fx.dir("dest");
    let victim = fx.write("victim.txt", "gone");

    fx.service
        .new_file(&OperationContext::path(&dest), "notes.txt")
        .await
        .unwrap();
    let previous = fx.service.undo_service().next_undo_description();
    assert_eq!(previous.as_deref(), Some("New file 'notes.txt'"));

    let outcome = fx.service.delete(vec![victim.clone()], true).await.unwrap();
    assert!(outcome.irreversible);
    assert!(!outcome.undo_recorded);
    assert!(!victim.exists());
    assert_eq!(fx.service.undo_service().next_undo_description(), previous);
    assert_eq!(fx.service.undo_service().history().len(), 1);

    let reports = fx.sink.reports.lock().unwrap();
    assert!(
        reports
            .iter()
            .any(|r| r.1 == Severity::Info && r.2 == Some(ErrorKind::Irreversible))
    );
}

#[tokio::test]
async fn test_cancel_after_second_item() {
    let token = CancellationToken::new();
    let fs_double = Arc::new(CancelAfterFs {
        after: 2,
        copies: AtomicUsize::new(0),
        token: token.clone(),
    });
    let fx = Fixture::with_fs(fs_double, 100);
    let files = numbered_files(&fx, 5);
    let dest = fx.dir("dest");
    fx.service.copy(files).unwrap();

    let outcome = fx
        .service
        .paste(&OperationContext::path(&dest), token)
        .await
        .unwrap();
    let report = outcome.report;

    assert_eq!(report.state, TaskState::Cancelled);
    assert_eq!(report.succeeded(), 2);
    assert_eq!(report.not_processed(), 3);
    assert_eq!(fs::read_to_string(dest.join("1.txt")).unwrap(), "1");
    assert_eq!(fs::read_to_string(dest.join("2.txt")).unwrap(), "2");
    for i in 3..=5 {
        assert!(!dest.join(format!("{i}.txt")).exists());
    }
    assert!(fx.sink.kinds().contains(&Some(ErrorKind::Cancelled)));

    // Committed items can still be rolled back by hand.
    assert!(outcome.undo_recorded);
    assert!(fx.service.undo().await);
    assert!(!dest.join("1.txt").exists());
}

#[tokio::test]
async fn test_library_paste_uses_first_writable_location() {
    let fx = Fixture::new();
    let file = fx.write("src/report.txt", "r");
    let missing = fx.path("library/missing");
    let second = fx.dir("library/second");
    let third = fx.dir("library/third");

    let library = OperationContext::Library(LibraryContext::new(
        "Documents",
        vec![missing, second.clone(), third],
    ));
    fx.service.copy(vec![file]).unwrap();
    fx.service
        .paste(&library, CancellationToken::new())
        .await
        .unwrap();

    assert!(second.join("report.txt").exists());
    assert!(library.contains(&second.join("report.txt")));
}

#[tokio::test]
async fn test_library_without_writable_location() {
    let fx = Fixture::new();
    let file = fx.write("src/report.txt", "r");
    let library = OperationContext::library("Music", vec![fx.path("nowhere")]);

    fx.service.copy(vec![file]).unwrap();
    let err = fx
        .service
        .paste(&library, CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, OpsError::NoWritableLocation { .. }));
}

#[tokio::test]
async fn test_undo_of_dangling_reference() {
    let fx = Fixture::new();
    let file = fx.write("src/a.txt", "a");
    let dest = fx.dir("dest");

    fx.service.copy(vec![file]).unwrap();
    fx.service
        .paste(&OperationContext::path(&dest), CancellationToken::new())
        .await
        .unwrap();
    fs::remove_file(dest.join("a.txt")).unwrap();

    assert!(!fx.service.undo().await);
    assert!(!fx.service.undo_service().can_undo());
    assert!(!fx.service.undo_service().can_redo());
    assert_eq!(fx.sink.severities().last(), Some(&Severity::Warning));
}

#[tokio::test]
async fn test_undo_capacity_evicts_oldest() {
    let fx = Fixture::with_fs(Arc::new(LocalFs), 2);
    let dest = fx.dir("dest");
    let ctx = OperationContext::path(&dest);

    for name in ["a.txt", "b.txt", "c.txt"] {
        fx.service.new_file(&ctx, name).await.unwrap();
    }

    assert_eq!(
        fx.service.undo_service().history(),
        vec!["New file 'c.txt'".to_string(), "New file 'b.txt'".to_string()]
    );
    assert!(fx.service.undo().await);
    assert!(fx.service.undo().await);
    assert!(!fx.service.undo().await);
    assert!(dest.join("a.txt").exists());
}

#[tokio::test]
async fn test_new_action_clears_redo() {
    let fx = Fixture::new();
    let ctx = OperationContext::path(fx.dir("dest"));

    fx.service.new_folder(&ctx, "one").await.unwrap();
    assert!(fx.service.undo().await);
    assert!(fx.service.undo_service().can_redo());

    fx.service.new_folder(&ctx, "two").await.unwrap();
    assert!(!fx.service.undo_service().can_redo());
    assert!(!fx.service.redo().await);
}

#[tokio::test]
async fn test_event_sequence() {
    let fx = Fixture::new();
    let file = fx.write("src/a.txt", "a");
    let dest = fx.dir("dest");
    let mut events = fx.service.subscribe();

    fx.service.copy(vec![file]).unwrap();
    fx.service
        .paste(&OperationContext::path(&dest), CancellationToken::new())
        .await
        .unwrap();
    assert!(fx.service.undo().await);

    let mut names = Vec::new();
    while let Ok(event) = events.try_recv() {
        names.push(match event {
            EngineEvent::TaskEnqueued { .. } => "enqueued",
            EngineEvent::TaskStarted { .. } => "started",
            EngineEvent::TaskProgress(_) => "progress",
            EngineEvent::ConflictPending { .. } => "conflict",
            EngineEvent::TaskCompleted(_) => "completed",
            EngineEvent::ActionUndone { .. } => "undone",
            EngineEvent::ActionRedone { .. } => "redone",
            EngineEvent::StackChanged(_) => "stack",
        });
    }
    names.dedup();

    assert_eq!(
        names,
        vec![
            "enqueued", "started", "progress", "completed", "stack", "enqueued", "started",
            "progress", "completed", "undone", "stack",
        ]
    );
}

#[tokio::test]
async fn test_ask_waits_for_answer() {
    let temp = TempDir::new().unwrap();
    let src = temp.path().join("src");
    let dest = temp.path().join("dest");
    fs::create_dir_all(&src).unwrap();
    fs::create_dir_all(&dest).unwrap();
    fs::write(src.join("doc.txt"), "incoming").unwrap();
    fs::write(dest.join("doc.txt"), "existing").unwrap();

    let (prompts, mut prompt_rx) = mpsc::channel(PROMPT_CHANNEL_SIZE);
    let queue = TaskQueue::builder("ask")
        .with_resolver(ConflictResolver::new(ConflictPolicy::Ask))
        .with_backup(Arc::new(StagingBackup::new(temp.path().join(".backup"))))
        .with_prompts(prompts)
        .spawn()
        .unwrap();

    let existing = dest.join("doc.txt");
    let answerer = tokio::spawn(async move {
        let prompt = prompt_rx.recv().await.unwrap();
        assert_eq!(prompt.existing, existing);
        prompt.answer(ConflictDecision::Rename("doc-copy.txt".to_string()));
    });

    let report = queue
        .enqueue(FileOperationRequest::copy(vec![src.join("doc.txt")], &dest))
        .unwrap()
        .wait()
        .await
        .unwrap();
    answerer.await.unwrap();

    assert_eq!(
        report.results[0].final_path(),
        Some(&dest.join("doc-copy.txt"))
    );
    assert_eq!(fs::read_to_string(dest.join("doc.txt")).unwrap(), "existing");
}

#[tokio::test]
async fn test_unanswered_ask_skips_item() {
    let temp = TempDir::new().unwrap();
    fs::write(temp.path().join("doc.txt"), "x").unwrap();
    let dest = temp.path().join("dest");
    fs::create_dir(&dest).unwrap();
    fs::write(dest.join("doc.txt"), "y").unwrap();

    let (prompts, _prompt_rx) = mpsc::channel(PROMPT_CHANNEL_SIZE);
    let queue = TaskQueue::builder("ask-timeout")
        .with_resolver(ConflictResolver::new(ConflictPolicy::Ask))
        .with_conflict_timeout(Duration::from_millis(100))
        .with_prompts(prompts)
        .spawn()
        .unwrap();

    let report = queue
        .enqueue(FileOperationRequest::copy(
            vec![temp.path().join("doc.txt")],
            &dest,
        ))
        .unwrap()
        .wait()
        .await
        .unwrap();

    assert_eq!(report.state, TaskState::Completed);
    assert_eq!(report.skipped(), 1);
    assert_eq!(fs::read_to_string(dest.join("doc.txt")).unwrap(), "y");

    // Without a prompt channel nobody can answer at all.
    let silent = TaskQueue::builder("ask-silent")
        .with_resolver(ConflictResolver::new(ConflictPolicy::Ask))
        .spawn()
        .unwrap();
    let report = silent
        .enqueue(FileOperationRequest::copy(
            vec![temp.path().join("doc.txt")],
            &dest,
        ))
        .unwrap()
        .wait()
        .await
        .unwrap();
    assert_eq!(report.skipped(), 1);
}

#[tokio::test]
async fn test_cancel_while_asking() {
    let temp = TempDir::new().unwrap();
    let dest = temp.path().join("dest");
    fs::create_dir(&dest).unwrap();
    let mut sources = Vec::new();
    for name in ["a.txt", "b.txt"] {
        fs::write(temp.path().join(name), "new").unwrap();
        fs::write(dest.join(name), "old").unwrap();
        sources.push(temp.path().join(name));
    }

    let (prompts, mut prompt_rx) = mpsc::channel(PROMPT_CHANNEL_SIZE);
    let queue = TaskQueue::builder("ask-cancel")
        .with_resolver(ConflictResolver::new(ConflictPolicy::Ask))
        .with_prompts(prompts)
        .spawn()
        .unwrap();

    let handle = queue
        .enqueue(FileOperationRequest::copy(sources, &dest))
        .unwrap();
    let id = handle.id();
    let prompt = prompt_rx.recv().await.unwrap();
    assert_eq!(prompt.task_id, id);
    assert!(queue.cancel(id));

    let report = handle.wait().await.unwrap();
    drop(prompt);
    assert_eq!(report.state, TaskState::Cancelled);
    assert_eq!(report.results.len(), 1);
    assert_eq!(report.skipped(), 1);
    assert_eq!(queue.state(id), Some(TaskState::Cancelled));
}

#[tokio::test]
async fn test_panes_run_independently() {
    let (release, gate) = std::sync::mpsc::channel();
    let primary = Fixture::with_fs(
        Arc::new(GateFs {
            release: Mutex::new(gate),
        }),
        100,
    );
    let secondary = Fixture::new();

    let a = primary.write("src/a.txt", "a");
    let primary_dest = primary.dir("dest");
    let b = secondary.write("src/b.txt", "b");
    let secondary_dest = secondary.dir("dest");

    primary.service.copy(vec![a]).unwrap();
    secondary.service.copy(vec![b]).unwrap();

    let mut events = primary.service.subscribe();
    let primary = Arc::new(primary);
    let blocked = {
        let primary = Arc::clone(&primary);
        let ctx = OperationContext::path(&primary_dest);
        tokio::spawn(async move { primary.service.paste(&ctx, CancellationToken::new()).await })
    };
    while !matches!(events.recv().await, Ok(EngineEvent::TaskStarted { .. })) {}

    secondary
        .service
        .paste(&OperationContext::path(&secondary_dest), CancellationToken::new())
        .await
        .unwrap();
    assert!(secondary_dest.join("b.txt").exists());
    assert!(!primary_dest.join("a.txt").exists());

    release.send(()).unwrap();
    let outcome = blocked.await.unwrap().unwrap();
    assert!(outcome.report.is_success());
    assert!(primary_dest.join("a.txt").exists());
}

#[tokio::test]
async fn test_undo_waits_for_pending_paste() {
    let delay = Arc::new(DelayFs {
        delay: Duration::from_millis(50),
        windows: Mutex::new(Vec::new()),
    });
    let fx = Fixture::with_fs(delay, 100);
    let dest = fx.dir("dest");
    let ctx = OperationContext::path(&dest);
    let doc = fx.write("src/doc.txt", "doc");

    fx.service.new_file(&ctx, "a.txt").await.unwrap();
    fx.service.copy(vec![doc]).unwrap();

    // The paste is queued first, so the undo must revert the paste.
    let (pasted, undone) = tokio::join!(
        fx.service.paste(&ctx, CancellationToken::new()),
        fx.service.undo(),
    );
    assert!(pasted.unwrap().undo_recorded);
    assert!(undone);

    assert!(dest.join("a.txt").exists());
    assert!(!dest.join("doc.txt").exists());
    assert_eq!(
        fx.service.undo_service().history(),
        vec!["New file 'a.txt'".to_string()]
    );
    let redo = fx.service.undo_service().next_redo_description().unwrap();
    assert!(redo.starts_with("Copy 'doc.txt'"), "{redo}");

    assert!(fx.service.redo().await);
    assert!(dest.join("doc.txt").exists());
}

#[tokio::test]
async fn test_redo_waits_for_pending_operation() {
    let fx = Fixture::new();
    let ctx = OperationContext::path(fx.dir("dest"));

    fx.service.new_folder(&ctx, "one").await.unwrap();
    assert!(fx.service.undo().await);

    // A new action queued before the redo clears the redo history first.
    let (created, redone) = tokio::join!(fx.service.new_folder(&ctx, "two"), fx.service.redo());
    assert!(created.unwrap().undo_recorded);
    assert!(!redone);
    assert!(!fx.path("dest/one").exists());
    assert!(fx.path("dest/two").exists());
}

#[cfg(unix)]
#[tokio::test]
async fn test_move_from_locked_directory_leaves_no_copy() {
    use std::os::unix::fs::PermissionsExt;

    let fx = Fixture::new();
    let file = fx.write("locked/a.txt", "a");
    let locked = fx.path("locked");
    let dest = fx.dir("dest");
    fs::set_permissions(&locked, fs::Permissions::from_mode(0o555)).unwrap();

    // Root ignores permission bits, so there is nothing to lock.
    let attempt = locked.join("attempt");
    if fs::File::create(&attempt).is_ok() {
        fs::remove_file(&attempt).unwrap();
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o755)).unwrap();
        return;
    }

    fx.service.cut(vec![file.clone()]).unwrap();
    let outcome = fx
        .service
        .paste(&OperationContext::path(&dest), CancellationToken::new())
        .await;
    fs::set_permissions(&locked, fs::Permissions::from_mode(0o755)).unwrap();
    let outcome = outcome.unwrap();

    assert_eq!(outcome.report.state, TaskState::Failed);
    assert!(!outcome.undo_recorded);
    assert!(file.exists());
    assert!(!dest.join("a.txt").exists());
    assert!(fx.service.is_pending_removal(&file));
}
