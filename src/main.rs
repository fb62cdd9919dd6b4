//! ferry - Reversible, queued file operations.
//!
//! Usage:
//!   ferry copy PATH...           Put items on the clipboard for copying
//!   ferry cut PATH...            Put items on the clipboard for moving
//!   ferry paste [DIR]            Paste the clipboard into DIR (or a library)
//!   ferry delete PATH...         Delete items (recoverable unless --permanent)
//!   ferry rename PATH NAME       Rename an item in place
//!   ferry mkdir NAME / touch NAME
//!   ferry shell                  Interactive session with undo/redo
//!   ferry --help                 Show help

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Context, Result, bail, eyre};
use serde::Deserialize;
use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use ferryfile_core::{ConflictPolicy, EngineConfig, LibraryContext, OperationContext};
use ferryfile_ops::{
    Backup, ConflictDecision, ConflictPrompt, FileClipboard, FileOperationService, ItemOutcome,
    OperationOutcome, PROMPT_CHANNEL_SIZE, StagingBackup, TaskQueue, TaskState, TracingErrorSink,
    TrashBackup, event_channel,
};

#[derive(Parser)]
#[command(
    name = "ferry",
    version,
    about = "Reversible, queued file operations",
    long_about = "ferry copies, moves, deletes and renames files through a background \
                  task queue.\n\nThe clipboard is shared between invocations through a \
                  file. Undo and redo are available inside `ferry shell`."
)]
struct Cli {
    /// Configuration file (defaults to <config dir>/ferryfile/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Conflict policy: auto-rename, overwrite, skip or ask
    #[arg(long, global = true)]
    conflict: Option<ConflictPolicy>,

    /// Send deleted and overwritten items to the platform trash
    #[arg(long, global = true)]
    trash: bool,

    /// Clipboard file shared between invocations
    #[arg(long, global = true)]
    clipboard: Option<PathBuf>,

    /// Print task reports as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Put items on the clipboard for copying
    Copy {
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },

    /// Put items on the clipboard for moving
    Cut {
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },

    /// Paste the clipboard into a directory or library
    Paste {
        /// Destination directory
        #[arg(default_value = ".")]
        directory: PathBuf,

        /// Paste into a library with this name instead
        #[arg(long, requires = "locations")]
        library: Option<String>,

        /// Library location, in preference order (repeatable)
        #[arg(long = "location")]
        locations: Vec<PathBuf>,
    },

    /// Delete items
    Delete {
        #[arg(required = true)]
        paths: Vec<PathBuf>,

        /// Skip the backup; the items cannot be restored
        #[arg(long)]
        permanent: bool,
    },

    /// Rename an item within its directory
    Rename {
        path: PathBuf,
        new_name: String,

        /// Replace an existing item with the same name
        #[arg(long)]
        overwrite: bool,
    },

    /// Create an empty folder
    Mkdir {
        name: String,

        /// Parent directory
        #[arg(short, long, default_value = ".")]
        dir: PathBuf,
    },

    /// Create an empty file
    Touch {
        name: String,

        /// Parent directory
        #[arg(short, long, default_value = ".")]
        dir: PathBuf,
    },

    /// Read commands from stdin, with undo, redo and history
    Shell,
}

/// One line typed into `ferry shell`.
#[derive(Parser)]
#[command(name = "ferry", no_binary_name = true)]
struct ShellLine {
    #[command(subcommand)]
    command: ShellCommand,
}

#[derive(Subcommand)]
enum ShellCommand {
    #[command(flatten)]
    Operation(Command),

    /// Revert the last action
    Undo,

    /// Re-apply the last undone action
    Redo,

    /// List undoable actions, most recent first
    History,

    /// Leave the shell
    #[command(alias = "quit")]
    Exit,
}

/// Contents of the configuration file.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Settings {
    #[serde(flatten)]
    engine: EngineConfig,

    /// Clipboard file shared between invocations.
    clipboard_file: Option<PathBuf>,

    /// Use the platform trash as the backup collaborator.
    use_trash: bool,
}

/// Lines read from stdin, shared by the shell and conflict prompts.
struct Input {
    lines: Mutex<mpsc::Receiver<String>>,
}

impl Input {
    fn spawn() -> Arc<Self> {
        let (tx, rx) = mpsc::channel(16);
        std::thread::spawn(move || {
            for line in std::io::stdin().lines() {
                let Ok(line) = line else { break };
                if tx.blocking_send(line).is_err() {
                    break;
                }
            }
        });
        Arc::new(Self {
            lines: Mutex::new(rx),
        })
    }

    async fn next_line(&self) -> Option<String> {
        self.lines.lock().await.recv().await
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    init_tracing();

    let cli = Cli::parse();
    let settings = load_settings(cli.config.as_deref())?;

    let mut engine = settings.engine.clone();
    if let Some(policy) = cli.conflict {
        engine.conflict_policy = policy;
    }

    let interactive = matches!(cli.command, Command::Shell);
    let input = (interactive || engine.conflict_policy == ConflictPolicy::Ask).then(Input::spawn);

    let clipboard = cli
        .clipboard
        .clone()
        .or(settings.clipboard_file.clone())
        .unwrap_or_else(|| std::env::temp_dir().join("ferryfile").join("clipboard"));
    let backup: Arc<dyn Backup> = if cli.trash || settings.use_trash {
        Arc::new(TrashBackup)
    } else {
        Arc::new(StagingBackup::new(engine.backup_dir_or_default()))
    };

    let mut builder = TaskQueue::builder("main")
        .with_config(&engine)
        .with_backup(backup)
        .with_events(event_channel(engine.event_capacity));
    if let Some(input) = &input {
        let (prompts, prompt_rx) = mpsc::channel(PROMPT_CHANNEL_SIZE);
        builder = builder.with_prompts(prompts);
        tokio::spawn(answer_prompts(prompt_rx, Arc::clone(input)));
    }
    let service = FileOperationService::new(
        builder.spawn()?,
        engine.undo_capacity,
        Arc::new(FileClipboard::new(clipboard)),
        Arc::new(TracingErrorSink),
    );

    match (cli.command, input) {
        (Command::Shell, Some(input)) => run_shell(&service, &input, cli.json).await,
        (command, _) => run_command(&service, command, cli.json).await,
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

/// Load the configuration file; a missing default file is not an error.
fn load_settings(explicit: Option<&Path>) -> Result<Settings> {
    let path = match explicit {
        Some(path) => path.to_path_buf(),
        None => {
            let default = dirs::config_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("ferryfile")
                .join("config.toml");
            if !default.exists() {
                return Ok(Settings::default());
            }
            default
        }
    };

    let text = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read config {}", path.display()))?;
    let settings: Settings = toml::from_str(&text)
        .with_context(|| format!("Invalid config {}", path.display()))?;

    if settings.engine.undo_capacity == 0 || settings.engine.conflict_timeout_secs == 0 {
        bail!("Invalid config {}: limits must be at least 1", path.display());
    }
    Ok(settings)
}

/// Answer interactive conflicts from stdin.
async fn answer_prompts(mut prompts: mpsc::Receiver<ConflictPrompt>, input: Arc<Input>) {
    while let Some(prompt) = prompts.recv().await {
        eprintln!(
            "'{}' already exists. [o]verwrite, [s]kip, [r]ename NEW:",
            prompt.existing.display()
        );
        let decision = input
            .next_line()
            .await
            .map(|line| parse_decision(&line))
            .unwrap_or(ConflictDecision::Skip);
        prompt.answer(decision);
    }
}

fn parse_decision(line: &str) -> ConflictDecision {
    let line = line.trim();
    let (word, rest) = line.split_once(' ').unwrap_or((line, ""));
    match word {
        "o" | "overwrite" => ConflictDecision::Overwrite,
        "r" | "rename" if !rest.trim().is_empty() => {
            ConflictDecision::Rename(rest.trim().to_string())
        }
        _ => ConflictDecision::Skip,
    }
}

async fn run_command(service: &FileOperationService, command: Command, json: bool) -> Result<()> {
    let outcome = match command {
        Command::Copy { paths } => {
            let paths = absolute_all(paths)?;
            let count = paths.len();
            service.copy(paths)?;
            println!("{count} item(s) ready to copy");
            return Ok(());
        }
        Command::Cut { paths } => {
            let paths = absolute_all(paths)?;
            let count = paths.len();
            service.cut(paths)?;
            println!("{count} item(s) ready to move");
            return Ok(());
        }
        Command::Paste {
            directory,
            library,
            locations,
        } => {
            let context = match library {
                Some(name) => OperationContext::Library(LibraryContext::new(
                    name,
                    absolute_all(locations)?,
                )),
                None => OperationContext::path(absolute(&directory)?),
            };
            service.paste(&context, CancellationToken::new()).await?
        }
        Command::Delete { paths, permanent } => {
            service.delete(absolute_all(paths)?, permanent).await?
        }
        Command::Rename {
            path,
            new_name,
            overwrite,
        } => {
            service
                .rename(absolute(&path)?, &new_name, overwrite)
                .await?
        }
        Command::Mkdir { name, dir } => {
            service
                .new_folder(&OperationContext::path(absolute(&dir)?), &name)
                .await?
        }
        Command::Touch { name, dir } => {
            service
                .new_file(&OperationContext::path(absolute(&dir)?), &name)
                .await?
        }
        Command::Shell => bail!("Already in a shell"),
    };

    print_outcome(&outcome, json)?;
    if outcome.report.state == TaskState::Failed {
        return Err(eyre!("{}", outcome.report.summary()));
    }
    Ok(())
}

async fn run_shell(service: &FileOperationService, input: &Input, json: bool) -> Result<()> {
    eprintln!("ferry shell: type `help` for commands, `exit` to leave");

    while let Some(line) = input.next_line().await {
        let words = split_words(&line);
        if words.is_empty() {
            continue;
        }

        let command = match ShellLine::try_parse_from(words) {
            Ok(parsed) => parsed.command,
            Err(e) => {
                let _ = e.print();
                continue;
            }
        };

        match command {
            ShellCommand::Operation(command) => {
                if let Err(e) = run_command(service, command, json).await {
                    eprintln!("Error: {e}");
                }
            }
            ShellCommand::Undo => match service.undo_service().next_undo_description() {
                Some(description) if service.undo().await => println!("Undid: {description}"),
                Some(description) => eprintln!("Could not undo: {description}"),
                None => eprintln!("Nothing to undo"),
            },
            ShellCommand::Redo => match service.undo_service().next_redo_description() {
                Some(description) if service.redo().await => println!("Redid: {description}"),
                Some(description) => eprintln!("Could not redo: {description}"),
                None => eprintln!("Nothing to redo"),
            },
            ShellCommand::History => {
                let history = service.undo_service().history();
                if history.is_empty() {
                    println!("(empty)");
                }
                for (i, description) in history.iter().enumerate() {
                    println!("{:>3}  {description}", i + 1);
                }
            }
            ShellCommand::Exit => break,
        }
    }

    Ok(())
}

fn print_outcome(outcome: &OperationOutcome, json: bool) -> Result<()> {
    let report = &outcome.report;
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }

    println!("{}", report.summary());
    if report.bytes_processed > 0 {
        println!(
            " {} transferred",
            humansize::format_size(report.bytes_processed, humansize::BINARY)
        );
    }
    for result in &report.results {
        match &result.outcome {
            ItemOutcome::Success { .. } => {}
            ItemOutcome::Skipped { reason } => {
                println!("   skipped {}: {reason}", result.source.display());
            }
            ItemOutcome::Failed { error } => {
                println!("   failed  {}: {}", result.source.display(), error.message);
            }
        }
    }
    if outcome.irreversible {
        println!(" Permanently deleted; this cannot be undone.");
    }
    Ok(())
}

fn absolute(path: &Path) -> Result<PathBuf> {
    std::path::absolute(path).with_context(|| format!("Invalid path {}", path.display()))
}

fn absolute_all(paths: Vec<PathBuf>) -> Result<Vec<PathBuf>> {
    paths.iter().map(|p| absolute(p)).collect()
}

/// Split a shell line on whitespace, honoring single and double quotes.
fn split_words(line: &str) -> Vec<String> {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut quote = None;
    let mut in_word = false;

    for c in line.chars() {
        match (quote, c) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), c) => current.push(c),
            (None, '"' | '\'') => {
                quote = Some(c);
                in_word = true;
            }
            (None, c) if c.is_whitespace() => {
                if in_word {
                    words.push(std::mem::take(&mut current));
                    in_word = false;
                }
            }
            (None, c) => {
                current.push(c);
                in_word = true;
            }
        }
    }
    if in_word {
        words.push(current);
    }
    words
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_words_with_quotes() {
        assert_eq!(
            split_words(r#"rename "My Doc.txt" 'new name.txt'"#),
            vec!["rename", "My Doc.txt", "new name.txt"]
        );
        assert_eq!(split_words("  undo  "), vec!["undo"]);
        assert_eq!(split_words(r#"touch """#), vec!["touch", ""]);
    }

    #[test]
    fn test_parse_decision() {
        assert_eq!(parse_decision("o"), ConflictDecision::Overwrite);
        assert_eq!(
            parse_decision("rename  copy.txt "),
            ConflictDecision::Rename("copy.txt".to_string())
        );
        assert_eq!(parse_decision("r"), ConflictDecision::Skip);
        assert_eq!(parse_decision(""), ConflictDecision::Skip);
    }

    #[test]
    fn test_shell_line_parses_operations() {
        let line = ShellLine::try_parse_from(["delete", "--permanent", "a.txt"]).unwrap();
        assert!(matches!(
            line.command,
            ShellCommand::Operation(Command::Delete { permanent: true, .. })
        ));
        let line = ShellLine::try_parse_from(["quit"]).unwrap();
        assert!(matches!(line.command, ShellCommand::Exit));
    }

    #[test]
    fn test_settings_from_toml() {
        let settings: Settings = toml::from_str(
            r#"
            undo_capacity = 5
            conflict_policy = "skip"
            use_trash = true
            "#,
        )
        .unwrap();
        assert_eq!(settings.engine.undo_capacity, 5);
        assert_eq!(settings.engine.conflict_policy, ConflictPolicy::Skip);
        assert_eq!(settings.engine.conflict_timeout_secs, 30);
        assert!(settings.use_trash);
        assert!(settings.clipboard_file.is_none());
    }
}
