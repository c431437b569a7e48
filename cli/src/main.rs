//! Jimple CLI - terminal host for the Jimple language client.
//!
//! # Architecture
//!
//! The binary owns a [`TerminalHost`] and a [`LifecycleController`] running on
//! its own task. Everything that changes the client goes through the
//! controller's event channel:
//!
//! ```text
//! stdin / SIGHUP / ctrl-c -> ControllerEvent -> LifecycleController::run()
//!                                                   |
//!                                                   v
//!                                      start | stop | restart | retry
//! ```
//!
//! # Commands
//!
//! `<n>` picks option `n` of the last prompt, `action <url>` and
//! `configuration <url>?<body>` post to the newest panel, `close` closes it,
//! `reload` re-reads `~/.jimple/config.toml`, `quit` stops the client.
//! `doc <open|change|save|close> <path>` and `file <created|changed|deleted> <path>`
//! stand in for an editor's document and file-watcher events.

mod host;
mod welcome;

use anyhow::{Context, Result};
use std::{
    env,
    ffi::OsStr,
    fs::{self, OpenOptions},
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use jimple_config::{JIMPLE_DIR, JimpleConfig, StateStore};
use jimple_lsp::{
    ClientConfig, ControllerEvent, DocumentEvent, EditorHost, FileChangeKind, FileEvent,
    LifecycleController, path_to_file_uri,
};
use jimple_types::PanelMessage;

use crate::host::{Choice, TerminalHost};
use crate::welcome::NoticeAction;

const EVENT_CHANNEL_CAPACITY: usize = 16;

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    let (log_file, init_warnings) = open_jimple_log_file();

    if let Some((log_path, file)) = log_file {
        tracing_subscriber::registry()
            .with(fmt::layer().with_ansi(false).with_writer(Mutex::new(file)))
            .with(env_filter)
            .init();

        tracing::info!(path = %log_path.display(), "Logging initialized");
        for warning in init_warnings {
            tracing::warn!("{warning}");
        }
        return;
    }

    // Stdout carries prompts and panel output; no logs beats interleaved logs.
    tracing_subscriber::registry().with(env_filter).init();
}

fn open_jimple_log_file() -> (Option<(PathBuf, fs::File)>, Vec<String>) {
    let mut warnings = Vec::new();

    for candidate in jimple_log_file_candidates() {
        if let Some(parent) = candidate.parent()
            && let Err(e) = fs::create_dir_all(parent)
        {
            warnings.push(format!(
                "Failed to create log dir {}: {e}",
                parent.display()
            ));
            continue;
        }

        match OpenOptions::new()
            .create(true)
            .append(true)
            .open(&candidate)
        {
            Ok(file) => return (Some((candidate, file)), warnings),
            Err(e) => {
                warnings.push(format!(
                    "Failed to open log file {}: {e}",
                    candidate.display()
                ));
            }
        }
    }

    (None, warnings)
}

fn jimple_log_file_candidates() -> Vec<PathBuf> {
    let mut candidates = Vec::new();

    // Primary: ~/.jimple/logs/jimple.log
    if let Some(dir) = jimple_config::jimple_dir() {
        candidates.push(dir.join("logs").join("jimple.log"));
    }

    // Fallback: ./.jimple/logs/jimple.log
    candidates.push(PathBuf::from(JIMPLE_DIR).join("logs").join("jimple.log"));

    candidates
}

fn load_client_config() -> ClientConfig {
    match JimpleConfig::load() {
        Ok(Some(config)) => config.client_config(),
        Ok(None) => ClientConfig::default(),
        Err(e) => {
            eprintln!("{e}; using default settings");
            ClientConfig::default()
        }
    }
}

/// Where the server jar is looked up: `$JIMPLE_HOME`, else the binary's directory.
fn install_root() -> PathBuf {
    env::var_os("JIMPLE_HOME")
        .map(PathBuf::from)
        .or_else(|| {
            env::current_exe()
                .ok()
                .and_then(|exe| exe.parent().map(Path::to_path_buf))
        })
        .unwrap_or_else(|| PathBuf::from("."))
}

fn workspace_root() -> Result<Option<PathBuf>> {
    match env::args_os().nth(1) {
        Some(arg) => {
            let path = PathBuf::from(arg);
            let path = fs::canonicalize(&path)
                .with_context(|| format!("workspace {} does not exist", path.display()))?;
            Ok(Some(path))
        }
        None => Ok(env::current_dir().ok()),
    }
}

fn notify_upgrade(host: &TerminalHost) {
    let store = match StateStore::open_default() {
        Ok(store) => store,
        Err(e) => {
            tracing::warn!("Skipping upgrade notice: {e}");
            return;
        }
    };
    match welcome::check_version(&store, env!("CARGO_PKG_VERSION")) {
        Ok(Some(notice)) => host.show_notice(&notice.message()),
        Ok(None) => {}
        Err(e) => tracing::warn!("Failed to check the recorded version: {e}"),
    }
}

fn run_notice_action(host: &TerminalHost, action: NoticeAction) {
    match action.url() {
        Some(url) => println!("Open {url}"),
        None => host.open_settings(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DocumentOp {
    Open,
    Change,
    Save,
    Close,
}

impl DocumentOp {
    fn parse(op: &str) -> Option<Self> {
        match op {
            "open" => Some(Self::Open),
            "change" => Some(Self::Change),
            "save" => Some(Self::Save),
            "close" => Some(Self::Close),
            _ => None,
        }
    }
}

fn parse_change_kind(kind: &str) -> Option<FileChangeKind> {
    match kind {
        "created" => Some(FileChangeKind::Created),
        "changed" => Some(FileChangeKind::Changed),
        "deleted" => Some(FileChangeKind::Deleted),
        _ => None,
    }
}

#[derive(Debug, PartialEq, Eq)]
enum Command {
    Empty,
    Choose(usize),
    Panel(PanelMessage),
    Document(DocumentOp, PathBuf),
    File(FileChangeKind, PathBuf),
    ClosePanel,
    Reload,
    Help,
    Quit,
    Unknown(String),
}

fn parse_command(line: &str) -> Command {
    let line = line.trim();
    let (head, rest) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
    match head {
        "" => Command::Empty,
        "quit" | "exit" => Command::Quit,
        "reload" => Command::Reload,
        "close" => Command::ClosePanel,
        "help" => Command::Help,
        "action" | "configuration" => Command::Panel(PanelMessage::new(head, rest.trim())),
        "doc" | "file" => {
            let (op, path) = rest.trim().split_once(char::is_whitespace).unwrap_or((rest, ""));
            let path = PathBuf::from(path.trim());
            if path.as_os_str().is_empty() {
                return Command::Unknown(line.to_string());
            }
            let parsed = if head == "doc" {
                DocumentOp::parse(op).map(|op| Command::Document(op, path))
            } else {
                parse_change_kind(op).map(|kind| Command::File(kind, path))
            };
            parsed.unwrap_or_else(|| Command::Unknown(line.to_string()))
        }
        _ => match head.parse::<usize>() {
            Ok(n) => Command::Choose(n),
            Err(_) => Command::Unknown(line.to_string()),
        },
    }
}

/// Language id an editor would assign: the file extension, `jimple` for Jimple sources.
fn language_id(path: &Path) -> String {
    path.extension()
        .and_then(OsStr::to_str)
        .unwrap_or("plaintext")
        .to_string()
}

async fn read_document(path: &Path) -> Result<String> {
    tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("failed to read {}", path.display()))
}

async fn document_event(op: DocumentOp, path: &Path) -> Result<DocumentEvent> {
    let path = std::path::absolute(path)
        .with_context(|| format!("cannot resolve {}", path.display()))?;
    let uri = path_to_file_uri(&path)?;
    let language_id = language_id(&path);
    Ok(match op {
        DocumentOp::Open => DocumentEvent::Opened {
            uri,
            language_id,
            text: read_document(&path).await?,
        },
        DocumentOp::Change => DocumentEvent::Changed {
            uri,
            language_id,
            text: read_document(&path).await?,
        },
        DocumentOp::Save => DocumentEvent::Saved { uri, language_id },
        DocumentOp::Close => DocumentEvent::Closed { uri, language_id },
    })
}

fn file_event(kind: FileChangeKind, path: &Path) -> Result<FileEvent> {
    let path = std::path::absolute(path)
        .with_context(|| format!("cannot resolve {}", path.display()))?;
    Ok(FileEvent::new(path, kind))
}

fn print_help() {
    println!("Commands:");
    println!("  <n>                          choose option n of the last prompt");
    println!("  action <url>                 GET from the newest panel");
    println!("  configuration <url>?<body>   POST from the newest panel");
    println!("  close                        close the newest panel");
    println!("  doc <open|change|save|close> <path>");
    println!("                               report a document event");
    println!("  file <created|changed|deleted> <path>");
    println!("                               report a watched file change");
    println!("  reload                       re-read settings and restart the client");
    println!("  quit                         stop the client and exit");
}

async fn run_input_loop(
    host: &TerminalHost,
    events: &mpsc::Sender<ControllerEvent>,
) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        let line = tokio::select! {
            line = lines.next_line() => line.context("failed to read stdin")?,
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupted");
                return Ok(());
            }
        };
        let Some(line) = line else {
            return Ok(());
        };

        match parse_command(&line) {
            Command::Empty => {}
            Command::Quit => return Ok(()),
            Command::Help => print_help(),
            Command::Choose(n) => match host.choose(n) {
                Some(Choice::Recovery { prompt, action }) => {
                    events
                        .send(ControllerEvent::Recovery { prompt, action })
                        .await
                        .context("language client controller stopped")?;
                }
                Some(Choice::Notice(action)) => run_notice_action(host, action),
                None => println!("No pending option {n}"),
            },
            Command::Reload => {
                host.set_configuration(load_client_config());
                events
                    .send(ControllerEvent::ConfigurationChanged)
                    .await
                    .context("language client controller stopped")?;
            }
            Command::Document(op, path) => match document_event(op, &path).await {
                Ok(event) => {
                    events
                        .send(ControllerEvent::Document(event))
                        .await
                        .context("language client controller stopped")?;
                }
                Err(e) => println!("{e:#}"),
            },
            Command::File(kind, path) => match file_event(kind, &path) {
                Ok(event) => {
                    events
                        .send(ControllerEvent::FilesChanged(vec![event]))
                        .await
                        .context("language client controller stopped")?;
                }
                Err(e) => println!("{e:#}"),
            },
            Command::Panel(message) => {
                if let Err(e) = host.post_to_latest_panel(message) {
                    println!("{e}");
                }
            }
            Command::ClosePanel => match host.close_latest_panel() {
                Some(id) => println!("Closed panel {}", id.0),
                None => println!("No panel is open"),
            },
            Command::Unknown(line) => println!("Unknown command: {line} (try `help`)"),
        }
    }
}

#[cfg(unix)]
fn spawn_reload_on_hangup(host: Arc<TerminalHost>, events: mpsc::Sender<ControllerEvent>) {
    use tokio::signal::unix::{SignalKind, signal};

    let mut hangup = match signal(SignalKind::hangup()) {
        Ok(hangup) => hangup,
        Err(e) => {
            tracing::warn!("Failed to install SIGHUP handler: {e}");
            return;
        }
    };
    tokio::spawn(async move {
        while hangup.recv().await.is_some() {
            tracing::info!("SIGHUP received; reloading settings");
            host.set_configuration(load_client_config());
            if events.send(ControllerEvent::ConfigurationChanged).await.is_err() {
                break;
            }
        }
    });
}

#[cfg(not(unix))]
fn spawn_reload_on_hangup(_host: Arc<TerminalHost>, _events: mpsc::Sender<ControllerEvent>) {}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let settings_path = JimpleConfig::path();
    let panel_dir = jimple_config::jimple_dir()
        .unwrap_or_else(|| PathBuf::from(JIMPLE_DIR))
        .join("panels");
    let host = Arc::new(TerminalHost::new(
        load_client_config(),
        install_root(),
        workspace_root()?,
        panel_dir,
        settings_path,
    ));

    notify_upgrade(&host);

    let controller =
        LifecycleController::new(host.clone()).context("invalid file watch patterns")?;
    let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
    let controller_task = tokio::spawn(controller.run(events_rx));
    spawn_reload_on_hangup(host.clone(), events_tx.clone());

    let result = run_input_loop(&host, &events_tx).await;

    // The controller may already be gone if the loop failed on a closed channel.
    let _ = events_tx.send(ControllerEvent::Shutdown).await;
    drop(events_tx);
    if let Err(e) = controller_task.await {
        tracing::warn!("Language client controller task failed: {e}");
    }

    result
}
