//! In-process fake language server and recording host for lifecycle tests.

#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use jimple_lsp::codec::{FrameReader, FrameWriter};
use jimple_lsp::{
    ClientConfig, EditorHost, PanelHost, PanelId, PanelRequest, PanelSession, RecoveryPrompt,
};
use jimple_types::{PanelMessage, TransportMode};
use serde_json::{Value, json};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Poll `condition` until it holds, failing the test after five seconds.
pub async fn eventually(what: &str, condition: impl Fn() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for {what}"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// A port nothing listens on.
pub async fn closed_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

#[derive(Default)]
struct Recorded {
    /// `connect#n`, `<method>#n` in arrival order, `n` counting connections.
    log: Vec<String>,
    initialize_params: Vec<Value>,
    notifications: Vec<(String, Value)>,
    /// Responses the client sent to server-initiated requests.
    responses: Vec<Value>,
}

/// What the fake server does once a client sends `initialized`.
#[derive(Debug, Clone, Default)]
pub struct Script {
    /// Push `magpiebridge/showHTML` with this markup.
    pub push_html: Option<String>,
    /// Ask for these `workspace/configuration` sections.
    pub request_sections: Vec<String>,
    /// Close the connection without a shutdown exchange.
    pub drop_connection: bool,
}

/// Speaks just enough LSP over TCP to complete handshakes and shutdowns.
pub struct FakeServer {
    pub port: u16,
    recorded: Arc<Mutex<Recorded>>,
    accept_task: JoinHandle<()>,
}

impl FakeServer {
    pub async fn start() -> Self {
        Self::start_with_push(None).await
    }

    /// After `initialized`, push `magpiebridge/showHTML` with `html`.
    pub async fn start_with_push(html: Option<String>) -> Self {
        Self::start_with(Script {
            push_html: html,
            ..Script::default()
        })
        .await
    }

    pub async fn start_with(script: Script) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let recorded = Arc::new(Mutex::new(Recorded::default()));
        let connections = Arc::new(AtomicU64::new(0));

        let state = recorded.clone();
        let accept_task = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let n = connections.fetch_add(1, Ordering::SeqCst) + 1;
                state.lock().unwrap().log.push(format!("connect#{n}"));
                tokio::spawn(serve_connection(n, stream, state.clone(), script.clone()));
            }
        });

        Self {
            port,
            recorded,
            accept_task,
        }
    }

    pub fn log(&self) -> Vec<String> {
        self.recorded.lock().unwrap().log.clone()
    }

    pub fn position(&self, entry: &str) -> Option<usize> {
        self.log().iter().position(|e| e == entry)
    }

    pub fn count_prefix(&self, prefix: &str) -> usize {
        self.log().iter().filter(|e| e.starts_with(prefix)).count()
    }

    pub fn initialize_params(&self) -> Vec<Value> {
        self.recorded.lock().unwrap().initialize_params.clone()
    }

    pub fn notifications(&self, method: &str) -> Vec<Value> {
        self.recorded
            .lock()
            .unwrap()
            .notifications
            .iter()
            .filter(|(m, _)| m == method)
            .map(|(_, params)| params.clone())
            .collect()
    }

    pub fn responses(&self) -> Vec<Value> {
        self.recorded.lock().unwrap().responses.clone()
    }

    pub fn socket_config(&self) -> ClientConfig {
        ClientConfig {
            transport: TransportMode::Socket,
            port: self.port,
            ..ClientConfig::default()
        }
    }
}

impl Drop for FakeServer {
    fn drop(&mut self) {
        self.accept_task.abort();
    }
}

async fn serve_connection(
    n: u64,
    stream: TcpStream,
    recorded: Arc<Mutex<Recorded>>,
    script: Script,
) {
    let (read_half, write_half) = stream.into_split();
    let mut reader = FrameReader::new(read_half);
    let mut writer = FrameWriter::new(write_half);

    while let Ok(Some(frame)) = reader.read_frame().await {
        let Some(method) = frame["method"].as_str().map(str::to_string) else {
            recorded.lock().unwrap().responses.push(frame);
            continue;
        };
        let params = frame.get("params").cloned().unwrap_or(Value::Null);
        {
            let mut state = recorded.lock().unwrap();
            state.log.push(format!("{method}#{n}"));
            if method == "initialize" {
                state.initialize_params.push(params.clone());
            } else if frame.get("id").is_none() {
                state.notifications.push((method.clone(), params.clone()));
            }
        }

        match method.as_str() {
            "initialize" => {
                let reply = json!({
                    "jsonrpc": "2.0",
                    "id": frame["id"],
                    "result": { "capabilities": { "textDocumentSync": 1 } }
                });
                writer.write_frame(&reply).await.unwrap();
            }
            "initialized" => {
                if let Some(html) = &script.push_html {
                    let push = json!({
                        "jsonrpc": "2.0",
                        "method": "magpiebridge/showHTML",
                        "params": html
                    });
                    writer.write_frame(&push).await.unwrap();
                }
                if !script.request_sections.is_empty() {
                    let items: Vec<Value> = script
                        .request_sections
                        .iter()
                        .map(|section| json!({ "section": section }))
                        .collect();
                    let request = json!({
                        "jsonrpc": "2.0",
                        "id": 900,
                        "method": "workspace/configuration",
                        "params": { "items": items }
                    });
                    writer.write_frame(&request).await.unwrap();
                }
                if script.drop_connection {
                    break;
                }
            }
            "shutdown" => {
                let reply = json!({ "jsonrpc": "2.0", "id": frame["id"], "result": null });
                writer.write_frame(&reply).await.unwrap();
            }
            "exit" => break,
            _ => {}
        }
    }
}

/// Host that records prompts and panels instead of showing them.
pub struct RecordingHost {
    config: Mutex<ClientConfig>,
    prompts: Mutex<Vec<RecoveryPrompt>>,
    panels: Mutex<Vec<(PanelRequest, mpsc::Sender<PanelMessage>)>>,
    next_panel: AtomicU64,
    pub settings_opened: AtomicUsize,
}

impl RecordingHost {
    pub fn new(config: ClientConfig) -> Arc<Self> {
        Arc::new(Self {
            config: Mutex::new(config),
            prompts: Mutex::new(Vec::new()),
            panels: Mutex::new(Vec::new()),
            next_panel: AtomicU64::new(1),
            settings_opened: AtomicUsize::new(0),
        })
    }

    pub fn set_config(&self, config: ClientConfig) {
        *self.config.lock().unwrap() = config;
    }

    pub fn prompts(&self) -> Vec<RecoveryPrompt> {
        self.prompts.lock().unwrap().clone()
    }

    pub fn panel_requests(&self) -> Vec<PanelRequest> {
        self.panels
            .lock()
            .unwrap()
            .iter()
            .map(|(request, _)| request.clone())
            .collect()
    }

    pub fn panel_sender(&self, index: usize) -> mpsc::Sender<PanelMessage> {
        self.panels.lock().unwrap()[index].1.clone()
    }
}

impl PanelHost for RecordingHost {
    fn create_panel(&self, request: PanelRequest) -> PanelSession {
        let id = PanelId(self.next_panel.fetch_add(1, Ordering::SeqCst));
        let (tx, session) = PanelSession::channel(id, 8);
        self.panels.lock().unwrap().push((request, tx));
        session
    }
}

impl EditorHost for RecordingHost {
    fn configuration(&self) -> ClientConfig {
        self.config.lock().unwrap().clone()
    }

    fn install_root(&self) -> PathBuf {
        PathBuf::from("/opt/jimple")
    }

    fn workspace_root(&self) -> Option<PathBuf> {
        None
    }

    fn show_recovery_prompt(&self, prompt: RecoveryPrompt) {
        self.prompts.lock().unwrap().push(prompt);
    }

    fn open_settings(&self) {
        self.settings_opened.fetch_add(1, Ordering::SeqCst);
    }
}
