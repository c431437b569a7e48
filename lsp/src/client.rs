//! Language client: owns one connection to a language server.
//!
//! A client is created already connected and initialized. Holding a
//! [`LanguageClient`] is proof the handshake completed; [`LanguageClient::stop`]
//! consumes it.

use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use jimple_types::TransportMode;
use serde::Deserialize;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStderr, Command};
use tokio::sync::{Mutex, mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use crate::codec::{FrameReader, FrameWriter};
use crate::feature::{DynamicFeature, NotificationRegistry, RegistrationData};
use crate::protocol::{self, Notification, PathToUriError, Request};
use crate::transport::{ConnectionDescriptor, Executable, ProtocolReader, ProtocolWriter};
use crate::types::{DocumentSelector, FileChangeKind};

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(2);

const WRITER_CHANNEL_CAPACITY: usize = 64;

type PendingMap = Arc<Mutex<HashMap<u64, oneshot::Sender<Value>>>>;

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("{command} not found in PATH")]
    ExecutableNotFound {
        command: String,
        #[source]
        source: which::Error,
    },
    #[error("failed to spawn {command}")]
    Spawn {
        command: String,
        #[source]
        source: io::Error,
    },
    #[error("language server process has no {0}")]
    MissingPipe(&'static str),
    #[error("failed to connect to the language server at {addr}")]
    Connect {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },
    #[error(transparent)]
    WorkspaceUri(#[from] PathToUriError),
    #[error("failed to serialize {method}")]
    Serialize {
        method: &'static str,
        #[source]
        source: serde_json::Error,
    },
    #[error("connection to the language server closed")]
    ChannelClosed,
    #[error("language server did not answer {method} within {timeout:?}")]
    Timeout {
        method: &'static str,
        timeout: Duration,
    },
    #[error("language server rejected initialize: {0}")]
    HandshakeRejected(String),
}

impl ClientError {
    /// Whether the failure happened while dialling a socket.
    #[must_use]
    pub fn is_connection_failure(&self) -> bool {
        matches!(self, Self::Connect { .. })
    }
}

/// Settings a client is constructed with.
#[derive(Debug, Clone)]
pub struct ClientOptions {
    pub name: String,
    pub workspace_root: Option<PathBuf>,
    pub document_selector: DocumentSelector,
    /// `None` waits for the initialize response indefinitely.
    pub handshake_timeout: Option<Duration>,
    /// Launch subprocess servers with the debug profile.
    pub debug: bool,
    /// Root object `workspace/configuration` requests are answered from.
    pub settings: Value,
}

enum WriterCommand {
    Send(Value),
    Shutdown,
}

enum IncomingFrame {
    Response {
        id: u64,
        body: Value,
    },
    ServerRequest {
        id: Value,
        method: String,
        params: Option<Value>,
    },
    Notification {
        method: String,
        params: Option<Value>,
    },
}

fn parse_incoming(frame: &Value) -> Option<IncomingFrame> {
    let id = frame.get("id");
    let method = frame.get("method").and_then(Value::as_str).map(String::from);
    let is_response = frame.get("result").is_some() || frame.get("error").is_some();

    match (id, method, is_response) {
        (Some(id), None, true) => Some(IncomingFrame::Response {
            id: id.as_u64()?,
            body: frame.clone(),
        }),
        (Some(id), Some(method), _) => Some(IncomingFrame::ServerRequest {
            id: id.clone(),
            method,
            params: frame.get("params").cloned(),
        }),
        (None, Some(method), _) => Some(IncomingFrame::Notification {
            method,
            params: frame.get("params").cloned(),
        }),
        _ => None,
    }
}

#[derive(Deserialize)]
struct RegistrationParams {
    #[serde(default)]
    registrations: Vec<RegistrationData>,
}

#[derive(Deserialize)]
struct Unregistration {
    id: String,
    method: String,
}

#[derive(Deserialize)]
struct UnregistrationParams {
    // Misspelled in the LSP specification itself.
    #[serde(default)]
    unregisterations: Vec<Unregistration>,
}

/// State the reader task needs to route incoming frames.
struct Dispatcher {
    name: String,
    pending: PendingMap,
    notifications: NotificationRegistry,
    features: Arc<[Arc<dyn DynamicFeature>]>,
    settings: Value,
    writer_tx: mpsc::Sender<WriterCommand>,
}

impl Dispatcher {
    async fn dispatch(&self, frame: &Value) {
        let Some(incoming) = parse_incoming(frame) else {
            tracing::trace!("Ignoring malformed JSON-RPC frame from '{}'", self.name);
            return;
        };

        match incoming {
            IncomingFrame::Response { id, body } => {
                if let Some(tx) = self.pending.lock().await.remove(&id) {
                    let _ = tx.send(body);
                }
            }
            IncomingFrame::ServerRequest { id, method, params } => {
                let reply = self.handle_request(id, &method, params);
                let _ = self.writer_tx.send(WriterCommand::Send(reply)).await;
            }
            IncomingFrame::Notification { method, params } => {
                self.handle_notification(&method, params);
            }
        }
    }

    fn handle_request(&self, id: Value, method: &str, params: Option<Value>) -> Value {
        match method {
            "client/registerCapability" => {
                let params: RegistrationParams = params
                    .and_then(|p| serde_json::from_value(p).ok())
                    .unwrap_or(RegistrationParams {
                        registrations: Vec::new(),
                    });
                for registration in params.registrations {
                    self.for_method(&registration.method, |feature| {
                        feature.register(registration.clone());
                    });
                }
                protocol::response(id, Value::Null)
            }
            "client/unregisterCapability" => {
                let params: UnregistrationParams = params
                    .and_then(|p| serde_json::from_value(p).ok())
                    .unwrap_or(UnregistrationParams {
                        unregisterations: Vec::new(),
                    });
                for entry in params.unregisterations {
                    self.for_method(&entry.method, |feature| feature.unregister(&entry.id));
                }
                protocol::response(id, Value::Null)
            }
            "workspace/configuration" => {
                let items = params
                    .as_ref()
                    .and_then(|p| p.get("items"))
                    .and_then(Value::as_array)
                    .map(|items| {
                        items
                            .iter()
                            .map(|item| {
                                let section = item.get("section").and_then(Value::as_str);
                                configuration_section(&self.settings, section)
                            })
                            .collect::<Vec<_>>()
                    })
                    .unwrap_or_default();
                protocol::response(id, Value::Array(items))
            }
            _ => {
                // Servers block on unanswered requests; refuse explicitly.
                tracing::debug!(
                    "LSP '{}' sent request: {method}; replying method not found",
                    self.name
                );
                protocol::method_not_found(id, method)
            }
        }
    }

    fn for_method(&self, method: &str, mut apply: impl FnMut(&dyn DynamicFeature)) {
        for feature in self.features.iter() {
            if feature.registration_method() == Some(method) {
                apply(feature.as_ref());
            }
        }
    }

    fn handle_notification(&self, method: &str, params: Option<Value>) {
        if let Some(handler) = self.notifications.handler(method) {
            handler(params);
            return;
        }
        match method {
            "window/logMessage" | "window/showMessage" => {
                let params = params.unwrap_or_default();
                let message = params["message"].as_str().unwrap_or_default();
                match params["type"].as_u64() {
                    Some(1) => tracing::error!(server = %self.name, "{message}"),
                    Some(2) => tracing::warn!(server = %self.name, "{message}"),
                    Some(3) => tracing::info!(server = %self.name, "{message}"),
                    _ => tracing::debug!(server = %self.name, "{message}"),
                }
            }
            _ => tracing::trace!("Ignoring notification from '{}': {method}", self.name),
        }
    }
}

/// Look up a dotted `section` in `settings`. `None` selects the whole tree;
/// a missing key yields `null`.
fn configuration_section(settings: &Value, section: Option<&str>) -> Value {
    let Some(section) = section.filter(|s| !s.is_empty()) else {
        return settings.clone();
    };
    section
        .split('.')
        .try_fold(settings, |node, key| node.get(key))
        .cloned()
        .unwrap_or(Value::Null)
}

fn spawn_server(
    profile: &Executable,
) -> Result<(Child, ProtocolReader, ProtocolWriter), ClientError> {
    let resolved = which::which(&profile.command).map_err(|source| {
        ClientError::ExecutableNotFound {
            command: profile.command.clone(),
            source,
        }
    })?;
    let mut child = Command::new(&resolved)
        .args(&profile.args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|source| ClientError::Spawn {
            command: profile.command.clone(),
            source,
        })?;

    let stdout = child.stdout.take().ok_or(ClientError::MissingPipe("stdout"))?;
    let stdin = child.stdin.take().ok_or(ClientError::MissingPipe("stdin"))?;
    if let Some(stderr) = child.stderr.take() {
        tokio::spawn(log_stderr(stderr));
    }
    Ok((child, Box::new(stdout), Box::new(stdin)))
}

async fn log_stderr(stderr: ChildStderr) {
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        tracing::debug!(target: "jimple_lsp::server_stderr", "{line}");
    }
}

pub struct LanguageClient {
    name: String,
    transport: TransportMode,
    child: Option<Child>,
    writer_tx: mpsc::Sender<WriterCommand>,
    next_id: u64,
    pending: PendingMap,
    features: Arc<[Arc<dyn DynamicFeature>]>,
    notifications: NotificationRegistry,
    server_capabilities: Value,
    /// Open documents and their last sent version.
    open_documents: HashMap<String, i32>,
    /// Flips to `true` once the reader task saw the stream end.
    closed: watch::Receiver<bool>,
    reader_handle: JoinHandle<()>,
    writer_handle: JoinHandle<()>,
}

impl LanguageClient {
    /// Establish the channel described by `descriptor` and run the handshake.
    ///
    /// Features contribute capabilities before the initialize request and are
    /// initialized once the server acknowledged it.
    pub async fn start(
        descriptor: ConnectionDescriptor,
        options: &ClientOptions,
        features: Vec<Arc<dyn DynamicFeature>>,
    ) -> Result<Self, ClientError> {
        let transport = descriptor.mode();
        let (child, reader, writer) = match descriptor {
            ConnectionDescriptor::Subprocess(server) => {
                let profile = server.profile(options.debug);
                tracing::info!(
                    "Launching language server: {} {}",
                    profile.command,
                    profile.args.join(" ")
                );
                let (child, reader, writer) = spawn_server(profile)?;
                (Some(child), reader, writer)
            }
            ConnectionDescriptor::Socket(connector) => {
                tracing::info!(addr = %connector.addr(), "Connecting to language server");
                let pair = connector
                    .connect()
                    .await
                    .map_err(|source| ClientError::Connect {
                        addr: connector.addr(),
                        source,
                    })?;
                (None, pair.reader, pair.writer)
            }
        };

        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let notifications = NotificationRegistry::default();
        let features: Arc<[Arc<dyn DynamicFeature>]> = features.into();

        let (writer_tx, mut writer_rx) = mpsc::channel::<WriterCommand>(WRITER_CHANNEL_CAPACITY);
        let writer_name = options.name.clone();
        let writer_handle = tokio::spawn(async move {
            let mut writer = FrameWriter::new(writer);
            while let Some(cmd) = writer_rx.recv().await {
                match cmd {
                    WriterCommand::Send(frame) => {
                        if let Err(e) = writer.write_frame(&frame).await {
                            tracing::warn!("LSP write error for '{writer_name}': {e}");
                            return;
                        }
                    }
                    WriterCommand::Shutdown => break,
                }
            }
            if let Err(e) = writer.close().await {
                tracing::debug!("Closing LSP stream for '{writer_name}' failed: {e}");
            }
        });

        let dispatcher = Dispatcher {
            name: options.name.clone(),
            pending: pending.clone(),
            notifications: notifications.clone(),
            features: features.clone(),
            settings: options.settings.clone(),
            writer_tx: writer_tx.clone(),
        };
        let (closed_tx, closed) = watch::channel(false);
        let reader_handle = tokio::spawn(async move {
            let mut reader = FrameReader::new(reader);
            loop {
                match reader.read_frame().await {
                    Ok(Some(frame)) => dispatcher.dispatch(&frame).await,
                    Ok(None) => {
                        tracing::info!("LSP server '{}' closed the connection", dispatcher.name);
                        break;
                    }
                    Err(e) => {
                        tracing::warn!("LSP reader error for '{}': {e}", dispatcher.name);
                        break;
                    }
                }
            }
            // Unblock anyone still waiting on a response.
            dispatcher.pending.lock().await.clear();
            closed_tx.send_replace(true);
        });

        let mut client = Self {
            name: options.name.clone(),
            transport,
            child,
            writer_tx,
            next_id: 1,
            pending,
            features,
            notifications,
            server_capabilities: Value::Null,
            open_documents: HashMap::new(),
            closed,
            reader_handle,
            writer_handle,
        };

        client.initialize(options).await?;
        Ok(client)
    }

    async fn initialize(&mut self, options: &ClientOptions) -> Result<(), ClientError> {
        let root_uri = options
            .workspace_root
            .as_deref()
            .map(protocol::path_to_file_uri)
            .transpose()?;

        let mut capabilities = protocol::base_client_capabilities();
        for feature in self.features.iter() {
            feature.fill_client_capabilities(&mut capabilities);
        }
        let params = protocol::initialize_params(
            &options.name,
            root_uri.as_ref().map(url::Url::as_str),
            capabilities,
        );

        let response = self
            .send_request("initialize", Some(params), options.handshake_timeout)
            .await?;
        if let Some(error) = response.get("error") {
            return Err(ClientError::HandshakeRejected(
                error["message"]
                    .as_str()
                    .unwrap_or("unknown error")
                    .to_string(),
            ));
        }
        self.server_capabilities = response["result"]["capabilities"].clone();

        // Handlers must be in place before the server may start pushing.
        for feature in self.features.iter() {
            feature.initialize(
                &self.server_capabilities,
                &options.document_selector,
                &self.notifications,
            );
        }

        self.send_notification("initialized", Some(serde_json::json!({})))
            .await?;
        tracing::info!(
            server = %self.name,
            transport = %self.transport,
            "Language server initialized"
        );
        Ok(())
    }

    async fn send_request(
        &mut self,
        method: &'static str,
        params: Option<Value>,
        timeout: Option<Duration>,
    ) -> Result<Value, ClientError> {
        let id = self.next_id;
        self.next_id += 1;

        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id, tx);

        let frame = serde_json::to_value(Request::new(id, method, params))
            .map_err(|source| ClientError::Serialize { method, source })?;
        if self
            .writer_tx
            .send(WriterCommand::Send(frame))
            .await
            .is_err()
        {
            self.pending.lock().await.remove(&id);
            return Err(ClientError::ChannelClosed);
        }

        let outcome = match timeout {
            Some(limit) => match tokio::time::timeout(limit, rx).await {
                Ok(received) => received,
                Err(_) => {
                    self.pending.lock().await.remove(&id);
                    return Err(ClientError::Timeout {
                        method,
                        timeout: limit,
                    });
                }
            },
            None => rx.await,
        };
        outcome.map_err(|_| ClientError::ChannelClosed)
    }

    async fn send_notification(
        &self,
        method: &'static str,
        params: Option<Value>,
    ) -> Result<(), ClientError> {
        let frame = serde_json::to_value(Notification::new(method, params))
            .map_err(|source| ClientError::Serialize { method, source })?;
        self.writer_tx
            .send(WriterCommand::Send(frame))
            .await
            .map_err(|_| ClientError::ChannelClosed)
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn transport(&self) -> &TransportMode {
        &self.transport
    }

    /// Capabilities the server announced in its initialize response.
    #[must_use]
    pub fn server_capabilities(&self) -> &Value {
        &self.server_capabilities
    }

    /// Whether the server side of the connection is still open.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        !*self.closed.borrow()
    }

    /// Receiver that observes `true` once the server side closes.
    pub(crate) fn closed_watch(&self) -> watch::Receiver<bool> {
        self.closed.clone()
    }

    pub async fn did_open(
        &mut self,
        uri: &str,
        language_id: &str,
        text: &str,
    ) -> Result<(), ClientError> {
        self.open_documents.insert(uri.to_string(), 1);
        let params = protocol::did_open_params(uri, language_id, 1, text);
        self.send_notification("textDocument/didOpen", Some(params))
            .await
    }

    /// Send the full new text. A change to a document that was never opened
    /// opens it instead.
    pub async fn did_change(
        &mut self,
        uri: &str,
        language_id: &str,
        text: &str,
    ) -> Result<(), ClientError> {
        let Some(version) = self.open_documents.get_mut(uri) else {
            return self.did_open(uri, language_id, text).await;
        };
        *version += 1;
        let params = protocol::did_change_params(uri, *version, text);
        self.send_notification("textDocument/didChange", Some(params))
            .await
    }

    pub async fn did_save(&mut self, uri: &str) -> Result<(), ClientError> {
        if !self.open_documents.contains_key(uri) {
            return Ok(());
        }
        self.send_notification(
            "textDocument/didSave",
            Some(protocol::text_document_params(uri)),
        )
        .await
    }

    pub async fn did_close(&mut self, uri: &str) -> Result<(), ClientError> {
        if self.open_documents.remove(uri).is_none() {
            return Ok(());
        }
        self.send_notification(
            "textDocument/didClose",
            Some(protocol::text_document_params(uri)),
        )
        .await
    }

    pub async fn did_change_watched_files(
        &mut self,
        changes: &[(String, FileChangeKind)],
    ) -> Result<(), ClientError> {
        let params = protocol::did_change_watched_files_params(changes);
        self.send_notification("workspace/didChangeWatchedFiles", Some(params))
            .await
    }

    /// Shut the server down: `shutdown`, then `exit`, then close the stream
    /// and reap the process. Consumes the client.
    pub async fn stop(mut self) {
        for feature in self.features.iter() {
            feature.dispose();
        }
        self.notifications.clear();

        if self.is_connected() {
            match self
                .send_request("shutdown", None, Some(SHUTDOWN_TIMEOUT))
                .await
            {
                Ok(response) if response.get("error").is_none() => {
                    let _ = self.send_notification("exit", None).await;
                }
                Ok(_) => tracing::debug!("LSP '{}' refused shutdown", self.name),
                Err(e) => tracing::debug!("LSP '{}' shutdown failed: {e}", self.name),
            }
        } else {
            tracing::debug!("LSP '{}' already disconnected, skipping shutdown", self.name);
        }

        let _ = self.writer_tx.send(WriterCommand::Shutdown).await;
        if tokio::time::timeout(SHUTDOWN_TIMEOUT, &mut self.writer_handle)
            .await
            .is_err()
        {
            self.writer_handle.abort();
        }
        self.reader_handle.abort();

        if let Some(mut child) = self.child.take() {
            if tokio::time::timeout(SHUTDOWN_TIMEOUT, child.wait())
                .await
                .is_err()
            {
                tracing::debug!("LSP '{}' didn't exit in time, killing", self.name);
                let _ = child.kill().await;
            }
        }
        tracing::info!(server = %self.name, "Language client stopped");
    }
}

impl Drop for LanguageClient {
    fn drop(&mut self) {
        self.reader_handle.abort();
        self.writer_handle.abort();
    }
}
