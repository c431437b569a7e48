//! Lifecycle controller: owns the single active language client.
//!
//! Two states, held in `self.client`: `Some` is CLIENT_ACTIVE and `None` is
//! NO_CLIENT. Every transition goes through `&mut self`, so the
//! event loop in [`LifecycleController::run`] serializes them and a new
//! client is never started before the previous one finished stopping.

use std::ops::ControlFlow;
use std::sync::Arc;

use jimple_types::TransportMode;
use tokio::sync::{mpsc, watch};

use crate::client::{ClientError, ClientOptions, LanguageClient};
use crate::feature::DynamicFeature;
use crate::host::{EditorHost, PanelHost, PromptId, RecoveryAction, RecoveryPrompt};
use crate::protocol;
use crate::relay::HttpRelay;
use crate::show_html::ShowHtmlFeature;
use crate::transport::{launch_args, select_transport};
use crate::types::{
    CLIENT_NAME, DocumentEvent, DocumentSelector, FileChangeKind, FileEvent, FileWatchPatterns,
};

/// Shown when the socket transport cannot reach the server.
pub const CONNECTION_FAILED_MESSAGE: &str = "Failed to connect to the Jimple language server. \
     Make sure that the language server is running -or- configure the extension to connect \
     via standard IO.";

/// Events the host feeds into [`LifecycleController::run`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControllerEvent {
    ConfigurationChanged,
    /// The user picked an action on a recovery prompt.
    Recovery {
        prompt: PromptId,
        action: RecoveryAction,
    },
    Document(DocumentEvent),
    /// Batch from the host's file watcher.
    FilesChanged(Vec<FileEvent>),
    /// The active client's server closed the connection. Raised by
    /// [`LifecycleController::run`] itself; hosts may send it too.
    ConnectionLost,
    Shutdown,
}

/// Result of a start transition.
#[derive(Debug)]
pub enum StartOutcome {
    Started,
    /// A client is already active; nothing was started.
    AlreadyActive,
    /// The configured transport is not recognized.
    Disabled,
    /// The socket could not be reached; a recovery prompt is showing.
    ConnectionFailed(PromptId),
    /// Launch or handshake failed. Not retried.
    Failed(ClientError),
}

impl StartOutcome {
    #[must_use]
    pub fn is_started(&self) -> bool {
        matches!(self, Self::Started)
    }
}

pub struct LifecycleController<H> {
    host: Arc<H>,
    relay: HttpRelay,
    client: Option<LanguageClient>,
    document_selector: DocumentSelector,
    watch_patterns: FileWatchPatterns,
    next_prompt: u64,
    /// The only prompt whose `Reconnect` is still honored.
    outstanding_prompt: Option<PromptId>,
}

impl<H: EditorHost + 'static> LifecycleController<H> {
    pub fn new(host: Arc<H>) -> Result<Self, globset::Error> {
        Ok(Self {
            host,
            relay: HttpRelay::default(),
            client: None,
            document_selector: DocumentSelector::default(),
            watch_patterns: FileWatchPatterns::jimple()?,
            next_prompt: 1,
            outstanding_prompt: None,
        })
    }

    #[must_use]
    pub fn with_relay(mut self, relay: HttpRelay) -> Self {
        self.relay = relay;
        self
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.client.is_some()
    }

    #[must_use]
    pub fn client(&self) -> Option<&LanguageClient> {
        self.client.as_ref()
    }

    #[must_use]
    pub fn outstanding_prompt(&self) -> Option<PromptId> {
        self.outstanding_prompt
    }

    /// NO_CLIENT -> CLIENT_ACTIVE.
    ///
    /// Reads configuration from the host, builds the descriptor, and awaits
    /// the handshake. Does nothing while a client is active.
    pub async fn start(&mut self) -> StartOutcome {
        if self.client.is_some() {
            return StartOutcome::AlreadyActive;
        }
        self.outstanding_prompt = None;

        let config = self.host.configuration();
        let artifact = config.server_artifact_path(&self.host.install_root());
        let args = launch_args(&artifact);
        let Some(descriptor) =
            select_transport(&config.transport, &config.executable, &args, config.port)
        else {
            tracing::warn!(
                transport = %config.transport,
                "Unrecognized transport mode; language client not started"
            );
            return StartOutcome::Disabled;
        };

        let options = ClientOptions {
            name: CLIENT_NAME.to_string(),
            workspace_root: self.host.workspace_root(),
            document_selector: self.document_selector.clone(),
            handshake_timeout: config.handshake_timeout(),
            debug: config.debug,
            settings: config.settings(),
        };
        let panels: Arc<dyn PanelHost> = self.host.clone();
        let features: Vec<Arc<dyn DynamicFeature>> =
            vec![Arc::new(ShowHtmlFeature::new(panels, self.relay.clone()))];

        match LanguageClient::start(descriptor, &options, features).await {
            Ok(client) => {
                self.client = Some(client);
                StartOutcome::Started
            }
            Err(e) if e.is_connection_failure() => {
                tracing::warn!("Language server connection failed: {e}");
                // Invalidate before prompting so a retry starts from scratch.
                self.client = None;
                StartOutcome::ConnectionFailed(self.prompt_connection_failure())
            }
            Err(e) => {
                tracing::warn!("Failed to start language client: {e}");
                StartOutcome::Failed(e)
            }
        }
    }

    /// CLIENT_ACTIVE -> NO_CLIENT. Returns once the client has fully stopped.
    pub async fn stop(&mut self) {
        if let Some(client) = self.client.take() {
            tracing::info!("Stopping language client '{}'", client.name());
            client.stop().await;
        }
    }

    /// Stop the active client (if any), then start a fresh one.
    pub async fn restart(&mut self) -> StartOutcome {
        self.stop().await;
        self.start().await
    }

    /// Entry point for activation and configuration changes.
    pub async fn start_or_restart(&mut self) -> StartOutcome {
        self.restart().await
    }

    /// Re-run the whole start sequence for the user's `Reconnect` choice.
    ///
    /// Only the latest outstanding prompt counts, and only while no client is
    /// active; anything else returns `None` without side effects.
    pub async fn retry(&mut self, prompt: PromptId) -> Option<StartOutcome> {
        if self.outstanding_prompt != Some(prompt) || self.client.is_some() {
            tracing::debug!(prompt = prompt.0, "Ignoring stale reconnect request");
            return None;
        }
        self.outstanding_prompt = None;
        Some(self.start_or_restart().await)
    }

    /// CLIENT_ACTIVE -> NO_CLIENT after the server went away on its own.
    ///
    /// A dropped socket gets the same recovery prompt as a failed connect.
    /// Does nothing while the active client is still connected.
    pub async fn connection_lost(&mut self) {
        let Some(client) = self.client.take_if(|client| !client.is_connected()) else {
            return;
        };
        let is_socket = matches!(client.transport(), TransportMode::Socket);
        tracing::warn!(
            server = %client.name(),
            transport = %client.transport(),
            "Language server connection lost"
        );
        client.stop().await;
        if is_socket {
            self.prompt_connection_failure();
        }
    }

    fn prompt_connection_failure(&mut self) -> PromptId {
        let id = PromptId(self.next_prompt);
        self.next_prompt += 1;
        self.outstanding_prompt = Some(id);
        self.host.show_recovery_prompt(RecoveryPrompt {
            id,
            message: CONNECTION_FAILED_MESSAGE.to_string(),
            actions: vec![RecoveryAction::OpenSettings, RecoveryAction::Reconnect],
        });
        id
    }

    pub async fn handle_event(&mut self, event: ControllerEvent) -> ControlFlow<()> {
        match event {
            ControllerEvent::ConfigurationChanged => {
                tracing::info!("Configuration changed; restarting language client");
                self.start_or_restart().await;
            }
            ControllerEvent::Recovery {
                prompt,
                action: RecoveryAction::Reconnect,
            } => {
                self.retry(prompt).await;
            }
            ControllerEvent::Recovery {
                prompt,
                action: RecoveryAction::OpenSettings,
            } => {
                if self.outstanding_prompt == Some(prompt) {
                    self.outstanding_prompt = None;
                }
                self.host.open_settings();
            }
            ControllerEvent::Document(event) => self.document(event).await,
            ControllerEvent::FilesChanged(events) => self.files_changed(&events).await,
            ControllerEvent::ConnectionLost => self.connection_lost().await,
            ControllerEvent::Shutdown => return ControlFlow::Break(()),
        }
        ControlFlow::Continue(())
    }

    /// Activate, then process events until `Shutdown` or the channel closes.
    ///
    /// The active client's connection is watched alongside the channel; its
    /// loss is handled as [`ControllerEvent::ConnectionLost`].
    pub async fn run(mut self, mut events: mpsc::Receiver<ControllerEvent>) {
        self.start_or_restart().await;
        loop {
            let closed = self.client.as_ref().map(LanguageClient::closed_watch);
            let event = tokio::select! {
                event = events.recv() => match event {
                    Some(event) => event,
                    None => break,
                },
                () = wait_connection_lost(closed) => ControllerEvent::ConnectionLost,
            };
            if self.handle_event(event).await.is_break() {
                break;
            }
        }
        self.stop().await;
    }

    async fn document(&mut self, event: DocumentEvent) {
        match event {
            DocumentEvent::Opened {
                uri,
                language_id,
                text,
            } => self.did_open(&uri, &language_id, &text).await,
            DocumentEvent::Changed {
                uri,
                language_id,
                text,
            } => self.did_change(&uri, &language_id, &text).await,
            DocumentEvent::Saved { uri, language_id } => self.did_save(&uri, &language_id).await,
            DocumentEvent::Closed { uri, language_id } => {
                self.did_close(&uri, &language_id).await;
            }
        }
    }

    fn selected_client(
        &mut self,
        uri: &url::Url,
        language_id: &str,
    ) -> Option<&mut LanguageClient> {
        if !self.document_selector.matches(uri, language_id) {
            return None;
        }
        self.client.as_mut()
    }

    pub async fn did_open(&mut self, uri: &url::Url, language_id: &str, text: &str) {
        let Some(client) = self.selected_client(uri, language_id) else {
            return;
        };
        if let Err(e) = client.did_open(uri.as_str(), language_id, text).await {
            tracing::warn!("Failed to send didOpen for {uri}: {e}");
        }
    }

    pub async fn did_change(&mut self, uri: &url::Url, language_id: &str, text: &str) {
        let Some(client) = self.selected_client(uri, language_id) else {
            return;
        };
        if let Err(e) = client.did_change(uri.as_str(), language_id, text).await {
            tracing::warn!("Failed to send didChange for {uri}: {e}");
        }
    }

    pub async fn did_save(&mut self, uri: &url::Url, language_id: &str) {
        let Some(client) = self.selected_client(uri, language_id) else {
            return;
        };
        if let Err(e) = client.did_save(uri.as_str()).await {
            tracing::warn!("Failed to send didSave for {uri}: {e}");
        }
    }

    pub async fn did_close(&mut self, uri: &url::Url, language_id: &str) {
        let Some(client) = self.selected_client(uri, language_id) else {
            return;
        };
        if let Err(e) = client.did_close(uri.as_str()).await {
            tracing::warn!("Failed to send didClose for {uri}: {e}");
        }
    }

    /// Forward watched-file events. Paths outside the watch globs are dropped;
    /// nothing is sent when none remain.
    pub async fn files_changed(&mut self, events: &[FileEvent]) {
        let changes = self.watched_changes(events);
        if changes.is_empty() {
            return;
        }
        let Some(client) = self.client.as_mut() else {
            return;
        };
        if let Err(e) = client.did_change_watched_files(&changes).await {
            tracing::warn!("Failed to send didChangeWatchedFiles: {e}");
        }
    }

    fn watched_changes(&self, events: &[FileEvent]) -> Vec<(String, FileChangeKind)> {
        events
            .iter()
            .filter(|event| self.watch_patterns.matches(&event.path))
            .filter_map(|event| match protocol::path_to_file_uri(&event.path) {
                Ok(uri) => Some((uri.to_string(), event.kind)),
                Err(e) => {
                    tracing::warn!("Skipping watched file event: {e}");
                    None
                }
            })
            .collect()
    }
}

/// Resolves once `closed` observes `true`; never resolves without a client.
async fn wait_connection_lost(closed: Option<watch::Receiver<bool>>) {
    let Some(mut closed) = closed else {
        return std::future::pending().await;
    };
    // A sender dropped without reporting `true` belongs to a client torn down elsewhere.
    if closed.wait_for(|closed| *closed).await.is_err() {
        std::future::pending::<()>().await;
    }
}
