//! Boundary to the host editor.
//!
//! The client never touches UI or settings storage directly. Hosts implement
//! [`PanelHost`] to render server-pushed content and [`EditorHost`] for
//! configuration, recovery prompts, and the settings surface.

use std::fmt;
use std::path::PathBuf;

use jimple_types::PanelMessage;
use tokio::sync::mpsc;

use crate::types::ClientConfig;

/// Identifies a panel for the lifetime of the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PanelId(pub u64);

/// Request to open a panel rendering server-provided markup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PanelRequest {
    pub view_type: String,
    pub title: String,
    /// Opaque markup, rendered as-is.
    pub html: String,
    pub enable_scripts: bool,
}

/// One opened panel: the UI surface lives in the host, this side only
/// receives the messages the panel posts. The session ends when the host
/// drops the sending half (the panel was closed).
pub struct PanelSession {
    id: PanelId,
    messages: mpsc::Receiver<PanelMessage>,
}

impl PanelSession {
    /// Create a session and the sender the host keeps for it.
    #[must_use]
    pub fn channel(id: PanelId, capacity: usize) -> (mpsc::Sender<PanelMessage>, Self) {
        let (tx, messages) = mpsc::channel(capacity);
        (tx, Self { id, messages })
    }

    #[must_use]
    pub fn id(&self) -> PanelId {
        self.id
    }

    /// Next message posted by the panel, or `None` once it is closed.
    pub async fn next_message(&mut self) -> Option<PanelMessage> {
        self.messages.recv().await
    }
}

impl fmt::Debug for PanelSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PanelSession").field("id", &self.id).finish()
    }
}

/// Renders pushed content.
///
/// `create_panel` is called on the blocking thread pool and may block.
pub trait PanelHost: Send + Sync {
    fn create_panel(&self, request: PanelRequest) -> PanelSession;
}

/// Identifies a recovery prompt so that only the latest one can trigger a retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PromptId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryAction {
    OpenSettings,
    Reconnect,
}

impl RecoveryAction {
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::OpenSettings => "Open settings",
            Self::Reconnect => "Reconnect",
        }
    }
}

/// A user-facing error with explicit recovery actions.
///
/// Hosts show it without blocking and report the chosen action back as a
/// `ControllerEvent::Recovery` carrying the same [`PromptId`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecoveryPrompt {
    pub id: PromptId,
    pub message: String,
    pub actions: Vec<RecoveryAction>,
}

/// Host editor services used by the lifecycle controller.
pub trait EditorHost: PanelHost {
    /// Current client settings. Read on every start so changes apply on restart.
    fn configuration(&self) -> ClientConfig;

    /// Directory the client was installed into; server artifacts resolve against it.
    fn install_root(&self) -> PathBuf;

    fn workspace_root(&self) -> Option<PathBuf>;

    fn show_recovery_prompt(&self, prompt: RecoveryPrompt);

    fn open_settings(&self);
}
