//! Terminal implementation of the editor host.
//!
//! Panels are written to `<panel_dir>/panel-<n>.html`; prompts are printed
//! as numbered choices and answered through stdin commands.

use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use jimple_lsp::{
    ClientConfig, EditorHost, PanelHost, PanelId, PanelRequest, PanelSession, PromptId,
    RecoveryAction, RecoveryPrompt,
};
use jimple_types::PanelMessage;
use tokio::sync::mpsc;

use crate::welcome::NoticeAction;

const PANEL_CHANNEL_CAPACITY: usize = 16;

/// A choice the user made on the pending prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Choice {
    Recovery {
        prompt: PromptId,
        action: RecoveryAction,
    },
    Notice(NoticeAction),
}

#[derive(Debug)]
enum Pending {
    Recovery(RecoveryPrompt),
    Notice,
}

#[derive(Debug, thiserror::Error)]
pub enum PanelInputError {
    #[error("no panel is open")]
    NoPanel,
    #[error("panel {0:?} is closed")]
    Closed(PanelId),
    #[error("panel {0:?} is busy")]
    Full(PanelId),
}

pub struct TerminalHost {
    config: Mutex<ClientConfig>,
    install_root: PathBuf,
    workspace_root: Option<PathBuf>,
    panel_dir: PathBuf,
    settings_path: Option<PathBuf>,
    next_panel: AtomicU64,
    panels: Mutex<Vec<(PanelId, mpsc::Sender<PanelMessage>)>>,
    pending: Mutex<Option<Pending>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl TerminalHost {
    #[must_use]
    pub fn new(
        config: ClientConfig,
        install_root: PathBuf,
        workspace_root: Option<PathBuf>,
        panel_dir: PathBuf,
        settings_path: Option<PathBuf>,
    ) -> Self {
        Self {
            config: Mutex::new(config),
            install_root,
            workspace_root,
            panel_dir,
            settings_path,
            next_panel: AtomicU64::new(1),
            panels: Mutex::new(Vec::new()),
            pending: Mutex::new(None),
        }
    }

    /// Replace the settings read on the next start.
    pub fn set_configuration(&self, config: ClientConfig) {
        *lock(&self.config) = config;
    }

    pub fn show_notice(&self, message: &str) {
        println!("{message}");
        for (index, action) in NoticeAction::ALL.iter().enumerate() {
            println!("  [{}] {}", index + 1, action.label());
        }
        *lock(&self.pending) = Some(Pending::Notice);
    }

    /// Resolve a 1-based choice on the pending prompt. The prompt is consumed
    /// by any valid choice.
    pub fn choose(&self, number: usize) -> Option<Choice> {
        let mut pending = lock(&self.pending);
        let index = number.checked_sub(1)?;
        let choice = match pending.as_ref()? {
            Pending::Recovery(prompt) => Choice::Recovery {
                prompt: prompt.id,
                action: *prompt.actions.get(index)?,
            },
            Pending::Notice => Choice::Notice(*NoticeAction::ALL.get(index)?),
        };
        *pending = None;
        Some(choice)
    }

    /// Post a message from the most recently opened panel.
    pub fn post_to_latest_panel(&self, message: PanelMessage) -> Result<PanelId, PanelInputError> {
        let mut panels = lock(&self.panels);
        panels.retain(|(_, tx)| !tx.is_closed());
        let (id, tx) = panels.last().ok_or(PanelInputError::NoPanel)?;
        match tx.try_send(message) {
            Ok(()) => Ok(*id),
            Err(mpsc::error::TrySendError::Closed(_)) => Err(PanelInputError::Closed(*id)),
            Err(mpsc::error::TrySendError::Full(_)) => Err(PanelInputError::Full(*id)),
        }
    }

    /// Close the most recently opened panel, ending its session.
    pub fn close_latest_panel(&self) -> Option<PanelId> {
        lock(&self.panels).pop().map(|(id, _)| id)
    }
}

impl PanelHost for TerminalHost {
    fn create_panel(&self, request: PanelRequest) -> PanelSession {
        let id = PanelId(self.next_panel.fetch_add(1, Ordering::Relaxed));
        let (tx, session) = PanelSession::channel(id, PANEL_CHANNEL_CAPACITY);

        let path = self.panel_dir.join(format!("panel-{}.html", id.0));
        let written =
            fs::create_dir_all(&self.panel_dir).and_then(|()| fs::write(&path, &request.html));
        match written {
            Ok(()) => println!(
                "{} [{}]: {}",
                request.title,
                request.view_type,
                path.display()
            ),
            Err(e) => {
                tracing::warn!(path = %path.display(), "Failed to write panel: {e}");
                println!("{} opened (not saved: {e})", request.title);
            }
        }

        lock(&self.panels).push((id, tx));
        session
    }
}

impl EditorHost for TerminalHost {
    fn configuration(&self) -> ClientConfig {
        lock(&self.config).clone()
    }

    fn install_root(&self) -> PathBuf {
        self.install_root.clone()
    }

    fn workspace_root(&self) -> Option<PathBuf> {
        self.workspace_root.clone()
    }

    fn show_recovery_prompt(&self, prompt: RecoveryPrompt) {
        println!("{}", prompt.message);
        for (index, action) in prompt.actions.iter().enumerate() {
            println!("  [{}] {}", index + 1, action.label());
        }
        *lock(&self.pending) = Some(Pending::Recovery(prompt));
    }

    fn open_settings(&self) {
        match &self.settings_path {
            Some(path) => println!(
                "Settings: {} (section [lsp]); send `reload` after editing",
                path.display()
            ),
            None => println!("Settings: no home directory; using defaults"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn host(dir: &TempDir) -> TerminalHost {
        TerminalHost::new(
            ClientConfig::default(),
            dir.path().to_path_buf(),
            None,
            dir.path().join("panels"),
            None,
        )
    }

    fn request(html: &str) -> PanelRequest {
        PanelRequest {
            view_type: "Configuration".to_string(),
            title: "MagpieBridge Control Panel".to_string(),
            html: html.to_string(),
            enable_scripts: true,
        }
    }

    #[test]
    fn recovery_choice_maps_to_prompt_action() {
        let dir = TempDir::new().unwrap();
        let host = host(&dir);
        host.show_recovery_prompt(RecoveryPrompt {
            id: PromptId(3),
            message: "failed".to_string(),
            actions: vec![RecoveryAction::OpenSettings, RecoveryAction::Reconnect],
        });

        assert_eq!(host.choose(3), None);
        assert_eq!(
            host.choose(2),
            Some(Choice::Recovery {
                prompt: PromptId(3),
                action: RecoveryAction::Reconnect
            })
        );
        assert_eq!(host.choose(2), None, "prompt is consumed");
    }

    #[test]
    fn notice_choice_maps_to_notice_action() {
        let dir = TempDir::new().unwrap();
        let host = host(&dir);
        host.show_notice("Thanks for using JimpleLSP!");
        assert_eq!(host.choose(0), None);
        assert_eq!(host.choose(3), Some(Choice::Notice(NoticeAction::ReportBug)));
    }

    #[tokio::test]
    async fn panels_are_written_and_receive_messages() {
        let dir = TempDir::new().unwrap();
        let host = host(&dir);

        let mut session = host.create_panel(request("<p>hi</p>"));
        let html = fs::read_to_string(dir.path().join("panels").join("panel-1.html")).unwrap();
        assert_eq!(html, "<p>hi</p>");

        let id = host
            .post_to_latest_panel(PanelMessage::new("action", "http://localhost/x"))
            .unwrap();
        assert_eq!(id, session.id());
        assert_eq!(
            session.next_message().await,
            Some(PanelMessage::new("action", "http://localhost/x"))
        );

        assert_eq!(host.close_latest_panel(), Some(id));
        assert_eq!(session.next_message().await, None);
        assert!(matches!(
            host.post_to_latest_panel(PanelMessage::new("action", "x")),
            Err(PanelInputError::NoPanel)
        ));
    }

    #[test]
    fn configuration_is_replaceable() {
        let dir = TempDir::new().unwrap();
        let host = host(&dir);
        host.set_configuration(ClientConfig {
            port: 9000,
            ..ClientConfig::default()
        });
        assert_eq!(host.configuration().port, 9000);
    }
}
