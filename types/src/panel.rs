//! Messages posted by a rendered control panel and the HTTP actions they map to.

use serde::{Deserialize, Serialize};

/// Separator between the target URL and the form body of a
/// `configuration` message.
pub const FORM_SEPARATOR: char = '?';

/// A message posted from a panel's script back to the client.
///
/// Mirrors the `{ command, text }` object the server-provided markup posts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PanelMessage {
    pub command: String,
    #[serde(default)]
    pub text: String,
}

impl PanelMessage {
    #[must_use]
    pub fn new(command: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            text: text.into(),
        }
    }

    /// Classify the message into the outbound request it asks for.
    ///
    /// Unknown commands map to [`PanelAction::Ignored`]; they are never an error.
    #[must_use]
    pub fn action(&self) -> PanelAction {
        match self.command.as_str() {
            "action" => PanelAction::Get {
                url: self.text.clone(),
            },
            "configuration" => {
                // Exactly two parts: everything after the first separator is the body.
                let (url, body) = self
                    .text
                    .split_once(FORM_SEPARATOR)
                    .unwrap_or((self.text.as_str(), ""));
                PanelAction::Post {
                    url: url.to_string(),
                    body: body.to_string(),
                }
            }
            _ => PanelAction::Ignored,
        }
    }
}

/// Outbound request derived from a [`PanelMessage`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PanelAction {
    Get { url: String },
    Post { url: String, body: String },
    Ignored,
}
