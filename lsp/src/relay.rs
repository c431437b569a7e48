//! Outbound HTTP on behalf of the server.
//!
//! The server never opens connections itself: panel messages ask the client
//! to issue the request. Requests are fire-and-forget. Nothing is reported
//! back to the panel, there is no retry, and concurrent requests are not
//! ordered relative to each other.

use std::time::Duration;

use jimple_types::{PanelAction, PanelMessage};
use reqwest::header::{CONTENT_TYPE, HeaderValue};
use tokio::task::JoinHandle;

const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Body type a browser assigns to a plain string `send()`.
const FORM_BODY_CONTENT_TYPE: &str = "text/plain;charset=UTF-8";

#[derive(Debug, Clone)]
pub struct HttpRelay {
    client: reqwest::Client,
}

impl Default for HttpRelay {
    fn default() -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .user_agent(concat!("jimple-lsp/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!("Failed to build relay HTTP client: {e}. Using defaults.");
                reqwest::Client::new()
            });
        Self { client }
    }
}

impl HttpRelay {
    #[must_use]
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }

    /// Issue the request a panel message asks for.
    ///
    /// Returns the spawned request task, or `None` when the message kind is
    /// not recognized. Callers are not expected to await the handle.
    pub fn dispatch(&self, message: &PanelMessage) -> Option<JoinHandle<()>> {
        match message.action() {
            PanelAction::Get { url } => {
                tracing::debug!(%url, "Relaying panel action as GET");
                Some(spawn_request("GET", url.clone(), self.client.get(url)))
            }
            PanelAction::Post { url, body } => {
                tracing::debug!(%url, bytes = body.len(), "Relaying panel configuration as POST");
                let request = self
                    .client
                    .post(url.as_str())
                    .header(CONTENT_TYPE, HeaderValue::from_static(FORM_BODY_CONTENT_TYPE))
                    .body(body);
                Some(spawn_request("POST", url, request))
            }
            PanelAction::Ignored => {
                tracing::trace!(command = %message.command, "Ignoring panel message");
                None
            }
        }
    }
}

fn spawn_request(
    method: &'static str,
    url: String,
    request: reqwest::RequestBuilder,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        match request.send().await {
            Ok(response) => {
                tracing::debug!(
                    method,
                    %url,
                    status = %response.status(),
                    "Relay request finished"
                );
            }
            Err(e) => {
                tracing::debug!(method, %url, "Relay request failed: {e}");
            }
        }
    })
}
