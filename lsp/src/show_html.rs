//! Show-HTML feature: the server pushes markup, the client renders it in a
//! panel and relays the panel's actions as HTTP requests.

use std::sync::Arc;

use serde_json::Value;

use crate::feature::{DynamicFeature, NotificationRegistry, RegistrationData, set_capability};
use crate::host::{PanelHost, PanelRequest, PanelSession};
use crate::relay::HttpRelay;
use crate::types::DocumentSelector;

/// Server notification carrying the markup to render.
pub const SHOW_HTML_NOTIFICATION: &str = "magpiebridge/showHTML";

/// Experimental client capability announcing that pushed content can be rendered.
pub const SHOW_HTML_CAPABILITY: &str = "supportsShowHTML";

pub const PANEL_VIEW_TYPE: &str = "Configuration";
pub const PANEL_TITLE: &str = "MagpieBridge Control Panel";

pub struct ShowHtmlFeature {
    panels: Arc<dyn PanelHost>,
    relay: HttpRelay,
}

impl ShowHtmlFeature {
    #[must_use]
    pub fn new(panels: Arc<dyn PanelHost>, relay: HttpRelay) -> Self {
        Self { panels, relay }
    }
}

impl DynamicFeature for ShowHtmlFeature {
    fn fill_client_capabilities(&self, capabilities: &mut Value) {
        set_capability(
            capabilities,
            "experimental",
            SHOW_HTML_CAPABILITY,
            Value::Bool(true),
        );
    }

    fn initialize(
        &self,
        _server_capabilities: &Value,
        _document_selector: &DocumentSelector,
        notifications: &NotificationRegistry,
    ) {
        let panels = self.panels.clone();
        let relay = self.relay.clone();
        notifications.on_notification(SHOW_HTML_NOTIFICATION, move |params| {
            let Some(html) = html_payload(params) else {
                tracing::debug!("Ignoring {SHOW_HTML_NOTIFICATION} without string content");
                return;
            };
            let request = PanelRequest {
                view_type: PANEL_VIEW_TYPE.to_string(),
                title: PANEL_TITLE.to_string(),
                html,
                enable_scripts: true,
            };
            // Runs on the connection's reader task; keep host UI work off it.
            let panels = panels.clone();
            let relay = relay.clone();
            tokio::spawn(async move {
                match tokio::task::spawn_blocking(move || panels.create_panel(request)).await {
                    Ok(session) => {
                        tracing::info!(panel = session.id().0, "Opened server panel");
                        serve_panel(session, relay).await;
                    }
                    Err(e) => tracing::warn!("Opening server panel failed: {e}"),
                }
            });
        });
    }

    fn register(&self, _data: RegistrationData) {}

    fn unregister(&self, _id: &str) {}

    fn dispose(&self) {}
}

/// Relay every message a panel posts until the host closes it.
pub async fn serve_panel(mut session: PanelSession, relay: HttpRelay) {
    while let Some(message) = session.next_message().await {
        // Fire-and-forget: the request task is detached.
        drop(relay.dispatch(&message));
    }
    tracing::debug!(panel = session.id().0, "Server panel closed");
}

/// Servers send the markup either as bare params or wrapped in a
/// single-element array.
fn html_payload(params: Option<Value>) -> Option<String> {
    match params? {
        Value::String(html) => Some(html),
        Value::Array(items) => match items.into_iter().next()? {
            Value::String(html) => Some(html),
            _ => None,
        },
        _ => None,
    }
}
