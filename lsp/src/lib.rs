//! Language client bootstrap for the Jimple language server.
//!
//! [`LifecycleController`] owns at most one [`LanguageClient`], connected over
//! a child process's stdio or a localhost socket. The `magpiebridge/showHTML`
//! extension opens host panels whose form submissions are relayed over HTTP.

pub mod codec;
pub mod feature;
pub mod host;
pub mod relay;
pub mod show_html;
pub mod transport;
pub mod types;

pub(crate) mod protocol;

mod client;
mod controller;

pub use client::{ClientError, ClientOptions, LanguageClient};
pub use controller::{
    CONNECTION_FAILED_MESSAGE, ControllerEvent, LifecycleController, StartOutcome,
};
pub use feature::{DynamicFeature, NotificationRegistry, RegistrationData};
pub use host::{
    EditorHost, PanelHost, PanelId, PanelRequest, PanelSession, PromptId, RecoveryAction,
    RecoveryPrompt,
};
pub use protocol::{PathToUriError, path_to_file_uri};
pub use relay::HttpRelay;
pub use show_html::ShowHtmlFeature;
pub use transport::{ConnectionDescriptor, SocketConnector, select_transport};
pub use types::{
    CONFIGURATION_SECTION, ClientConfig, DEFAULT_SOCKET_PORT, DocumentEvent, DocumentSelector,
    ExtractionConfig, FileChangeKind, FileEvent, FileWatchPatterns,
};
