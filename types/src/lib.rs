//! Core domain types for the Jimple language client.
//!
//! Pure types with no IO and no async, shared by the client library, the
//! configuration layer, and the binary.

mod panel;
mod transport;
mod version;

pub use panel::{FORM_SEPARATOR, PanelAction, PanelMessage};
pub use transport::TransportMode;
pub use version::{InvalidVersionError, ReleaseVersion, UpgradeNotice};

/// Language identifier the server analyses.
pub const LANGUAGE_ID: &str = "jimple";
