//! Transport mode selected by user configuration.

use std::fmt;

use serde::{Deserialize, Serialize};

/// How the client reaches the language server.
///
/// Parsed from the `transport` configuration string. Matching is exact and
/// case-sensitive; anything other than `"stdio"` or `"socket"` is kept as
/// [`TransportMode::Unrecognized`] so the caller can report what was typed.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum TransportMode {
    /// Spawn the server and speak over its stdin/stdout.
    #[default]
    Stdio,
    /// Connect to an already running server over TCP.
    Socket,
    /// Any other configured value. Disables startup.
    Unrecognized(String),
}

impl TransportMode {
    pub const STDIO: &'static str = "stdio";
    pub const SOCKET: &'static str = "socket";

    #[must_use]
    pub fn parse(value: &str) -> Self {
        match value {
            Self::STDIO => Self::Stdio,
            Self::SOCKET => Self::Socket,
            other => Self::Unrecognized(other.to_string()),
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Stdio => Self::STDIO,
            Self::Socket => Self::SOCKET,
            Self::Unrecognized(raw) => raw,
        }
    }

    #[must_use]
    pub fn is_recognized(&self) -> bool {
        !matches!(self, Self::Unrecognized(_))
    }
}

impl From<String> for TransportMode {
    fn from(value: String) -> Self {
        Self::parse(&value)
    }
}

impl From<TransportMode> for String {
    fn from(mode: TransportMode) -> Self {
        mode.as_str().to_string()
    }
}

impl fmt::Display for TransportMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
