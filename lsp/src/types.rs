//! Public types shared between the client library and its hosts.
//!
//! Hosts build a [`ClientConfig`] from user settings, feed [`FileEvent`]s
//! from their file watchers, and the controller scopes both through
//! [`DocumentSelector`] and [`FileWatchPatterns`].

use std::path::{Path, PathBuf};
use std::time::Duration;

use globset::{Glob, GlobSet, GlobSetBuilder};
use jimple_types::{LANGUAGE_ID, TransportMode};
use serde::{Deserialize, Serialize};

/// Well-known port of a Jimple language server started in socket mode.
pub const DEFAULT_SOCKET_PORT: u16 = 2403;

/// Executable used to launch the server artifact.
pub const DEFAULT_EXECUTABLE: &str = "java";

/// Name the client announces in the handshake and logs.
pub const CLIENT_NAME: &str = "JimpleLSP";

/// Section the server pulls its settings from via `workspace/configuration`.
pub const CONFIGURATION_SECTION: &str = "JimpleLSP";

/// Globs of files whose creation, change, or deletion the server is told about.
pub const WATCHED_FILE_GLOBS: [&str; 3] = ["**/*.jimple", "**/*.apk", "**/*.jar"];

/// Client settings, read from the `[lsp]` configuration section.
///
/// ```toml
/// [lsp]
/// transport = "socket"
/// port = 2403
///
/// [lsp.jimpleextraction]
/// androidplatforms = "/opt/android-sdk/platforms"
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// `"stdio"` or `"socket"`. Anything else disables startup.
    pub transport: TransportMode,
    pub executable: String,
    /// Server jar, relative to the install root unless absolute.
    pub server_artifact: Option<PathBuf>,
    pub port: u16,
    /// Launch with the debug profile instead of the run profile.
    pub debug: bool,
    /// Give up on the initialize handshake after this many seconds.
    /// Unset waits indefinitely.
    pub handshake_timeout_secs: Option<u64>,
    /// Settings served to the server under `JimpleLSP.jimpleextraction`.
    pub jimpleextraction: ExtractionConfig,
}

/// Inputs the server needs to extract Jimple from APKs and jars.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionConfig {
    /// Directory holding the Android platform jars.
    pub androidplatforms: String,
    /// Path to a Soot jar to use instead of the bundled one.
    pub sootpath: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            transport: TransportMode::default(),
            executable: DEFAULT_EXECUTABLE.to_string(),
            server_artifact: None,
            port: DEFAULT_SOCKET_PORT,
            debug: false,
            handshake_timeout_secs: None,
            jimpleextraction: ExtractionConfig::default(),
        }
    }
}

impl ClientConfig {
    /// Default jar name, versioned like the client itself.
    #[must_use]
    pub fn default_artifact_name() -> String {
        format!("jimplelsp-{}.jar", env!("CARGO_PKG_VERSION"))
    }

    /// Resolve the server artifact against the host's install root.
    #[must_use]
    pub fn server_artifact_path(&self, install_root: &Path) -> PathBuf {
        let relative = self
            .server_artifact
            .clone()
            .unwrap_or_else(|| PathBuf::from(Self::default_artifact_name()));
        if relative.is_absolute() {
            relative
        } else {
            install_root.join(relative)
        }
    }

    #[must_use]
    pub fn handshake_timeout(&self) -> Option<Duration> {
        self.handshake_timeout_secs.map(Duration::from_secs)
    }

    /// Tree the client answers `workspace/configuration` requests from.
    #[must_use]
    pub fn settings(&self) -> serde_json::Value {
        serde_json::json!({
            CONFIGURATION_SECTION: { "jimpleextraction": self.jimpleextraction }
        })
    }
}

/// Which documents take part in protocol synchronization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentSelector {
    pub scheme: &'static str,
    pub language: &'static str,
}

impl Default for DocumentSelector {
    fn default() -> Self {
        Self {
            scheme: "file",
            language: LANGUAGE_ID,
        }
    }
}

impl DocumentSelector {
    #[must_use]
    pub fn matches(&self, uri: &url::Url, language_id: &str) -> bool {
        uri.scheme() == self.scheme && language_id == self.language
    }

    /// Selector in the wire shape features receive at initialization.
    #[must_use]
    pub fn to_value(&self) -> serde_json::Value {
        serde_json::json!([{ "scheme": self.scheme, "language": self.language }])
    }
}

/// Compiled file-watch globs.
#[derive(Debug, Clone)]
pub struct FileWatchPatterns {
    set: GlobSet,
}

impl FileWatchPatterns {
    pub fn new(globs: &[&str]) -> Result<Self, globset::Error> {
        let mut builder = GlobSetBuilder::new();
        for glob in globs {
            builder.add(Glob::new(glob)?);
        }
        Ok(Self {
            set: builder.build()?,
        })
    }

    /// Source files plus the two archive formats that may contain analysable code.
    pub fn jimple() -> Result<Self, globset::Error> {
        Self::new(&WATCHED_FILE_GLOBS)
    }

    #[must_use]
    pub fn matches(&self, path: &Path) -> bool {
        self.set.is_match(path)
    }
}

/// Kind of change reported by a host file watcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileChangeKind {
    Created,
    Changed,
    Deleted,
}

impl FileChangeKind {
    #[must_use]
    pub fn lsp_code(self) -> u8 {
        match self {
            Self::Created => 1,
            Self::Changed => 2,
            Self::Deleted => 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEvent {
    pub path: PathBuf,
    pub kind: FileChangeKind,
}

impl FileEvent {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>, kind: FileChangeKind) -> Self {
        Self {
            path: path.into(),
            kind,
        }
    }
}

/// Document lifecycle notification reported by the host editor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DocumentEvent {
    Opened {
        uri: url::Url,
        language_id: String,
        text: String,
    },
    Changed {
        uri: url::Url,
        language_id: String,
        text: String,
    },
    Saved {
        uri: url::Url,
        language_id: String,
    },
    Closed {
        uri: url::Url,
        language_id: String,
    },
}
