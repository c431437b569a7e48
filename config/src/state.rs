//! Persisted client state (`~/.jimple/state.toml`).
//!
//! Written with `toml_edit` so hand edits and unknown keys survive, and
//! replaced atomically through a sibling temp file.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use toml_edit::DocumentMut;

pub const STATE_FILE_NAME: &str = "state.toml";

const LAST_VERSION_KEY: &str = "last_version";

#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("failed to read state at {}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to parse state at {}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml_edit::TomlError,
    },
    #[error("failed to write state at {}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("could not determine the home directory")]
    NoHome,
}

#[derive(Debug, Clone)]
pub struct StateStore {
    path: PathBuf,
}

impl StateStore {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Store at `~/.jimple/state.toml`.
    pub fn open_default() -> Result<Self, StateError> {
        crate::jimple_dir()
            .map(|dir| Self::new(dir.join(STATE_FILE_NAME)))
            .ok_or(StateError::NoHome)
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Version recorded by the last run that showed a notice.
    pub fn last_version(&self) -> Result<Option<String>, StateError> {
        let Some(doc) = self.read_document()? else {
            return Ok(None);
        };
        Ok(doc
            .get(LAST_VERSION_KEY)
            .and_then(|item| item.as_str())
            .map(str::to_string))
    }

    pub fn record_version(&self, version: &str) -> Result<(), StateError> {
        let mut doc = self.read_document()?.unwrap_or_default();
        doc[LAST_VERSION_KEY] = toml_edit::value(version);
        self.write_atomic(doc.to_string().as_bytes())
            .map_err(|source| StateError::Write {
                path: self.path.clone(),
                source,
            })?;
        tracing::debug!(path = %self.path.display(), version, "Recorded client version");
        Ok(())
    }

    fn read_document(&self) -> Result<Option<DocumentMut>, StateError> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(StateError::Read {
                    path: self.path.clone(),
                    source,
                });
            }
        };
        content
            .parse::<DocumentMut>()
            .map(Some)
            .map_err(|source| StateError::Parse {
                path: self.path.clone(),
                source,
            })
    }

    fn write_atomic(&self, bytes: &[u8]) -> io::Result<()> {
        let parent = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        fs::create_dir_all(parent)?;

        let mut tmp = NamedTempFile::new_in(parent)?;
        tmp.write_all(bytes)?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path).map_err(|e| e.error)?;
        Ok(())
    }
}
