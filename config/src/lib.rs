//! Configuration loading for the Jimple language client.
//!
//! Settings live in `~/.jimple/config.toml`:
//!
//! ```toml
//! [lsp]
//! transport = "socket"
//! port = 2403
//! executable = "${JAVA_HOME}/bin/java"
//! server_artifact = "jimplelsp-0.4.0.jar"
//!
//! [lsp.jimpleextraction]
//! androidplatforms = "${ANDROID_HOME}/platforms"
//! sootpath = ""
//! ```
//!
//! A missing file means defaults. Mutable state the client records between
//! runs (the last version shown to the user) lives in a separate file, see
//! [`StateStore`].

mod state;

use std::env;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use jimple_lsp::ClientConfig;
use serde::Deserialize;

pub use state::{STATE_FILE_NAME, StateError, StateStore};

/// Directory under the home directory holding config, state, and logs.
pub const JIMPLE_DIR: &str = ".jimple";

pub const CONFIG_FILE_NAME: &str = "config.toml";

#[derive(Debug, Default, Deserialize)]
pub struct JimpleConfig {
    /// Language client settings.
    pub lsp: Option<ClientConfig>,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config at {}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to parse config at {}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

impl ConfigError {
    #[must_use]
    pub fn path(&self) -> &Path {
        match self {
            ConfigError::Read { path, .. } | ConfigError::Parse { path, .. } => path,
        }
    }
}

/// Replace `${VAR}` references with environment values. Unset variables
/// expand to nothing; an unterminated `${` is kept literally.
#[must_use]
pub fn expand_env_vars(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut rest = value;

    while let Some(start) = rest.find("${") {
        let Some(end_rel) = rest[start + 2..].find('}') else {
            break;
        };
        out.push_str(&rest[..start]);
        let var = &rest[start + 2..start + 2 + end_rel];
        if !var.is_empty() {
            out.push_str(&env::var(var).unwrap_or_default());
        }
        rest = &rest[start + 2 + end_rel + 1..];
    }

    out.push_str(rest);
    out
}

impl JimpleConfig {
    /// Load the user's config. `Ok(None)` when there is no home directory or
    /// no config file.
    pub fn load() -> Result<Option<Self>, ConfigError> {
        let Some(path) = config_path() else {
            return Ok(None);
        };
        Self::load_from(&path)
    }

    pub fn load_from(path: &Path) -> Result<Option<Self>, ConfigError> {
        if !path.exists() {
            return Ok(None);
        }

        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(err) => {
                tracing::warn!("Failed to read config at {}: {err}", path.display());
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source: err,
                });
            }
        };

        match toml::from_str(&content) {
            Ok(config) => Ok(Some(config)),
            Err(err) => {
                tracing::warn!("Failed to parse config at {}: {err}", path.display());
                Err(ConfigError::Parse {
                    path: path.to_path_buf(),
                    source: err,
                })
            }
        }
    }

    #[must_use]
    pub fn path() -> Option<PathBuf> {
        config_path()
    }

    /// Client settings with environment references expanded.
    #[must_use]
    pub fn client_config(&self) -> ClientConfig {
        let mut config = self.lsp.clone().unwrap_or_default();
        config.executable = expand_env_vars(&config.executable);
        if let Some(artifact) = config.server_artifact.take() {
            let expanded = expand_env_vars(&artifact.to_string_lossy());
            config.server_artifact = Some(PathBuf::from(expanded));
        }
        let extraction = &mut config.jimpleextraction;
        extraction.androidplatforms = expand_env_vars(&extraction.androidplatforms);
        extraction.sootpath = expand_env_vars(&extraction.sootpath);
        config
    }
}

/// `~/.jimple`, when a home directory is known.
#[must_use]
pub fn jimple_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(JIMPLE_DIR))
}

#[must_use]
pub fn config_path() -> Option<PathBuf> {
    jimple_dir().map(|dir| dir.join(CONFIG_FILE_NAME))
}
