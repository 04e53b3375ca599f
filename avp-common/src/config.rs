//! Configuration file resolution and loading
//!
//! Resolution order for the bootstrap TOML file:
//! 1. Explicit path (command line or environment, resolved by the caller)
//! 2. `<user config dir>/<app>/config.toml` if it exists
//! 3. None: the caller falls back to built-in defaults
//!
//! A missing default file is not an error. An explicit path that does not
//! exist, or any file that fails to parse, is.

use crate::{Error, Result};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Logging configuration
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error) or a full filter directive
    pub level: String,

    /// Log file path (optional, logs to stderr only if not specified).
    /// A directory gets a timestamped file created inside it.
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
        }
    }
}

/// Default per-user configuration file path for `app`.
pub fn default_config_path(app: &str) -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join(app).join("config.toml"))
}

/// Pick the configuration file to load, if any.
///
/// # Errors
/// An explicit path that does not exist.
pub fn resolve_config_file(explicit: Option<&Path>, app: &str) -> Result<Option<PathBuf>> {
    if let Some(path) = explicit {
        if !path.exists() {
            return Err(Error::Config(format!(
                "Config file not found: {}",
                path.display()
            )));
        }
        return Ok(Some(path.to_path_buf()));
    }

    match default_config_path(app) {
        Some(path) if path.exists() => Ok(Some(path)),
        Some(path) => {
            debug!("No config file at {}", path.display());
            Ok(None)
        }
        None => Ok(None),
    }
}

/// Parse a TOML document.
pub fn parse_toml<T: DeserializeOwned>(content: &str) -> Result<T> {
    toml::from_str(content).map_err(|e| Error::Config(format!("Invalid TOML: {}", e)))
}

/// Read and parse a TOML file.
pub fn load_toml<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path)?;
    parse_toml(&content)
        .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))
}

/// Resolve and load a configuration, falling back to `T::default()`.
///
/// # Returns
/// The configuration and the file it came from (None = built-in defaults).
pub fn load_or_default<T>(explicit: Option<&Path>, app: &str) -> Result<(T, Option<PathBuf>)>
where
    T: DeserializeOwned + Default,
{
    match resolve_config_file(explicit, app)? {
        Some(path) => {
            let config = load_toml(&path)?;
            info!("Loaded configuration from {}", path.display());
            Ok((config, Some(path)))
        }
        None => Ok((T::default(), None)),
    }
}
