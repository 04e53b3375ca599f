//! Tracing subscriber setup
//!
//! `RUST_LOG` takes precedence; otherwise the configured level applies to
//! both avp crates. Output goes to stderr and, when configured, to a log file
//! without ANSI colours.

use crate::error::{Error, Result};
use avp_common::config::LoggingConfig;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Filter directive for a configured level.
///
/// A bare level ("debug") applies to the avp crates; anything containing a
/// target or list is used verbatim.
pub fn filter_directive(level: &str) -> String {
    if level.contains('=') || level.contains(',') {
        level.to_string()
    } else {
        format!("avp_player={0},avp_common={0}", level)
    }
}

/// Log file to write: the configured path, or a timestamped file inside it
/// when it names a directory.
pub fn resolve_log_file(path: &Path) -> PathBuf {
    if path.is_dir() {
        let name = format!("{}.log", chrono::Local::now().format("%Y%m%d_%H%M%S"));
        path.join(name)
    } else {
        path.to_path_buf()
    }
}

/// Install the global subscriber.
///
/// # Returns
/// The log file in use, if any.
pub fn init(config: &LoggingConfig) -> Result<Option<PathBuf>> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(filter_directive(&config.level))
            .map_err(|e| Error::Config(format!("Invalid log level '{}': {}", config.level, e)))?,
    };

    let (file_layer, file_path) = match &config.file {
        Some(path) => {
            let path = resolve_log_file(path);
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                fs::create_dir_all(parent)?;
            }
            let file = File::create(&path)?;
            let layer = tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(Arc::new(file));
            (Some(layer), Some(path))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(file_layer)
        .try_init()
        .map_err(|e| Error::Config(format!("Failed to install log subscriber: {}", e)))?;

    Ok(file_path)
}
