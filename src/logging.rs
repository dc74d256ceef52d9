//! Diagnostic logging setup
//!
//! Stdout carries the CNI result document, so logs go to stderr or, when
//! configured, are appended to a file.

use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::Path;
use std::sync::Mutex;
use tracing::warn;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::EnvFilter;

use crate::config::PluginConfig;
use crate::error::{AppError, ConfigError};

/// Install the global subscriber described by `config`.
///
/// A log file that cannot be opened falls back to stderr; the command
/// itself still runs.
pub fn init(config: &PluginConfig) -> Result<(), AppError> {
    let filter = filter(&config.log_level)?;
    let (writer, fallback) = make_writer(config.log_file.as_deref());

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(false)
        .with_thread_names(true);

    let installed = if config.log_format == "json" {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    installed.map_err(|e| ConfigError::ValidationError(format!("logging setup failed: {}", e)))?;

    if let (Some(path), Some(e)) = (config.log_file.as_ref(), fallback) {
        warn!(path = %path.display(), error = %e, "failed to log to file, using stderr");
    }
    Ok(())
}

/// Writer for the configured destination, with the open error when the
/// file had to be replaced by stderr
pub fn make_writer(log_file: Option<&Path>) -> (BoxMakeWriter, Option<io::Error>) {
    match log_file {
        Some(path) => match open_log_file(path) {
            Ok(file) => (BoxMakeWriter::new(Mutex::new(file)), None),
            Err(e) => (BoxMakeWriter::new(io::stderr), Some(e)),
        },
        None => (BoxMakeWriter::new(io::stderr), None),
    }
}

fn open_log_file(path: &Path) -> io::Result<File> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    OpenOptions::new().create(true).append(true).open(path)
}

/// Parse the configured level into a filter directive
pub fn filter(level: &str) -> Result<EnvFilter, ConfigError> {
    EnvFilter::try_new(level)
        .map_err(|e| ConfigError::ValidationError(format!("invalid log level '{}': {}", level, e)))
}
