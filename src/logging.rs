//! Logging init: stderr plus an append-only run log in the data dir.

use std::fs::{self, OpenOptions};
use std::path::Path;
use std::sync::Arc;

use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::prelude::*;

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,visa_hunt=info"))
}

/// Log to stderr and to `log_path`. If the file cannot be opened the run still
/// proceeds with stderr only.
pub fn init_logging(log_path: &Path) {
    let file = log_path
        .parent()
        .map(fs::create_dir_all)
        .transpose()
        .and_then(|_| OpenOptions::new().create(true).append(true).open(log_path));

    match file {
        Ok(file) => {
            tracing_subscriber::registry()
                .with(env_filter())
                .with(fmt::layer().with_writer(std::io::stderr))
                .with(fmt::layer().with_writer(Arc::new(file)).with_ansi(false))
                .init();
            tracing::debug!("run log at {}", log_path.display());
        }
        Err(e) => {
            init_logging_stderr();
            tracing::warn!("cannot open run log {}: {}", log_path.display(), e);
        }
    }
}

/// Stderr only. Used by commands that never touch the data dir.
pub fn init_logging_stderr() {
    tracing_subscriber::fmt()
        .with_env_filter(env_filter())
        .with_writer(std::io::stderr)
        .init();
}
