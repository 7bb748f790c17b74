//! Tracing setup
//!
//! Logs go to `<data dir>/logs/parley.log`, or stderr when no data
//! directory is available. `RUST_LOG` overrides the default filter.

use config::PathManager;
use std::sync::OnceLock;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

const DEFAULT_FILTER: &str = "info,parley_core=debug,llm=info,parley_audio=info";

static LOG_GUARD: OnceLock<Option<WorkerGuard>> = OnceLock::new();

fn filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

/// Install the global subscriber. Later calls are no-ops.
pub fn init_logging() {
    LOG_GUARD.get_or_init(|| match open_log_file() {
        Some((file, path)) => {
            let (writer, guard) = tracing_appender::non_blocking(file);
            let subscriber = tracing_subscriber::registry().with(filter()).with(
                fmt::layer()
                    .with_writer(writer)
                    .with_ansi(false)
                    .with_target(true)
                    .with_file(true)
                    .with_line_number(true),
            );
            match tracing::subscriber::set_global_default(subscriber) {
                Ok(()) => tracing::info!("Logging initialized, writing to {:?}", path),
                Err(e) => eprintln!("[parley] Failed to set tracing subscriber: {}", e),
            }
            Some(guard)
        }
        None => {
            init_stderr_logging();
            None
        }
    });
}

fn open_log_file() -> Option<(std::fs::File, std::path::PathBuf)> {
    let path = PathManager::log_file_path()?;
    if let Some(parent) = path.parent()
        && let Err(e) = std::fs::create_dir_all(parent)
    {
        eprintln!("[parley] Failed to create log directory {:?}: {}", parent, e);
        return None;
    }
    match std::fs::OpenOptions::new().create(true).append(true).open(&path) {
        Ok(file) => Some((file, path)),
        Err(e) => {
            eprintln!("[parley] Failed to open log file {:?}: {}", path, e);
            None
        }
    }
}

fn init_stderr_logging() {
    let subscriber = tracing_subscriber::registry()
        .with(filter())
        .with(fmt::layer().with_writer(std::io::stderr).with_target(true));
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("[parley] Failed to set tracing subscriber: {}", e);
    }
}
