use std::{
    fs::{self, OpenOptions},
    path::{Path, PathBuf},
    sync::Mutex,
};

use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use crate::config::{Settings, config_dir};

const LOG_FILE: &str = "toast.log";
const LEVELS: &[&str] = &["error", "warn", "info", "debug", "trace"];

/// Picks the more verbose of the configured level and `-v` (debug).
/// Unrecognised configured levels fall back to `info`.
pub fn effective_level(configured: &str, verbose: bool) -> &'static str {
    let configured = configured.trim().to_ascii_lowercase();
    let rank = LEVELS
        .iter()
        .position(|l| *l == configured)
        .unwrap_or(2);
    let floor = if verbose { 3 } else { 0 };
    LEVELS[rank.max(floor)]
}

/// Installs the global subscriber: stderr always, plus an append-only file when
/// `log_to_file` is set. `RUST_LOG` wins over both level sources.
pub fn init(settings: &Settings, verbose: bool) {
    let level = effective_level(&settings.log_level, verbose);
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("warn,toast={level}")));

    let console = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .without_time();

    let file_layer = if settings.log_to_file {
        match log_file_path() {
            Some(path) => match open_log_file(&path) {
                Ok(file) => Some(
                    fmt::layer()
                        .with_writer(Mutex::new(file))
                        .with_ansi(false),
                ),
                Err(err) => {
                    eprintln!("could not open log file {}: {err}", path.display());
                    None
                }
            },
            None => {
                eprintln!("no config directory available; file logging disabled");
                None
            }
        }
    } else {
        None
    };

    // A second init (e.g. from tests) keeps the first subscriber.
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(console)
        .with(file_layer)
        .try_init();
}

fn open_log_file(path: &Path) -> std::io::Result<fs::File> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    OpenOptions::new().create(true).append(true).open(path)
}

pub fn log_file_path() -> Option<PathBuf> {
    config_dir().map(|d| d.join(LOG_FILE))
}
