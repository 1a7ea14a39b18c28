//! Structured logging for overseer.
//!
//! Log levels:
//! - ERROR: fatal graph errors and aborted sessions
//! - WARN: task failures and recovery directives
//! - INFO: session lifecycle and completions
//! - DEBUG: dispatch, cache and ledger traces
//!
//! Debug mode can be enabled with the `--debug` flag or `OVERSEER_DEBUG=1`.
//! `RUST_LOG` overrides both.

use std::fs::File;
use std::path::PathBuf;
use std::sync::Mutex;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Environment variable that turns on debug logging.
pub const DEBUG_ENV: &str = "OVERSEER_DEBUG";

fn is_truthy(value: &str) -> bool {
    value == "1" || value.eq_ignore_ascii_case("true")
}

/// Whether debug logging was requested by flag or environment.
pub fn debug_requested(flag: bool) -> bool {
    flag || std::env::var(DEBUG_ENV)
        .map(|v| is_truthy(&v))
        .unwrap_or(false)
}

fn default_directive(debug: bool) -> &'static str {
    if debug {
        "debug"
    } else {
        "info"
    }
}

/// Location of the log file, `~/.overseer/overseer.log`.
pub fn log_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".overseer").join("overseer.log"))
}

fn open_log_file() -> Option<(PathBuf, File)> {
    let path = log_path()?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).ok()?;
    }
    // Truncate on startup
    let file = File::create(&path).ok()?;
    Some((path, file))
}

/// Install the global subscriber. Returns the log file path, or `None` when
/// logging to stderr. Calling it twice keeps the first subscriber.
pub fn init(debug: bool) -> Option<PathBuf> {
    let debug = debug_requested(debug);
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(debug)));
    let registry = tracing_subscriber::registry().with(filter);

    match open_log_file() {
        Some((path, file)) => {
            let _ = registry
                .with(fmt::layer().with_writer(Mutex::new(file)).with_ansi(false))
                .try_init();
            Some(path)
        }
        None => {
            let _ = registry
                .with(fmt::layer().with_writer(std::io::stderr).compact())
                .try_init();
            None
        }
    }
}
