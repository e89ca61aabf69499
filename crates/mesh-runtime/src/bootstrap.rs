//! Tracing bootstrap from the `observability` config section.

use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::Path;
use std::sync::{Mutex, OnceLock};

use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::EnvFilter;

use mesh_config::ObservabilityConfig;

/// Overrides `observability.log_file` when set and non-blank.
pub const LOG_FILE_ENV: &str = "MESH_LOG_FILE";

static TRACING_INIT: OnceLock<()> = OnceLock::new();

/// Install the global subscriber once per process.
///
/// `RUST_LOG` wins over `observability.log_level`. Output goes to the log
/// file when one is configured and can be opened, otherwise to stderr.
/// Later calls are no-ops.
pub fn init_tracing_if_needed(observability: &ObservabilityConfig) {
    TRACING_INIT.get_or_init(|| {
        let log_file = resolve_log_file(observability);
        let file = log_file.as_deref().and_then(|path| match open_log_file(path) {
            Ok(file) => Some(file),
            Err(err) => {
                eprintln!("mesh: logging to stderr, cannot open '{}': {}", path, err);
                None
            }
        });

        let to_file = file.is_some();
        let writer = match file {
            Some(file) => BoxMakeWriter::new(Mutex::new(file)),
            None => BoxMakeWriter::new(io::stderr),
        };
        let span_events = if observability.traces_enabled {
            FmtSpan::NEW | FmtSpan::CLOSE
        } else {
            FmtSpan::NONE
        };

        let _ = tracing_subscriber::fmt()
            .with_env_filter(env_filter(&observability.log_level))
            .with_target(true)
            .with_ansi(!to_file)
            .with_writer(writer)
            .with_span_events(span_events)
            .try_init();

        let destination = match (&log_file, to_file) {
            (Some(path), true) => path.as_str(),
            _ => "(stderr)",
        };
        tracing::info!(
            log_level = %observability.log_level,
            traces_enabled = observability.traces_enabled,
            log_file = destination,
            "tracing initialized"
        );
    });
}

fn resolve_log_file(observability: &ObservabilityConfig) -> Option<String> {
    std::env::var(LOG_FILE_ENV)
        .ok()
        .filter(|path| !path.trim().is_empty())
        .or_else(|| observability.log_file.clone())
}

fn env_filter(log_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(normalize_level(log_level)))
}

/// Known level names pass through lowercased; anything else is `info`.
fn normalize_level(log_level: &str) -> &'static str {
    match log_level.trim().to_ascii_lowercase().as_str() {
        "trace" => "trace",
        "debug" => "debug",
        "warn" => "warn",
        "error" => "error",
        _ => "info",
    }
}

fn open_log_file(path: &str) -> io::Result<File> {
    let path = Path::new(path);
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    OpenOptions::new().create(true).append(true).open(path)
}
