//! Structured logging, set up once at startup.
//!
//! Grounded on `env-tracing-logger`: a compact `tracing-subscriber` formatter
//! driven by `RUST_LOG`/`EnvFilter`. We additionally fan events out to a
//! rolling file under `logging.directory_name` (the in-process half of the
//! per-hour-rotation/UDP-shipping service that is treated as an external
//! collaborator) via `tracing-appender`, as `oxidized` does for its own log
//! file.

use std::path::Path;
use tracing_subscriber::{
    fmt::{self, format, time},
    prelude::*,
    EnvFilter,
};

/// Holds the non-blocking file-appender guard; logging stops flushing to
/// disk once this is dropped, so callers must keep it alive for the life of
/// the process (typically by binding it in `main`).
pub struct LoggingGuard {
    _file_guard: Option<tracing_appender::non_blocking::WorkerGuard>,
}

pub fn init(log_dir: &Path, file_stem: &str) -> LoggingGuard {
    let evt_fmt = format().with_timer(time::Uptime::default()).compact();
    let stdout_layer = fmt::layer().event_format(evt_fmt);

    let file_appender = tracing_appender::rolling::hourly(log_dir, file_stem);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
    let file_layer = fmt::layer().with_writer(non_blocking).with_ansi(false);

    let registry = tracing_subscriber::registry()
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .with(stdout_layer)
        .with(file_layer);

    if registry.try_init().is_err() {
        // A subscriber is already installed (e.g. repeated init in tests);
        // this is not fatal, logging just keeps using the existing one.
    }

    LoggingGuard {
        _file_guard: Some(guard),
    }
}
