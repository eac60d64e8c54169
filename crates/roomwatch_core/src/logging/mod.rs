//! Logging infrastructure for roomwatch.
//!
//! This module provides:
//! - Global `tracing` subscriber setup (stderr, optional daily log file)
//! - A bounded tail buffer for recorder stdout/stderr

mod tail;
mod types;

pub use tail::OutputTail;
pub use types::LogLevel;

use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Initialize the global tracing subscriber.
///
/// - Respects RUST_LOG environment variable
/// - Falls back to the provided default level
/// - Outputs to stderr, and to `<logs_dir>/roomwatch.log.<date>` when a
///   directory is given
///
/// The returned guard must be kept alive for the file writer to flush.
/// Should be called once at application startup.
pub fn init_tracing(default_level: LogLevel, logs_dir: Option<&Path>) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level.as_filter_str()));

    let stderr_layer = fmt::layer().with_target(true).with_thread_ids(false);

    match logs_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "roomwatch.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::registry()
                .with(filter)
                .with(stderr_layer)
                .with(fmt::layer().with_ansi(false).with_writer(writer))
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::registry()
                .with(filter)
                .with(stderr_layer)
                .init();
            None
        }
    }
}

/// Initialize tracing for tests (only logs warnings and above).
#[cfg(test)]
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("warn")
        .with_test_writer()
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_to_filter_works() {
        assert_eq!(LogLevel::Debug.as_filter_str(), "debug");
        assert_eq!(LogLevel::Info.as_filter_str(), "info");
    }

    #[test]
    fn level_deserializes_lowercase() {
        #[derive(serde::Deserialize)]
        struct Wrapper {
            level: LogLevel,
        }
        let w: Wrapper = toml::from_str("level = \"warn\"").unwrap();
        assert_eq!(w.level, LogLevel::Warn);
    }
}
