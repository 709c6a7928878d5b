//! Stderr diagnostics for the CLI.
//!
//! Library crates only emit `tracing` events; this is the one place a
//! subscriber gets installed. Stdout stays reserved for frames and events.

use clap::ValueEnum;
use tracing::level_filters::LevelFilter;

/// Shape of each stderr log line.
#[derive(Copy, Clone, Debug, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

/// Most verbose level written to stderr.
///
/// `debug` adds connect attempts, backoff waits and, with `--debug-frames`,
/// one line per frame.
#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<LogLevel> for LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Error => LevelFilter::ERROR,
            LogLevel::Warn => LevelFilter::WARN,
            LogLevel::Info => LevelFilter::INFO,
            LogLevel::Debug => LevelFilter::DEBUG,
            LogLevel::Trace => LevelFilter::TRACE,
        }
    }
}

/// Install the process subscriber. Thread names are kept so reader,
/// writer, heartbeat and reconnect activity can be told apart.
pub fn init_logging(format: LogFormat, level: LogLevel) {
    let builder = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_max_level(LevelFilter::from(level))
        .with_thread_names(true)
        .with_target(false)
        .with_ansi(false);

    // A second install (tests driving `main` twice) keeps the first one.
    let _ = match format {
        LogFormat::Text => builder.try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
}
