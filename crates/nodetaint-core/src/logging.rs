//! Tracing subscriber setup for hosts embedding the engine

use std::path::{Path, PathBuf};

use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    EnvFilter,
    fmt::{self, format::FmtSpan},
    prelude::*,
};

use crate::config::LogFlags;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogOptions {
    pub level: Level,
    pub file: Option<PathBuf>,
    pub json: bool,
}

impl Default for LogOptions {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            file: None,
            json: false,
        }
    }
}

impl LogOptions {
    /// The level that lets the configured explain/debug traces through.
    pub fn from_flags(flags: &LogFlags) -> Self {
        let level = if flags.debug {
            Level::TRACE
        } else if flags.explain {
            Level::DEBUG
        } else {
            Level::INFO
        };
        Self {
            level,
            ..Self::default()
        }
    }
}

/// Installs the global subscriber. Keep the returned guard alive while logging to a file.
pub fn init_logging(options: &LogOptions) -> Option<WorkerGuard> {
    let filter = EnvFilter::from_default_env().add_directive(options.level.into());

    if let Some(ref log_file) = options.file {
        init_file_logging(log_file, filter, options.json)
    } else {
        init_stderr_logging(filter, options.json);
        None
    }
}

fn init_stderr_logging(filter: EnvFilter, json: bool) {
    let subscriber = tracing_subscriber::registry().with(filter);

    if json {
        subscriber
            .with(
                fmt::layer()
                    .json()
                    .with_writer(std::io::stderr)
                    .with_span_events(FmtSpan::CLOSE),
            )
            .init();
    } else {
        subscriber
            .with(
                fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_span_events(FmtSpan::CLOSE),
            )
            .init();
    }
}

fn init_file_logging(path: &Path, filter: EnvFilter, json: bool) -> Option<WorkerGuard> {
    let parent = path.parent().unwrap_or(Path::new("."));
    let filename = path
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or("nodetaint.log");

    let file_appender = tracing_appender::rolling::never(parent, filename);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let subscriber = tracing_subscriber::registry().with(filter);

    if json {
        subscriber
            .with(
                fmt::layer()
                    .json()
                    .with_writer(non_blocking)
                    .with_span_events(FmtSpan::CLOSE),
            )
            .init();
    } else {
        subscriber
            .with(fmt::layer().with_writer(non_blocking).with_ansi(false))
            .init();
    }

    Some(guard)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_runs_log_at_info() {
        let options = LogOptions::from_flags(&LogFlags::default());
        assert_eq!(options.level, Level::INFO);
        assert!(options.file.is_none());
        assert!(!options.json);
    }

    #[test]
    fn explain_enables_debug_events() {
        let flags = LogFlags {
            explain: true,
            debug: false,
        };
        assert_eq!(LogOptions::from_flags(&flags).level, Level::DEBUG);
    }

    #[test]
    fn debug_enables_state_dumps() {
        let flags = LogFlags {
            explain: true,
            debug: true,
        };
        let level = LogOptions::from_flags(&flags).level;
        assert_eq!(level, Level::TRACE);
        assert!(Level::DEBUG < level);
    }
}
