//! Structured logging for qrshare.
//!
//! Logs go to stderr at a verbosity picked on the command line, and optionally
//! to a file that always records debug events. `RUST_LOG` overrides the
//! stderr filter only.

use std::path::Path;

use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::{
    filter::LevelFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer,
};

/// Log verbosity level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Verbosity {
    /// Errors only
    #[default]
    Quiet,
    /// Info level
    Normal,
    /// Debug level
    Verbose,
    /// Trace level
    Trace,
}

impl Verbosity {
    /// Map a count of `-v` flags to a verbosity.
    pub fn from_occurrences(count: u8) -> Self {
        match count {
            0 => Verbosity::Quiet,
            1 => Verbosity::Normal,
            2 => Verbosity::Verbose,
            _ => Verbosity::Trace,
        }
    }

    /// Get the tracing level filter for this verbosity.
    pub fn as_level_filter(&self) -> LevelFilter {
        match self {
            Verbosity::Quiet => LevelFilter::ERROR,
            Verbosity::Normal => LevelFilter::INFO,
            Verbosity::Verbose => LevelFilter::DEBUG,
            Verbosity::Trace => LevelFilter::TRACE,
        }
    }
}

/// Configuration for the logging system.
#[derive(Debug, Clone, Default)]
pub struct LogConfig {
    /// Verbosity level for stderr output.
    pub verbosity: Verbosity,
    /// Optional path to log file.
    pub log_file: Option<String>,
}

/// Lowest level the log file records, whatever `-v` says.
const FILE_LEVEL: LevelFilter = LevelFilter::DEBUG;

/// Guard that must be kept alive for the duration of logging.
///
/// When this guard is dropped, the logging system will flush pending logs.
pub struct LogGuard {
    _file_guard: Option<WorkerGuard>,
}

/// Filter for the stderr layer: `RUST_LOG` if set, otherwise `verbosity`.
fn stderr_filter(verbosity: Verbosity) -> EnvFilter {
    EnvFilter::builder()
        .with_default_directive(verbosity.as_level_filter().into())
        .from_env_lossy()
}

/// Non-blocking appender writing to `path`.
fn file_writer(path: &Path) -> (NonBlocking, WorkerGuard) {
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    let file_name = path
        .file_name()
        .map(|name| name.to_os_string())
        .unwrap_or_else(|| "qrshare.log".into());

    tracing_appender::non_blocking(tracing_appender::rolling::never(dir, file_name))
}

/// Initialize the logging system.
///
/// Every filter is attached to its own layer, so a quiet stderr does not hide
/// debug events from the log file. Without `-v` and with a log file set,
/// stderr stays silent.
///
/// ```ignore
/// use qrshare::logging::{init_logging, LogConfig, Verbosity};
///
/// let _guard = init_logging(&LogConfig {
///     verbosity: Verbosity::Normal,
///     log_file: None,
/// });
/// tracing::info!("Logging initialized");
/// ```
pub fn init_logging(config: &LogConfig) -> LogGuard {
    let log_path = config.log_file.as_deref().map(Path::new);

    let (file_layer, file_guard) = match log_path {
        Some(path) => {
            let (writer, guard) = file_writer(path);
            let layer = fmt::layer()
                .with_ansi(false)
                .with_thread_ids(true)
                .with_timer(fmt::time::uptime())
                .with_writer(writer)
                .with_filter(config.verbosity.as_level_filter().max(FILE_LEVEL));
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    let stderr_layer = (config.verbosity != Verbosity::Quiet || log_path.is_none()).then(|| {
        fmt::layer()
            .with_target(false)
            .with_timer(fmt::time::uptime())
            .with_writer(std::io::stderr)
            .with_filter(stderr_filter(config.verbosity))
    });

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(file_layer)
        .init();

    LogGuard {
        _file_guard: file_guard,
    }
}
