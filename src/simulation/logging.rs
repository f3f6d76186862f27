use std::io;
use tracing::dispatcher::DefaultGuard;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::{non_blocking, rolling};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::Layer;
use tracing_subscriber::{fmt, registry};

use crate::simulation::config::{resolve_path, Config, Logging};

// Holds the logger guards. When they are dropped, buffered log lines are flushed and the default
// subscriber is reset.
pub struct LogGuards {
    _log_guard: Option<WorkerGuard>,
    _default: DefaultGuard,
}

pub fn init_std_out_logging_thread_local() -> DefaultGuard {
    let collector = tracing_subscriber::registry().with(
        fmt::Layer::new()
            .with_writer(io::stdout)
            .with_filter(LevelFilter::INFO),
    );
    tracing::subscriber::set_default(collector)
}

/// Installs console logging and, if configured, a JSON log file `log.json` in the output directory.
///
/// The subscriber is the default of the calling thread only. Threads spawned by the controller
/// inherit nothing, which is why the controller hands the dispatcher to them explicitly.
pub fn init_logging(config: &Config) -> io::Result<LogGuards> {
    let dir = resolve_path(config.context(), &config.output.output_dir);

    let (log_layer, log_guard) = if Logging::Info == config.output.logging {
        std::fs::create_dir_all(&dir)?;
        let log_file_appender = rolling::never(&dir, "log.json");
        let (log_file, log_guard) = non_blocking(log_file_appender);
        let layer = fmt::Layer::new()
            .with_writer(log_file)
            .json()
            .with_ansi(false)
            .with_filter(LevelFilter::INFO);
        (Some(layer), Some(log_guard))
    } else {
        (None, None)
    };

    let console_layer = fmt::layer()
        .with_writer(io::stdout)
        .with_thread_names(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_filter(LevelFilter::INFO);

    // If None, then the corresponding layer is not added.
    let collector = registry().with(log_layer).with(console_layer);

    let default = tracing::subscriber::set_default(collector);

    Ok(LogGuards {
        _log_guard: log_guard,
        _default: default,
    })
}
