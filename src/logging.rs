use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Keeps the non-blocking file writer alive; dropping it flushes and stops
/// file logging.
pub struct LogGuard {
    _file: Option<WorkerGuard>,
}

/// Installs the global subscriber: stdout always, plus a daily-rolling file
/// appender when `DUEL_LOG_DIR` is set. `filter` falls back to "info" when it
/// does not parse as an `EnvFilter` directive.
pub fn init_tracing(filter: &str) -> LogGuard {
    let env_filter = EnvFilter::try_new(filter).unwrap_or_else(|_| EnvFilter::new("info"));
    let stdout_layer = fmt::layer().with_target(true);
    let registry = tracing_subscriber::registry()
        .with(env_filter)
        .with(stdout_layer);

    let file_guard = std::env::var("DUEL_LOG_DIR")
        .ok()
        .filter(|dir| !dir.trim().is_empty())
        .and_then(|dir| match std::fs::create_dir_all(&dir) {
            Ok(()) => Some(dir),
            Err(err) => {
                eprintln!("failed to create log directory {dir}: {err}");
                None
            }
        })
        .map(|dir| {
            let appender = RollingFileAppender::new(Rotation::DAILY, dir, "duel-engine.log");
            tracing_appender::non_blocking(appender)
        });

    match file_guard {
        Some((writer, guard)) => {
            registry
                .with(fmt::layer().with_writer(writer).with_ansi(false))
                .init();
            LogGuard { _file: Some(guard) }
        }
        None => {
            registry.init();
            LogGuard { _file: None }
        }
    }
}
