use std::path::{Path, PathBuf};
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Keeps the non-blocking writers flushing until the process exits.
pub struct LoggingGuards {
    _guards: Vec<WorkerGuard>,
}

/// Install the tracing subscriber for a service binary.
///
/// Writes a daily-rolling `<service_name>.log` under `log_dir` when that
/// directory is writable and always mirrors to the console. `RUST_LOG`
/// controls filtering (default `info`).
pub fn init_service_logging(log_dir: &Path, service_name: &str) -> anyhow::Result<LoggingGuards> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    if log_dir_is_writable(log_dir) {
        let _ = rotate_logs_on_startup(log_dir, service_name);

        let file_appender = tracing_appender::rolling::daily(log_dir, format!("{service_name}.log"));
        let (file_writer, file_guard) = tracing_appender::non_blocking(file_appender);
        let (console_writer, console_guard) = tracing_appender::non_blocking(std::io::stdout());

        let file_layer = fmt::layer()
            .with_writer(file_writer)
            .with_ansi(false)
            .with_target(true)
            .with_thread_ids(true)
            .with_line_number(true);

        let console_layer = fmt::layer()
            .with_writer(console_writer)
            .with_ansi(true)
            .with_target(false)
            .with_thread_ids(false)
            .with_line_number(false);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(file_layer)
            .with(console_layer)
            .try_init()?;

        info!(
            "Logging initialized - logs will be written to {}/{service_name}.log",
            log_dir.display()
        );
        return Ok(LoggingGuards {
            _guards: vec![file_guard, console_guard],
        });
    }

    let (console_writer, console_guard) = tracing_appender::non_blocking(std::io::stdout());
    let console_layer = fmt::layer()
        .with_writer(console_writer)
        .with_ansi(true)
        .with_target(false)
        .with_thread_ids(false)
        .with_line_number(false);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .try_init()?;

    info!("Logging initialized - console output only (could not create log directory)");
    Ok(LoggingGuards {
        _guards: vec![console_guard],
    })
}

/// Console-only logging for the operator CLI; output goes to stderr so
/// stdout stays clean for the JSON answer.
pub fn init_cli_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "warn" };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::registry()
        .with(env_filter)
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false),
        )
        .try_init();
}

fn log_dir_is_writable(log_dir: &Path) -> bool {
    let marker = log_dir.join(".test_write");
    std::fs::create_dir_all(log_dir)
        .and_then(|_| std::fs::File::create(&marker))
        .map(|_| std::fs::remove_file(&marker))
        .is_ok()
}

pub fn rotate_logs_on_startup(log_dir: &Path, service_name: &str) -> anyhow::Result<Option<PathBuf>> {
    let log_path = log_dir.join(format!("{service_name}.log"));
    if !log_path.exists() {
        return Ok(None);
    }

    let timestamp = chrono::Utc::now().format("%Y%m%d_%H%M%S");
    let backup = log_dir.join(format!("{service_name}.{timestamp}.log"));
    std::fs::rename(&log_path, &backup)?;
    info!("Previous log file backed up to: {}", backup.display());
    Ok(Some(backup))
}
