// Logging module
// Sets up the tracing subscriber stack used by services embedding mapnav
//
// Console output always, an optional daily-rolling file, and an EnvFilter
// so RUST_LOG can override the configured level.

use std::path::Path;
use tracing_appender::rolling;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Map the numeric log level used in config files to a tracing filter string
/// (0=Minimum, 1=Error, 2=Detail, 3=Full/Debug, 4=Trace)
pub fn map_log_level(level: i32) -> &'static str {
    match level {
        i32::MIN..=0 => "warn",
        1 => "error",
        2 => "info",
        3 => "debug",
        _ => "trace",
    }
}

/// Initialize the logging system.
///
/// `file_name` defaults to `mapnav.log` when a log directory is given.
/// Calling this twice is harmless; the second registration is ignored.
pub fn initialize_logging(log_dir: Option<&str>, log_level: &str, file_name: Option<&str>) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    let console = fmt::layer()
        .with_ansi(true)
        .with_target(false)
        .with_thread_ids(true);

    if let Some(dir) = log_dir {
        let path = Path::new(dir);
        if !path.exists() {
            let _ = std::fs::create_dir_all(path);
        }

        let file_appender = rolling::daily(dir, file_name.unwrap_or("mapnav.log"));
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

        // The guard flushes on drop; it has to live as long as the process
        std::mem::forget(guard);

        let _ = tracing_subscriber::registry()
            .with(env_filter)
            .with(console)
            .with(
                fmt::layer()
                    .with_writer(non_blocking)
                    .with_ansi(false)
                    .with_target(true),
            )
            .try_init();
    } else {
        let _ = tracing_subscriber::registry()
            .with(env_filter)
            .with(console)
            .try_init();
    }
}
