use std::path::Path;

use tracing::Level;
use tracing_appender::{non_blocking, rolling};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::LoggingConfig;

/// Initialize the logging system based on configuration. Returns the
/// non-blocking writer guard when file logging is enabled; callers must
/// keep it alive for the lifetime of the process.
pub fn init_logging(
    config: &LoggingConfig,
) -> Result<Option<tracing_appender::non_blocking::WorkerGuard>, Box<dyn std::error::Error>> {
    let _level = parse_log_level(&config.level)?;

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let filter_str = format!(
            "{},fleetsched::remote=debug,fleetsched::scheduler=debug",
            &config.level
        );
        EnvFilter::try_new(&filter_str)
            .unwrap_or_else(|_| EnvFilter::new(format!("{}", &config.level)))
    });

    let mut guard = None;

    match (&config.file, config.format.as_deref().unwrap_or("text")) {
        (Some(file_path), "json") => {
            let path = Path::new(file_path);
            let directory = path.parent().unwrap_or_else(|| Path::new("."));
            let filename = path
                .file_name()
                .unwrap_or_else(|| std::ffi::OsStr::new("fleetsched.log"));

            let file_appender = rolling::daily(directory, filename);
            let (file_writer, file_guard) = non_blocking(file_appender);
            guard = Some(file_guard);

            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().json().with_writer(file_writer))
                .with(fmt::layer().json())
                .init();
        }
        (Some(file_path), _) => {
            let path = Path::new(file_path);
            let directory = path.parent().unwrap_or_else(|| Path::new("."));
            let filename = path
                .file_name()
                .unwrap_or_else(|| std::ffi::OsStr::new("fleetsched.log"));

            let file_appender = rolling::daily(directory, filename);
            let (file_writer, file_guard) = non_blocking(file_appender);
            guard = Some(file_guard);

            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().with_writer(file_writer))
                .with(fmt::layer())
                .init();
        }
        (None, "json") => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().json())
                .init();
        }
        (None, _) => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer())
                .init();
        }
    }

    tracing::info!(
        level = %config.level,
        file = ?config.file,
        format = %config.format.as_deref().unwrap_or("text"),
        "logging system initialized"
    );

    Ok(guard)
}

fn parse_log_level(level: &str) -> Result<Level, Box<dyn std::error::Error>> {
    match level.to_lowercase().as_str() {
        "trace" => Ok(Level::TRACE),
        "debug" => Ok(Level::DEBUG),
        "info" => Ok(Level::INFO),
        "warn" | "warning" => Ok(Level::WARN),
        "error" => Ok(Level::ERROR),
        _ => Err(format!("invalid log level: {level}").into()),
    }
}

/// Structured logging macro for device-state events, following the
/// reference service's per-domain logging macro convention.
#[macro_export]
macro_rules! log_device_event {
    ($level:ident, serial = $serial:expr, $($key:ident = $value:expr),* $(,)?) => {
        tracing::$level!(
            device_serial = %$serial,
            $($key = $value),*
        );
    };
    ($level:ident, serial = $serial:expr, $message:expr, $($key:ident = $value:expr),* $(,)?) => {
        tracing::$level!(
            device_serial = %$serial,
            $($key = $value),*,
            $message
        );
    };
}

/// Structured logging macro for command/tracker events.
#[macro_export]
macro_rules! log_command_event {
    ($level:ident, command_id = $id:expr, $($key:ident = $value:expr),* $(,)?) => {
        tracing::$level!(
            command_id = %$id,
            $($key = $value),*
        );
    };
    ($level:ident, command_id = $id:expr, $message:expr, $($key:ident = $value:expr),* $(,)?) => {
        tracing::$level!(
            command_id = %$id,
            $($key = $value),*,
            $message
        );
    };
}

/// Structured logging macro for remote-protocol events.
#[macro_export]
macro_rules! log_remote_event {
    ($level:ident, op = $op:expr, $($key:ident = $value:expr),* $(,)?) => {
        tracing::$level!(
            remote_op = %$op,
            $($key = $value),*
        );
    };
    ($level:ident, op = $op:expr, $message:expr, $($key:ident = $value:expr),* $(,)?) => {
        tracing::$level!(
            remote_op = %$op,
            $($key = $value),*,
            $message
        );
    };
}
