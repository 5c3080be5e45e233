//! Structured logging and tracing for the controller.
//!
//! The controller is a single long-running process with no separate log
//! viewer of its own (unlike the diagnostics dashboards some deployments of
//! this kind of controller ship), so this module's job is narrow: stand up a
//! `tracing-subscriber` registry once, at start-up, wired to either stdout or
//! a rotating daily file, and never touch it again for the life of the
//! process.

use crate::error::{ControllerError, Result};
use once_cell::sync::OnceCell;
use std::path::Path;
use std::sync::Once;
use tracing::{Level, info};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::{non_blocking, rolling};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::{EnvFilter, Layer, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Settings that shape how [`init_logging`] wires up tracing layers.
///
/// Populated from config params (`logging.level`, `logging.file`, ...) rather
/// than deserialized directly, since logging must be usable before the rest
/// of the config substrate has finished resolving its sources.
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Base severity; also the floor for any layer without its own override.
    pub level: String,
    /// Console-only override; falls back to `level` when unset.
    pub console_level: Option<String>,
    /// File-only override; falls back to `level` when unset.
    pub file_level: Option<String>,
    /// Whether to also log to stdout when file logging is active.
    pub console_output: bool,
    /// Emit structured JSON lines instead of plain text.
    pub json_format: bool,
    /// Log file path (or directory) when file logging is enabled.
    pub file: String,
    /// Number of rotated daily log files to retain.
    pub backup_count: u32,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "INFO".to_string(),
            console_level: None,
            file_level: None,
            console_output: true,
            json_format: false,
            file: format!("{}.log", env!("PRODUCT_NAME")),
            backup_count: 7,
        }
    }
}

// Keep the non-blocking worker guard alive for the entire process lifetime.
static LOG_GUARD: OnceCell<WorkerGuard> = OnceCell::new();
static INIT_ONCE: Once = Once::new();
static INIT_ERROR: OnceCell<String> = OnceCell::new();

/// Initialize logging system based on configuration.
///
/// Idempotent: only the first call takes effect, matching `tracing`'s
/// global-subscriber-is-set-once contract; later calls observe whatever
/// error (if any) the first call produced.
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    INIT_ONCE.call_once(|| {
        let init_result = (|| -> Result<()> {
            let base_level = parse_log_level(&config.level)?;
            let console_level = config
                .console_level
                .as_ref()
                .and_then(|s| parse_log_level(s).ok())
                .unwrap_or(base_level);
            let file_level = config
                .file_level
                .as_ref()
                .and_then(|s| parse_log_level(s).ok())
                .unwrap_or(base_level);

            let most_verbose = min_level(console_level, file_level);
            let filter = build_env_filter(most_verbose);

            if should_use_console_only() {
                init_console_only_logging(filter, config.json_format, console_level);
                return Ok(());
            }

            init_file_logging(config, filter, console_level, file_level)
        })();

        if let Err(e) = init_result {
            let _ = INIT_ERROR.set(e.to_string());
        }
    });

    if let Some(err) = INIT_ERROR.get() {
        return Err(ControllerError::config(err.clone()));
    }
    Ok(())
}

/// Quiet the chattiest dependencies (the Modbus client logs every poll at
/// debug, axum's HTTP tracing logs every request at its own default level)
/// unless the operator explicitly asked for their own `RUST_LOG`.
fn build_env_filter(level: Level) -> EnvFilter {
    let product = env!("PRODUCT_NAME");
    EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("{product}={level},tokio_modbus=warn,tower_http=warn").into())
}

fn should_use_console_only() -> bool {
    cfg!(test) || std::env::var_os("P1GEN_DISABLE_FILE_LOG").is_some()
}

fn init_console_only_logging(filter: EnvFilter, json_format: bool, console_level: Level) {
    let console_layer = {
        let layer = fmt::layer()
            .with_writer(std::io::stdout)
            .with_target(false)
            .with_thread_ids(false)
            .with_file(false);
        if json_format {
            layer
                .json()
                .with_filter(LevelFilter::from_level(console_level))
                .boxed()
        } else {
            layer
                .with_filter(LevelFilter::from_level(console_level))
                .boxed()
        }
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .init();

    info!(%console_level, "logging initialized, console-only");
}

fn init_file_logging(
    config: &LoggingConfig,
    filter: EnvFilter,
    console_level: Level,
    file_level: Level,
) -> Result<()> {
    let registry = tracing_subscriber::registry().with(filter);

    let file_appender = rolling::Builder::new()
        .rotation(rolling::Rotation::DAILY)
        .filename_prefix(env!("PRODUCT_NAME"))
        .filename_suffix("log")
        .max_log_files(config.backup_count as usize)
        .build({
            // If config.file is a file path, use its parent dir; otherwise treat as dir.
            let p = Path::new(&config.file);
            if p.extension().is_some() {
                p.parent().unwrap_or(p)
            } else {
                p
            }
        })
        .map_err(|e| ControllerError::io(format!("failed to create log file appender: {e}")))?;

    let (non_blocking_appender, guard) = non_blocking(file_appender);
    let _ = LOG_GUARD.set(guard);

    let file_layer = {
        let base = fmt::layer()
            .with_writer(non_blocking_appender)
            .with_target(false)
            .with_thread_ids(false)
            .with_file(false);
        if config.json_format {
            base.json()
                .with_filter(LevelFilter::from_level(file_level))
                .boxed()
        } else {
            base.with_filter(LevelFilter::from_level(file_level))
                .boxed()
        }
    };

    let subscriber = registry.with(file_layer);

    if config.console_output {
        let console_layer = {
            let base = fmt::layer()
                .with_writer(std::io::stdout)
                .with_target(false)
                .with_thread_ids(false)
                .with_file(false);
            if config.json_format {
                base.json()
                    .with_filter(LevelFilter::from_level(console_level))
                    .boxed()
            } else {
                base.with_filter(LevelFilter::from_level(console_level))
                    .boxed()
            }
        };
        subscriber.with(console_layer).init();
    } else {
        subscriber.init();
    }

    info!(
        %console_level, %file_level, file = %config.file,
        "logging initialized",
    );
    Ok(())
}

fn parse_log_level(level_str: &str) -> Result<Level> {
    match level_str.to_uppercase().as_str() {
        "TRACE" => Ok(Level::TRACE),
        "DEBUG" => Ok(Level::DEBUG),
        "INFO" => Ok(Level::INFO),
        "WARN" => Ok(Level::WARN),
        "ERROR" => Ok(Level::ERROR),
        _ => Err(ControllerError::config(format!(
            "invalid log level: {level_str}"
        ))),
    }
}

fn level_rank(level: Level) -> u8 {
    match level {
        Level::TRACE => 0,
        Level::DEBUG => 1,
        Level::INFO => 2,
        Level::WARN => 3,
        Level::ERROR => 4,
    }
}

fn min_level(a: Level, b: Level) -> Level {
    if level_rank(a) <= level_rank(b) { a } else { b }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Once;

    static INIT: Once = Once::new();

    fn init_test_logging() {
        INIT.call_once(|| {
            let config = LoggingConfig::default();
            init_logging(&config).ok();
        });
    }

    #[test]
    fn parse_log_level_is_case_insensitive() {
        assert_eq!(parse_log_level("DEBUG").unwrap(), Level::DEBUG);
        assert_eq!(parse_log_level("info").unwrap(), Level::INFO);
        assert_eq!(parse_log_level("ERROR").unwrap(), Level::ERROR);
        assert!(parse_log_level("invalid").is_err());
    }

    #[test]
    fn min_level_picks_the_more_verbose_side() {
        assert_eq!(min_level(Level::INFO, Level::DEBUG), Level::DEBUG);
        assert_eq!(min_level(Level::WARN, Level::ERROR), Level::WARN);
    }

    #[test]
    fn init_logging_is_idempotent() {
        init_test_logging();
        // A second call must not panic even with a different config; it
        // observes the first call's outcome.
        let other = LoggingConfig {
            level: "ERROR".to_string(),
            ..Default::default()
        };
        assert!(init_logging(&other).is_ok());
    }
}
