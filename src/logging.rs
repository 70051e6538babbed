//! Logging bootstrap for the sidecar.
//!
//! stdout carries IPC responses, so log output goes either to stderr or to
//! rolling files, never to stdout. Initialization happens at most once per
//! process and never panics.

use flexi_logger::{Cleanup, Criterion, FileSpec, Logger, LoggerHandle, Naming, WriteMode};
use log::info;
use once_cell::sync::OnceCell;
use std::path::{Path, PathBuf};

pub const LEVEL_ENV: &str = "ATTENDANCED_LOG_LEVEL";
pub const DIR_ENV: &str = "ATTENDANCED_LOG_DIR";

const DEFAULT_LEVEL: &str = "info";
const LOG_FILE_BASENAME: &str = "attendanced";
const MAX_LOG_FILE_SIZE_BYTES: u64 = 10 * 1024 * 1024;
const MAX_LOG_FILES: usize = 5;

static LOGGING_STATE: OnceCell<LoggingState> = OnceCell::new();

struct LoggingState {
    level: &'static str,
    log_dir: Option<PathBuf>,
    _logger: LoggerHandle,
}

/// Reads level and directory from the environment and initializes logging.
pub fn init_from_env() -> Result<(), String> {
    let level = std::env::var(LEVEL_ENV).unwrap_or_else(|_| DEFAULT_LEVEL.to_string());
    let dir = std::env::var(DIR_ENV).ok().filter(|d| !d.trim().is_empty());
    init_logging(&level, dir.as_deref().map(Path::new))
}

/// Initializes logging with `level`, writing rolling files under `log_dir`
/// when given and to stderr otherwise.
///
/// Repeated calls with the same arguments are no-ops; calls that would
/// change the level or destination are rejected.
pub fn init_logging(level: &str, log_dir: Option<&Path>) -> Result<(), String> {
    let level = normalize_level(level)?;
    let log_dir = log_dir.map(Path::to_path_buf);

    let state = LOGGING_STATE.get_or_try_init(|| -> Result<LoggingState, String> {
        let builder = Logger::try_with_str(level)
            .map_err(|err| format!("invalid log level `{level}`: {err}"))?;
        let builder = match &log_dir {
            Some(dir) => {
                std::fs::create_dir_all(dir).map_err(|err| {
                    format!("failed to create log directory `{}`: {err}", dir.display())
                })?;
                builder
                    .log_to_file(
                        FileSpec::default()
                            .directory(dir.as_path())
                            .basename(LOG_FILE_BASENAME),
                    )
                    .rotate(
                        Criterion::Size(MAX_LOG_FILE_SIZE_BYTES),
                        Naming::Numbers,
                        Cleanup::KeepLogFiles(MAX_LOG_FILES),
                    )
                    .write_mode(WriteMode::BufferAndFlush)
                    .append()
                    .format_for_files(flexi_logger::detailed_format)
            }
            None => builder.log_to_stderr(),
        };
        let logger = builder
            .start()
            .map_err(|err| format!("failed to start logger: {err}"))?;

        info!(
            "event=app_start module=core status=ok version={} level={} sink={}",
            env!("CARGO_PKG_VERSION"),
            level,
            log_dir
                .as_ref()
                .map(|d| d.display().to_string())
                .unwrap_or_else(|| "stderr".to_string())
        );

        Ok(LoggingState {
            level,
            log_dir: log_dir.clone(),
            _logger: logger,
        })
    })?;

    if state.level != level {
        return Err(format!(
            "logging already initialized with level `{}`; refusing to switch to `{}`",
            state.level, level
        ));
    }
    if state.log_dir != log_dir {
        return Err("logging already initialized with a different destination".to_string());
    }
    Ok(())
}

fn normalize_level(level: &str) -> Result<&'static str, String> {
    match level.trim().to_ascii_lowercase().as_str() {
        "trace" => Ok("trace"),
        "debug" => Ok("debug"),
        "info" => Ok("info"),
        "warn" | "warning" => Ok("warn"),
        "error" => Ok("error"),
        "off" => Ok("off"),
        other => Err(format!("unsupported log level `{other}`")),
    }
}
