//! # Logging Utilities
//!
//! Logging infrastructure for Tether using `tracing`.
//!
//! This module provides structured logging with support for:
//! - Pretty output for development, JSON for production
//! - Environment variable configuration
//! - An optional daily-rolling log file next to console output
//!
//! Console output goes to stderr; stdout belongs to the CLI's own output.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use tether_utils::init_logging;
//!
//! // Reads RUST_LOG, TETHER_LOG_FORMAT and TETHER_LOG_FILE
//! init_logging().expect("Failed to initialize logging");
//!
//! tracing::info!("Debugger starting");
//! ```
//!
//! ## Environment Variables
//!
//! - `RUST_LOG`: Filter directives (e.g., `RUST_LOG=debug`, `RUST_LOG=tether_core=trace`)
//! - `TETHER_LOG_FORMAT`: Output format (`json` or `pretty`, default: `pretty`)
//! - `TETHER_LOG_FILE`: Optional path of a log file, rolled daily

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::{env, io};

use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::time::ChronoUtc;
use tracing_subscriber::fmt::{self, MakeWriter};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry};

/// Flushes the file appender; must live as long as the process logs.
static FILE_GUARD: OnceCell<WorkerGuard> = OnceCell::new();

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat
{
    /// Pretty-printed, human-readable format (default)
    #[default]
    Pretty,
    /// JSON format, one object per line
    Json,
}

impl FromStr for LogFormat
{
    type Err = LoggingError;

    fn from_str(s: &str) -> Result<Self, Self::Err>
    {
        match s.to_lowercase().as_str() {
            "pretty" | "dev" | "development" => Ok(Self::Pretty),
            "json" | "prod" | "production" => Ok(Self::Json),
            _ => Err(LoggingError::InvalidFormat(s.to_string())),
        }
    }
}

/// Log level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel
{
    /// Error level
    Error,
    /// Warning level
    Warn,
    /// Info level
    Info,
    /// Debug level
    Debug,
    /// Trace level (most verbose)
    Trace,
}

impl From<LogLevel> for Level
{
    fn from(level: LogLevel) -> Self
    {
        match level {
            LogLevel::Error => Self::ERROR,
            LogLevel::Warn => Self::WARN,
            LogLevel::Info => Self::INFO,
            LogLevel::Debug => Self::DEBUG,
            LogLevel::Trace => Self::TRACE,
        }
    }
}

impl FromStr for LogLevel
{
    type Err = LoggingError;

    fn from_str(s: &str) -> Result<Self, Self::Err>
    {
        match s.to_lowercase().as_str() {
            "error" | "err" => Ok(Self::Error),
            "warn" | "warning" => Ok(Self::Warn),
            "info" => Ok(Self::Info),
            "debug" | "dbg" => Ok(Self::Debug),
            "trace" => Ok(Self::Trace),
            _ => Err(LoggingError::InvalidLevel(s.to_string())),
        }
    }
}

/// How to set up logging.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LoggingOptions
{
    /// Fixed level; `None` defers to `RUST_LOG`, then `info`.
    pub level: Option<LogLevel>,
    /// Output format.
    pub format: LogFormat,
    /// Log file, rolled daily, in addition to stderr.
    pub file: Option<PathBuf>,
}

impl LoggingOptions
{
    /// Options from `TETHER_LOG_FORMAT` and `TETHER_LOG_FILE`.
    ///
    /// ## Errors
    ///
    /// Returns an error when `TETHER_LOG_FORMAT` is not a known format.
    pub fn from_env() -> Result<Self, LoggingError>
    {
        Self::from_vars(env::vars())
    }

    /// Options from an explicit set of variables.
    ///
    /// ## Errors
    ///
    /// Returns an error when `TETHER_LOG_FORMAT` is not a known format.
    pub fn from_vars<I, K, V>(vars: I) -> Result<Self, LoggingError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut options = Self::default();
        for (key, value) in vars {
            match key.as_ref() {
                "TETHER_LOG_FORMAT" => options.format = value.as_ref().parse()?,
                "TETHER_LOG_FILE" if !value.as_ref().is_empty() => options.file = Some(PathBuf::from(value.as_ref())),
                _ => {}
            }
        }
        Ok(options)
    }
}

/// Initialize logging from the environment
///
/// ## Example
///
/// ```rust,no_run
/// use tether_utils::init_logging;
///
/// init_logging().expect("Failed to initialize logging");
/// tracing::info!("Debugger starting");
/// ```
///
/// ## Errors
///
/// Returns an error if:
/// - Logging is already initialized
/// - `TETHER_LOG_FORMAT` is invalid
/// - The log file cannot be opened
pub fn init_logging() -> Result<(), LoggingError>
{
    init_logging_with(&LoggingOptions::from_env()?)
}

/// Initialize logging with explicit level and format
///
/// `TETHER_LOG_FILE` is still honored.
///
/// ## Example
///
/// ```rust,no_run
/// use tether_utils::{LogFormat, LogLevel, init_logging_with_level};
///
/// init_logging_with_level(LogLevel::Debug, LogFormat::Json).expect("Failed to initialize logging");
/// ```
///
/// ## Errors
///
/// Returns an error if logging is already initialized or file logging fails.
pub fn init_logging_with_level(level: LogLevel, format: LogFormat) -> Result<(), LoggingError>
{
    let file = env::var("TETHER_LOG_FILE").ok().filter(|path| !path.is_empty()).map(PathBuf::from);
    init_logging_with(&LoggingOptions {
        level: Some(level),
        format,
        file,
    })
}

/// Initialize logging with fully explicit options
///
/// ## Errors
///
/// Returns an error if logging is already initialized or file logging fails.
pub fn init_logging_with(options: &LoggingOptions) -> Result<(), LoggingError>
{
    let console = layer(options.format, io::stderr, true, filter(options.level));

    let file = match &options.file {
        Some(path) => {
            let (directory, file_name) = split_log_path(path)?;
            std::fs::create_dir_all(&directory)?;
            let appender = tracing_appender::rolling::daily(directory, file_name);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let _ = FILE_GUARD.set(guard);
            Some(layer(options.format, writer, false, filter(options.level)))
        }
        None => None,
    };

    Registry::default()
        .with(console.and_then(file))
        .try_init()
        .map_err(|err| LoggingError::InitializationFailed(err.to_string()))
}

/// Explicit level first, then `RUST_LOG`, then `info`.
fn filter(level: Option<LogLevel>) -> EnvFilter
{
    match level {
        Some(level) => EnvFilter::new(Level::from(level).to_string()),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(Level::INFO.to_string())),
    }
}

fn layer<W>(format: LogFormat, writer: W, ansi: bool, filter: EnvFilter) -> BoxedLayer
where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    let base = fmt::layer()
        .with_target(true)
        .with_thread_ids(true)
        .with_thread_names(true)
        .with_file(true)
        .with_line_number(true)
        .with_timer(ChronoUtc::rfc_3339())
        .with_writer(writer);

    match format {
        LogFormat::Pretty => base.with_ansi(ansi).with_filter(filter).boxed(),
        LogFormat::Json => base
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .with_filter(filter)
            .boxed(),
    }
}

fn split_log_path(path: &Path) -> Result<(PathBuf, PathBuf), LoggingError>
{
    let file_name = path
        .file_name()
        .ok_or_else(|| LoggingError::InvalidFile(path.display().to_string()))?;
    let directory = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    Ok((directory, PathBuf::from(file_name)))
}

/// Logging initialization error
#[derive(Debug, thiserror::Error)]
pub enum LoggingError
{
    /// Invalid log format
    #[error("Unknown log format: {0}. Use 'pretty' or 'json'")]
    InvalidFormat(String),

    /// Invalid log level
    #[error("Unknown log level: {0}. Use 'error', 'warn', 'info', 'debug', or 'trace'")]
    InvalidLevel(String),

    /// The log file path names no file
    #[error("Invalid log file path: {0}")]
    InvalidFile(String),

    /// Failed to initialize logging
    #[error("Failed to initialize logging: {0}")]
    InitializationFailed(String),

    /// File logging error
    #[error("File logging error: {0}")]
    FileError(#[from] io::Error),
}
