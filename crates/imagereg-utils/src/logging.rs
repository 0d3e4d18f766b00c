//! # Logging Utilities
//!
//! Logging setup for imagereg binaries and tests, built on `tracing`.
//!
//! The core crate only emits events; it never installs a subscriber. This
//! module is where a binary decides what to do with them:
//! - Pretty or JSON output
//! - Environment variable configuration
//! - Optional log file alongside the console
//!
//! Console output always goes to **stderr**. The CLI prints image tables on
//! stdout and they must stay clean enough to pipe.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use imagereg_utils::init_logging;
//!
//! // Reads RUST_LOG, IMAGEREG_LOG_FORMAT and IMAGEREG_LOG_FILE
//! init_logging().expect("Failed to initialize logging");
//!
//! tracing::warn!("Mach header != vmaddr + slide");
//! ```
//!
//! ## Environment Variables
//!
//! - `RUST_LOG`: Level filter (e.g., `RUST_LOG=debug`, `RUST_LOG=imagereg_core=trace`)
//! - `IMAGEREG_LOG_FORMAT`: Output format (`json` or `pretty`, default: `pretty`)
//! - `IMAGEREG_LOG_FILE`: Optional path of a log file written in addition to stderr
//!
//! ## Examples
//!
//! ```rust,no_run
//! use imagereg_utils::{init_logging_with_level, LogFormat, LogLevel};
//!
//! // Explicit level wins over RUST_LOG
//! init_logging_with_level(LogLevel::Debug, LogFormat::Json).expect("Failed to initialize logging");
//! ```

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::{env, fmt as std_fmt, io, mem};

use tracing::Level;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::fmt::time::ChronoUtc;
use tracing_subscriber::fmt::{self};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry};

/// Environment variable selecting the output format.
pub const LOG_FORMAT_ENV: &str = "IMAGEREG_LOG_FORMAT";
/// Environment variable naming an additional log file.
pub const LOG_FILE_ENV: &str = "IMAGEREG_LOG_FILE";

/// Level used when neither an explicit level nor `RUST_LOG` is given.
const DEFAULT_LEVEL: LogLevel = LogLevel::Warn;

/// Log output format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat
{
    /// Human-readable, with ANSI colors on the console
    #[default]
    Pretty,
    /// One JSON object per event
    Json,
}

impl FromStr for LogFormat
{
    type Err = LoggingError;

    fn from_str(s: &str) -> Result<Self, Self::Err>
    {
        match s.to_lowercase().as_str() {
            "pretty" | "dev" | "development" => Ok(LogFormat::Pretty),
            "json" | "prod" | "production" => Ok(LogFormat::Json),
            _ => Err(LoggingError::InvalidFormat(s.to_string())),
        }
    }
}

/// Log level
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel
{
    Error,
    Warn,
    Info,
    Debug,
    /// Most verbose: includes skipped crash info strings and every added image
    Trace,
}

impl From<LogLevel> for Level
{
    fn from(level: LogLevel) -> Self
    {
        match level {
            LogLevel::Error => Level::ERROR,
            LogLevel::Warn => Level::WARN,
            LogLevel::Info => Level::INFO,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Trace => Level::TRACE,
        }
    }
}

impl FromStr for LogLevel
{
    type Err = LoggingError;

    fn from_str(s: &str) -> Result<Self, Self::Err>
    {
        match s.to_lowercase().as_str() {
            "error" | "err" => Ok(LogLevel::Error),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "info" => Ok(LogLevel::Info),
            "debug" | "dbg" => Ok(LogLevel::Debug),
            "trace" => Ok(LogLevel::Trace),
            _ => Err(LoggingError::InvalidLevel(s.to_string())),
        }
    }
}

impl LogLevel
{
    /// Lower-case name, usable as an `EnvFilter` directive.
    pub const fn as_str(self) -> &'static str
    {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

impl std_fmt::Display for LogLevel
{
    fn fmt(&self, f: &mut std_fmt::Formatter<'_>) -> std_fmt::Result
    {
        f.write_str(self.as_str())
    }
}

/// Resolved logging configuration
///
/// Built from the environment by [`LogConfig::from_env`] and then adjusted
/// by command-line flags before [`LogConfig::init`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogConfig
{
    /// Overrides `RUST_LOG` when set
    pub level: Option<LogLevel>,
    pub format: LogFormat,
    /// Extra file output
    pub file: Option<PathBuf>,
}

impl LogConfig
{
    /// Read `IMAGEREG_LOG_FORMAT` and `IMAGEREG_LOG_FILE`.
    ///
    /// `RUST_LOG` is not read here; it is consulted by [`init`](Self::init)
    /// when no explicit level is set.
    ///
    /// ## Errors
    ///
    /// Returns [`LoggingError::InvalidFormat`] for an unknown format name.
    pub fn from_env() -> Result<Self, LoggingError>
    {
        let format = match env::var(LOG_FORMAT_ENV) {
            Ok(value) if !value.is_empty() => value.parse()?,
            _ => LogFormat::default(),
        };
        let file = env::var_os(LOG_FILE_ENV)
            .filter(|value| !value.is_empty())
            .map(PathBuf::from);

        Ok(Self {
            level: None,
            format,
            file,
        })
    }

    /// Install the global subscriber.
    ///
    /// ## Errors
    ///
    /// Returns an error if a subscriber is already installed or the log file
    /// cannot be opened.
    pub fn init(&self) -> Result<(), LoggingError>
    {
        let mut layers: Vec<Box<dyn Layer<Registry> + Send + Sync>> = Vec::with_capacity(2);
        layers.push(console_layer(self.format, self.filter()));

        if let Some(path) = &self.file {
            let appender = file_appender(path)?;
            let (writer, guard) = tracing_appender::non_blocking(appender);
            // The guard flushes on drop; the subscriber lives for the whole process.
            mem::forget(guard);
            layers.push(file_layer(self.format, writer, self.filter()));
        }

        Registry::default()
            .with(layers)
            .try_init()
            .map_err(|err| LoggingError::InitializationFailed(err.to_string()))
    }

    fn filter(&self) -> EnvFilter
    {
        match self.level {
            Some(level) => EnvFilter::new(level.as_str()),
            None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LEVEL.as_str())),
        }
    }
}

/// Initialize logging from the environment
///
/// ## Errors
///
/// Returns an error if:
/// - Logging is already initialized
/// - `IMAGEREG_LOG_FORMAT` names an unknown format
/// - `IMAGEREG_LOG_FILE` cannot be opened
pub fn init_logging() -> Result<(), LoggingError>
{
    LogConfig::from_env()?.init()
}

/// Initialize logging with explicit level and format
///
/// `IMAGEREG_LOG_FILE` is still honored.
///
/// ## Errors
///
/// Returns an error if logging is already initialized or file logging fails.
pub fn init_logging_with_level(level: LogLevel, format: LogFormat) -> Result<(), LoggingError>
{
    let config = LogConfig {
        level: Some(level),
        format,
        file: env::var_os(LOG_FILE_ENV)
            .filter(|value| !value.is_empty())
            .map(PathBuf::from),
    };
    config.init()
}

fn console_layer(format: LogFormat, filter: EnvFilter) -> Box<dyn Layer<Registry> + Send + Sync>
{
    match format {
        LogFormat::Pretty => fmt::layer()
            .with_target(true)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true)
            .with_timer(ChronoUtc::rfc_3339())
            .with_ansi(true)
            .with_writer(io::stderr)
            .with_filter(filter)
            .boxed(),
        LogFormat::Json => fmt::layer()
            .json()
            .with_target(true)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true)
            .with_timer(ChronoUtc::rfc_3339())
            .with_current_span(true)
            .with_span_list(true)
            .with_writer(io::stderr)
            .with_filter(filter)
            .boxed(),
    }
}

fn file_layer(
    format: LogFormat,
    writer: tracing_appender::non_blocking::NonBlocking,
    filter: EnvFilter,
) -> Box<dyn Layer<Registry> + Send + Sync>
{
    match format {
        LogFormat::Pretty => fmt::layer()
            .with_writer(writer)
            .with_target(true)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true)
            .with_timer(ChronoUtc::rfc_3339())
            .with_ansi(false) // No ANSI in files
            .with_filter(filter)
            .boxed(),
        LogFormat::Json => fmt::layer()
            .json()
            .with_writer(writer)
            .with_target(true)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true)
            .with_timer(ChronoUtc::rfc_3339())
            .with_current_span(true)
            .with_span_list(true)
            .with_filter(filter)
            .boxed(),
    }
}

/// Non-rotating appender for exactly `path`.
fn file_appender(path: &Path) -> Result<RollingFileAppender, LoggingError>
{
    let file_name = path
        .file_name()
        .ok_or_else(|| LoggingError::InvalidFile(path.to_path_buf()))?;
    let directory = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    std::fs::create_dir_all(&directory)?;

    RollingFileAppender::builder()
        .rotation(Rotation::NEVER)
        .filename_prefix(file_name.to_string_lossy().into_owned())
        .build(&directory)
        .map_err(|err| LoggingError::InitializationFailed(err.to_string()))
}

/// Logging initialization error
#[derive(Debug, thiserror::Error)]
pub enum LoggingError
{
    /// Invalid log format
    #[error("Invalid log format: {0}. Use 'pretty' or 'json'")]
    InvalidFormat(String),

    /// Invalid log level
    #[error("Invalid log level: {0}. Use 'error', 'warn', 'info', 'debug', or 'trace'")]
    InvalidLevel(String),

    /// Log file path has no file name
    #[error("Invalid log file path: {}", .0.display())]
    InvalidFile(PathBuf),

    /// Failed to initialize logging
    #[error("Failed to initialize logging: {0}")]
    InitializationFailed(String),

    /// File logging error
    #[error("File logging error: {0}")]
    FileError(#[from] io::Error),
}
