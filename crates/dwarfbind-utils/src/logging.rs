//! # Logging
//!
//! `tracing` setup shared by every dwarfbind binary.
//!
//! Generated modules may be written to stdout, so log lines go either to
//! stderr or, with a log file, only to that file. Nothing is ever logged to
//! stdout.
//!
//! ```rust,no_run
//! use dwarfbind_utils::{init_logging, LogConfig};
//!
//! init_logging(&LogConfig::from_env()).expect("Failed to initialize logging");
//! tracing::info!("Generation started");
//! ```
//!
//! ## Environment Variables
//!
//! - `RUST_LOG`: filter directives (`debug`, `dwarfbind_core=trace`), used
//!   when no explicit level is given
//! - `DWARFBIND_LOG_FORMAT`: `pretty` (default) or `json`
//! - `DWARFBIND_LOG_FILE`: write logs to this file instead of stderr

use std::env;
use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use tracing::Level;
use tracing_subscriber::fmt::time::ChronoUtc;
use tracing_subscriber::fmt::{self, MakeWriter};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry};

/// Diagnostics are logged at `warn`, so that is what a quiet run shows.
const DEFAULT_DIRECTIVE: &str = "warn";

/// Log output format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat
{
    /// Human-readable lines
    #[default]
    Pretty,
    /// One JSON object per line, for CI log collectors
    Json,
}

impl FromStr for LogFormat
{
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err>
    {
        match s.to_lowercase().as_str() {
            "pretty" | "text" => Ok(LogFormat::Pretty),
            "json" => Ok(LogFormat::Json),
            _ => Err(format!("Unknown log format: {s}. Use 'pretty' or 'json'")),
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
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err>
    {
        match s.to_lowercase().as_str() {
            "error" => Ok(LogLevel::Error),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "info" => Ok(LogLevel::Info),
            "debug" => Ok(LogLevel::Debug),
            "trace" => Ok(LogLevel::Trace),
            _ => Err(format!(
                "Unknown log level: {s}. Use 'error', 'warn', 'info', 'debug', or 'trace'"
            )),
        }
    }
}

/// Where and how to log. Command-line flags fill this in over the
/// environment defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogConfig
{
    /// Overrides `RUST_LOG` when set
    pub level: Option<LogLevel>,
    pub format: LogFormat,
    /// Log only to this file
    pub file: Option<PathBuf>,
}

impl LogConfig
{
    /// Format and file from `DWARFBIND_LOG_FORMAT` and `DWARFBIND_LOG_FILE`.
    /// Invalid values fall back to the defaults.
    pub fn from_env() -> Self
    {
        Self {
            level: None,
            format: env::var("DWARFBIND_LOG_FORMAT")
                .ok()
                .and_then(|value| value.parse().ok())
                .unwrap_or_default(),
            file: env::var_os("DWARFBIND_LOG_FILE").map(PathBuf::from),
        }
    }

    /// Filter directives: the explicit level, else `rust_log` when it parses,
    /// else `warn`.
    fn directive(&self, rust_log: Option<&str>) -> String
    {
        if let Some(level) = self.level {
            return Level::from(level).to_string();
        }
        rust_log
            .filter(|directives| EnvFilter::try_new(directives).is_ok())
            .unwrap_or(DEFAULT_DIRECTIVE)
            .to_string()
    }
}

/// Install the global subscriber described by `config`.
///
/// ## Errors
///
/// `FileError` when the log file's directory cannot be created,
/// `InitializationFailed` when a subscriber is already installed.
pub fn init_logging(config: &LogConfig) -> Result<(), LoggingError>
{
    let rust_log = env::var("RUST_LOG").ok();
    let filter = EnvFilter::new(config.directive(rust_log.as_deref()));

    let layer = match &config.file {
        Some(path) => {
            let (directory, file_name) = split_log_path(path)?;
            let appender = tracing_appender::rolling::never(directory, file_name);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            // The writer thread must outlive every event; logging is process-wide.
            std::mem::forget(guard);
            format_layer(config.format, writer, false)
        }
        None => format_layer(config.format, io::stderr, true),
    };

    Registry::default()
        .with(layer.with_filter(filter))
        .try_init()
        .map_err(|err| LoggingError::InitializationFailed(err.to_string()))
}

fn format_layer<W>(format: LogFormat, writer: W, ansi: bool) -> Box<dyn Layer<Registry> + Send + Sync>
where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    let layer = fmt::layer()
        .with_writer(writer)
        .with_target(true)
        .with_file(true)
        .with_line_number(true)
        .with_timer(ChronoUtc::rfc_3339());
    match format {
        LogFormat::Pretty => layer.with_ansi(ansi).boxed(),
        LogFormat::Json => layer.json().with_current_span(true).with_span_list(true).boxed(),
    }
}

/// Directory (created if missing) and file name of a log path.
fn split_log_path(path: &Path) -> Result<(PathBuf, PathBuf), LoggingError>
{
    let directory = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let file_name = path.file_name().ok_or_else(|| {
        LoggingError::FileError(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("{} is not a file path", path.display()),
        ))
    })?;
    std::fs::create_dir_all(&directory)?;
    Ok((directory, PathBuf::from(file_name)))
}

/// Logging initialization error
#[derive(Debug, thiserror::Error)]
pub enum LoggingError
{
    #[error("Failed to initialize logging: {0}")]
    InitializationFailed(String),

    #[error("File logging error: {0}")]
    FileError(#[from] io::Error),
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn test_log_format_from_str()
    {
        assert_eq!(LogFormat::from_str("pretty").unwrap(), LogFormat::Pretty);
        assert_eq!(LogFormat::from_str("JSON").unwrap(), LogFormat::Json);
        assert!(LogFormat::from_str("xml").is_err());
    }

    #[test]
    fn test_log_level_from_str()
    {
        assert_eq!(LogLevel::from_str("WARN").unwrap(), LogLevel::Warn);
        assert_eq!(LogLevel::from_str("warning").unwrap(), LogLevel::Warn);
        assert_eq!(Level::from(LogLevel::from_str("trace").unwrap()), Level::TRACE);
        assert!(LogLevel::from_str("loud").is_err());
    }

    #[test]
    fn test_directive_precedence()
    {
        let explicit = LogConfig {
            level: Some(LogLevel::Debug),
            ..LogConfig::default()
        };
        assert_eq!(explicit.directive(Some("dwarfbind_core=trace")), "DEBUG");

        let config = LogConfig::default();
        assert_eq!(config.directive(Some("dwarfbind_core=trace")), "dwarfbind_core=trace");
        assert_eq!(config.directive(Some("dwarfbind_core=loud")), "warn");
        assert_eq!(config.directive(None), "warn");
    }

    #[test]
    fn test_split_log_path()
    {
        let dir = env::temp_dir().join(format!("dwarfbind-logs-{}", std::process::id()));
        let (directory, file_name) = split_log_path(&dir.join("run.log")).unwrap();
        assert_eq!(directory, dir);
        assert_eq!(file_name, PathBuf::from("run.log"));
        assert!(dir.is_dir());
        std::fs::remove_dir_all(&dir).unwrap();

        assert!(split_log_path(Path::new("/")).is_err());
    }
}
