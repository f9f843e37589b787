use std::str::FromStr;

use tracing_subscriber::fmt::MakeWriter;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("unknown log {kind}: {value:?}")]
pub struct ParseLogError {
    kind: &'static str,
    value: String,
}

impl LogLevel {
    pub fn as_filter(self) -> tracing::level_filters::LevelFilter {
        match self {
            LogLevel::Error => tracing::level_filters::LevelFilter::ERROR,
            LogLevel::Warn => tracing::level_filters::LevelFilter::WARN,
            LogLevel::Info => tracing::level_filters::LevelFilter::INFO,
            LogLevel::Debug => tracing::level_filters::LevelFilter::DEBUG,
            LogLevel::Trace => tracing::level_filters::LevelFilter::TRACE,
        }
    }
}

impl FromStr for LogLevel {
    type Err = ParseLogError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "error" => Ok(LogLevel::Error),
            "warn" => Ok(LogLevel::Warn),
            "info" => Ok(LogLevel::Info),
            "debug" => Ok(LogLevel::Debug),
            "trace" => Ok(LogLevel::Trace),
            _ => Err(ParseLogError {
                kind: "level",
                value: s.to_string(),
            }),
        }
    }
}

impl FromStr for LogFormat {
    type Err = ParseLogError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "text" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            _ => Err(ParseLogError {
                kind: "format",
                value: s.to_string(),
            }),
        }
    }
}

/// Install a global subscriber writing to stderr. Later calls are no-ops.
pub fn init_logging(format: LogFormat, level: LogLevel) {
    init_logging_with_writer(format, level, std::io::stderr);
}

/// Install a global subscriber writing through `writer`. Later calls are
/// no-ops.
pub fn init_logging_with_writer<W>(format: LogFormat, level: LogLevel, writer: W)
where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    let builder = tracing_subscriber::fmt()
        .with_writer(writer)
        .with_max_level(level.as_filter())
        .with_ansi(false)
        .with_target(false);

    match format {
        LogFormat::Text => {
            let _ = builder.try_init();
        }
        LogFormat::Json => {
            let _ = builder.json().try_init();
        }
    }
}

/// Like [`init_logging`], reading `BUFPRIMS_LOG_FORMAT` and `BUFPRIMS_LOG`
/// and falling back to text at `warn`.
pub fn init_logging_from_env() -> Result<(), ParseLogError> {
    let format = match std::env::var("BUFPRIMS_LOG_FORMAT") {
        Ok(value) => value.parse()?,
        Err(_) => LogFormat::Text,
    };
    let level = match std::env::var("BUFPRIMS_LOG") {
        Ok(value) => value.parse()?,
        Err(_) => LogLevel::Warn,
    };
    init_logging(format, level);
    Ok(())
}
