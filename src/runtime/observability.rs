//! Structured logging setup.
//!
//! Every log line emitted by the workers carries correlation fields:
//! `worker_id`, `domain`, `task_list`, the workflow or activity type, and for
//! tasks `workflow_id`, `run_id` and `activity_id`. Targets follow the module
//! path (`taskchain::runtime::decision`, `taskchain::runtime::activity`, ...)
//! so they can be filtered independently.

use std::str::FromStr;

use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// One JSON object per line, for log aggregators.
    Json,
    /// Multi-line, human readable.
    Pretty,
    #[default]
    Compact,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(LogFormat::Json),
            "pretty" => Ok(LogFormat::Pretty),
            "compact" => Ok(LogFormat::Compact),
            other => Err(format!("unknown log format: {other}")),
        }
    }
}

/// ```rust,no_run
/// use taskchain::runtime::observability::{LogFormat, LoggingConfig, init_logging};
///
/// init_logging(&LoggingConfig {
///     log_format: LogFormat::Json,
///     log_level: "debug".to_string(),
/// })
/// .expect("logging");
/// ```
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub log_format: LogFormat,
    /// Level applied to `taskchain` targets; everything else logs at `warn`.
    pub log_level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            log_format: LogFormat::Compact,
            log_level: "info".to_string(),
        }
    }
}

impl LoggingConfig {
    /// Reads `TASKCHAIN_LOG_FORMAT` and `TASKCHAIN_LOG_LEVEL`, keeping the
    /// default for anything unset or unparsable.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(raw) = std::env::var("TASKCHAIN_LOG_FORMAT")
            && let Ok(format) = raw.parse()
        {
            config.log_format = format;
        }
        if let Ok(level) = std::env::var("TASKCHAIN_LOG_LEVEL")
            && !level.trim().is_empty()
        {
            config.log_level = level;
        }
        config
    }
}

pub fn default_filter_expression(level: &str) -> String {
    format!("warn,taskchain={level}")
}

/// Installs a global subscriber. `RUST_LOG` wins over `log_level` when set.
///
/// # Errors
///
/// Fails when a global subscriber is already installed.
pub fn init_logging(config: &LoggingConfig) -> Result<(), String> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter_expression(&config.log_level)));

    match config.log_format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().json())
                .try_init()
                .map_err(|e| format!("Failed to initialize JSON logging: {e}"))?;
        }
        LogFormat::Pretty => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().pretty())
                .try_init()
                .map_err(|e| format!("Failed to initialize pretty logging: {e}"))?;
        }
        LogFormat::Compact => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().compact())
                .try_init()
                .map_err(|e| format!("Failed to initialize compact logging: {e}"))?;
        }
    }

    Ok(())
}
