use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Logging configuration for the agent
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Whether to enable JSON formatted logs
    pub json_format: bool,

    /// Whether to include thread names in logs
    pub include_thread_names: bool,

    /// Whether to include file and line number information
    pub include_file_info: bool,

    /// Whether to enable colored output (only for non-JSON format)
    pub enable_colors: bool,

    /// Log file path (optional, if None logs only to stderr)
    pub log_file: Option<PathBuf>,

    /// Module-specific log levels
    pub module_levels: HashMap<String, String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        let mut module_levels = HashMap::new();
        module_levels.insert("reqwest".to_string(), "warn".to_string());
        module_levels.insert("hyper".to_string(), "warn".to_string());

        Self {
            level: "info".to_string(),
            json_format: false,
            include_thread_names: false,
            include_file_info: false,
            enable_colors: true,
            log_file: None,
            module_levels,
        }
    }
}

/// Build the filter for `config`. `RUST_LOG` wins when it is set.
pub fn build_filter(config: &LoggingConfig) -> anyhow::Result<EnvFilter> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }

    if !levels::is_valid_level(&config.level) {
        bail!("Invalid log level: {}", config.level);
    }

    let mut filter = EnvFilter::new(config.level.to_lowercase());
    for (module, level) in &config.module_levels {
        let directive = format!("{}={}", module, level);
        filter = filter.add_directive(
            directive
                .parse()
                .with_context(|| format!("Invalid log directive: {}", directive))?,
        );
    }
    Ok(filter)
}

/// Initialize logging based on the provided configuration.
///
/// Console output goes to stderr so stdout stays free for command output.
/// The returned guard flushes the file writer and must be held for the
/// lifetime of the program. Calling this twice is not an error.
pub fn init_logging(config: &LoggingConfig) -> anyhow::Result<Option<WorkerGuard>> {
    let filter = build_filter(config)?;

    let plain = (!config.json_format).then(|| {
        fmt::layer()
            .with_writer(std::io::stderr)
            .with_thread_names(config.include_thread_names)
            .with_file(config.include_file_info)
            .with_line_number(config.include_file_info)
            .with_ansi(config.enable_colors)
    });
    let json = config.json_format.then(|| {
        fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_thread_names(config.include_thread_names)
            .with_file(config.include_file_info)
            .with_line_number(config.include_file_info)
    });

    let (file, guard) = match &config.log_file {
        Some(path) => {
            let appender = create_file_appender(path)?;
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer().with_writer(writer).with_ansi(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    let result = tracing_subscriber::registry()
        .with(filter)
        .with(plain)
        .with(json)
        .with(file)
        .try_init();

    match result {
        Ok(()) => tracing::debug!("Logging initialized with level: {}", config.level),
        Err(_) => tracing::debug!("Logging already initialized, skipping"),
    }

    Ok(guard)
}

/// Create a daily-rolling appender for `log_file`
fn create_file_appender(
    log_file: &Path,
) -> anyhow::Result<tracing_appender::rolling::RollingFileAppender> {
    use tracing_appender::rolling::{RollingFileAppender, Rotation};

    let filename = log_file
        .file_name()
        .with_context(|| format!("Invalid log file name: {}", log_file.display()))?;
    let directory = match log_file.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };

    std::fs::create_dir_all(directory)
        .with_context(|| format!("Failed to create log directory {}", directory.display()))?;

    Ok(RollingFileAppender::new(Rotation::DAILY, directory, filename))
}

/// Log level utilities
pub mod levels {
    /// Check if a log level string is valid
    pub fn is_valid_level(level: &str) -> bool {
        matches!(
            level.to_lowercase().as_str(),
            "trace" | "debug" | "info" | "warn" | "error"
        )
    }

    /// Get all valid log levels
    pub fn valid_levels() -> Vec<&'static str> {
        vec!["trace", "debug", "info", "warn", "error"]
    }
}
