//! Logging subsystem for the veilnet router
//!
//! All router components log through `tracing` with structured fields
//! (`peer`, `path_id`, `txid`). This module installs the subscriber:
//! an `EnvFilter` (honouring `RUST_LOG`) plus a plain or JSON fmt layer.

use tracing_subscriber::{
    fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer, Registry,
};

use crate::config::LoggingConfig;

mod error;
mod level;

pub use error::LoggingError;
pub use level::LogLevel;

/// Configuration for the logging subsystem
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// The minimum log level to display
    pub level: LogLevel,
    /// Whether to include timestamps
    pub with_timestamp: bool,
    /// Whether to include target module information
    pub with_target: bool,
    /// Whether to use JSON formatting
    pub json_format: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            with_timestamp: true,
            with_target: true,
            json_format: false,
        }
    }
}

impl LogConfig {
    /// Create a new LogConfig with specified level
    pub fn new(level: LogLevel) -> Self {
        Self {
            level,
            ..Default::default()
        }
    }

    /// Set whether to include timestamps
    pub fn with_timestamp(mut self, enabled: bool) -> Self {
        self.with_timestamp = enabled;
        self
    }

    /// Set whether to include target information
    pub fn with_target(mut self, enabled: bool) -> Self {
        self.with_target = enabled;
        self
    }

    /// Set whether to use JSON formatting
    pub fn json_format(mut self, enabled: bool) -> Self {
        self.json_format = enabled;
        self
    }

    /// Build from the `[logging]` section of a router config file.
    pub fn from_config(config: &LoggingConfig) -> Result<Self, LoggingError> {
        Ok(Self {
            level: config.level.parse()?,
            with_timestamp: config.with_timestamp,
            with_target: config.with_target,
            json_format: config.json_format,
        })
    }

    /// Replace the level with a command-line override, if one was given.
    pub fn override_level(mut self, level: Option<&str>) -> Result<Self, LoggingError> {
        if let Some(level) = level {
            self.level = level.parse()?;
        }
        Ok(self)
    }

    /// Filter used when `RUST_LOG` is unset: our crates at the configured
    /// level, everything else at warn or above.
    fn default_filter(&self) -> String {
        let level = self.level.as_str();
        if self.level >= LogLevel::Warn {
            level.to_string()
        } else {
            format!("warn,veilnet_core={level},veilnet={level}")
        }
    }
}

/// Initialize the logging subsystem with default configuration
///
/// # Example
/// ```
/// use veilnet_core::logging::init_logging;
///
/// init_logging().expect("Failed to initialize logging");
/// ```
pub fn init_logging() -> Result<(), LoggingError> {
    init_logging_with_config(LogConfig::default())
}

/// Initialize the logging subsystem with custom configuration
///
/// # Example
/// ```
/// use veilnet_core::logging::{init_logging_with_config, LogConfig, LogLevel};
///
/// let config = LogConfig::new(LogLevel::Debug)
///     .with_timestamp(true)
///     .with_target(false);
///
/// init_logging_with_config(config).expect("Failed to initialize logging");
/// ```
pub fn init_logging_with_config(config: LogConfig) -> Result<(), LoggingError> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.default_filter()));

    tracing_subscriber::registry()
        .with(fmt_layer(&config))
        .with(env_filter)
        .try_init()
        .map_err(|e| LoggingError::InitializationFailed(e.to_string()))?;

    Ok(())
}

fn fmt_layer(config: &LogConfig) -> Box<dyn Layer<Registry> + Send + Sync> {
    let layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(config.with_target);
    match (config.json_format, config.with_timestamp) {
        (true, true) => layer.json().boxed(),
        (true, false) => layer.json().without_time().boxed(),
        (false, true) => layer.boxed(),
        (false, false) => layer.without_time().boxed(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_config_default() {
        let config = LogConfig::default();
        assert!(matches!(config.level, LogLevel::Info));
        assert!(config.with_timestamp);
        assert!(config.with_target);
        assert!(!config.json_format);
    }

    #[test]
    fn test_log_config_builder() {
        let config = LogConfig::new(LogLevel::Debug)
            .with_timestamp(false)
            .with_target(false)
            .json_format(true);

        assert!(matches!(config.level, LogLevel::Debug));
        assert!(!config.with_timestamp);
        assert!(!config.with_target);
        assert!(config.json_format);
    }

    #[test]
    fn test_from_logging_section() {
        let section = LoggingConfig {
            level: "warn".to_string(),
            json_format: true,
            with_timestamp: false,
            with_target: true,
        };
        let config = LogConfig::from_config(&section).unwrap();
        assert_eq!(config.level, LogLevel::Warn);
        assert!(config.json_format);
        assert!(!config.with_timestamp);

        let bad = LoggingConfig {
            level: "loud".to_string(),
            ..LoggingConfig::default()
        };
        assert!(matches!(
            LogConfig::from_config(&bad),
            Err(LoggingError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn test_level_override() {
        let config = LogConfig::new(LogLevel::Info)
            .override_level(Some("trace"))
            .unwrap();
        assert_eq!(config.level, LogLevel::Trace);
        let config = config.override_level(None).unwrap();
        assert_eq!(config.level, LogLevel::Trace);
        assert!(LogConfig::default().override_level(Some("loud")).is_err());
    }

    #[test]
    fn test_default_filter_scopes_verbose_levels() {
        assert_eq!(LogConfig::new(LogLevel::Error).default_filter(), "error");
        assert_eq!(
            LogConfig::new(LogLevel::Debug).default_filter(),
            "warn,veilnet_core=debug,veilnet=debug"
        );
    }
}
