//! Runtime configuration.
//!
//! [`RuntimeConfig`] is always available with sensible defaults. With the
//! `config` feature it can also be loaded from a TOML file:
//!
//! ```toml
//! timeout_ms = 5000
//! watchdog_thread_name = "mapreduce-watchdog"
//!
//! [logging]
//! level = "info"
//! format = "text"
//! ```

use crate::watchdog::DEFAULT_TIMEOUT_MS;

/// Default name of the watchdog thread.
pub const DEFAULT_WATCHDOG_THREAD_NAME: &str = "mapreduce-watchdog";

/// Settings for a [`Runtime`](crate::Runtime).
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "config", derive(serde::Deserialize))]
#[cfg_attr(feature = "config", serde(default))]
pub struct RuntimeConfig {
    /// Initial task timeout in milliseconds.
    pub timeout_ms: u64,
    /// Name given to the watchdog thread.
    pub watchdog_thread_name: String,
    /// Logging settings, used by binaries that install a subscriber.
    #[cfg(feature = "config")]
    pub logging: LoggingConfig,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            timeout_ms: DEFAULT_TIMEOUT_MS,
            watchdog_thread_name: DEFAULT_WATCHDOG_THREAD_NAME.to_string(),
            #[cfg(feature = "config")]
            logging: LoggingConfig::default(),
        }
    }
}

impl RuntimeConfig {
    /// Override the initial timeout.
    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }
}

#[cfg(feature = "config")]
pub use file::{ConfigError, LogFormat, LoggingConfig};

#[cfg(feature = "config")]
mod file {
    use std::path::Path;

    use serde::Deserialize;
    use thiserror::Error;

    use super::RuntimeConfig;

    /// Log output format.
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
    #[serde(rename_all = "lowercase")]
    pub enum LogFormat {
        /// Human-readable text.
        #[default]
        Text,
        /// One JSON object per line.
        Json,
    }

    /// Logging settings.
    #[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
    #[serde(default)]
    pub struct LoggingConfig {
        /// Filter directive, e.g. `info` or `mapreduce_runtime=debug`.
        pub level: String,
        /// Output format.
        pub format: LogFormat,
        /// Include timestamps.
        pub timestamps: bool,
    }

    impl Default for LoggingConfig {
        fn default() -> Self {
            Self {
                level: "info".to_string(),
                format: LogFormat::Text,
                timestamps: true,
            }
        }
    }

    /// Configuration error.
    #[derive(Error, Debug)]
    pub enum ConfigError {
        /// IO error reading config file.
        #[error("Failed to read config file '{0}': {1}")]
        Io(String, #[source] std::io::Error),
        /// TOML parse error.
        #[error("Failed to parse config: {0}")]
        Parse(#[from] toml::de::Error),
    }

    impl RuntimeConfig {
        /// Load configuration from a TOML file.
        pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
            let content = std::fs::read_to_string(path.as_ref())
                .map_err(|e| ConfigError::Io(path.as_ref().display().to_string(), e))?;
            Self::from_toml(&content)
        }

        /// Parse configuration from a TOML string.
        pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
            Ok(toml::from_str(content)?)
        }
    }

}
