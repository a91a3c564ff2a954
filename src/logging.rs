//! Logging setup for entry points embedding the control plane
//!
//! The library only emits `tracing` events; installing a subscriber is left to
//! the process entry point through [`init_logging`].

use serde::{Deserialize, Serialize};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Output format of the fmt layer
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Compact,
    Pretty,
    Json,
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default directive when `RUST_LOG` is unset
    pub level: String,
    pub format: LogFormat,
    /// Include targets in log lines
    pub with_target: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Compact,
            with_target: false,
        }
    }
}

impl LoggingConfig {
    /// Force debug output regardless of `RUST_LOG`
    pub fn debug(mut self) -> Self {
        self.level = "debug".to_string();
        self
    }
}

/// Install the global subscriber
///
/// `RUST_LOG` wins over `config.level` unless `force_level` is set. Fails if a
/// global subscriber is already installed.
pub fn init_logging(
    config: &LoggingConfig,
    force_level: bool,
) -> Result<(), tracing_subscriber::util::TryInitError> {
    let filter = if force_level {
        EnvFilter::new(&config.level)
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level))
    };

    let registry = tracing_subscriber::registry().with(filter);
    // Logs go to stderr so stdout stays machine-readable
    match config.format {
        LogFormat::Compact => registry
            .with(
                fmt::layer()
                    .compact()
                    .with_target(config.with_target)
                    .with_writer(std::io::stderr),
            )
            .try_init(),
        LogFormat::Pretty => registry
            .with(
                fmt::layer()
                    .pretty()
                    .with_target(config.with_target)
                    .with_writer(std::io::stderr),
            )
            .try_init(),
        LogFormat::Json => registry
            .with(
                fmt::layer()
                    .json()
                    .with_target(config.with_target)
                    .with_writer(std::io::stderr),
            )
            .try_init(),
    }
}
