//! Layered configuration for entry points
//!
//! Core components take plain option structs. [`ResilienceConfig`] bundles the
//! defaults an entry point hands to them and is loaded in three layers:
//! built-in defaults, an optional TOML file, then `RESILIENCE_*` environment
//! variables (`__` separates nested keys, e.g.
//! `RESILIENCE_CIRCUIT_BREAKER__FAILURE_THRESHOLD=3`).

use crate::error::{FaultError, Result};
use crate::error_recovery::{CircuitBreakerConfig, HealthCheckOptions, RetryPolicy};
use crate::logging::LoggingConfig;
use ::config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;
use tracing::debug;

/// Environment variable prefix for overrides
pub const ENV_PREFIX: &str = "RESILIENCE";

/// Defaults for an embedding entry point
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResilienceConfig {
    /// Applied to breakers created lazily by name
    pub circuit_breaker: CircuitBreakerConfig,
    /// Used when a protected call does not bring its own policy
    pub retry: RetryPolicy,
    /// Used when a health check is registered without options
    pub health: HealthCheckOptions,
    /// Per-attempt timeout of protected calls
    #[serde(with = "humantime_serde")]
    pub default_timeout: Duration,
    pub logging: LoggingConfig,
    /// TCP endpoints probed by the probe binary
    pub probes: Vec<EndpointProbeConfig>,
}

impl Default for ResilienceConfig {
    fn default() -> Self {
        Self {
            circuit_breaker: CircuitBreakerConfig::default(),
            retry: RetryPolicy::default(),
            health: HealthCheckOptions::default(),
            default_timeout: Duration::from_secs(30),
            logging: LoggingConfig::default(),
            probes: Vec::new(),
        }
    }
}

/// A `host:port` endpoint checked with a TCP connect
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointProbeConfig {
    pub name: String,
    pub address: String,
    #[serde(default = "default_probe_timeout", with = "humantime_serde")]
    pub timeout: Duration,
    #[serde(default)]
    pub critical: bool,
}

fn default_probe_timeout() -> Duration {
    Duration::from_secs(5)
}

impl ResilienceConfig {
    /// Load defaults, then `path` if given, then environment overrides
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let defaults = serde_json::to_string(&Self::default())?;
        let mut builder = Config::builder().add_source(File::from_str(&defaults, FileFormat::Json));

        if let Some(path) = path {
            if !path.exists() {
                return Err(FaultError::configuration(
                    vec![path.display().to_string()],
                    Vec::new(),
                    format!("Configuration file not found: {}", path.display()),
                ));
            }
            debug!(path = %path.display(), "Loading configuration file");
            builder = builder.add_source(File::from(path).format(FileFormat::Toml));
        }

        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config: Self = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the control plane cannot run with
    pub fn validate(&self) -> Result<()> {
        let mut invalid = Vec::new();

        if self.circuit_breaker.failure_threshold == 0 {
            invalid.push("circuit_breaker.failure_threshold".to_string());
        }
        if self.circuit_breaker.half_open_max_calls == 0 {
            invalid.push("circuit_breaker.half_open_max_calls".to_string());
        }
        if !(0.0..=1.0).contains(&self.retry.jitter_fraction) {
            invalid.push("retry.jitter_fraction".to_string());
        }
        if self.retry.base_delay > self.retry.max_delay {
            invalid.push("retry.base_delay".to_string());
        }
        if self.health.timeout.is_zero() {
            invalid.push("health.timeout".to_string());
        }
        if self.default_timeout.is_zero() {
            invalid.push("default_timeout".to_string());
        }

        let mut seen = HashSet::new();
        for probe in &self.probes {
            if !seen.insert(probe.name.as_str()) {
                invalid.push(format!("probes.{}.name", probe.name));
            }
            if probe.address.trim().is_empty() {
                invalid.push(format!("probes.{}.address", probe.name));
            }
            if probe.timeout.is_zero() {
                invalid.push(format!("probes.{}.timeout", probe.name));
            }
        }

        if invalid.is_empty() {
            return Ok(());
        }
        Err(FaultError::configuration(
            Vec::new(),
            invalid.clone(),
            format!("Invalid resilience configuration: {}", invalid.join(", ")),
        ))
    }
}

impl From<::config::ConfigError> for FaultError {
    fn from(err: ::config::ConfigError) -> Self {
        let (missing, invalid) = match &err {
            ::config::ConfigError::NotFound(key) => (vec![key.clone()], Vec::new()),
            ::config::ConfigError::Type { key: Some(key), .. } => (Vec::new(), vec![key.clone()]),
            _ => (Vec::new(), Vec::new()),
        };
        FaultError::configuration(missing, invalid, format!("Configuration error: {err}"))
            .with_source(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ErrorCategory, FaultKind};

    #[test]
    fn test_defaults_are_valid() {
        assert!(ResilienceConfig::default().validate().is_ok());
    }

    #[test]
    fn test_validation_lists_invalid_keys() {
        let mut config = ResilienceConfig::default();
        config.circuit_breaker.failure_threshold = 0;
        config.retry.jitter_fraction = 1.5;
        config.retry.base_delay = Duration::from_secs(60);
        config.probes.push(EndpointProbeConfig {
            name: "catalog".into(),
            address: String::new(),
            timeout: Duration::ZERO,
            critical: true,
        });

        let error = config.validate().unwrap_err();
        assert_eq!(error.category(), ErrorCategory::Configuration);
        assert!(!error.should_retry());
        let FaultKind::Configuration { invalid_keys, .. } = error.kind() else {
            panic!("expected configuration error");
        };
        assert_eq!(
            invalid_keys,
            &vec![
                "circuit_breaker.failure_threshold".to_string(),
                "retry.jitter_fraction".to_string(),
                "retry.base_delay".to_string(),
                "probes.catalog.address".to_string(),
                "probes.catalog.timeout".to_string(),
            ]
        );
    }
}
