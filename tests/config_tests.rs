//! Layered configuration loading tests
//!
//! Environment overrides are process-global, so every test that reads them
//! runs serially.

use playlist_resilience::config::ENV_PREFIX;
use playlist_resilience::{ErrorCategory, FaultKind, LogFormat, ResilienceConfig};
use pretty_assertions::assert_eq;
use serial_test::serial;
use std::io::Write;
use std::time::Duration;
use tempfile::NamedTempFile;

fn write_config(contents: &str) -> NamedTempFile {
    let mut file = tempfile::Builder::new()
        .suffix(".toml")
        .tempfile()
        .expect("temp file");
    file.write_all(contents.as_bytes()).expect("write config");
    file
}

#[test]
#[serial]
fn test_defaults_without_file() {
    temp_env::with_var_unset("RESILIENCE_CIRCUIT_BREAKER__FAILURE_THRESHOLD", || {
        let config = ResilienceConfig::load(None).expect("defaults load");

        assert_eq!(config.circuit_breaker.failure_threshold, 5);
        assert_eq!(config.circuit_breaker.reset_timeout, Duration::from_secs(60));
        assert_eq!(config.retry.max_retries, 3);
        assert_eq!(config.default_timeout, Duration::from_secs(30));
        assert_eq!(config.health.timeout, Duration::from_secs(5));
        assert!(config.probes.is_empty());
    });
}

#[test]
#[serial]
fn test_file_values_and_durations() {
    let file = write_config(
        r#"
default_timeout = "10s"

[circuit_breaker]
failure_threshold = 3
reset_timeout = "250ms"

[retry]
max_retries = 5
base_delay = "200ms"
backoff = "linear"

[logging]
level = "debug"
format = "json"

[[probes]]
name = "catalog"
address = "127.0.0.1:443"
critical = true

[[probes]]
name = "cache"
address = "127.0.0.1:6379"
timeout = "750ms"
"#,
    );

    temp_env::with_var_unset("RESILIENCE_CIRCUIT_BREAKER__FAILURE_THRESHOLD", || {
        let config = ResilienceConfig::load(Some(file.path())).expect("file config");

        assert_eq!(config.default_timeout, Duration::from_secs(10));
        assert_eq!(config.circuit_breaker.failure_threshold, 3);
        assert_eq!(config.circuit_breaker.reset_timeout, Duration::from_millis(250));
        // Keys absent from the file keep their defaults
        assert_eq!(config.circuit_breaker.half_open_max_calls, 1);
        assert_eq!(config.retry.max_retries, 5);
        assert_eq!(config.retry.base_delay, Duration::from_millis(200));
        assert_eq!(config.retry.max_delay, Duration::from_secs(30));
        assert_eq!(config.logging.format, LogFormat::Json);

        assert_eq!(config.probes.len(), 2);
        assert_eq!(config.probes[0].name, "catalog");
        assert!(config.probes[0].critical);
        assert_eq!(config.probes[0].timeout, Duration::from_secs(5));
        assert_eq!(config.probes[1].timeout, Duration::from_millis(750));
        assert!(!config.probes[1].critical);
    });
}

#[test]
#[serial]
fn test_environment_overrides_file() {
    let file = write_config(
        r#"
[circuit_breaker]
failure_threshold = 3
"#,
    );
    let key = format!("{ENV_PREFIX}_CIRCUIT_BREAKER__FAILURE_THRESHOLD");

    temp_env::with_vars(
        [
            (key.as_str(), Some("8")),
            ("RESILIENCE_DEFAULT_TIMEOUT", Some("2s")),
        ],
        || {
            let config = ResilienceConfig::load(Some(file.path())).expect("env config");
            assert_eq!(config.circuit_breaker.failure_threshold, 8);
            assert_eq!(config.default_timeout, Duration::from_secs(2));
        },
    );
}

#[test]
#[serial]
fn test_missing_file_is_configuration_error() {
    let dir = tempfile::tempdir().expect("temp dir");
    let path = dir.path().join("absent.toml");

    let error = ResilienceConfig::load(Some(&path)).unwrap_err();

    assert_eq!(error.category(), ErrorCategory::Configuration);
    assert!(!error.should_retry());
    let FaultKind::Configuration { missing_keys, .. } = error.kind() else {
        panic!("expected configuration error, got {error:?}");
    };
    assert_eq!(missing_keys, &vec![path.display().to_string()]);
}

#[test]
#[serial]
fn test_invalid_values_are_rejected() {
    let file = write_config(
        r#"
[circuit_breaker]
failure_threshold = 0

[[probes]]
name = "catalog"
address = "127.0.0.1:443"

[[probes]]
name = "catalog"
address = " "
"#,
    );

    temp_env::with_var_unset("RESILIENCE_CIRCUIT_BREAKER__FAILURE_THRESHOLD", || {
        let error = ResilienceConfig::load(Some(file.path())).unwrap_err();

        let FaultKind::Configuration { invalid_keys, .. } = error.kind() else {
            panic!("expected configuration error, got {error:?}");
        };
        assert_eq!(
            invalid_keys,
            &vec![
                "circuit_breaker.failure_threshold".to_string(),
                "probes.catalog.name".to_string(),
                "probes.catalog.address".to_string(),
            ]
        );
    });
}

#[test]
#[serial]
fn test_malformed_duration_is_configuration_error() {
    let file = write_config(
        r#"
default_timeout = "soon"
"#,
    );

    temp_env::with_var_unset("RESILIENCE_DEFAULT_TIMEOUT", || {
        let error = ResilienceConfig::load(Some(file.path())).unwrap_err();
        assert_eq!(error.category(), ErrorCategory::Configuration);
        assert!(error.message().contains("Configuration error"));
    });
}
