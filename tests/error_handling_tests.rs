//! Tests for the error taxonomy, classification and reporting

use playlist_resilience::error::{NetworkErrorType, OAuthSignal, StorageType};
use playlist_resilience::{
    classify, ErrorCategory, ErrorCode, ErrorReporter, ErrorSeverity, FaultError, FaultKind,
    OperationContext, RawFailure,
};
use pretty_assertions::assert_eq;
use rstest::rstest;
use std::time::Duration;

#[test]
fn test_network_error_defaults() {
    let error = FaultError::network(NetworkErrorType::Connection, "Failed to reach catalog");

    assert_eq!(error.code(), ErrorCode::ConnectionRefused);
    assert_eq!(error.code().as_number(), 1002);
    assert_eq!(error.category(), ErrorCategory::Network);
    assert!(error.should_retry());
    assert_eq!(error.severity(), ErrorSeverity::Warning);
}

#[test]
fn test_operation_context_with_metadata() {
    let context = OperationContext::new("library_sync", "fetch_tracks")
        .with_metadata("playlist_id", "37i9dQZF1DX")
        .with_metadata("page", 3)
        .with_correlation_id("req_abc123");

    assert_eq!(context.component, "library_sync");
    assert_eq!(context.operation, "fetch_tracks");
    assert_eq!(context.correlation_id, Some("req_abc123".to_string()));
    assert_eq!(context.metadata("page"), Some(&serde_json::json!(3)));
}

#[rstest]
#[case(FaultError::timeout("t"), true)]
#[case(FaultError::network(NetworkErrorType::Dns, "dns"), true)]
#[case(FaultError::storage(StorageType::FileSystem, "write", ErrorCode::FileBusy, "busy"), true)]
#[case(FaultError::storage(StorageType::FileSystem, "write", ErrorCode::FilePermissionDenied, "denied"), false)]
#[case(FaultError::storage(StorageType::Encryption, "read", ErrorCode::EncryptionFailed, "bad"), false)]
#[case(FaultError::oauth(OAuthSignal::SlowDown, "slow_down"), true)]
#[case(FaultError::oauth(OAuthSignal::AccessDenied, "access_denied"), false)]
#[case(FaultError::configuration(vec!["client_id".into()], vec![], "missing"), false)]
#[case(FaultError::remote_api(Some(503), "unavailable"), true)]
#[case(FaultError::remote_api(Some(429), "busy"), true)]
#[case(FaultError::remote_api(Some(404), "gone"), false)]
#[case(FaultError::playlist_operation("create", ErrorCode::PlaylistCreateFailed, "p"), false)]
#[case(FaultError::data_processing("parse", 2, ErrorCode::ParsingFailed, "d"), false)]
fn test_default_retryability(#[case] error: FaultError, #[case] retryable: bool) {
    assert_eq!(error.should_retry(), retryable, "{error:?}");
}

#[rstest]
#[case(RawFailure::new("socket hang up").with_code("ECONNRESET"), ErrorCategory::Network)]
#[case(RawFailure::new("no such file").with_code("ENOENT"), ErrorCategory::Storage)]
#[case(RawFailure::new("oauth").with_code("invalid_grant"), ErrorCategory::Authentication)]
#[case(RawFailure::new("Service Unavailable").with_status(503), ErrorCategory::RemoteApi)]
#[case(RawFailure::new("client_id not configured"), ErrorCategory::Configuration)]
#[case(RawFailure::new("request timed out after 30s"), ErrorCategory::Network)]
#[case(RawFailure::new("???"), ErrorCategory::DataProcessing)]
fn test_classification_categories(#[case] raw: RawFailure, #[case] expected: ErrorCategory) {
    assert_eq!(classify(raw).category(), expected);
}

#[test]
fn test_rate_limit_keeps_retry_after() {
    let error = classify(
        RawFailure::new("Too Many Requests")
            .with_status(429)
            .with_retry_after(Duration::from_secs(12)),
    );

    assert!(error.is_rate_limited());
    assert!(error.should_retry());
    assert_eq!(error.retry_after(), Some(Duration::from_secs(12)));
    assert_eq!(error.code(), ErrorCode::RemoteRateLimited);
}

#[test]
fn test_classified_source_is_kept() {
    let io = std::io::Error::new(std::io::ErrorKind::Other, "disk unplugged");
    let error = classify(RawFailure::new("write failed").with_code("EBUSY").with_source(io));

    let source = std::error::Error::source(&error).expect("source");
    assert_eq!(source.to_string(), "disk unplugged");
    assert!(matches!(
        error.kind(),
        FaultKind::Storage {
            storage_type: StorageType::FileSystem,
            permission_like: false,
            ..
        }
    ));
}

#[test]
fn test_error_reporting() {
    let error = FaultError::playlist_operation(
        "add_tracks",
        ErrorCode::PlaylistUpdateFailed,
        "Failed to add 12 tracks",
    )
    .with_context(OperationContext::new("playlist", "add_tracks").with_correlation_id("test_123"));

    // This will log the error - in a real test we'd capture the log output
    ErrorReporter::log_error(&error);

    let api_response = ErrorReporter::to_json(&error, true);
    let error_obj = api_response["error"].as_object().expect("error object");

    assert_eq!(error_obj["code"].as_u64(), Some(1502));
    assert_eq!(error_obj["category"].as_str(), Some("playlist-operation"));
    assert_eq!(error_obj["retryable"].as_bool(), Some(false));
    assert_eq!(error_obj["correlation_id"].as_str(), Some("test_123"));
    assert_eq!(error_obj["details"].as_str(), Some("Failed to add 12 tracks"));

    let public = ErrorReporter::to_json(&error, false);
    assert!(public["error"].get("details").is_none());
}

#[test]
fn test_error_metrics() {
    let error = FaultError::rate_limited("Too many requests", None);
    let metrics = ErrorReporter::metrics(&error);

    assert_eq!(metrics["error_code"].as_u64(), Some(1403));
    assert_eq!(metrics["category"].as_str(), Some("remote-api"));
    assert_eq!(metrics["severity"].as_str(), Some("Warning"));
    assert_eq!(metrics["retryable"].as_bool(), Some(true));
}

#[test]
fn test_circuit_open_error_shape() {
    let error = FaultError::circuit_open("catalog", Duration::from_secs(20));

    assert!(error.is_circuit_open());
    assert_eq!(error.category(), ErrorCategory::Network);
    assert_eq!(error.retry_after(), Some(Duration::from_secs(20)));
    assert!(error.to_string().contains("catalog"));
}
