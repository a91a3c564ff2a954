//! Error taxonomy for the resilience control plane
//!
//! Every failure that passes through a circuit breaker, fallback, timeout race or
//! retry executor is classified into exactly one [`ErrorCategory`]. The category
//! payload lives in [`FaultKind`], and [`FaultError`] carries the shared fields
//! (code, message, context, retryability hints) plus the wrapped original failure.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Result type alias for control-plane operations
pub type Result<T> = std::result::Result<T, FaultError>;

/// Closed set of failure categories
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorCategory {
    Network,
    Storage,
    Authentication,
    Configuration,
    RemoteApi,
    PlaylistOperation,
    DataProcessing,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::Network => "network",
            ErrorCategory::Storage => "storage",
            ErrorCategory::Authentication => "authentication",
            ErrorCategory::Configuration => "configuration",
            ErrorCategory::RemoteApi => "remote-api",
            ErrorCategory::PlaylistOperation => "playlist-operation",
            ErrorCategory::DataProcessing => "data-processing",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of network failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NetworkErrorType {
    Timeout,
    Connection,
    Dns,
    RateLimit,
    /// Call rejected locally by an open circuit breaker
    CircuitOpen,
}

/// Backing store involved in a storage failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageType {
    FileSystem,
    Keychain,
    Encryption,
    Cache,
}

/// Authentication mechanism that failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthType {
    OAuth,
    Token,
    Credentials,
}

/// Signals returned by an OAuth authorization server during a device/token flow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OAuthSignal {
    SlowDown,
    AuthorizationPending,
    AccessDenied,
    ExpiredToken,
    InvalidGrant,
}

impl OAuthSignal {
    /// Parse the wire value of an OAuth `error` field
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "slow_down" => Some(OAuthSignal::SlowDown),
            "authorization_pending" => Some(OAuthSignal::AuthorizationPending),
            "access_denied" => Some(OAuthSignal::AccessDenied),
            "expired_token" => Some(OAuthSignal::ExpiredToken),
            "invalid_grant" => Some(OAuthSignal::InvalidGrant),
            _ => None,
        }
    }
}

/// Category-specific payload of a classified failure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "category", rename_all = "kebab-case")]
pub enum FaultKind {
    Network {
        network_type: NetworkErrorType,
        status_code: Option<u16>,
        retry_count: u32,
        max_retries: u32,
    },
    Storage {
        storage_type: StorageType,
        operation: String,
        permission_like: bool,
    },
    Authentication {
        auth_type: AuthType,
        oauth_signal: Option<OAuthSignal>,
    },
    Configuration {
        missing_keys: Vec<String>,
        invalid_keys: Vec<String>,
    },
    RemoteApi {
        status_code: Option<u16>,
        rate_limited: bool,
    },
    PlaylistOperation {
        operation: String,
    },
    DataProcessing {
        stage: String,
        failed_item_count: usize,
    },
}

impl FaultKind {
    pub fn category(&self) -> ErrorCategory {
        match self {
            FaultKind::Network { .. } => ErrorCategory::Network,
            FaultKind::Storage { .. } => ErrorCategory::Storage,
            FaultKind::Authentication { .. } => ErrorCategory::Authentication,
            FaultKind::Configuration { .. } => ErrorCategory::Configuration,
            FaultKind::RemoteApi { .. } => ErrorCategory::RemoteApi,
            FaultKind::PlaylistOperation { .. } => ErrorCategory::PlaylistOperation,
            FaultKind::DataProcessing { .. } => ErrorCategory::DataProcessing,
        }
    }
}

/// Structured error code for machine-readable error handling
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    // Network errors (1000-1099)
    NetworkTimeout,
    ConnectionRefused,
    ConnectionReset,
    DnsLookupFailed,
    RateLimited,
    CircuitOpen,

    // Storage errors (1100-1199)
    FileNotFound,
    FilePermissionDenied,
    FileBusy,
    StorageFull,
    StorageIo,
    KeychainLocked,
    EncryptionFailed,

    // Authentication errors (1200-1299)
    OAuthSlowDown,
    OAuthAuthorizationPending,
    OAuthAccessDenied,
    OAuthExpiredToken,
    OAuthInvalidGrant,
    TokenInvalid,
    InvalidCredentials,

    // Configuration errors (1300-1399)
    ConfigurationMissing,
    ConfigurationInvalid,

    // Remote API errors (1400-1499)
    RemoteServerError,
    RemoteClientError,
    RemoteRateLimited,
    RemoteUnavailable,

    // Playlist errors (1500-1599)
    PlaylistCreateFailed,
    PlaylistUpdateFailed,
    PlaylistRollbackFailed,

    // Data processing errors (1600-1699)
    ParsingFailed,
    ValidationFailed,
    CategorizationFailed,
    TaskAborted,
    Unclassified,
}

impl ErrorCode {
    /// Get numeric error code
    pub fn as_number(&self) -> u32 {
        match self {
            ErrorCode::NetworkTimeout => 1001,
            ErrorCode::ConnectionRefused => 1002,
            ErrorCode::ConnectionReset => 1003,
            ErrorCode::DnsLookupFailed => 1004,
            ErrorCode::RateLimited => 1005,
            ErrorCode::CircuitOpen => 1006,

            ErrorCode::FileNotFound => 1101,
            ErrorCode::FilePermissionDenied => 1102,
            ErrorCode::FileBusy => 1103,
            ErrorCode::StorageFull => 1104,
            ErrorCode::StorageIo => 1105,
            ErrorCode::KeychainLocked => 1106,
            ErrorCode::EncryptionFailed => 1107,

            ErrorCode::OAuthSlowDown => 1201,
            ErrorCode::OAuthAuthorizationPending => 1202,
            ErrorCode::OAuthAccessDenied => 1203,
            ErrorCode::OAuthExpiredToken => 1204,
            ErrorCode::OAuthInvalidGrant => 1205,
            ErrorCode::TokenInvalid => 1206,
            ErrorCode::InvalidCredentials => 1207,

            ErrorCode::ConfigurationMissing => 1301,
            ErrorCode::ConfigurationInvalid => 1302,

            ErrorCode::RemoteServerError => 1401,
            ErrorCode::RemoteClientError => 1402,
            ErrorCode::RemoteRateLimited => 1403,
            ErrorCode::RemoteUnavailable => 1404,

            ErrorCode::PlaylistCreateFailed => 1501,
            ErrorCode::PlaylistUpdateFailed => 1502,
            ErrorCode::PlaylistRollbackFailed => 1503,

            ErrorCode::ParsingFailed => 1601,
            ErrorCode::ValidationFailed => 1602,
            ErrorCode::CategorizationFailed => 1603,
            ErrorCode::TaskAborted => 1604,
            ErrorCode::Unclassified => 1699,
        }
    }

    /// Stable string form, e.g. `NETWORK_TIMEOUT`
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::NetworkTimeout => "NETWORK_TIMEOUT",
            ErrorCode::ConnectionRefused => "CONNECTION_REFUSED",
            ErrorCode::ConnectionReset => "CONNECTION_RESET",
            ErrorCode::DnsLookupFailed => "DNS_LOOKUP_FAILED",
            ErrorCode::RateLimited => "RATE_LIMITED",
            ErrorCode::CircuitOpen => "CIRCUIT_OPEN",
            ErrorCode::FileNotFound => "FILE_NOT_FOUND",
            ErrorCode::FilePermissionDenied => "FILE_PERMISSION_DENIED",
            ErrorCode::FileBusy => "FILE_BUSY",
            ErrorCode::StorageFull => "STORAGE_FULL",
            ErrorCode::StorageIo => "STORAGE_IO",
            ErrorCode::KeychainLocked => "KEYCHAIN_LOCKED",
            ErrorCode::EncryptionFailed => "ENCRYPTION_FAILED",
            ErrorCode::OAuthSlowDown => "OAUTH_SLOW_DOWN",
            ErrorCode::OAuthAuthorizationPending => "OAUTH_AUTHORIZATION_PENDING",
            ErrorCode::OAuthAccessDenied => "OAUTH_ACCESS_DENIED",
            ErrorCode::OAuthExpiredToken => "OAUTH_EXPIRED_TOKEN",
            ErrorCode::OAuthInvalidGrant => "OAUTH_INVALID_GRANT",
            ErrorCode::TokenInvalid => "TOKEN_INVALID",
            ErrorCode::InvalidCredentials => "INVALID_CREDENTIALS",
            ErrorCode::ConfigurationMissing => "CONFIGURATION_MISSING",
            ErrorCode::ConfigurationInvalid => "CONFIGURATION_INVALID",
            ErrorCode::RemoteServerError => "REMOTE_SERVER_ERROR",
            ErrorCode::RemoteClientError => "REMOTE_CLIENT_ERROR",
            ErrorCode::RemoteRateLimited => "REMOTE_RATE_LIMITED",
            ErrorCode::RemoteUnavailable => "REMOTE_UNAVAILABLE",
            ErrorCode::PlaylistCreateFailed => "PLAYLIST_CREATE_FAILED",
            ErrorCode::PlaylistUpdateFailed => "PLAYLIST_UPDATE_FAILED",
            ErrorCode::PlaylistRollbackFailed => "PLAYLIST_ROLLBACK_FAILED",
            ErrorCode::ParsingFailed => "PARSING_FAILED",
            ErrorCode::ValidationFailed => "VALIDATION_FAILED",
            ErrorCode::CategorizationFailed => "CATEGORIZATION_FAILED",
            ErrorCode::TaskAborted => "TASK_ABORTED",
            ErrorCode::Unclassified => "UNCLASSIFIED",
        }
    }

    /// Get error category
    pub fn category(&self) -> ErrorCategory {
        match self.as_number() {
            1000..=1099 => ErrorCategory::Network,
            1100..=1199 => ErrorCategory::Storage,
            1200..=1299 => ErrorCategory::Authentication,
            1300..=1399 => ErrorCategory::Configuration,
            1400..=1499 => ErrorCategory::RemoteApi,
            1500..=1599 => ErrorCategory::PlaylistOperation,
            _ => ErrorCategory::DataProcessing,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error severity levels for monitoring and alerting
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorSeverity {
    /// Low severity - information only
    Info,
    /// Medium severity - warning condition
    Warning,
    /// High severity - error condition
    Error,
    /// Critical severity - immediate attention required
    Critical,
}

/// Context a protected call runs under
///
/// Passed explicitly to fallback handlers and conditions, and attached to
/// every [`FaultError`] raised on behalf of the call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OperationContext {
    /// Component issuing the call
    pub component: String,
    /// Logical operation name
    pub operation: String,
    /// Additional metadata about the call
    pub metadata: HashMap<String, serde_json::Value>,
    /// Request/session ID for correlation
    pub correlation_id: Option<String>,
}

impl OperationContext {
    /// Create new operation context
    pub fn new(component: &str, operation: &str) -> Self {
        Self {
            component: component.to_string(),
            operation: operation.to_string(),
            ..Default::default()
        }
    }

    /// Add metadata to the context
    pub fn with_metadata<K, V>(mut self, key: K, value: V) -> Self
    where
        K: Into<String>,
        V: Into<serde_json::Value>,
    {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Set correlation ID for request tracking
    pub fn with_correlation_id<S: Into<String>>(mut self, id: S) -> Self {
        self.correlation_id = Some(id.into());
        self
    }

    pub fn metadata(&self, key: &str) -> Option<&serde_json::Value> {
        self.metadata.get(key)
    }
}

/// A classified failure
///
/// Exactly one category per error, given by its [`FaultKind`]. The original
/// failure, when there is one, is exclusively held as the error source.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct FaultError {
    kind: FaultKind,
    code: ErrorCode,
    message: String,
    context: OperationContext,
    #[source]
    inner: Option<Arc<dyn std::error::Error + Send + Sync + 'static>>,
    severity: ErrorSeverity,
    should_retry: bool,
    retry_after: Option<Duration>,
    user_message: String,
    timestamp: DateTime<Utc>,
}

impl FaultError {
    /// Build an error from its kind and code; retryability, severity and user
    /// message are derived from them.
    pub fn new<S: Into<String>>(kind: FaultKind, code: ErrorCode, message: S) -> Self {
        let should_retry = default_should_retry(&kind, code);
        let severity = default_severity(&kind, code);
        let user_message = default_user_message(&kind).to_string();
        let retry_after = match code {
            ErrorCode::OAuthSlowDown => Some(Duration::from_secs(5)),
            _ => None,
        };

        Self {
            kind,
            code,
            message: message.into(),
            context: OperationContext::default(),
            inner: None,
            severity,
            should_retry,
            retry_after,
            user_message,
            timestamp: Utc::now(),
        }
    }

    /// Create a network error
    pub fn network<S: Into<String>>(network_type: NetworkErrorType, msg: S) -> Self {
        let code = match network_type {
            NetworkErrorType::Timeout => ErrorCode::NetworkTimeout,
            NetworkErrorType::Connection => ErrorCode::ConnectionRefused,
            NetworkErrorType::Dns => ErrorCode::DnsLookupFailed,
            NetworkErrorType::RateLimit => ErrorCode::RateLimited,
            NetworkErrorType::CircuitOpen => ErrorCode::CircuitOpen,
        };
        Self::new(
            FaultKind::Network {
                network_type,
                status_code: None,
                retry_count: 0,
                max_retries: 0,
            },
            code,
            msg,
        )
    }

    /// Create a timeout error
    pub fn timeout<S: Into<String>>(msg: S) -> Self {
        Self::network(NetworkErrorType::Timeout, msg)
    }

    /// Create the error reported for a call rejected by an open circuit
    pub fn circuit_open(breaker: &str, retry_in: Duration) -> Self {
        Self::network(
            NetworkErrorType::CircuitOpen,
            format!("Circuit breaker '{breaker}' is open"),
        )
        .with_retry_after(retry_in)
    }

    /// Create a storage error
    pub fn storage<S: Into<String>>(
        storage_type: StorageType,
        operation: &str,
        code: ErrorCode,
        msg: S,
    ) -> Self {
        let permission_like = matches!(code, ErrorCode::FilePermissionDenied);
        Self::new(
            FaultKind::Storage {
                storage_type,
                operation: operation.to_string(),
                permission_like,
            },
            code,
            msg,
        )
    }

    /// Create an authentication error
    pub fn authentication<S: Into<String>>(auth_type: AuthType, code: ErrorCode, msg: S) -> Self {
        Self::new(
            FaultKind::Authentication {
                auth_type,
                oauth_signal: None,
            },
            code,
            msg,
        )
    }

    /// Create an OAuth flow error from the server's signal
    pub fn oauth<S: Into<String>>(signal: OAuthSignal, msg: S) -> Self {
        let code = match signal {
            OAuthSignal::SlowDown => ErrorCode::OAuthSlowDown,
            OAuthSignal::AuthorizationPending => ErrorCode::OAuthAuthorizationPending,
            OAuthSignal::AccessDenied => ErrorCode::OAuthAccessDenied,
            OAuthSignal::ExpiredToken => ErrorCode::OAuthExpiredToken,
            OAuthSignal::InvalidGrant => ErrorCode::OAuthInvalidGrant,
        };
        Self::new(
            FaultKind::Authentication {
                auth_type: AuthType::OAuth,
                oauth_signal: Some(signal),
            },
            code,
            msg,
        )
    }

    /// Create a configuration error
    pub fn configuration<S: Into<String>>(
        missing_keys: Vec<String>,
        invalid_keys: Vec<String>,
        msg: S,
    ) -> Self {
        let code = if missing_keys.is_empty() {
            ErrorCode::ConfigurationInvalid
        } else {
            ErrorCode::ConfigurationMissing
        };
        Self::new(
            FaultKind::Configuration {
                missing_keys,
                invalid_keys,
            },
            code,
            msg,
        )
    }

    /// Create a remote API error from an upstream HTTP status
    pub fn remote_api<S: Into<String>>(status_code: Option<u16>, msg: S) -> Self {
        let code = match status_code {
            Some(429) => ErrorCode::RemoteRateLimited,
            Some(503) => ErrorCode::RemoteUnavailable,
            Some(s) if s >= 500 => ErrorCode::RemoteServerError,
            Some(_) => ErrorCode::RemoteClientError,
            None => ErrorCode::RemoteUnavailable,
        };
        Self::new(
            FaultKind::RemoteApi {
                status_code,
                rate_limited: status_code == Some(429),
            },
            code,
            msg,
        )
    }

    /// Create a rate-limit error honouring the upstream `Retry-After`
    pub fn rate_limited<S: Into<String>>(msg: S, retry_after: Option<Duration>) -> Self {
        let error = Self::remote_api(Some(429), msg);
        match retry_after {
            Some(delay) => error.with_retry_after(delay),
            None => error,
        }
    }

    /// Create a playlist operation error
    pub fn playlist_operation<S: Into<String>>(operation: &str, code: ErrorCode, msg: S) -> Self {
        Self::new(
            FaultKind::PlaylistOperation {
                operation: operation.to_string(),
            },
            code,
            msg,
        )
    }

    /// Create a data processing error
    pub fn data_processing<S: Into<String>>(
        stage: &str,
        failed_item_count: usize,
        code: ErrorCode,
        msg: S,
    ) -> Self {
        Self::new(
            FaultKind::DataProcessing {
                stage: stage.to_string(),
                failed_item_count,
            },
            code,
            msg,
        )
    }

    /// Attach the original failure
    pub fn with_source<E>(mut self, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        self.inner = Some(Arc::new(source));
        self
    }

    pub(crate) fn with_shared_source(
        mut self,
        source: Option<Arc<dyn std::error::Error + Send + Sync + 'static>>,
    ) -> Self {
        self.inner = source;
        self
    }

    pub fn with_context(mut self, context: OperationContext) -> Self {
        self.context = context;
        self
    }

    pub fn with_retry_after(mut self, delay: Duration) -> Self {
        self.retry_after = Some(delay);
        self
    }

    pub fn with_user_message<S: Into<String>>(mut self, msg: S) -> Self {
        self.user_message = msg.into();
        self
    }

    pub fn with_status_code(mut self, status: u16) -> Self {
        if let FaultKind::Network { status_code, .. } = &mut self.kind {
            *status_code = Some(status);
        }
        self
    }

    /// Record how many retries were spent before this error surfaced
    pub fn with_retry_count(mut self, attempts: u32, max: u32) -> Self {
        if let FaultKind::Network {
            retry_count,
            max_retries,
            ..
        } = &mut self.kind
        {
            *retry_count = attempts;
            *max_retries = max;
        }
        self
    }

    pub fn kind(&self) -> &FaultKind {
        &self.kind
    }

    pub fn category(&self) -> ErrorCategory {
        self.kind.category()
    }

    pub fn code(&self) -> ErrorCode {
        self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn context(&self) -> &OperationContext {
        &self.context
    }

    pub fn severity(&self) -> ErrorSeverity {
        self.severity
    }

    pub fn should_retry(&self) -> bool {
        self.should_retry
    }

    pub fn retry_after(&self) -> Option<Duration> {
        self.retry_after
    }

    pub fn user_message(&self) -> &str {
        &self.user_message
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// Wrapped original failure, if any
    pub fn inner(&self) -> Option<&(dyn std::error::Error + Send + Sync + 'static)> {
        self.inner.as_deref()
    }

    /// HTTP status carried by network or remote-API errors
    pub fn status_code(&self) -> Option<u16> {
        match &self.kind {
            FaultKind::Network { status_code, .. } | FaultKind::RemoteApi { status_code, .. } => {
                *status_code
            }
            _ => None,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(
            self.kind,
            FaultKind::Network {
                network_type: NetworkErrorType::Timeout,
                ..
            }
        )
    }

    pub fn is_circuit_open(&self) -> bool {
        self.code == ErrorCode::CircuitOpen
    }

    pub fn is_rate_limited(&self) -> bool {
        match &self.kind {
            FaultKind::RemoteApi { rate_limited, .. } => *rate_limited,
            FaultKind::Network { network_type, .. } => *network_type == NetworkErrorType::RateLimit,
            _ => false,
        }
    }

    pub fn is_server_error(&self) -> bool {
        self.status_code().is_some_and(|s| (500..600).contains(&s))
    }
}

fn default_should_retry(kind: &FaultKind, code: ErrorCode) -> bool {
    match kind {
        FaultKind::Network { .. } => true,
        FaultKind::Storage {
            storage_type,
            permission_like,
            ..
        } => {
            !*permission_like
                && *storage_type != StorageType::Encryption
                && !matches!(code, ErrorCode::FileNotFound | ErrorCode::StorageFull)
        }
        FaultKind::Authentication { oauth_signal, .. } => {
            *oauth_signal == Some(OAuthSignal::SlowDown)
        }
        FaultKind::Configuration { .. } => false,
        FaultKind::RemoteApi {
            status_code,
            rate_limited,
        } => *rate_limited || status_code.is_some_and(|s| s >= 500),
        FaultKind::PlaylistOperation { .. } | FaultKind::DataProcessing { .. } => false,
    }
}

fn default_severity(kind: &FaultKind, code: ErrorCode) -> ErrorSeverity {
    match kind {
        FaultKind::Network { .. } => ErrorSeverity::Warning,
        FaultKind::Storage { storage_type, .. } => match storage_type {
            StorageType::Encryption => ErrorSeverity::Critical,
            _ if code == ErrorCode::StorageFull => ErrorSeverity::Critical,
            _ => ErrorSeverity::Error,
        },
        FaultKind::Authentication { oauth_signal, .. } => match oauth_signal {
            Some(OAuthSignal::SlowDown | OAuthSignal::AuthorizationPending) => ErrorSeverity::Info,
            _ => ErrorSeverity::Critical,
        },
        FaultKind::Configuration { .. } => ErrorSeverity::Error,
        FaultKind::RemoteApi { rate_limited, .. } if *rate_limited => ErrorSeverity::Warning,
        FaultKind::RemoteApi { status_code, .. } => match status_code {
            Some(s) if *s >= 500 => ErrorSeverity::Warning,
            _ => ErrorSeverity::Error,
        },
        FaultKind::PlaylistOperation { .. } => ErrorSeverity::Error,
        FaultKind::DataProcessing { .. } => ErrorSeverity::Warning,
    }
}

fn default_user_message(kind: &FaultKind) -> &'static str {
    match kind {
        FaultKind::Network { .. } => {
            "Network connection problem. Please check your connection and try again."
        }
        FaultKind::Storage { .. } => "Could not access local storage.",
        FaultKind::Authentication { .. } => "Authentication failed. Please sign in again.",
        FaultKind::Configuration { .. } => "The application is not configured correctly.",
        FaultKind::RemoteApi { rate_limited: true, .. } => {
            "The music service is busy. Please wait a moment."
        }
        FaultKind::RemoteApi { .. } => "The music service returned an error.",
        FaultKind::PlaylistOperation { .. } => "The playlist could not be updated.",
        FaultKind::DataProcessing { .. } => "Some items could not be processed.",
    }
}

/// Error logging and reporting utilities
pub struct ErrorReporter;

impl ErrorReporter {
    /// Log a classified error with the level implied by its severity
    pub fn log_error(error: &FaultError) {
        let ctx = error.context();
        match error.severity() {
            ErrorSeverity::Critical => {
                tracing::error!(
                    error_code = error.code().as_number(),
                    category = error.category().as_str(),
                    component = %ctx.component,
                    operation = %ctx.operation,
                    correlation_id = ?ctx.correlation_id,
                    "Critical error occurred: {}",
                    error.message()
                );
            }
            ErrorSeverity::Error => {
                tracing::error!(
                    error_code = error.code().as_number(),
                    category = error.category().as_str(),
                    component = %ctx.component,
                    operation = %ctx.operation,
                    correlation_id = ?ctx.correlation_id,
                    "Error occurred: {}",
                    error.message()
                );
            }
            ErrorSeverity::Warning => {
                tracing::warn!(
                    error_code = error.code().as_number(),
                    category = error.category().as_str(),
                    component = %ctx.component,
                    operation = %ctx.operation,
                    correlation_id = ?ctx.correlation_id,
                    "Warning: {}",
                    error.message()
                );
            }
            ErrorSeverity::Info => {
                tracing::info!(
                    error_code = error.code().as_number(),
                    category = error.category().as_str(),
                    component = %ctx.component,
                    operation = %ctx.operation,
                    "Info: {}",
                    error.message()
                );
            }
        }
    }

    /// Render the caller-facing view of an error
    pub fn to_json(error: &FaultError, include_details: bool) -> serde_json::Value {
        let mut response = serde_json::json!({
            "error": {
                "code": error.code().as_number(),
                "error_code": error.code().as_str(),
                "category": error.category().as_str(),
                "message": error.user_message(),
                "retryable": error.should_retry(),
                "retry_after_ms": error.retry_after().map(|d| d.as_millis() as u64),
                "timestamp": error.timestamp(),
            }
        });

        if include_details {
            response["error"]["details"] = serde_json::Value::String(error.message().to_string());
            response["error"]["kind"] = serde_json::to_value(error.kind()).unwrap_or_default();
            response["error"]["operation"] =
                serde_json::Value::String(error.context().operation.clone());
            if let Some(correlation_id) = &error.context().correlation_id {
                response["error"]["correlation_id"] =
                    serde_json::Value::String(correlation_id.clone());
            }
        }

        response
    }

    /// Flat metric labels for an error
    pub fn metrics(error: &FaultError) -> HashMap<String, serde_json::Value> {
        HashMap::from([
            ("error_code".to_string(), error.code().as_number().into()),
            ("category".to_string(), error.category().as_str().into()),
            (
                "severity".to_string(),
                format!("{:?}", error.severity()).into(),
            ),
            ("retryable".to_string(), error.should_retry().into()),
            (
                "timestamp".to_string(),
                error.timestamp().to_rfc3339().into(),
            ),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_categories_match_kinds() {
        let errors = vec![
            FaultError::timeout("t"),
            FaultError::storage(StorageType::Keychain, "read", ErrorCode::KeychainLocked, "k"),
            FaultError::oauth(OAuthSignal::InvalidGrant, "g"),
            FaultError::configuration(vec!["client_id".into()], vec![], "c"),
            FaultError::remote_api(Some(502), "r"),
            FaultError::playlist_operation("create", ErrorCode::PlaylistCreateFailed, "p"),
            FaultError::data_processing("parse", 3, ErrorCode::ParsingFailed, "d"),
        ];

        for error in errors {
            assert_eq!(error.code().category(), error.category());
        }
    }

    #[test]
    fn test_slow_down_carries_retry_after() {
        let error = FaultError::oauth(OAuthSignal::SlowDown, "slow down");
        assert!(error.should_retry());
        assert_eq!(error.retry_after(), Some(Duration::from_secs(5)));
    }

    #[test]
    fn test_source_is_preserved() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "disk on fire");
        let error = FaultError::storage(StorageType::FileSystem, "write", ErrorCode::StorageIo, "x")
            .with_source(io);

        let source = std::error::Error::source(&error).expect("source");
        assert_eq!(source.to_string(), "disk on fire");
    }

    #[test]
    fn test_retry_count_only_recorded_for_network() {
        let network = FaultError::timeout("t").with_retry_count(3, 3);
        assert!(matches!(
            network.kind(),
            FaultKind::Network {
                retry_count: 3,
                max_retries: 3,
                ..
            }
        ));

        let config = FaultError::configuration(vec![], vec!["x".into()], "c").with_retry_count(3, 3);
        assert!(matches!(config.kind(), FaultKind::Configuration { .. }));
    }
}
