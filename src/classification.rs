//! Classification of raw failures into the error taxonomy
//!
//! Collaborators hand over whatever their transport or filesystem produced as a
//! [`RawFailure`] (or a std/tokio error with a `From` conversion). [`classify`]
//! is a pure function: the same raw failure always yields the same category,
//! code and retryability.

use crate::error::{
    AuthType, ErrorCode, FaultError, FaultKind, NetworkErrorType, OAuthSignal, StorageType,
};
use std::sync::Arc;
use std::time::Duration;

/// A failure as reported by an external collaborator, before classification
#[derive(Debug, Clone, Default)]
pub struct RawFailure {
    /// Human-readable failure message
    pub message: String,
    /// Symbolic code, e.g. `ETIMEDOUT`, `EACCES` or an OAuth `error` value
    pub code: Option<String>,
    /// HTTP status returned by an upstream service
    pub status: Option<u16>,
    /// Upstream `Retry-After` hint
    pub retry_after: Option<Duration>,
    /// Operation that produced the failure, used for storage errors
    pub operation: Option<String>,
    source: Option<Arc<dyn std::error::Error + Send + Sync + 'static>>,
}

impl RawFailure {
    pub fn new<S: Into<String>>(message: S) -> Self {
        Self {
            message: message.into(),
            ..Default::default()
        }
    }

    pub fn with_code<S: Into<String>>(mut self, code: S) -> Self {
        self.code = Some(code.into());
        self
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_retry_after(mut self, delay: Duration) -> Self {
        self.retry_after = Some(delay);
        self
    }

    pub fn with_operation<S: Into<String>>(mut self, operation: S) -> Self {
        self.operation = Some(operation.into());
        self
    }

    pub fn with_source<E>(mut self, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        self.source = Some(Arc::new(source));
        self
    }
}

impl std::fmt::Display for RawFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.code {
            Some(code) => write!(f, "{} ({code})", self.message),
            None => f.write_str(&self.message),
        }
    }
}

/// Classify a raw failure into exactly one taxonomy category
pub fn classify(raw: RawFailure) -> FaultError {
    let operation = raw.operation.clone().unwrap_or_else(|| "unknown".to_string());

    let classified = raw
        .code
        .as_deref()
        .and_then(|code| classify_code(code, &raw.message, &operation))
        .or_else(|| raw.status.map(|status| classify_status(status, &raw.message)))
        .or_else(|| classify_message(&raw.message, &operation))
        .unwrap_or_else(|| {
            FaultError::data_processing("unclassified", 0, ErrorCode::Unclassified, &raw.message)
        });

    let classified = match raw.retry_after {
        Some(delay) => classified.with_retry_after(delay),
        None => classified,
    };
    classified.with_shared_source(raw.source)
}

fn classify_code(code: &str, message: &str, operation: &str) -> Option<FaultError> {
    if let Some(signal) = OAuthSignal::parse(code) {
        return Some(FaultError::oauth(signal, message));
    }

    let error = match code.to_ascii_uppercase().as_str() {
        "ETIMEDOUT" | "ESOCKETTIMEDOUT" | "TIMEOUT" => FaultError::timeout(message),
        "ECONNREFUSED" | "EHOSTUNREACH" | "ENETUNREACH" => {
            FaultError::network(NetworkErrorType::Connection, message)
        }
        "ECONNRESET" | "EPIPE" => FaultError::new(
            FaultKind::Network {
                network_type: NetworkErrorType::Connection,
                status_code: None,
                retry_count: 0,
                max_retries: 0,
            },
            ErrorCode::ConnectionReset,
            message,
        ),
        "ENOTFOUND" | "EAI_AGAIN" => FaultError::network(NetworkErrorType::Dns, message),
        "EACCES" | "EPERM" => FaultError::storage(
            StorageType::FileSystem,
            operation,
            ErrorCode::FilePermissionDenied,
            message,
        ),
        "ENOENT" => FaultError::storage(
            StorageType::FileSystem,
            operation,
            ErrorCode::FileNotFound,
            message,
        ),
        "EBUSY" | "EAGAIN" | "EMFILE" | "ENFILE" | "ETXTBSY" => FaultError::storage(
            StorageType::FileSystem,
            operation,
            ErrorCode::FileBusy,
            message,
        ),
        "ENOSPC" => FaultError::storage(
            StorageType::FileSystem,
            operation,
            ErrorCode::StorageFull,
            message,
        ),
        "KEYCHAIN_LOCKED" | "ERR_KEYCHAIN" => FaultError::storage(
            StorageType::Keychain,
            operation,
            ErrorCode::KeychainLocked,
            message,
        ),
        "ERR_DECRYPT" | "ERR_ENCRYPT" => FaultError::storage(
            StorageType::Encryption,
            operation,
            ErrorCode::EncryptionFailed,
            message,
        ),
        "INVALID_TOKEN" => FaultError::authentication(AuthType::Token, ErrorCode::TokenInvalid, message),
        _ => return None,
    };
    Some(error)
}

fn classify_status(status: u16, message: &str) -> FaultError {
    FaultError::remote_api(Some(status), message)
}

fn classify_message(message: &str, operation: &str) -> Option<FaultError> {
    let lower = message.to_lowercase();
    let has = |needles: &[&str]| needles.iter().any(|n| lower.contains(n));

    let error = if has(&["slow_down", "slow down"]) {
        FaultError::oauth(OAuthSignal::SlowDown, message)
    } else if has(&["invalid_grant"]) {
        FaultError::oauth(OAuthSignal::InvalidGrant, message)
    } else if has(&["expired_token"]) {
        FaultError::oauth(OAuthSignal::ExpiredToken, message)
    } else if has(&["access_denied"]) {
        FaultError::oauth(OAuthSignal::AccessDenied, message)
    } else if has(&["rate limit", "too many requests"]) {
        FaultError::remote_api(Some(429), message)
    } else if has(&["timed out", "timeout"]) {
        FaultError::timeout(message)
    } else if has(&["connection refused", "connection reset", "econnrefused"]) {
        FaultError::network(NetworkErrorType::Connection, message)
    } else if has(&["getaddrinfo", "dns"]) {
        FaultError::network(NetworkErrorType::Dns, message)
    } else if has(&["keychain", "keyring"]) {
        FaultError::storage(
            StorageType::Keychain,
            operation,
            ErrorCode::KeychainLocked,
            message,
        )
    } else if has(&["decrypt", "encrypt"]) {
        FaultError::storage(
            StorageType::Encryption,
            operation,
            ErrorCode::EncryptionFailed,
            message,
        )
    } else if has(&["permission denied"]) {
        FaultError::storage(
            StorageType::FileSystem,
            operation,
            ErrorCode::FilePermissionDenied,
            message,
        )
    } else if has(&["not configured", "missing configuration"]) {
        FaultError::configuration(Vec::new(), Vec::new(), message)
            .with_user_message("The application is missing required settings.")
    } else {
        return None;
    };
    Some(error)
}

impl From<RawFailure> for FaultError {
    fn from(raw: RawFailure) -> Self {
        classify(raw)
    }
}

impl From<std::io::Error> for FaultError {
    fn from(err: std::io::Error) -> Self {
        use std::io::ErrorKind;

        let message = err.to_string();
        let classified = match err.kind() {
            ErrorKind::TimedOut => FaultError::timeout(message),
            ErrorKind::ConnectionRefused | ErrorKind::NotConnected => {
                FaultError::network(NetworkErrorType::Connection, message)
            }
            ErrorKind::ConnectionReset | ErrorKind::ConnectionAborted | ErrorKind::BrokenPipe => {
                FaultError::network(NetworkErrorType::Connection, message)
            }
            ErrorKind::PermissionDenied => FaultError::storage(
                StorageType::FileSystem,
                "io",
                ErrorCode::FilePermissionDenied,
                message,
            ),
            ErrorKind::NotFound => FaultError::storage(
                StorageType::FileSystem,
                "io",
                ErrorCode::FileNotFound,
                message,
            ),
            ErrorKind::WouldBlock | ErrorKind::Interrupted => FaultError::storage(
                StorageType::FileSystem,
                "io",
                ErrorCode::FileBusy,
                message,
            ),
            _ => FaultError::storage(StorageType::FileSystem, "io", ErrorCode::StorageIo, message),
        };
        classified.with_source(err)
    }
}

impl From<serde_json::Error> for FaultError {
    fn from(err: serde_json::Error) -> Self {
        FaultError::data_processing("parse", 1, ErrorCode::ParsingFailed, err.to_string())
            .with_source(err)
    }
}

impl From<tokio::time::error::Elapsed> for FaultError {
    fn from(err: tokio::time::error::Elapsed) -> Self {
        FaultError::timeout(format!("Operation timed out: {err}")).with_source(err)
    }
}

impl From<tokio::task::JoinError> for FaultError {
    fn from(err: tokio::task::JoinError) -> Self {
        let message = if err.is_panic() {
            "Protected operation panicked".to_string()
        } else {
            "Protected operation was cancelled".to_string()
        };
        FaultError::data_processing("task", 1, ErrorCode::TaskAborted, message).with_source(err)
    }
}
