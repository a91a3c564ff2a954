//! In-process fault-tolerance control plane
//!
//! This crate protects arbitrary fallible async operations from cascading
//! failure. It provides:
//!
//! - A closed error taxonomy with retryability hints and a pure classifier
//! - Named circuit breakers with half-open trial admission
//! - Keyed fallback strategies with priorities and conditions
//! - Timeout races that detach the losing operation
//! - Health probe registration and degradation-level aggregation
//! - Retry policies (exponential/linear backoff with jitter) and batch retry
//!
//! Everything is owned by a [`ResilienceManager`] created at the process entry
//! point; there are no global registries.

pub mod classification;
pub mod config;
pub mod error;
pub mod error_recovery;
pub mod logging;
pub mod utils;

// Re-export main types for convenience
pub use classification::{classify, RawFailure};
pub use config::{EndpointProbeConfig, ResilienceConfig};
pub use error::{
    ErrorCategory, ErrorCode, ErrorReporter, ErrorSeverity, FaultError, FaultKind,
    OperationContext, Result,
};
pub use error_recovery::{
    CallOutcome, CircuitBreaker, CircuitBreakerConfig, CircuitState, DegradationLevel,
    FallbackOptions, HealthCheckOptions, HealthProbe, ProtectionOptions, ResilienceManager,
    RetryPolicy, SystemHealth,
};
pub use logging::{init_logging, LogFormat, LoggingConfig};
