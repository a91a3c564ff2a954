//! Error recovery patterns for the resilience control plane
//!
//! Circuit breakers, keyed fallbacks, timeout races, health aggregation and
//! retry policies, plus the [`ResilienceManager`] that owns their registries.

pub mod circuit_breaker;
pub mod fallback;
pub mod health;
pub mod resilience_manager;
pub mod retry_policy;
pub mod timeout;

// Re-export commonly used types
pub use circuit_breaker::{
    CallOutcome, CircuitBreaker, CircuitBreakerConfig, CircuitBreakerEvent,
    CircuitBreakerRegistry, CircuitBreakerStats, CircuitBreakerStatus, CircuitState,
};
pub use fallback::{
    FallbackCondition, FallbackDescriptor, FallbackOptions, FallbackRegistry, FallbackResult,
};
pub use health::{
    DegradationLevel, HealthCheckOptions, HealthCheckRegistry, HealthCheckResult, HealthProbe,
    HealthSummary, SystemHealth,
};
pub use resilience_manager::{ProtectionOptions, ResilienceManager, ResilienceStatus};
pub use retry_policy::{
    auth_retry_predicate, default_retry_predicate, network_retry_predicate, retry_auth,
    retry_batch, retry_network_operation, retry_storage_operation,
    retry_storage_operation_with_fallback, storage_retry_predicate, with_retry, BackoffStrategy,
    BatchAborted, BatchOptions, BatchResult, RetryExecutor, RetryPolicy, RetryPredicate, RetryStats,
};
pub use timeout::{execute_with_timeout, execute_with_timeout_fallback, TimeoutResult};
