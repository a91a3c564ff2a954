//! Resilience manager owning the control-plane registries
//!
//! One manager is created by the process entry point and passed by reference
//! to every component that needs fault protection. It owns a breaker registry,
//! a fallback registry and a health registry, so independent managers never
//! share state.

use crate::config::ResilienceConfig;
use crate::error::{FaultError, OperationContext, Result};
use crate::error_recovery::circuit_breaker::{
    CallOutcome, CircuitBreaker, CircuitBreakerConfig, CircuitBreakerRegistry,
    CircuitBreakerStatus, NoFallback,
};
use crate::error_recovery::fallback::{
    FallbackDescriptor, FallbackOptions, FallbackRegistry, FallbackResult,
};
use crate::error_recovery::health::{
    HealthCheckOptions, HealthCheckRegistry, HealthCheckResult, HealthProbe, SystemHealth,
};
use crate::error_recovery::retry_policy::{RetryExecutor, RetryPolicy};
use crate::error_recovery::timeout::{self, NoTimeoutFallback, TimeoutResult};
use serde::Serialize;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Per-call options of [`ResilienceManager::execute_protected`]
#[derive(Debug, Clone, Default)]
pub struct ProtectionOptions {
    /// Overrides the manager's default retry policy
    pub retry: Option<RetryPolicy>,
    /// Overrides the manager's default per-attempt timeout
    pub timeout: Option<Duration>,
    /// Fallback registry key answering rejected or failed calls
    pub fallback_key: Option<String>,
    pub context: Option<OperationContext>,
}

impl ProtectionOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn retry(mut self, policy: RetryPolicy) -> Self {
        self.retry = Some(policy);
        self
    }

    /// Single attempt, no retries
    pub fn no_retry(self) -> Self {
        let policy = RetryPolicy::default().with_max_retries(0);
        self.retry(policy)
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn fallback<S: Into<String>>(mut self, key: S) -> Self {
        self.fallback_key = Some(key.into());
        self
    }

    pub fn context(mut self, context: OperationContext) -> Self {
        self.context = Some(context);
        self
    }
}

/// Snapshot of everything a manager owns
#[derive(Debug, Clone, Serialize)]
pub struct ResilienceStatus {
    pub breakers: BTreeMap<String, CircuitBreakerStatus>,
    pub fallbacks: Vec<FallbackDescriptor>,
    pub health_checks: Vec<String>,
}

/// Resilience manager for coordinating error recovery strategies
pub struct ResilienceManager {
    breakers: CircuitBreakerRegistry,
    fallbacks: FallbackRegistry,
    health: HealthCheckRegistry,
    default_retry: RetryPolicy,
    default_timeout: Duration,
    default_health: HealthCheckOptions,
}

impl ResilienceManager {
    /// Create new resilience manager with built-in defaults
    pub fn new() -> Self {
        Self::from_config(&ResilienceConfig::default())
    }

    pub fn from_config(config: &ResilienceConfig) -> Self {
        Self {
            breakers: CircuitBreakerRegistry::new(config.circuit_breaker.clone()),
            fallbacks: FallbackRegistry::new(),
            health: HealthCheckRegistry::new(),
            default_retry: config.retry.clone(),
            default_timeout: config.default_timeout,
            default_health: config.health.clone(),
        }
    }

    pub fn breakers(&self) -> &CircuitBreakerRegistry {
        &self.breakers
    }

    pub fn fallbacks(&self) -> &FallbackRegistry {
        &self.fallbacks
    }

    pub fn health(&self) -> &HealthCheckRegistry {
        &self.health
    }

    /// Breaker for `name`, created on first use
    pub fn circuit_breaker(&self, name: &str) -> Arc<CircuitBreaker> {
        self.breakers.get_breaker(name)
    }

    pub fn circuit_breaker_with_config(
        &self,
        name: &str,
        config: CircuitBreakerConfig,
    ) -> Arc<CircuitBreaker> {
        self.breakers.get_breaker_with_config(name, config)
    }

    pub fn register_fallback<T, H, Fut>(&self, operation_key: &str, handler: H, options: FallbackOptions)
    where
        T: Send + 'static,
        H: Fn(FaultError, OperationContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        self.fallbacks.register_fallback(operation_key, handler, options);
    }

    pub async fn execute_with_fallback<T, E, F, Fut>(
        &self,
        operation_key: &str,
        primary: F,
        context: Option<OperationContext>,
    ) -> Result<FallbackResult<T>>
    where
        T: Send + 'static,
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: Into<FaultError>,
    {
        self.fallbacks
            .execute_with_fallback(operation_key, primary, context)
            .await
    }

    pub async fn execute_with_timeout<T, E, F, Fut>(
        &self,
        operation: F,
        timeout: Duration,
        context: Option<OperationContext>,
    ) -> Result<TimeoutResult<T>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: Into<FaultError> + Send + 'static,
    {
        timeout::execute_with_timeout(operation, timeout, context).await
    }

    pub async fn execute_with_timeout_fallback<T, E, F, Fut, G, GFut>(
        &self,
        operation: F,
        timeout: Duration,
        fallback: G,
        context: Option<OperationContext>,
    ) -> Result<TimeoutResult<T>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: Into<FaultError> + Send + 'static,
        G: FnOnce(FaultError, OperationContext) -> GFut,
        GFut: Future<Output = Result<T>>,
    {
        timeout::execute_with_timeout_fallback(operation, timeout, fallback, context).await
    }

    /// Register a probe; `options` falls back to the configured health defaults
    pub fn register_health_check<P>(&self, name: &str, probe: P, options: Option<HealthCheckOptions>)
    where
        P: HealthProbe + 'static,
    {
        let options = options.unwrap_or_else(|| self.default_health.clone());
        self.health.register_health_check(name, probe, options);
    }

    pub async fn run_health_checks(&self) -> BTreeMap<String, HealthCheckResult> {
        self.health.run_health_checks().await
    }

    pub async fn get_system_health(&self) -> SystemHealth {
        self.health.get_system_health().await
    }

    /// Run `operation` under `policy`, or the manager's default policy
    pub async fn with_retry<T, E, F, Fut>(
        &self,
        operation: F,
        policy: Option<RetryPolicy>,
        context: Option<&OperationContext>,
    ) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: Into<FaultError>,
    {
        let policy = policy.unwrap_or_else(|| self.default_retry.clone());
        RetryExecutor::new(policy).execute(operation, context).await
    }

    /// Run `operation` with every protection layer
    ///
    /// The breaker named `breaker_name` guards the whole call. Inside it the
    /// retry policy drives attempts and every attempt races the timeout. When
    /// the breaker rejects the call or the last attempt fails, the strategy
    /// registered under `options.fallback_key` may answer.
    pub async fn execute_protected<T, E, F, Fut>(
        &self,
        breaker_name: &str,
        mut operation: F,
        options: ProtectionOptions,
    ) -> CallOutcome<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: Into<FaultError> + Send + 'static,
    {
        let breaker = self.circuit_breaker(breaker_name);
        let executor = RetryExecutor::new(options.retry.unwrap_or_else(|| self.default_retry.clone()));
        let attempt_timeout = options.timeout.unwrap_or(self.default_timeout);
        let context = options
            .context
            .unwrap_or_else(|| OperationContext::new("resilience", breaker_name));

        debug!(
            breaker = breaker_name,
            operation = %context.operation,
            timeout_ms = attempt_timeout.as_millis() as u64,
            "Executing protected operation"
        );

        let protected = {
            let operation = &mut operation;
            let executor = &executor;
            let context = &context;
            move || async move {
                executor
                    .execute(
                        || {
                            let attempt = operation();
                            let attempt_context = context.clone();
                            async move {
                                timeout::race(
                                    move || attempt,
                                    attempt_timeout,
                                    None::<NoTimeoutFallback<T>>,
                                    attempt_context,
                                )
                                .await
                                .map(|raced| raced.value)
                            }
                        },
                        Some(context),
                    )
                    .await
            }
        };

        let outcome = match options.fallback_key {
            Some(key) => {
                let fallback_context = context.clone();
                let fallback = move |error: FaultError| async move {
                    self.fallbacks
                        .recover::<T>(&key, error, fallback_context)
                        .await
                        .map(|recovered| recovered.value)
                };
                breaker.run(protected, Some(fallback)).await
            }
            None => breaker.run(protected, None::<NoFallback<T>>).await,
        };

        match outcome {
            CallOutcome::Failed(error) if error.is_timeout() => CallOutcome::TimedOut(error),
            other => other,
        }
    }

    /// Snapshot of breakers, fallbacks and registered probes
    pub fn status(&self) -> ResilienceStatus {
        ResilienceStatus {
            breakers: self.breakers.all_statuses().into_iter().collect(),
            fallbacks: self.fallbacks.fallbacks(),
            health_checks: self.health.names(),
        }
    }

    /// Reset the breaker of `breaker_name`, if it exists
    pub fn reset_service(&self, breaker_name: &str) -> bool {
        match self.breakers.get(breaker_name) {
            Some(breaker) => {
                breaker.reset();
                info!("Reset resilience components for service: {}", breaker_name);
                true
            }
            None => false,
        }
    }
}

impl Default for ResilienceManager {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ResilienceManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResilienceManager")
            .field("breakers", &self.breakers.all_statuses().len())
            .field("fallbacks", &self.fallbacks)
            .field("health", &self.health)
            .field("default_timeout", &self.default_timeout)
            .finish()
    }
}
