//! Keyed fallback strategies
//!
//! Strategies are registered under a logical operation key rather than a
//! breaker name. When the primary operation fails, the highest-priority
//! strategy whose conditions all accept the failure answers instead.

use crate::error::{FaultError, OperationContext, Result};
use crate::utils::{safe_read, safe_write};
use futures::future::BoxFuture;
use futures::FutureExt;
use serde::Serialize;
use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, RwLock};
use tracing::{debug, info, warn};

/// Predicate deciding whether a strategy may answer a given failure
pub type FallbackCondition = Arc<dyn Fn(&FaultError, &OperationContext) -> bool + Send + Sync>;

type FallbackHandler<T> =
    Arc<dyn Fn(FaultError, OperationContext) -> BoxFuture<'static, Result<T>> + Send + Sync>;

/// Registration options of a fallback strategy
#[derive(Clone, Default)]
pub struct FallbackOptions {
    /// Higher wins when several strategies accept the same failure
    pub priority: i32,
    pub description: String,
    /// All must pass; empty means unconditional
    pub conditions: Vec<FallbackCondition>,
}

impl FallbackOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_description<S: Into<String>>(mut self, description: S) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_condition<C>(mut self, condition: C) -> Self
    where
        C: Fn(&FaultError, &OperationContext) -> bool + Send + Sync + 'static,
    {
        self.conditions.push(Arc::new(condition));
        self
    }
}

impl std::fmt::Debug for FallbackOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FallbackOptions")
            .field("priority", &self.priority)
            .field("description", &self.description)
            .field("conditions", &self.conditions.len())
            .finish()
    }
}

/// Public description of a registered strategy
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FallbackDescriptor {
    pub operation_key: String,
    pub priority: i32,
    pub description: String,
    pub condition_count: usize,
    pub result_type: &'static str,
}

/// Outcome of [`FallbackRegistry::execute_with_fallback`]
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FallbackResult<T> {
    pub value: T,
    pub used_fallback: bool,
    /// Description of the strategy that answered, if any
    pub strategy: Option<String>,
}

#[derive(Clone)]
struct RegisteredFallback {
    priority: i32,
    description: String,
    conditions: Vec<FallbackCondition>,
    result_type: &'static str,
    handler: Arc<dyn Any + Send + Sync>,
}

impl RegisteredFallback {
    fn new<T, H, Fut>(handler: H, options: FallbackOptions) -> Self
    where
        T: Send + 'static,
        H: Fn(FaultError, OperationContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let handler: FallbackHandler<T> =
            Arc::new(move |error, context| handler(error, context).boxed());
        Self {
            priority: options.priority,
            description: options.description,
            conditions: options.conditions,
            result_type: std::any::type_name::<T>(),
            handler: Arc::new(handler),
        }
    }

    fn accepts(&self, error: &FaultError, context: &OperationContext) -> bool {
        self.conditions
            .iter()
            .all(|condition| condition(error, context))
    }
}

/// Registry of fallback strategies keyed by operation name
#[derive(Default)]
pub struct FallbackRegistry {
    strategies: RwLock<HashMap<String, Vec<RegisteredFallback>>>,
}

impl FallbackRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the strategy for `operation_key`, replacing any already there
    pub fn register_fallback<T, H, Fut>(&self, operation_key: &str, handler: H, options: FallbackOptions)
    where
        T: Send + 'static,
        H: Fn(FaultError, OperationContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let entry = RegisteredFallback::new(handler, options);
        info!(
            operation = operation_key,
            priority = entry.priority,
            "Registered fallback strategy"
        );
        safe_write(&self.strategies, "fallback registry").insert(operation_key.to_string(), vec![entry]);
    }

    /// Add another strategy for `operation_key` next to the existing ones
    pub fn add_fallback<T, H, Fut>(&self, operation_key: &str, handler: H, options: FallbackOptions)
    where
        T: Send + 'static,
        H: Fn(FaultError, OperationContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let entry = RegisteredFallback::new(handler, options);
        info!(
            operation = operation_key,
            priority = entry.priority,
            "Added fallback strategy"
        );
        let mut strategies = safe_write(&self.strategies, "fallback registry");
        let entries = strategies.entry(operation_key.to_string()).or_default();
        entries.push(entry);
        // Stable: equal priorities keep registration order
        entries.sort_by(|a, b| b.priority.cmp(&a.priority));
    }

    /// Remove every strategy of `operation_key`
    pub fn unregister_fallback(&self, operation_key: &str) -> bool {
        safe_write(&self.strategies, "fallback registry")
            .remove(operation_key)
            .is_some()
    }

    pub fn has_fallback(&self, operation_key: &str) -> bool {
        safe_read(&self.strategies, "fallback registry").contains_key(operation_key)
    }

    pub fn fallbacks(&self) -> Vec<FallbackDescriptor> {
        let strategies = safe_read(&self.strategies, "fallback registry");
        let mut descriptors: Vec<_> = strategies
            .iter()
            .flat_map(|(key, entries)| {
                entries.iter().map(move |entry| FallbackDescriptor {
                    operation_key: key.clone(),
                    priority: entry.priority,
                    description: entry.description.clone(),
                    condition_count: entry.conditions.len(),
                    result_type: entry.result_type,
                })
            })
            .collect();
        descriptors.sort_by(|a, b| {
            a.operation_key
                .cmp(&b.operation_key)
                .then(b.priority.cmp(&a.priority))
        });
        descriptors
    }

    /// Run `primary`; on failure let the registered strategy for
    /// `operation_key` answer
    ///
    /// Without an accepting strategy the original failure is returned. When
    /// the strategy itself fails, its failure is returned instead.
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
        match primary().await {
            Ok(value) => Ok(FallbackResult {
                value,
                used_fallback: false,
                strategy: None,
            }),
            Err(err) => {
                let context = context.unwrap_or_else(|| OperationContext {
                    operation: operation_key.to_string(),
                    ..Default::default()
                });
                self.recover(operation_key, err.into(), context).await
            }
        }
    }

    /// Answer `error` with the best accepting strategy of `operation_key`
    pub(crate) async fn recover<T: Send + 'static>(
        &self,
        operation_key: &str,
        error: FaultError,
        context: OperationContext,
    ) -> Result<FallbackResult<T>> {
        let Some((description, handler)) = self.select::<T>(operation_key, &error, &context) else {
            debug!(
                operation = operation_key,
                category = %error.category(),
                "No fallback accepted the failure"
            );
            return Err(error);
        };

        debug!(
            operation = operation_key,
            strategy = %description,
            error = %error,
            "Running fallback strategy"
        );
        match handler(error, context).await {
            Ok(value) => Ok(FallbackResult {
                value,
                used_fallback: true,
                strategy: Some(description),
            }),
            Err(fallback_error) => {
                warn!(
                    operation = operation_key,
                    strategy = %description,
                    error = %fallback_error,
                    "Fallback strategy failed"
                );
                Err(fallback_error)
            }
        }
    }

    fn select<T: Send + 'static>(
        &self,
        operation_key: &str,
        error: &FaultError,
        context: &OperationContext,
    ) -> Option<(String, FallbackHandler<T>)> {
        // Conditions are user code; evaluate them without holding the lock
        let candidates = safe_read(&self.strategies, "fallback registry")
            .get(operation_key)
            .cloned()?;

        candidates.into_iter().find_map(|entry| {
            let Some(handler) = entry.handler.downcast_ref::<FallbackHandler<T>>() else {
                debug!(
                    operation = operation_key,
                    registered = entry.result_type,
                    requested = std::any::type_name::<T>(),
                    "Skipping fallback with mismatched result type"
                );
                return None;
            };
            entry
                .accepts(error, context)
                .then(|| (entry.description.clone(), handler.clone()))
        })
    }
}

impl std::fmt::Debug for FallbackRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FallbackRegistry")
            .field("strategies", &self.fallbacks())
            .finish()
    }
}
