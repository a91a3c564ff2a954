//! Retry policies with exponential or linear backoff and jitter
//!
//! A [`RetryPolicy`] fixes the attempt budget, the delay schedule and the
//! predicate that decides whether a classified failure is worth another try.
//! [`RetryExecutor`] runs an operation under a policy and keeps statistics.
//! The auth, network and storage policies are fixed parameterisations of the
//! same executor.

use crate::error::{ErrorCategory, ErrorCode, FaultError, FaultKind, OAuthSignal, OperationContext, Result, StorageType};
use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::sleep;
use tracing::{debug, info, warn};

/// Decides whether to retry: `(failure, attempt_number, max_retries)`
pub type RetryPredicate = Arc<dyn Fn(&FaultError, u32, u32) -> bool + Send + Sync>;

/// Backoff strategies for retry delays
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackoffStrategy {
    /// `base * 2^attempt`
    Exponential,
    /// `base * (attempt + 1)`
    Linear,
}

/// Retry policy configuration
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Retries after the initial attempt
    pub max_retries: u32,
    #[serde(with = "humantime_serde")]
    pub base_delay: Duration,
    #[serde(with = "humantime_serde")]
    pub max_delay: Duration,
    pub backoff: BackoffStrategy,
    /// Symmetric jitter as a fraction of the computed delay
    pub jitter_fraction: f64,
    /// Floor applied after jitter
    #[serde(with = "humantime_serde")]
    pub min_delay: Duration,
    #[serde(skip, default = "default_predicate")]
    predicate: RetryPredicate,
}

fn default_predicate() -> RetryPredicate {
    Arc::new(default_retry_predicate)
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            backoff: BackoffStrategy::Exponential,
            jitter_fraction: 0.25,
            min_delay: Duration::from_millis(100),
            predicate: default_predicate(),
        }
    }
}

impl std::fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_retries", &self.max_retries)
            .field("base_delay", &self.base_delay)
            .field("max_delay", &self.max_delay)
            .field("backoff", &self.backoff)
            .field("jitter_fraction", &self.jitter_fraction)
            .field("min_delay", &self.min_delay)
            .field("predicate", &"<function>")
            .finish()
    }
}

impl RetryPolicy {
    /// Policy for OAuth and token calls
    pub fn auth() -> Self {
        Self {
            max_retries: 2,
            base_delay: Duration::from_millis(2000),
            max_delay: Duration::from_secs(10),
            ..Default::default()
        }
        .with_predicate(auth_retry_predicate)
    }

    /// Policy for calls to remote services
    pub fn network() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(8000),
            ..Default::default()
        }
        .with_predicate(network_retry_predicate)
    }

    /// Policy for filesystem and credential-store access
    pub fn storage() -> Self {
        Self {
            max_retries: 2,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(5),
            ..Default::default()
        }
        .with_predicate(storage_retry_predicate)
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    pub fn with_backoff(mut self, backoff: BackoffStrategy) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_jitter_fraction(mut self, fraction: f64) -> Self {
        self.jitter_fraction = fraction;
        self
    }

    pub fn with_min_delay(mut self, delay: Duration) -> Self {
        self.min_delay = delay;
        self
    }

    pub fn with_predicate<P>(mut self, predicate: P) -> Self
    where
        P: Fn(&FaultError, u32, u32) -> bool + Send + Sync + 'static,
    {
        self.predicate = Arc::new(predicate);
        self
    }

    /// Whether `error` observed on `attempt_number` (1-based) should be retried
    pub fn should_retry(&self, error: &FaultError, attempt_number: u32) -> bool {
        (self.predicate)(error, attempt_number, self.max_retries)
    }

    /// Delay before retry `attempt` (0-based), capped, without jitter
    pub fn base_delay_for(&self, attempt: u32) -> Duration {
        let scaled = match self.backoff {
            BackoffStrategy::Exponential => 2u32
                .checked_pow(attempt)
                .and_then(|factor| self.base_delay.checked_mul(factor)),
            BackoffStrategy::Linear => self.base_delay.checked_mul(attempt.saturating_add(1)),
        };
        scaled.map_or(self.max_delay, |delay| delay.min(self.max_delay))
    }

    /// Perturb `delay` by `jitter_fraction * (u - 0.5)` and apply the floor;
    /// `u` is expected in `[0, 1)`
    pub fn apply_jitter(&self, delay: Duration, u: f64) -> Duration {
        let fraction = self.jitter_fraction.clamp(0.0, 1.0);
        let delay_ms = delay.as_secs_f64() * 1000.0;
        let jittered_ms = delay_ms + delay_ms * fraction * (u.clamp(0.0, 1.0) - 0.5);
        let floor_ms = self.min_delay.as_secs_f64() * 1000.0;
        // Saturates instead of overflowing when the cap is near Duration::MAX
        Duration::try_from_secs_f64(jittered_ms.max(floor_ms) / 1000.0).unwrap_or(Duration::MAX)
    }

    /// Delay before retry `attempt` after `error`; an explicit `retry_after`
    /// hint replaces the computed delay, still subject to the floor
    pub fn delay_for(&self, attempt: u32, error: &FaultError) -> Duration {
        if let Some(retry_after) = error.retry_after() {
            return retry_after.max(self.min_delay);
        }
        let u: f64 = rand::thread_rng().gen();
        self.apply_jitter(self.base_delay_for(attempt), u)
    }
}

/// Retries whatever the taxonomy marks retryable
pub fn default_retry_predicate(error: &FaultError, _attempt: u32, _max_retries: u32) -> bool {
    error.should_retry()
}

/// Retries network failures, timeouts, 5xx and 429
pub fn network_retry_predicate(error: &FaultError, _attempt: u32, _max_retries: u32) -> bool {
    error.category() == ErrorCategory::Network
        || error.is_timeout()
        || error.is_server_error()
        || error.is_rate_limited()
}

/// Retries transient failures of an auth flow; of the OAuth signals only
/// `slow_down` is retried, and 400/401/403 never are
pub fn auth_retry_predicate(error: &FaultError, _attempt: u32, _max_retries: u32) -> bool {
    if let FaultKind::Authentication { oauth_signal, .. } = error.kind() {
        return *oauth_signal == Some(OAuthSignal::SlowDown);
    }
    if matches!(error.status_code(), Some(400 | 401 | 403)) {
        return false;
    }
    error.category() == ErrorCategory::Network || error.is_server_error()
}

/// Retries busy files and locked credential stores; never permission or
/// encryption failures
pub fn storage_retry_predicate(error: &FaultError, _attempt: u32, _max_retries: u32) -> bool {
    match error.kind() {
        FaultKind::Storage {
            storage_type,
            permission_like,
            ..
        } => {
            !*permission_like
                && *storage_type != StorageType::Encryption
                && !matches!(
                    error.code(),
                    ErrorCode::FileNotFound | ErrorCode::StorageFull
                )
        }
        _ => error.is_timeout(),
    }
}

/// Retry statistics
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RetryStats {
    /// Total operations attempted
    pub total_operations: u64,
    /// Successful operations (no retry needed)
    pub successful_first_attempt: u64,
    /// Successful operations (after retry)
    pub successful_after_retry: u64,
    /// Failed operations (all retries exhausted)
    pub failed_after_retries: u64,
    /// Failed operations the predicate declined to retry
    pub non_retryable_failures: u64,
    /// Total retry attempts
    pub total_retry_attempts: u64,
    /// Average retries per operation
    pub average_retries: f64,
    /// Last retry timestamp
    pub last_retry: Option<DateTime<Utc>>,
}

/// Retry executor
pub struct RetryExecutor {
    policy: RetryPolicy,
    stats: Arc<RwLock<RetryStats>>,
}

impl RetryExecutor {
    /// Create new retry executor
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            stats: Arc::new(RwLock::new(RetryStats::default())),
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Execute operation with retry policy
    ///
    /// Returns the last classified failure once the predicate declines or the
    /// retry budget is spent.
    pub async fn execute<T, E, F, Fut>(
        &self,
        mut operation: F,
        context: Option<&OperationContext>,
    ) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: Into<FaultError>,
    {
        self.stats.write().await.total_operations += 1;
        let operation_name = context.map(|c| c.operation.as_str()).unwrap_or("operation");
        let max_retries = self.policy.max_retries;
        let mut attempt: u32 = 0;

        loop {
            let error: FaultError = match operation().await {
                Ok(value) => {
                    let mut stats = self.stats.write().await;
                    if attempt == 0 {
                        stats.successful_first_attempt += 1;
                    } else {
                        stats.successful_after_retry += 1;
                    }
                    stats.average_retries =
                        stats.total_retry_attempts as f64 / stats.total_operations as f64;
                    drop(stats);

                    if attempt > 0 {
                        info!(
                            operation = operation_name,
                            retries = attempt,
                            "Operation succeeded after retry"
                        );
                    }
                    return Ok(value);
                }
                Err(err) => err.into(),
            };
            let error = match context {
                Some(ctx) if error.context().operation.is_empty() => error.with_context(ctx.clone()),
                _ => error,
            };

            if !self.policy.should_retry(&error, attempt + 1) {
                self.stats.write().await.non_retryable_failures += 1;
                debug!(
                    operation = operation_name,
                    category = %error.category(),
                    code = %error.code(),
                    "Error not retryable: {}",
                    error
                );
                return Err(error);
            }

            if attempt + 1 > max_retries {
                self.stats.write().await.failed_after_retries += 1;
                warn!(
                    operation = operation_name,
                    attempts = attempt + 1,
                    "Operation failed after {} retries: {}",
                    attempt,
                    error
                );
                return Err(error.with_retry_count(attempt, max_retries));
            }

            let delay = self.policy.delay_for(attempt, &error);
            {
                let mut stats = self.stats.write().await;
                stats.total_retry_attempts += 1;
                stats.last_retry = Some(Utc::now());
            }
            debug!(
                operation = operation_name,
                delay_ms = delay.as_millis() as u64,
                "Retrying after {:?} (attempt {}/{})",
                delay,
                attempt + 1,
                max_retries
            );

            sleep(delay).await;
            attempt += 1;
        }
    }

    /// Get retry statistics
    pub async fn get_stats(&self) -> RetryStats {
        self.stats.read().await.clone()
    }

    /// Reset statistics
    pub async fn reset_stats(&self) {
        *self.stats.write().await = RetryStats::default();
    }
}

/// Run `operation` under `policy`
pub async fn with_retry<T, E, F, Fut>(
    operation: F,
    policy: RetryPolicy,
    context: Option<&OperationContext>,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<T, E>>,
    E: Into<FaultError>,
{
    RetryExecutor::new(policy).execute(operation, context).await
}

/// Run an auth-flow call under [`RetryPolicy::auth`]
pub async fn retry_auth<T, E, F, Fut>(operation: F, context: Option<&OperationContext>) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<T, E>>,
    E: Into<FaultError>,
{
    with_retry(operation, RetryPolicy::auth(), context).await
}

/// Run a remote call under [`RetryPolicy::network`]
pub async fn retry_network_operation<T, E, F, Fut>(
    operation: F,
    context: Option<&OperationContext>,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<T, E>>,
    E: Into<FaultError>,
{
    with_retry(operation, RetryPolicy::network(), context).await
}

/// Run a storage access under [`RetryPolicy::storage`]
pub async fn retry_storage_operation<T, E, F, Fut>(
    operation: F,
    context: Option<&OperationContext>,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<T, E>>,
    E: Into<FaultError>,
{
    with_retry(operation, RetryPolicy::storage(), context).await
}

/// Like [`retry_storage_operation`], running `fallback` once when the storage
/// retries are exhausted; the fallback's own failure is returned if it fails too
///
/// Failures the storage policy declines to retry (permission, encryption,
/// missing file) are returned as is without running the fallback.
pub async fn retry_storage_operation_with_fallback<T, E, F, Fut, E2, G, GFut>(
    operation: F,
    fallback: G,
    context: Option<&OperationContext>,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<T, E>>,
    E: Into<FaultError>,
    G: FnOnce() -> GFut,
    GFut: Future<Output = std::result::Result<T, E2>>,
    E2: Into<FaultError>,
{
    let policy = RetryPolicy::storage();
    let max_retries = policy.max_retries;
    match with_retry(operation, policy.clone(), context).await {
        Ok(value) => Ok(value),
        Err(error) if !policy.should_retry(&error, max_retries + 1) => Err(error),
        Err(error) => {
            warn!(
                code = %error.code(),
                "Storage operation failed, trying fallback: {}",
                error
            );
            fallback().await.map_err(Into::<FaultError>::into)
        }
    }
}

/// Options of [`retry_batch`]
#[derive(Debug, Clone)]
pub struct BatchOptions {
    /// Operations run concurrently per chunk
    pub concurrency: usize,
    /// Abort after the first chunk containing an unrecoverable failure
    pub fail_fast: bool,
    pub policy: RetryPolicy,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            concurrency: 5,
            fail_fast: false,
            policy: RetryPolicy::default(),
        }
    }
}

/// Index-aligned outcome of a batch
#[derive(Debug)]
pub struct BatchResult<T> {
    pub results: Vec<Option<T>>,
    pub errors: Vec<Option<FaultError>>,
}

impl<T> BatchResult<T> {
    pub fn succeeded(&self) -> usize {
        self.results.iter().filter(|r| r.is_some()).count()
    }

    pub fn failed(&self) -> usize {
        self.errors.iter().filter(|e| e.is_some()).count()
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }
}

/// A fail-fast batch stopped on an unrecoverable failure
///
/// `partial` holds everything settled before the abort, index-aligned with
/// the input; operations of later chunks never ran and stay `None`.
#[derive(Debug)]
pub struct BatchAborted<T> {
    pub error: FaultError,
    pub partial: BatchResult<T>,
}

impl<T> std::fmt::Display for BatchAborted<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Batch aborted after {} of {} operations settled: {}",
            self.partial.succeeded() + self.partial.failed(),
            self.partial.len(),
            self.error
        )
    }
}

impl<T: std::fmt::Debug> std::error::Error for BatchAborted<T> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}

impl<T> From<BatchAborted<T>> for FaultError {
    fn from(aborted: BatchAborted<T>) -> Self {
        aborted.error
    }
}

/// Run `operations` in fixed-size concurrent chunks, each under the batch
/// retry policy
pub async fn retry_batch<T, E, F, Fut>(
    operations: Vec<F>,
    options: BatchOptions,
) -> std::result::Result<BatchResult<T>, BatchAborted<T>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<T, E>>,
    E: Into<FaultError>,
{
    let total = operations.len();
    let concurrency = options.concurrency.max(1);
    let executor = RetryExecutor::new(options.policy);
    let mut results: Vec<Option<T>> = (0..total).map(|_| None).collect();
    let mut errors: Vec<Option<FaultError>> = vec![None; total];

    debug!(total, concurrency, "Starting batch");

    let mut pending = operations.into_iter().enumerate().peekable();
    while pending.peek().is_some() {
        let chunk: Vec<_> = pending.by_ref().take(concurrency).collect();
        let executor = &executor;
        let runs = chunk
            .into_iter()
            .map(|(index, operation)| async move { (index, executor.execute(operation, None).await) });

        let mut first_failure = None;
        for (index, outcome) in futures::future::join_all(runs).await {
            match outcome {
                Ok(value) => results[index] = Some(value),
                Err(error) => {
                    if options.fail_fast && first_failure.is_none() {
                        first_failure = Some(error.clone());
                    }
                    errors[index] = Some(error);
                }
            }
        }

        if let Some(error) = first_failure {
            warn!(total, "Batch aborted on unrecoverable failure: {}", error);
            return Err(BatchAborted {
                error,
                partial: BatchResult { results, errors },
            });
        }
    }

    let batch = BatchResult { results, errors };
    info!(
        total,
        succeeded = batch.succeeded(),
        failed = batch.failed(),
        "Batch completed"
    );
    Ok(batch)
}
