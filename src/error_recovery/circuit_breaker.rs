//! Circuit breaker protecting a single named resource
//!
//! A breaker counts consecutive failures of the operations it protects. Once the
//! streak reaches the configured threshold the circuit opens and calls are
//! rejected without running the operation until the reset timeout has elapsed
//! since the last failure. The next call after the cool-down is admitted as a
//! half-open trial: success closes the circuit, failure re-opens it.

use crate::error::{FaultError, Result};
use crate::utils::safe_mutex_lock;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::Instant;
use tracing::{debug, info, warn};

const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Retry hint for calls rejected while the half-open trial slots are taken
const HALF_OPEN_RETRY_HINT: Duration = Duration::from_millis(100);

/// Circuit breaker states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CircuitState {
    /// Circuit is closed - normal operation
    Closed,
    /// Circuit is open - operations blocked
    Open,
    /// Circuit is half-open - testing if the resource recovered
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half-open",
        };
        f.write_str(name)
    }
}

/// Circuit breaker configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before the circuit opens
    pub failure_threshold: u32,
    /// Cool-down after the last failure before a trial call is admitted
    #[serde(with = "humantime_serde")]
    pub reset_timeout: Duration,
    /// Window for windowed failure counting; reserved, not used for counting yet
    #[serde(with = "humantime_serde")]
    pub monitoring_period: Duration,
    /// Trial calls admitted concurrently while half-open
    pub half_open_max_calls: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout: Duration::from_secs(60),
            monitoring_period: Duration::from_secs(10),
            half_open_max_calls: 1,
        }
    }
}

/// Cumulative call statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircuitBreakerStats {
    pub total_calls: u64,
    pub successful_calls: u64,
    pub failed_calls: u64,
    /// Number of times the circuit transitioned to open
    pub circuit_open_count: u64,
    /// Calls rejected without running the operation
    pub rejected_calls: u64,
    /// Calls answered by a fallback
    pub fallback_calls: u64,
}

/// Point-in-time view of a breaker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CircuitBreakerStatus {
    pub name: String,
    pub state: CircuitState,
    pub failure_count: u32,
    pub success_count: u32,
    pub last_failure: Option<DateTime<Utc>>,
    pub stats: CircuitBreakerStats,
    pub config: CircuitBreakerConfig,
}

/// State transition notification
#[derive(Debug, Clone, Serialize)]
pub struct CircuitBreakerEvent {
    pub breaker: String,
    pub previous_state: CircuitState,
    pub new_state: CircuitState,
    pub timestamp: DateTime<Utc>,
    pub context: String,
}

/// Result of a protected call
///
/// Callers branch on the tag instead of catching control-flow errors;
/// [`CallOutcome::into_result`] converts back at the outermost boundary.
#[derive(Debug)]
pub enum CallOutcome<T> {
    /// The primary operation succeeded
    Success(T),
    /// The primary operation failed or was rejected and a fallback answered
    Fallback(T),
    /// The circuit rejected the call and no fallback was supplied
    CircuitOpen { breaker: String, retry_in: Duration },
    /// The primary operation lost a timeout race
    TimedOut(FaultError),
    /// The primary operation (or its fallback) failed
    Failed(FaultError),
}

impl<T> CallOutcome<T> {
    pub fn into_result(self) -> Result<T> {
        match self {
            CallOutcome::Success(value) | CallOutcome::Fallback(value) => Ok(value),
            CallOutcome::CircuitOpen { breaker, retry_in } => {
                Err(FaultError::circuit_open(&breaker, retry_in))
            }
            CallOutcome::TimedOut(error) | CallOutcome::Failed(error) => Err(error),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, CallOutcome::Success(_))
    }

    pub fn used_fallback(&self) -> bool {
        matches!(self, CallOutcome::Fallback(_))
    }

    pub fn is_circuit_open(&self) -> bool {
        matches!(self, CallOutcome::CircuitOpen { .. })
    }

    pub fn is_timed_out(&self) -> bool {
        matches!(self, CallOutcome::TimedOut(_))
    }

    pub fn error(&self) -> Option<&FaultError> {
        match self {
            CallOutcome::TimedOut(error) | CallOutcome::Failed(error) => Some(error),
            _ => None,
        }
    }
}

/// Fallback type used when a call carries none
pub(crate) type NoFallback<T> = fn(FaultError) -> std::future::Ready<Result<T>>;

enum Admission {
    Allowed { trial: bool },
    Rejected { retry_in: Duration },
}

struct BreakerState {
    current_state: CircuitState,
    failure_count: u32,
    success_count: u32,
    last_failure: Option<Instant>,
    last_failure_at: Option<DateTime<Utc>>,
    half_open_in_flight: u32,
    stats: CircuitBreakerStats,
}

/// Circuit breaker implementation
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    state: Mutex<BreakerState>,
    events: broadcast::Sender<CircuitBreakerEvent>,
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("state", &self.state())
            .finish()
    }
}

/// Admission slot of a half-open trial; gives the slot back if the call is
/// dropped before its outcome is recorded.
struct TrialSlot<'a> {
    breaker: &'a CircuitBreaker,
    recorded: bool,
}

impl TrialSlot<'_> {
    fn finish(mut self) {
        self.recorded = true;
    }
}

impl Drop for TrialSlot<'_> {
    fn drop(&mut self) {
        if self.recorded {
            return;
        }
        let mut state = self.breaker.lock();
        if state.current_state == CircuitState::HalfOpen {
            state.half_open_in_flight = state.half_open_in_flight.saturating_sub(1);
        }
        debug!(breaker = %self.breaker.name, "Half-open trial dropped before completion");
    }
}

impl CircuitBreaker {
    /// Create new circuit breaker
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            name: name.into(),
            config,
            state: Mutex::new(BreakerState {
                current_state: CircuitState::Closed,
                failure_count: 0,
                success_count: 0,
                last_failure: None,
                last_failure_at: None,
                half_open_in_flight: 0,
                stats: CircuitBreakerStats::default(),
            }),
            events,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    pub fn state(&self) -> CircuitState {
        self.lock().current_state
    }

    /// Receive state transitions of this breaker
    pub fn subscribe(&self) -> broadcast::Receiver<CircuitBreakerEvent> {
        self.events.subscribe()
    }

    /// Run `operation` under the breaker
    pub async fn execute<T, E, F, Fut>(&self, operation: F) -> CallOutcome<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: Into<FaultError>,
    {
        self.run(operation, None::<NoFallback<T>>).await
    }

    /// Run `operation` under the breaker, answering with `fallback` when the
    /// call is rejected or the operation fails
    pub async fn execute_with_fallback<T, E, F, Fut, G, GFut>(
        &self,
        operation: F,
        fallback: G,
    ) -> CallOutcome<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: Into<FaultError>,
        G: FnOnce(FaultError) -> GFut,
        GFut: Future<Output = Result<T>>,
    {
        self.run(operation, Some(fallback)).await
    }

    pub(crate) async fn run<T, E, F, Fut, G, GFut>(
        &self,
        operation: F,
        fallback: Option<G>,
    ) -> CallOutcome<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: Into<FaultError>,
        G: FnOnce(FaultError) -> GFut,
        GFut: Future<Output = Result<T>>,
    {
        let trial = match self.admit() {
            Admission::Allowed { trial } => trial,
            Admission::Rejected { retry_in } => {
                debug!(breaker = %self.name, ?retry_in, "Circuit open, rejecting call");
                return match fallback {
                    Some(fallback) => {
                        self.run_fallback(fallback, FaultError::circuit_open(&self.name, retry_in))
                            .await
                    }
                    None => CallOutcome::CircuitOpen {
                        breaker: self.name.clone(),
                        retry_in,
                    },
                };
            }
        };

        let slot = trial.then(|| TrialSlot {
            breaker: self,
            recorded: false,
        });

        let outcome = operation().await;
        match outcome {
            Ok(value) => {
                self.record_success(trial);
                if let Some(slot) = slot {
                    slot.finish();
                }
                CallOutcome::Success(value)
            }
            Err(err) => {
                let error: FaultError = err.into();
                self.record_failure(trial, &error);
                if let Some(slot) = slot {
                    slot.finish();
                }
                match fallback {
                    Some(fallback) => self.run_fallback(fallback, error).await,
                    None => CallOutcome::Failed(error),
                }
            }
        }
    }

    async fn run_fallback<T, G, GFut>(&self, fallback: G, error: FaultError) -> CallOutcome<T>
    where
        G: FnOnce(FaultError) -> GFut,
        GFut: Future<Output = Result<T>>,
    {
        match fallback(error).await {
            Ok(value) => {
                self.lock().stats.fallback_calls += 1;
                debug!(breaker = %self.name, "Fallback answered call");
                CallOutcome::Fallback(value)
            }
            Err(fallback_error) => {
                warn!(breaker = %self.name, error = %fallback_error, "Fallback failed");
                CallOutcome::Failed(fallback_error)
            }
        }
    }

    fn admit(&self) -> Admission {
        let mut state = self.lock();
        state.stats.total_calls += 1;

        match state.current_state {
            CircuitState::Closed => Admission::Allowed { trial: false },
            CircuitState::Open => {
                let elapsed = state
                    .last_failure
                    .map(|at| at.elapsed())
                    .unwrap_or(self.config.reset_timeout);
                if elapsed < self.config.reset_timeout {
                    state.stats.rejected_calls += 1;
                    Admission::Rejected {
                        retry_in: self.config.reset_timeout - elapsed,
                    }
                } else {
                    self.transition(&mut state, CircuitState::HalfOpen, "reset timeout elapsed");
                    state.half_open_in_flight = 1;
                    Admission::Allowed { trial: true }
                }
            }
            CircuitState::HalfOpen => {
                if state.half_open_in_flight < self.config.half_open_max_calls.max(1) {
                    state.half_open_in_flight += 1;
                    Admission::Allowed { trial: true }
                } else {
                    state.stats.rejected_calls += 1;
                    Admission::Rejected {
                        retry_in: HALF_OPEN_RETRY_HINT.min(self.config.reset_timeout),
                    }
                }
            }
        }
    }

    fn record_success(&self, trial: bool) {
        let mut state = self.lock();
        state.stats.successful_calls += 1;
        state.success_count += 1;
        if trial {
            state.half_open_in_flight = state.half_open_in_flight.saturating_sub(1);
        }

        match state.current_state {
            CircuitState::HalfOpen => {
                self.transition(&mut state, CircuitState::Closed, "trial call succeeded");
                info!(breaker = %self.name, "Circuit breaker closed after successful recovery");
            }
            CircuitState::Closed => {
                state.failure_count = 0;
            }
            CircuitState::Open => {
                debug!(breaker = %self.name, "Success recorded for a call admitted before the circuit opened");
            }
        }
    }

    fn record_failure(&self, trial: bool, error: &FaultError) {
        let mut state = self.lock();
        state.stats.failed_calls += 1;
        state.failure_count += 1;
        state.last_failure = Some(Instant::now());
        state.last_failure_at = Some(Utc::now());
        if trial {
            state.half_open_in_flight = state.half_open_in_flight.saturating_sub(1);
        }

        debug!(
            breaker = %self.name,
            failures = state.failure_count,
            threshold = self.config.failure_threshold,
            category = %error.category(),
            "Failure recorded"
        );

        if state.current_state != CircuitState::Open
            && state.failure_count >= self.config.failure_threshold
        {
            let previous = state.current_state;
            self.transition(&mut state, CircuitState::Open, "failure threshold reached");
            state.stats.circuit_open_count += 1;
            warn!(
                breaker = %self.name,
                failures = state.failure_count,
                from = %previous,
                "Circuit breaker opened"
            );
        }
    }

    /// Snapshot of state, counters and stats
    pub fn status(&self) -> CircuitBreakerStatus {
        let state = self.lock();
        CircuitBreakerStatus {
            name: self.name.clone(),
            state: state.current_state,
            failure_count: state.failure_count,
            success_count: state.success_count,
            last_failure: state.last_failure_at,
            stats: state.stats.clone(),
            config: self.config.clone(),
        }
    }

    /// Remaining cool-down while open
    pub fn time_until_half_open(&self) -> Option<Duration> {
        let state = self.lock();
        if state.current_state != CircuitState::Open {
            return None;
        }
        let elapsed = state.last_failure?.elapsed();
        Some(self.config.reset_timeout.saturating_sub(elapsed))
    }

    /// Force the breaker closed and clear its counters
    pub fn reset(&self) {
        let mut state = self.lock();
        if state.current_state != CircuitState::Closed {
            self.transition(&mut state, CircuitState::Closed, "manual reset");
        }
        state.failure_count = 0;
        state.success_count = 0;
        state.last_failure = None;
        state.last_failure_at = None;
        state.half_open_in_flight = 0;
        info!(breaker = %self.name, "Circuit breaker reset to closed state");
    }

    fn transition(&self, state: &mut BreakerState, new_state: CircuitState, context: &str) {
        let previous_state = state.current_state;
        state.current_state = new_state;
        state.half_open_in_flight = 0;
        if new_state == CircuitState::Closed {
            state.failure_count = 0;
            state.success_count = 0;
        }

        debug!(breaker = %self.name, from = %previous_state, to = %new_state, "State transition");

        // No receivers is fine
        let _ = self.events.send(CircuitBreakerEvent {
            breaker: self.name.clone(),
            previous_state,
            new_state,
            timestamp: Utc::now(),
            context: context.to_string(),
        });
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BreakerState> {
        safe_mutex_lock(&self.state, &self.name)
    }
}

/// Shared name → breaker registry
pub struct CircuitBreakerRegistry {
    breakers: RwLock<HashMap<String, Arc<CircuitBreaker>>>,
    default_config: CircuitBreakerConfig,
}

impl CircuitBreakerRegistry {
    pub fn new(default_config: CircuitBreakerConfig) -> Self {
        Self {
            breakers: RwLock::new(HashMap::new()),
            default_config,
        }
    }

    /// Get or lazily create the breaker for `name` with the default config
    pub fn get_breaker(&self, name: &str) -> Arc<CircuitBreaker> {
        self.get_breaker_with_config(name, self.default_config.clone())
    }

    /// Get or lazily create the breaker for `name`; `config` only applies on creation
    pub fn get_breaker_with_config(
        &self,
        name: &str,
        config: CircuitBreakerConfig,
    ) -> Arc<CircuitBreaker> {
        if let Some(breaker) = crate::utils::safe_read(&self.breakers, "breaker registry").get(name)
        {
            return breaker.clone();
        }

        let mut breakers = crate::utils::safe_write(&self.breakers, "breaker registry");
        breakers
            .entry(name.to_string())
            .or_insert_with(|| {
                info!("Created new circuit breaker for: {}", name);
                Arc::new(CircuitBreaker::new(name, config))
            })
            .clone()
    }

    /// Existing breaker for `name`, without creating one
    pub fn get(&self, name: &str) -> Option<Arc<CircuitBreaker>> {
        crate::utils::safe_read(&self.breakers, "breaker registry")
            .get(name)
            .cloned()
    }

    pub fn all_statuses(&self) -> HashMap<String, CircuitBreakerStatus> {
        crate::utils::safe_read(&self.breakers, "breaker registry")
            .iter()
            .map(|(name, breaker)| (name.clone(), breaker.status()))
            .collect()
    }

    pub fn reset_all(&self) {
        for breaker in crate::utils::safe_read(&self.breakers, "breaker registry").values() {
            breaker.reset();
        }
    }
}

impl Default for CircuitBreakerRegistry {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }
}
