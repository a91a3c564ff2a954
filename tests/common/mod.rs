//! Common test utilities
//!
//! Provides reusable fixtures and operation doubles shared by the
//! integration tests.

#![allow(dead_code)]

use playlist_resilience::error::NetworkErrorType;
use playlist_resilience::{CircuitBreakerConfig, FaultError, RetryPolicy};
use rstest::fixture;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Breaker that opens after three failures and cools down in 100ms
#[fixture]
pub fn fast_breaker_config() -> CircuitBreakerConfig {
    CircuitBreakerConfig {
        failure_threshold: 3,
        reset_timeout: Duration::from_millis(100),
        ..Default::default()
    }
}

/// Retry policy with short delays for tests running on a paused clock
#[fixture]
pub fn quick_retry_policy() -> RetryPolicy {
    RetryPolicy::default()
        .with_max_retries(2)
        .with_base_delay(Duration::from_millis(10))
}

/// Operation double that fails a given number of times, then succeeds
#[derive(Clone, Default)]
pub struct FlakyOperation {
    calls: Arc<AtomicU32>,
    failures: u32,
}

impl FlakyOperation {
    pub fn failing_times(failures: u32) -> Self {
        Self {
            calls: Arc::new(AtomicU32::new(0)),
            failures,
        }
    }

    pub fn always_failing() -> Self {
        Self::failing_times(u32::MAX)
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    /// One invocation: a connection failure until the budget is spent
    pub fn call(&self) -> impl std::future::Future<Output = Result<u32, FaultError>> + Send + 'static {
        let calls = self.calls.clone();
        let failures = self.failures;
        async move {
            let call = calls.fetch_add(1, Ordering::SeqCst) + 1;
            if call <= failures {
                Err(FaultError::network(
                    NetworkErrorType::Connection,
                    format!("connection refused on call {call}"),
                ))
            } else {
                Ok(call)
            }
        }
    }
}

/// Tracks how many operations run at the same time
#[derive(Clone, Default)]
pub struct ConcurrencyProbe {
    current: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
}

impl ConcurrencyProbe {
    pub fn enter(&self) {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
    }

    pub fn exit(&self) {
        self.current.fetch_sub(1, Ordering::SeqCst);
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}
