//! Circuit breaker state machine tests

mod common;

use common::{fast_breaker_config, FlakyOperation};
use playlist_resilience::error::NetworkErrorType;
use playlist_resilience::error_recovery::{with_retry, CircuitBreakerRegistry};
use playlist_resilience::{
    CallOutcome, CircuitBreaker, CircuitBreakerConfig, CircuitState, FaultError, RetryPolicy,
};
use rstest::rstest;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tokio::time::Instant;

async fn fail_times(breaker: &CircuitBreaker, times: u32) {
    for _ in 0..times {
        let outcome = breaker
            .execute(|| async {
                Err::<(), _>(FaultError::network(NetworkErrorType::Connection, "refused"))
            })
            .await;
        assert!(matches!(outcome, CallOutcome::Failed(_)));
    }
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn test_opens_after_threshold_consecutive_failures(fast_breaker_config: CircuitBreakerConfig) {
    let breaker = CircuitBreaker::new("catalog", fast_breaker_config);

    fail_times(&breaker, 2).await;
    assert_eq!(breaker.state(), CircuitState::Closed);

    fail_times(&breaker, 1).await;
    assert_eq!(breaker.state(), CircuitState::Open);
    assert_eq!(breaker.status().stats.circuit_open_count, 1);
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn test_success_resets_failure_streak(fast_breaker_config: CircuitBreakerConfig) {
    let breaker = CircuitBreaker::new("catalog", fast_breaker_config);

    fail_times(&breaker, 2).await;
    let outcome = breaker.execute(|| async { Ok::<_, FaultError>(1) }).await;
    assert!(outcome.is_success());
    assert_eq!(breaker.status().failure_count, 0);

    fail_times(&breaker, 2).await;
    assert_eq!(breaker.state(), CircuitState::Closed);
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn test_open_circuit_never_invokes_operation(fast_breaker_config: CircuitBreakerConfig) {
    let breaker = CircuitBreaker::new("catalog", fast_breaker_config);
    let operation = FlakyOperation::always_failing();

    for _ in 0..3 {
        breaker.execute(|| operation.call()).await;
    }
    assert_eq!(operation.calls(), 3);

    let outcome = breaker.execute(|| operation.call()).await;
    match outcome {
        CallOutcome::CircuitOpen { breaker: name, retry_in } => {
            assert_eq!(name, "catalog");
            assert!(retry_in <= Duration::from_millis(100));
        }
        other => panic!("expected CircuitOpen, got {other:?}"),
    }
    assert_eq!(operation.calls(), 3);
    assert_eq!(breaker.status().stats.rejected_calls, 1);
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn test_rejected_call_uses_fallback(fast_breaker_config: CircuitBreakerConfig) {
    let breaker = CircuitBreaker::new("catalog", fast_breaker_config);
    fail_times(&breaker, 3).await;

    let outcome = breaker
        .execute_with_fallback(
            || async { Ok::<_, FaultError>("live") },
            |error| async move {
                assert!(error.is_circuit_open());
                Ok("cached")
            },
        )
        .await;

    assert!(matches!(outcome, CallOutcome::Fallback("cached")));
    assert_eq!(breaker.status().stats.fallback_calls, 1);
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn test_half_open_success_closes(fast_breaker_config: CircuitBreakerConfig) {
    let breaker = CircuitBreaker::new("catalog", fast_breaker_config);
    fail_times(&breaker, 3).await;
    assert!(breaker.time_until_half_open().is_some());

    tokio::time::advance(Duration::from_millis(101)).await;

    let outcome = breaker.execute(|| async { Ok::<_, FaultError>(7) }).await;
    assert!(matches!(outcome, CallOutcome::Success(7)));

    let status = breaker.status();
    assert_eq!(status.state, CircuitState::Closed);
    assert_eq!(status.failure_count, 0);
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn test_half_open_failure_reopens(fast_breaker_config: CircuitBreakerConfig) {
    let breaker = CircuitBreaker::new("catalog", fast_breaker_config);
    fail_times(&breaker, 3).await;

    tokio::time::advance(Duration::from_millis(101)).await;
    fail_times(&breaker, 1).await;

    assert_eq!(breaker.state(), CircuitState::Open);
    assert_eq!(breaker.status().stats.circuit_open_count, 2);

    // Cool-down restarts from the trial failure
    let outcome = breaker.execute(|| async { Ok::<_, FaultError>(()) }).await;
    assert!(outcome.is_circuit_open());
}

#[tokio::test(start_paused = true)]
async fn test_half_open_admits_single_trial() {
    let breaker = CircuitBreaker::new(
        "catalog",
        CircuitBreakerConfig {
            failure_threshold: 1,
            reset_timeout: Duration::from_millis(50),
            ..Default::default()
        },
    );
    fail_times(&breaker, 1).await;
    tokio::time::advance(Duration::from_millis(60)).await;

    let (release, wait) = tokio::sync::oneshot::channel::<()>();
    let trial = breaker.execute(|| async move {
        let _ = wait.await;
        Ok::<_, FaultError>("trial")
    });
    let second = async {
        tokio::task::yield_now().await;
        let outcome = breaker.execute(|| async { Ok::<_, FaultError>("second") }).await;
        let _ = release.send(());
        outcome
    };

    let (trial, second) = tokio::join!(trial, second);
    assert!(matches!(trial, CallOutcome::Success("trial")));
    match second {
        CallOutcome::CircuitOpen { retry_in, .. } => {
            assert_eq!(retry_in, Duration::from_millis(50))
        }
        other => panic!("expected rejection while trial in flight, got {other:?}"),
    }
    assert_eq!(breaker.state(), CircuitState::Closed);
}

#[tokio::test(start_paused = true)]
async fn test_retry_backs_off_while_half_open_trial_in_flight() {
    let breaker = CircuitBreaker::new(
        "catalog",
        CircuitBreakerConfig {
            failure_threshold: 1,
            reset_timeout: Duration::from_millis(50),
            ..Default::default()
        },
    );
    fail_times(&breaker, 1).await;
    tokio::time::advance(Duration::from_millis(60)).await;

    let (release, wait) = tokio::sync::oneshot::channel::<()>();
    let trial = breaker.execute(|| async move {
        let _ = wait.await;
        Ok::<_, FaultError>("trial")
    });
    let attempts = AtomicU32::new(0);
    let retried = async {
        tokio::task::yield_now().await;
        let breaker = &breaker;
        let attempts = &attempts;
        let start = Instant::now();
        let result = with_retry(
            move || {
                attempts.fetch_add(1, Ordering::SeqCst);
                async move {
                    breaker
                        .execute(|| async { Ok::<_, FaultError>("retried") })
                        .await
                        .into_result()
                }
            },
            RetryPolicy::network(),
            None,
        )
        .await;
        let waited = start.elapsed();
        let _ = release.send(());
        (result, waited)
    };

    let (trial, (result, waited)) = tokio::join!(trial, retried);
    assert!(trial.is_success());

    let error = result.unwrap_err();
    assert!(error.is_circuit_open());
    assert_eq!(error.retry_after(), Some(Duration::from_millis(50)));
    assert_eq!(attempts.load(Ordering::SeqCst), 4);
    // Three retries, each at least the 100ms floor
    assert!(waited >= Duration::from_millis(300), "waited {waited:?}");
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn test_reset_is_idempotent(fast_breaker_config: CircuitBreakerConfig) {
    let breaker = CircuitBreaker::new("catalog", fast_breaker_config);
    fail_times(&breaker, 3).await;

    breaker.reset();
    let first = breaker.status();
    breaker.reset();
    let second = breaker.status();

    assert_eq!(first.state, CircuitState::Closed);
    assert_eq!(first.state, second.state);
    assert_eq!(first.failure_count, second.failure_count);
    assert_eq!(first.stats, second.stats);
    assert_eq!(second.stats.failed_calls, 3);
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn test_transitions_are_broadcast(fast_breaker_config: CircuitBreakerConfig) {
    let breaker = CircuitBreaker::new("catalog", fast_breaker_config);
    let mut events = breaker.subscribe();

    fail_times(&breaker, 3).await;
    tokio::time::advance(Duration::from_millis(101)).await;
    breaker.execute(|| async { Ok::<_, FaultError>(()) }).await;

    let opened = events.recv().await.expect("open event");
    assert_eq!(opened.breaker, "catalog");
    assert_eq!(opened.previous_state, CircuitState::Closed);
    assert_eq!(opened.new_state, CircuitState::Open);

    let half_open = events.recv().await.expect("half-open event");
    assert_eq!(half_open.new_state, CircuitState::HalfOpen);

    let closed = events.recv().await.expect("close event");
    assert_eq!(closed.previous_state, CircuitState::HalfOpen);
    assert_eq!(closed.new_state, CircuitState::Closed);
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn test_registry_shares_breakers_by_name(fast_breaker_config: CircuitBreakerConfig) {
    let registry = CircuitBreakerRegistry::new(fast_breaker_config);

    let first = registry.get_breaker("catalog");
    let second = registry.get_breaker("catalog");
    assert!(std::sync::Arc::ptr_eq(&first, &second));
    assert!(registry.get("search").is_none());

    fail_times(&first, 3).await;
    assert_eq!(registry.all_statuses()["catalog"].state, CircuitState::Open);

    registry.reset_all();
    assert_eq!(second.state(), CircuitState::Closed);
}
