//! Timeout race between a primary operation and a deadline
//!
//! The primary operation runs as its own tokio task. When the deadline wins the
//! task is detached, not cancelled: it runs to completion in the background and
//! its result is discarded. A panic in the detached task is contained by the
//! runtime and never reaches the caller.

use crate::error::{FaultError, OperationContext, Result};
use serde::Serialize;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Value produced by a timeout race
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimeoutResult<T> {
    pub value: T,
    /// The deadline fired before the primary operation settled
    pub timed_out: bool,
    /// The value came from the fallback
    pub used_fallback: bool,
}

/// Fallback type used when a race carries none
pub(crate) type NoTimeoutFallback<T> = fn(FaultError, OperationContext) -> std::future::Ready<Result<T>>;

/// Race `operation` against `timeout`, failing with a timeout error when the
/// deadline wins
pub async fn execute_with_timeout<T, E, F, Fut>(
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
    race(
        operation,
        timeout,
        None::<NoTimeoutFallback<T>>,
        context.unwrap_or_default(),
    )
    .await
}

/// Race `operation` against `timeout`; when the deadline wins, answer with
/// `fallback(timeout_error, context)`
///
/// If the fallback fails too, the timeout error is returned, not the
/// fallback's.
pub async fn execute_with_timeout_fallback<T, E, F, Fut, G, GFut>(
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
    race(operation, timeout, Some(fallback), context.unwrap_or_default()).await
}

pub(crate) async fn race<T, E, F, Fut, G, GFut>(
    operation: F,
    timeout: Duration,
    fallback: Option<G>,
    context: OperationContext,
) -> Result<TimeoutResult<T>>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = std::result::Result<T, E>> + Send + 'static,
    T: Send + 'static,
    E: Into<FaultError> + Send + 'static,
    G: FnOnce(FaultError, OperationContext) -> GFut,
    GFut: Future<Output = Result<T>>,
{
    let abandoned = Arc::new(AtomicBool::new(false));
    let primary = operation();
    let mut handle = {
        let abandoned = abandoned.clone();
        tokio::spawn(async move {
            let outcome = primary.await;
            if abandoned.load(Ordering::Acquire) {
                debug!("Discarding result of operation that lost its timeout race");
            }
            outcome
        })
    };

    match tokio::time::timeout(timeout, &mut handle).await {
        Ok(joined) => {
            let value = joined
                .map_err(FaultError::from)?
                .map_err(Into::<FaultError>::into)?;
            Ok(TimeoutResult {
                value,
                timed_out: false,
                used_fallback: false,
            })
        }
        Err(_) => {
            abandoned.store(true, Ordering::Release);
            // Dropping the handle detaches the task
            drop(handle);

            let name = if context.operation.is_empty() {
                "operation"
            } else {
                context.operation.as_str()
            };
            let timeout_error = FaultError::timeout(format!(
                "Operation '{}' timed out after {}ms",
                name,
                timeout.as_millis()
            ))
            .with_context(context.clone());
            warn!(
                operation = %name,
                timeout_ms = timeout.as_millis() as u64,
                "Operation timed out"
            );

            let Some(fallback) = fallback else {
                return Err(timeout_error);
            };

            match fallback(timeout_error.clone(), context).await {
                Ok(value) => Ok(TimeoutResult {
                    value,
                    timed_out: true,
                    used_fallback: true,
                }),
                Err(fallback_error) => {
                    warn!(
                        operation = %timeout_error.context().operation,
                        error = %fallback_error,
                        "Fallback also failed after timeout"
                    );
                    Err(timeout_error)
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCategory;

    #[tokio::test(start_paused = true)]
    async fn test_fast_operation_wins() {
        let result = execute_with_timeout(
            || async { Ok::<_, FaultError>("done") },
            Duration::from_millis(100),
            None,
        )
        .await
        .expect("primary result");

        assert_eq!(result.value, "done");
        assert!(!result.timed_out);
        assert!(!result.used_fallback);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_without_fallback() {
        let error = execute_with_timeout(
            || async {
                tokio::time::sleep(Duration::from_secs(1)).await;
                Ok::<_, FaultError>(1)
            },
            Duration::from_millis(100),
            Some(OperationContext::new("catalog", "fetch_tracks")),
        )
        .await
        .unwrap_err();

        assert!(error.is_timeout());
        assert_eq!(error.category(), ErrorCategory::Network);
        assert!(error.message().contains("timed out"));
        assert_eq!(error.context().operation, "fetch_tracks");
    }

    #[tokio::test(start_paused = true)]
    async fn test_panicking_primary_is_contained() {
        let error = execute_with_timeout(
            || async {
                if true {
                    panic!("primary exploded");
                }
                Ok::<u32, FaultError>(1)
            },
            Duration::from_millis(100),
            None,
        )
        .await
        .unwrap_err();

        assert_eq!(error.code(), crate::error::ErrorCode::TaskAborted);
    }
}
