//! Per-stage timeout and retry
//!
//! Each attempt runs under the stage timeout; an elapsed timeout drops the
//! attempt's future (cancelling the in-flight call) and counts as a
//! transient failure. Transient failures back off exponentially until the
//! attempt budget is spent. Anything else returns at once.

use crate::adapters::StageError;
use crate::config::StagePolicy;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Why the retry loop stopped
#[derive(Debug, Clone)]
pub struct RetryFailure {
    pub error: StageError,
    pub attempts: u32,
}

/// Run `operation` under `policy`
///
/// `on_retry(attempt, backoff, error)` is called before each backoff sleep,
/// with the 1-based number of the attempt that just failed.
pub async fn retry_with_backoff<T, F, Fut, R>(
    stage: &str,
    policy: &StagePolicy,
    mut on_retry: R,
    mut operation: F,
) -> Result<(T, u32), RetryFailure>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, StageError>>,
    R: FnMut(u32, Duration, &StageError),
{
    let timeout = policy.timeout();
    let mut attempt = 0u32;

    loop {
        attempt += 1;

        let result = match tokio::time::timeout(timeout, operation(attempt)).await {
            Ok(result) => result,
            Err(_) => Err(StageError::Timeout(timeout)),
        };

        let error = match result {
            Ok(value) => {
                if attempt > 1 {
                    debug!(stage, attempt, "Stage succeeded after retry");
                }
                return Ok((value, attempt));
            }
            Err(error) => error,
        };

        if !error.is_transient() {
            debug!(stage, attempt, cause = error.code(), "Permanent stage failure");
            return Err(RetryFailure {
                error,
                attempts: attempt,
            });
        }

        if attempt >= policy.max_attempts {
            warn!(
                stage,
                attempts = attempt,
                cause = error.code(),
                "Retry budget exhausted"
            );
            return Err(RetryFailure {
                error,
                attempts: attempt,
            });
        }

        let backoff = policy.backoff_after(attempt);
        warn!(
            stage,
            attempt,
            backoff_ms = backoff.as_millis() as u64,
            cause = %error,
            "Transient stage failure, retrying"
        );
        on_retry(attempt, backoff, &error);
        tokio::time::sleep(backoff).await;
    }
}
