//! Bounded retry with backoff.

use crate::config::RetryConfig;
use crate::error::{SyncError, SyncResult};
use tracing::{debug, warn};

/// Runs `attempt` until it succeeds, fails with a non-retryable error, or
/// `config.max_attempts` is reached.
///
/// The closure receives the 0-based attempt number, so callers can refresh
/// their inputs before a retry. The delay from [`RetryConfig::delay_for_attempt`]
/// is slept before every attempt but the first. Exhausting the attempts yields
/// [`SyncError::RetriesExhausted`] carrying the last error.
pub fn retry_with_backoff<T, F>(
    config: &RetryConfig,
    operation: &'static str,
    mut attempt: F,
) -> SyncResult<T>
where
    F: FnMut(u32) -> SyncResult<T>,
{
    let max_attempts = config.max_attempts.max(1);
    let mut n = 0;
    loop {
        if n > 0 {
            let delay = config.delay_for_attempt(n);
            debug!(operation, attempt = n, ?delay, "waiting before retry");
            std::thread::sleep(delay);
        }

        match attempt(n) {
            Ok(value) => return Ok(value),
            Err(err) if !err.is_retryable() => return Err(err),
            Err(err) => {
                warn!(operation, attempt = n, error = %err, "attempt failed");
                n += 1;
                if n >= max_attempts {
                    return Err(SyncError::RetriesExhausted {
                        operation,
                        attempts: n,
                        last: Box::new(err),
                    });
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn quick(max_attempts: u32) -> RetryConfig {
        RetryConfig::fixed(max_attempts, Duration::from_millis(1))
    }

    #[test]
    fn first_success_does_not_retry() {
        let mut calls = 0;
        let value = retry_with_backoff(&quick(5), "op", |_| {
            calls += 1;
            Ok(42)
        })
        .unwrap();
        assert_eq!(value, 42);
        assert_eq!(calls, 1);
    }

    #[test]
    fn retries_transient_errors_then_succeeds() {
        let mut seen = Vec::new();
        let value = retry_with_backoff(&quick(5), "op", |attempt| {
            seen.push(attempt);
            if attempt < 2 {
                Err(SyncError::Archive("busy".into()))
            } else {
                Ok("done")
            }
        })
        .unwrap();
        assert_eq!(value, "done");
        assert_eq!(seen, vec![0, 1, 2]);
    }

    #[test]
    fn stops_on_fatal_error() {
        let mut calls = 0;
        let err = retry_with_backoff::<(), _>(&quick(5), "op", |_| {
            calls += 1;
            Err(SyncError::Config("bad".into()))
        })
        .unwrap_err();
        assert_eq!(calls, 1);
        assert!(matches!(err, SyncError::Config(_)));
    }

    #[test]
    fn exhaustion_reports_attempts_and_last_error() {
        let mut calls = 0;
        let err = retry_with_backoff::<(), _>(&quick(3), "extract", |attempt| {
            calls += 1;
            Err(SyncError::Archive(format!("attempt {attempt}")))
        })
        .unwrap_err();
        assert_eq!(calls, 3);
        match err {
            SyncError::RetriesExhausted {
                operation,
                attempts,
                last,
            } => {
                assert_eq!(operation, "extract");
                assert_eq!(attempts, 3);
                assert_eq!(last.to_string(), "archive build failed: attempt 2");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn zero_attempts_still_runs_once() {
        let mut calls = 0;
        let _ = retry_with_backoff::<(), _>(&quick(0), "op", |_| {
            calls += 1;
            Err(SyncError::Timeout)
        });
        assert_eq!(calls, 1);
    }
}
