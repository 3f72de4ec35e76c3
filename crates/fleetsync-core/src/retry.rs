// Copyright (C) 2025 The fleetsync Authors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Bounded retry with capped exponential backoff.
//!
//! Every adapter-database transaction runs through [`with_retry`]. Only
//! [`SyncError::Transient`] failures are re-attempted; connectivity loss,
//! constraint violations, and fatal errors return immediately so the processor
//! loop can react to them.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{Result, SyncError};
use crate::shutdown::sleep_cancellable;

/// Retry policy for database transactions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    /// Delay before the second attempt.
    pub base_delay: Duration,
    /// Upper bound for any single delay.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Delay to wait after the given (1-based) failed attempt.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

/// Run `op` until it succeeds, fails with a non-transient error, or the policy
/// runs out of attempts.
///
/// Exhausting the attempts yields [`SyncError::RetriesExhausted`] wrapping the
/// last transient error. Cancelling `shutdown` during a backoff returns that
/// transient error at once.
pub async fn with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    shutdown: &CancellationToken,
    operation: &str,
    mut op: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0u32;

    loop {
        attempt += 1;
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_transient() && attempt < max_attempts => {
                let delay = policy.delay_for(attempt);
                debug!(
                    operation = operation,
                    attempt = attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "Transient fault, retrying"
                );
                if !sleep_cancellable(shutdown, delay).await {
                    debug!(operation = operation, "Shutdown during retry backoff");
                    return Err(err);
                }
            }
            Err(err) if err.is_transient() => {
                warn!(
                    operation = operation,
                    attempts = attempt,
                    error = %err,
                    "Retry attempts exhausted"
                );
                return Err(SyncError::RetriesExhausted {
                    attempts: attempt,
                    source: Box::new(err),
                });
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ErrorClass, Resource};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn transient() -> SyncError {
        SyncError::Transient {
            message: "deadlock detected".to_string(),
        }
    }

    #[test]
    fn test_delay_is_exponential_and_capped() {
        let policy = RetryPolicy {
            max_attempts: 10,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(1000),
        };
        assert_eq!(policy.delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for(3), Duration::from_millis(400));
        assert_eq!(policy.delay_for(4), Duration::from_millis(800));
        assert_eq!(policy.delay_for(5), Duration::from_millis(1000));
        assert_eq!(policy.delay_for(40), Duration::from_millis(1000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_errors_are_retried_until_success() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result = with_retry(&RetryPolicy::default(), &CancellationToken::new(), "test", || {
            let counter = counter.clone();
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(transient())
                } else {
                    Ok(42)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_retries_escalate_as_database_outage() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let policy = RetryPolicy {
            max_attempts: 3,
            ..RetryPolicy::default()
        };

        let result: Result<()> = with_retry(&policy, &CancellationToken::new(), "test", || {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Err(transient()) }
        })
        .await;

        let err = result.unwrap_err();
        assert!(matches!(err, SyncError::RetriesExhausted { attempts: 3, .. }));
        assert_eq!(err.class(), ErrorClass::Connectivity(Resource::Database));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_non_transient_errors_are_not_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result: Result<()> = with_retry(&RetryPolicy::default(), &CancellationToken::new(), "test", || {
            counter.fetch_add(1, Ordering::SeqCst);
            async {
                Err(SyncError::ConstraintViolation {
                    constraint: "fk_log_records_devices".to_string(),
                    message: "violation".to_string(),
                })
            }
        })
        .await;

        assert!(matches!(
            result,
            Err(SyncError::ConstraintViolation { .. })
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_policy_none_runs_once() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result: Result<()> = with_retry(&RetryPolicy::none(), &CancellationToken::new(), "test", || {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Err(transient()) }
        })
        .await;

        assert!(matches!(
            result,
            Err(SyncError::RetriesExhausted { attempts: 1, .. })
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_shutdown_cuts_backoff_short() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let policy = RetryPolicy {
            max_attempts: 5,
            base_delay: Duration::from_secs(3600),
            max_delay: Duration::from_secs(3600),
        };
        let shutdown = CancellationToken::new();
        let trigger = shutdown.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let result: Result<()> = tokio::time::timeout(
            Duration::from_secs(5),
            with_retry(&policy, &shutdown, "test", || {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Err(transient()) }
            }),
        )
        .await
        .expect("backoff ignored shutdown");

        assert!(matches!(result, Err(SyncError::Transient { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
